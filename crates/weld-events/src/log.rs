//! Bounded, sequence-tagged event log.
//!
//! Each log instance draws a fresh [`EmitterId`] and assigns a
//! monotonically increasing sequence number to every registered event. The
//! buffer is a fixed-capacity ring — the oldest event is evicted first —
//! and is exposed as an ordered read-only snapshot for consumers that need
//! to replay what they missed.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use weld_core::EmitterId;

/// Default ring capacity.
pub const DEFAULT_LOG_CAPACITY: usize = 50;

/// An event tagged with its emitter instance and sequence number.
///
/// `seq` is strictly increasing per `emitter_id`, which makes replay across
/// producer restarts safe: a consumer can tell a stale duplicate from fresh
/// data by comparing emitter ids, never by a global sequence space.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaggedEvent {
    /// The producing log instance.
    pub emitter_id: EmitterId,
    /// Position in that instance's sequence, starting at 0.
    pub seq: u64,
    /// The event payload.
    pub payload: Value,
}

struct LogState {
    next_seq: u64,
    events: VecDeque<TaggedEvent>,
}

/// Fixed-capacity, push-only log of locally-produced events.
pub struct EventLog {
    emitter_id: EmitterId,
    capacity: usize,
    state: Mutex<LogState>,
}

impl EventLog {
    /// Create a log holding at most `capacity` events (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            emitter_id: EmitterId::new(),
            capacity: capacity.max(1),
            state: Mutex::new(LogState {
                next_seq: 0,
                events: VecDeque::new(),
            }),
        }
    }

    /// This instance's emitter id.
    #[must_use]
    pub fn emitter_id(&self) -> &EmitterId {
        &self.emitter_id
    }

    /// Maximum number of retained events.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tag and store an event, evicting the oldest at capacity.
    ///
    /// Returns the stored event.
    pub fn register(&self, payload: Value) -> TaggedEvent {
        let mut state = self.state.lock();
        let event = TaggedEvent {
            emitter_id: self.emitter_id.clone(),
            seq: state.next_seq,
            payload,
        };
        state.next_seq += 1;
        if state.events.len() == self.capacity {
            let _ = state.events.pop_front();
        }
        state.events.push_back(event.clone());
        event
    }

    /// Ordered snapshot of the retained events, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TaggedEvent> {
        self.state.lock().events.iter().cloned().collect()
    }

    /// Number of retained events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    /// Whether the log holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().events.is_empty()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn register_assigns_increasing_seq() {
        let log = EventLog::new(10);
        let a = log.register(json!({"n": 0}));
        let b = log.register(json!({"n": 1}));
        assert_eq!(a.seq, 0);
        assert_eq!(b.seq, 1);
        assert_eq!(a.emitter_id, b.emitter_id);
    }

    #[test]
    fn events_carry_this_logs_emitter_id() {
        let log = EventLog::new(10);
        let event = log.register(json!(1));
        assert_eq!(&event.emitter_id, log.emitter_id());
    }

    #[test]
    fn distinct_logs_have_distinct_emitters() {
        let a = EventLog::new(10);
        let b = EventLog::new(10);
        assert_ne!(a.emitter_id(), b.emitter_id());
    }

    #[test]
    fn snapshot_is_ordered_oldest_first() {
        let log = EventLog::new(10);
        for i in 0..5 {
            let _ = log.register(json!(i));
        }
        let snapshot = log.snapshot();
        assert_eq!(snapshot.len(), 5);
        for (i, event) in snapshot.iter().enumerate() {
            assert_eq!(event.seq, u64::try_from(i).unwrap());
        }
    }

    #[test]
    fn capacity_evicts_oldest() {
        let log = EventLog::new(3);
        for i in 0..5 {
            let _ = log.register(json!(i));
        }
        let snapshot = log.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].seq, 2, "oldest events are evicted first");
        assert_eq!(snapshot[2].seq, 4);
    }

    #[test]
    fn eviction_does_not_reset_seq() {
        let log = EventLog::new(2);
        for i in 0..10 {
            let _ = log.register(json!(i));
        }
        let event = log.register(json!(10));
        assert_eq!(event.seq, 10);
    }

    #[test]
    fn zero_capacity_clamped_to_one() {
        let log = EventLog::new(0);
        let _ = log.register(json!(1));
        let _ = log.register(json!(2));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn len_and_is_empty() {
        let log = EventLog::new(5);
        assert!(log.is_empty());
        let _ = log.register(json!(1));
        assert_eq!(log.len(), 1);
        assert!(!log.is_empty());
    }

    #[test]
    fn default_capacity() {
        let log = EventLog::default();
        assert_eq!(log.capacity(), DEFAULT_LOG_CAPACITY);
    }

    #[test]
    fn tagged_event_serde_roundtrip() {
        let log = EventLog::new(5);
        let event = log.register(json!({"kind": "interest", "item": "0xabc"}));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("emitterId"));
        assert!(json.contains("seq"));
        let back: TaggedEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let log = EventLog::new(5);
        let _ = log.register(json!(1));
        let snapshot = log.snapshot();
        let _ = log.register(json!(2));
        assert_eq!(snapshot.len(), 1, "snapshot must not track later writes");
    }
}
