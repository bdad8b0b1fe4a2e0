//! # weld-events
//!
//! Bounded event logging and restart-safe synchronization.
//!
//! - **EventLog**: fixed-capacity ring of sequence-tagged events, scoped to
//!   a per-instance emitter id
//! - **EventSynchronizer**: replays the producer's log after a restart and
//!   merges it with live events, without duplication or gaps

#![deny(unsafe_code)]

pub mod log;
pub mod sync;

pub use log::{DEFAULT_LOG_CAPACITY, EventLog, TaggedEvent};
pub use sync::{EventSynchronizer, LogFetchError, LogFetcher, SynchronizerConfig};
