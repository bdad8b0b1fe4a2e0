//! Cached, coalesced lookup of the remote session resource.
//!
//! Lookup is layered: the in-memory entry, then the persistent store, then
//! the remote fetch. The entry holding the *unawaited* shared fetch future
//! is installed under the slot lock before the fetch is first polled, so
//! every concurrent caller observes it. At most one outbound fetch runs at
//! a time, and callers arriving mid-fetch (or mid-retry, when the fetcher
//! retries) join the in-progress attempt.
//!
//! Freshness: `fresh_until` starts at the widest window the configuration
//! allows and only ever narrows — to the resource's own expiry for a
//! signed-in result, to a short fixed TTL for a signed-out result, and to
//! "already expired" for a failure, which is therefore never reused.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::fetch::{FetchError, SessionFetcher};
use crate::store::{SessionStore, StoredSession};
use crate::types::SessionState;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration & options
// ─────────────────────────────────────────────────────────────────────────────

/// Default freshness window for a signed-in session, in seconds.
pub const DEFAULT_POSITIVE_TTL_SECS: u64 = 300;
/// Default freshness window for a signed-out marker, in seconds.
pub const DEFAULT_NEGATIVE_TTL_SECS: u64 = 30;
/// Default persistent-store key.
pub const DEFAULT_STORE_KEY: &str = "weld.session";

/// A lookup that cannot settle within this many passes is a defect, not
/// steady state. Joining an in-flight fetch and re-checking its result
/// accounts for one extra pass; anything past that is logged.
const MAX_CONVERGENCE_PASSES: u32 = 4;

/// Configuration for the session cache.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCacheConfig {
    /// Freshness window for signed-in results in seconds (default: 300).
    #[serde(default = "default_positive_ttl_secs")]
    pub positive_ttl_secs: u64,
    /// Freshness window for signed-out results in seconds (default: 30).
    #[serde(default = "default_negative_ttl_secs")]
    pub negative_ttl_secs: u64,
    /// Key under which sessions are persisted (default: `weld.session`).
    #[serde(default = "default_store_key")]
    pub store_key: String,
}

fn default_positive_ttl_secs() -> u64 {
    DEFAULT_POSITIVE_TTL_SECS
}
fn default_negative_ttl_secs() -> u64 {
    DEFAULT_NEGATIVE_TTL_SECS
}
fn default_store_key() -> String {
    DEFAULT_STORE_KEY.to_owned()
}

impl Default for SessionCacheConfig {
    fn default() -> Self {
        Self {
            positive_ttl_secs: DEFAULT_POSITIVE_TTL_SECS,
            negative_ttl_secs: DEFAULT_NEGATIVE_TTL_SECS,
            store_key: DEFAULT_STORE_KEY.to_owned(),
        }
    }
}

/// Freshness requirements for one lookup.
#[derive(Clone, Copy, Debug, Default)]
pub struct GetSessionOptions {
    /// Require at least this much remaining freshness.
    pub min_fresh: Option<StdDuration>,
    /// Reject results fetched longer ago than this.
    pub max_age: Option<StdDuration>,
    /// Bypass memory and store; only a fetch performed for this lookup
    /// (or one joined in flight) is acceptable.
    pub no_cache: bool,
}

/// Where a lookup was answered from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionSource {
    /// A fetch performed (or joined) by this lookup.
    Remote,
    /// The settled in-memory entry.
    Memory,
    /// The persistent store.
    Store,
}

/// A served session lookup.
#[derive(Clone, Debug)]
pub struct SessionResponse {
    /// The session state.
    pub state: SessionState,
    /// Where the state came from.
    pub source: SessionSource,
    /// When the producing fetch started.
    pub requested_at: DateTime<Utc>,
    /// End of the freshness window.
    pub fresh_until: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Cache entry
// ─────────────────────────────────────────────────────────────────────────────

type FetchFuture = Shared<BoxFuture<'static, Result<SessionState, FetchError>>>;

#[derive(Clone)]
struct CacheEntry {
    requested_at: DateTime<Utc>,
    from_store: bool,
    /// Set once the fetch future has resolved; flipped only after
    /// `fresh_until` and `failed` hold their final values.
    settled: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
    fresh_until: Arc<Mutex<DateTime<Utc>>>,
    future: FetchFuture,
}

impl CacheEntry {
    fn settled(&self) -> bool {
        self.settled.load(Ordering::SeqCst)
    }

    fn failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    fn fresh_until(&self) -> DateTime<Utc> {
        *self.fresh_until.lock()
    }

    /// Narrow the freshness window; widening attempts never apply.
    fn narrow_fresh_until(&self, candidate: DateTime<Utc>) {
        let mut fresh_until = self.fresh_until.lock();
        *fresh_until = (*fresh_until).min(candidate);
    }

    fn satisfies(&self, options: &GetSessionOptions, now: DateTime<Utc>) -> bool {
        if !self.settled() || self.failed() || options.no_cache {
            return false;
        }
        let remaining = self.fresh_until() - now;
        if remaining <= Duration::zero() {
            return false;
        }
        if let Some(min_fresh) = options.min_fresh {
            if remaining < Duration::from_std(min_fresh).unwrap_or(Duration::MAX) {
                return false;
            }
        }
        if let Some(max_age) = options.max_age {
            if now - self.requested_at > Duration::from_std(max_age).unwrap_or(Duration::MAX) {
                return false;
            }
        }
        true
    }
}

enum Action {
    Hit(CacheEntry),
    Join(CacheEntry),
    ConsultStore,
    StartFetch,
}

struct Slot {
    entry: Option<CacheEntry>,
    /// Bumped on every install; lets a caller that dropped the lock detect
    /// that another caller changed the slot in the meantime.
    generation: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// SessionCache
// ─────────────────────────────────────────────────────────────────────────────

/// Caches the slow remote session fetch with freshness windows, in-flight
/// coalescing, and layered memory/store/remote lookup.
pub struct SessionCache {
    fetcher: Arc<dyn SessionFetcher>,
    store: Arc<dyn SessionStore>,
    config: SessionCacheConfig,
    slot: Mutex<Slot>,
}

impl SessionCache {
    /// Create a cache over `fetcher` and `store`.
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn SessionFetcher>,
        store: Arc<dyn SessionStore>,
        config: SessionCacheConfig,
    ) -> Self {
        Self {
            fetcher,
            store,
            config,
            slot: Mutex::new(Slot {
                entry: None,
                generation: 0,
            }),
        }
    }

    /// Look up the session, fetching remotely only when nothing cached
    /// satisfies `options`.
    pub async fn get_session(
        &self,
        options: &GetSessionOptions,
    ) -> Result<SessionResponse, FetchError> {
        let mut tried_store = false;
        for pass in 0..MAX_CONVERGENCE_PASSES {
            if pass > 2 {
                warn!(pass, "session lookup needed extra convergence passes");
            }
            let now = Utc::now();
            let (action, generation) = {
                let slot = self.slot.lock();
                let action = match &slot.entry {
                    Some(entry) if !entry.settled() => Action::Join(entry.clone()),
                    Some(entry) if entry.satisfies(options, now) => Action::Hit(entry.clone()),
                    _ if !options.no_cache && !tried_store => Action::ConsultStore,
                    _ => Action::StartFetch,
                };
                (action, slot.generation)
            };

            match action {
                Action::Hit(entry) => {
                    let state = entry.future.clone().await?;
                    let source = if entry.from_store {
                        SessionSource::Store
                    } else {
                        SessionSource::Memory
                    };
                    return Ok(respond(&entry, state, source));
                }
                Action::Join(entry) => {
                    // Joined callers share the in-flight outcome, including
                    // its failure; a success is re-checked against the
                    // caller's own freshness options on the next pass.
                    let _ = entry.future.clone().await?;
                }
                Action::ConsultStore => {
                    tried_store = true;
                    if let Some(response) = self.try_store(options, now, generation).await {
                        return Ok(response);
                    }
                    if let Some(entry) = self.install_fetch(Utc::now(), generation) {
                        let state = entry.future.clone().await?;
                        return Ok(respond(&entry, state, SessionSource::Remote));
                    }
                }
                Action::StartFetch => {
                    if let Some(entry) = self.install_fetch(now, generation) {
                        let state = entry.future.clone().await?;
                        return Ok(respond(&entry, state, SessionSource::Remote));
                    }
                }
            }
        }
        warn!("session lookup exceeded {MAX_CONVERGENCE_PASSES} passes");
        Err(FetchError::CacheDiverged)
    }

    /// Narrow the current entry's freshness window.
    ///
    /// Narrowing to an earlier time always applies; widening to a later
    /// time never does. No-op without a current entry.
    pub fn narrow_fresh_until(&self, until: DateTime<Utc>) {
        if let Some(entry) = &self.slot.lock().entry {
            entry.narrow_fresh_until(until);
        }
    }

    /// End of the current entry's freshness window, if any.
    #[must_use]
    pub fn fresh_until(&self) -> Option<DateTime<Utc>> {
        self.slot.lock().entry.as_ref().map(CacheEntry::fresh_until)
    }

    /// Consult the persistent store; a satisfying hit becomes the in-memory
    /// entry. Read failures are misses.
    async fn try_store(
        &self,
        options: &GetSessionOptions,
        now: DateTime<Utc>,
        expected_generation: u64,
    ) -> Option<SessionResponse> {
        let stored = match self.store.get(&self.config.store_key).await {
            Ok(stored) => stored?,
            Err(error) => {
                warn!(%error, "session store read failed, treating as miss");
                return None;
            }
        };

        let entry = CacheEntry {
            requested_at: stored.requested_at,
            from_store: true,
            settled: Arc::new(AtomicBool::new(true)),
            failed: Arc::new(AtomicBool::new(false)),
            fresh_until: Arc::new(Mutex::new(stored.fresh_until)),
            future: futures::future::ready(Ok(stored.state.clone())).boxed().shared(),
        };
        if !entry.satisfies(options, now) {
            return None;
        }

        let mut slot = self.slot.lock();
        if slot.generation != expected_generation {
            return None;
        }
        slot.entry = Some(entry.clone());
        slot.generation += 1;
        drop(slot);
        debug!("session served from persistent store");
        Some(respond(&entry, stored.state, SessionSource::Store))
    }

    /// Install a fresh fetch entry, unless the slot changed hands since
    /// `expected_generation` was read.
    fn install_fetch(&self, now: DateTime<Utc>, expected_generation: u64) -> Option<CacheEntry> {
        let mut slot = self.slot.lock();
        if slot.generation != expected_generation {
            return None;
        }
        let entry = self.make_fetch_entry(now);
        slot.entry = Some(entry.clone());
        slot.generation += 1;
        Some(entry)
    }

    /// Build the entry whose shared future performs the fetch and settles
    /// the entry's freshness state.
    fn make_fetch_entry(&self, now: DateTime<Utc>) -> CacheEntry {
        let positive_ttl = seconds(self.config.positive_ttl_secs);
        let negative_ttl = seconds(self.config.negative_ttl_secs);

        let settled = Arc::new(AtomicBool::new(false));
        let failed = Arc::new(AtomicBool::new(false));
        let fresh_until = Arc::new(Mutex::new(now + positive_ttl));

        let fetcher = Arc::clone(&self.fetcher);
        let store = Arc::clone(&self.store);
        let store_key = self.config.store_key.clone();
        let entry = CacheEntry {
            requested_at: now,
            from_store: false,
            settled: Arc::clone(&settled),
            failed: Arc::clone(&failed),
            fresh_until: Arc::clone(&fresh_until),
            future: futures::future::pending::<Result<SessionState, FetchError>>()
                .boxed()
                .shared(),
        };
        let settle_entry = entry.clone();

        let future = async move {
            let result = fetcher.fetch_session().await;
            match &result {
                Ok(SessionState::Active(data)) => {
                    settle_entry.narrow_fresh_until((Utc::now() + positive_ttl).min(data.expires_at));
                    settled.store(true, Ordering::SeqCst);
                    let snapshot = StoredSession {
                        state: SessionState::Active(data.clone()),
                        requested_at: now,
                        fresh_until: settle_entry.fresh_until(),
                    };
                    persist_if_newer(&store, &store_key, snapshot).await;
                }
                Ok(SessionState::SignedOut) => {
                    settle_entry.narrow_fresh_until(Utc::now() + negative_ttl);
                    settled.store(true, Ordering::SeqCst);
                    if let Err(error) = store.remove(&store_key).await {
                        warn!(%error, "failed to clear stored session");
                    }
                }
                Err(error) => {
                    warn!(%error, "session fetch failed");
                    // Expire the entry permanently so the failure is never
                    // served from cache.
                    settle_entry.narrow_fresh_until(now);
                    failed.store(true, Ordering::SeqCst);
                    settled.store(true, Ordering::SeqCst);
                }
            }
            result
        }
        .boxed()
        .shared();

        CacheEntry { future, ..entry }
    }
}

fn respond(entry: &CacheEntry, state: SessionState, source: SessionSource) -> SessionResponse {
    SessionResponse {
        state,
        source,
        requested_at: entry.requested_at,
        fresh_until: entry.fresh_until(),
    }
}

fn seconds(secs: u64) -> Duration {
    // Clamped so the later DateTime arithmetic stays in range.
    let max = i64::from(i32::MAX);
    Duration::seconds(i64::try_from(secs).unwrap_or(max).min(max))
}

/// Persist `snapshot` unless the store already holds a newer session;
/// guards out-of-order fetch completions.
async fn persist_if_newer(store: &Arc<dyn SessionStore>, key: &str, snapshot: StoredSession) {
    match store.get(key).await {
        Ok(Some(current)) if current.requested_at >= snapshot.requested_at => {
            debug!("store already holds a newer session, skipping persist");
            return;
        }
        Ok(_) => {}
        Err(error) => {
            warn!(%error, "session store read failed before persist");
        }
    }
    if let Err(error) = store.set(key, snapshot).await {
        warn!(%error, "failed to persist session");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
