//! # weld-session
//!
//! Cached, coalesced fetch of the remote link-session resource.
//!
//! - **SessionState**: the signed-in / signed-out session payload
//! - **SessionCache**: freshness windows, at-most-one in-flight fetch, and
//!   layered memory → persistent store → remote lookup
//! - **SessionStore**: the async persistence seam; failures degrade to
//!   cache misses
//! - **RetryingFetcher**: bounded retry with increasing backoff, layered on
//!   top of the cache's coalescing

#![deny(unsafe_code)]

pub mod cache;
pub mod fetch;
pub mod store;
pub mod types;

pub use cache::{
    GetSessionOptions, SessionCache, SessionCacheConfig, SessionResponse, SessionSource,
};
pub use fetch::{FetchError, RetryingFetcher, SessionFetcher};
pub use store::{MemorySessionStore, SessionStore, StoreError, StoredSession};
pub use types::{SessionData, SessionState};
