//! Remote session fetch with bounded retry.
//!
//! The cache itself never retries — retry is the caller's policy, layered
//! here. [`RetryingFetcher`] wraps a base fetcher with up to three attempts
//! and increasing backoff; because the cache coalesces callers onto one
//! in-flight future, requests arriving mid-retry join the in-progress
//! sequence instead of starting a new one.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;
use weld_core::RetryConfig;
use weld_core::retry::backoff_delay;

use crate::types::SessionState;

/// Remote fetch failure.
///
/// `Clone` because every caller joined on one coalesced fetch observes the
/// same error.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The underlying fetch failed.
    #[error("session fetch failed: {0}")]
    Remote(String),
    /// The remote answered with something that is not a session.
    #[error("session fetch returned an unexpected shape: {0}")]
    UnexpectedShape(String),
    /// The cache could not settle on a usable response.
    #[error("session cache failed to converge")]
    CacheDiverged,
}

/// Produces session values from the remote service.
#[async_trait]
pub trait SessionFetcher: Send + Sync {
    /// Fetch the current session state.
    async fn fetch_session(&self) -> Result<SessionState, FetchError>;
}

#[async_trait]
impl<F: SessionFetcher + ?Sized> SessionFetcher for Arc<F> {
    async fn fetch_session(&self) -> Result<SessionState, FetchError> {
        (**self).fetch_session().await
    }
}

/// Retrying wrapper around a [`SessionFetcher`].
pub struct RetryingFetcher<F> {
    inner: F,
    config: RetryConfig,
}

impl<F: SessionFetcher> RetryingFetcher<F> {
    /// Wrap `inner` with the default schedule (3 attempts, 100 ms then
    /// 1000 ms between them).
    #[must_use]
    pub fn new(inner: F) -> Self {
        Self::with_config(inner, RetryConfig::default())
    }

    /// Wrap `inner` with an explicit retry configuration.
    #[must_use]
    pub fn with_config(inner: F, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl<F: SessionFetcher> SessionFetcher for RetryingFetcher<F> {
    async fn fetch_session(&self) -> Result<SessionState, FetchError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.inner.fetch_session().await {
                Ok(state) => return Ok(state),
                Err(error) if attempt >= max_attempts => {
                    warn!(attempt, %error, "session fetch failed, attempts exhausted");
                    return Err(error);
                }
                Err(error) => {
                    let delay_ms = backoff_delay(&self.config, attempt);
                    warn!(attempt, %error, delay_ms, "session fetch failed, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
