//! Retry configuration and backoff calculation.
//!
//! Provides the portable, sync-only building blocks for retry logic; the
//! actual async retry execution lives in `weld-session` (which has access
//! to tokio):
//!
//! - [`RetryConfig`]: retry parameters (attempts, backoff, cap)
//! - [`backoff_delay`]: capped multiplicative backoff
//! - [`backoff_delay_with_random`]: same, with caller-supplied jitter

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default maximum attempts (initial call plus retries).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 100;
/// Default backoff multiplier between attempts.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 10.0;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 1000;

/// Configuration for retry logic.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Maximum total attempts, initial call included (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry in ms (default: 100).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Multiplier applied per further retry (default: 10.0).
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Cap on the delay between attempts in ms (default: 1000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_backoff_multiplier() -> f64 {
    DEFAULT_BACKOFF_MULTIPLIER
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Calculate the delay before a retry.
///
/// Formula: `min(max_delay, base_delay * multiplier^(attempt - 1))`, where
/// `attempt` is the 1-based index of the attempt that just failed. The
/// defaults yield 100 ms after the first failure and 1000 ms after the
/// second.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> u64 {
    let exponent = attempt.saturating_sub(1).min(31);
    let factor = config.backoff_multiplier.max(1.0).powi(exponent as i32);
    let delay = (config.base_delay_ms as f64) * factor;
    (delay.round() as u64).min(config.max_delay_ms)
}

/// Calculate backoff delay with explicit jitter.
///
/// `random` should be a value in `[0.0, 1.0)` from a PRNG; it scales the
/// delay by `1 ± jitter_factor`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn backoff_delay_with_random(
    config: &RetryConfig,
    attempt: u32,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let base = backoff_delay(config, attempt);
    // Maps random [0,1) to [-jitter, +jitter]
    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor;
    ((base as f64) * jitter).round().max(0.0) as u64
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
