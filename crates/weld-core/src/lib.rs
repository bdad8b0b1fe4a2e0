//! # weld-core
//!
//! Foundation types for the weld linking core.
//!
//! This crate provides the shared vocabulary the other weld crates depend on:
//!
//! - **Branded IDs**: `ChannelId`, `EmitterId` as newtypes for type safety
//! - **Wire errors**: the integer `ErrorCode` enumeration carried end-to-end
//!   in RPC error responses, plus the `WireError` payload
//! - **Retry**: portable retry configuration and backoff math
//! - **Logging**: the shared test subscriber setup

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod retry;

pub use errors::{ErrorCode, WireError};
pub use ids::{ChannelId, EmitterId};
pub use retry::RetryConfig;
