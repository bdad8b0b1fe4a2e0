//! # weld-rpc
//!
//! Request/response RPC over weld channels.
//!
//! - **Wire types**: `{id, method, params}` requests, `{id, result}` /
//!   `{id, error}` responses with integer error codes
//! - **RpcClient**: correlation-id routing, cancellation of every pending
//!   request on channel close or unbind
//! - **RpcServer**: async method dispatch answering on the same channel

#![deny(unsafe_code)]

pub mod client;
pub mod server;
pub mod types;

pub use client::{CallError, RpcClient, TransportError};
pub use server::{Dispatcher, FnDispatcher, RpcServer};
pub use types::{RESTARTED_METHOD, RpcRequest, RpcResponse};
