//! # weld-channel
//!
//! Message channels and connection management for the weld linking core.
//!
//! The components here keep independently-lifecycled peers usefully
//! connected over pipes that may vanish at any time:
//!
//! - **Channel**: bidirectional, order-preserving message pipe with
//!   one-direction-aware close
//! - **DisconnectRegistry**: answers "has this channel already closed?" and
//!   fires close listeners retroactively
//! - **ManagedConnection / AsyncManagedConnection**: lazy connect, automatic
//!   reconnect, terminal stop, and safe disconnect-while-connecting
//! - **MappedConnection**: derive a connection of another value type with
//!   explicit identity bookkeeping

#![deny(unsafe_code)]

pub mod channel;
pub mod connection;
pub mod mapped;
pub mod registry;

pub use channel::{Channel, ChannelError, Subscription};
pub use connection::{
    AsyncConnector, AsyncManagedConnection, Connect, ConnectionError, Connector, ManagedConnection,
};
pub use mapped::MappedConnection;
pub use registry::DisconnectRegistry;
