//! WebSocket transport to the pulse message bus.
//!
//! One background task owns the socket. The [`TransportClient`] handle is
//! cheap to clone; all methods send commands to the task and never block
//! on the network. Connection-state transitions are published on a
//! `watch` channel; the transport performs no retries of its own, that
//! policy lives in the reconnect supervisor.

mod client;
mod connection;
mod types;

pub use client::{ChannelHandle, TransportClient};
pub use types::TransportConfig;

pub(crate) use types::TransportCommand;
