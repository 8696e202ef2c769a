//! pulse-relay: development pub/sub relay for the pulse engine.
//!
//! Speaks the engine's envelope protocol: channel join/leave, broadcast
//! fan-out, per-connection presence metas with `presence`/`presence_diff`
//! emission, and heartbeat replies. Payloads are opaque; the relay never
//! inspects domain records. Exposed as a library so integration tests can
//! run an in-process relay on an ephemeral port.

mod connection;
pub mod registry;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::connection::handle_connection;
use crate::registry::Registry;

/// A bound relay, ready to serve.
pub struct RelayServer {
    listener: TcpListener,
    registry: Registry,
    api_key: Option<String>,
}

impl RelayServer {
    /// Bind to an address. Pass port 0 for an ephemeral port; the chosen
    /// address is available via [`RelayServer::local_addr`].
    pub async fn bind(addr: &str, api_key: Option<String>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            registry: Registry::new(),
            api_key,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop. Runs until the task is dropped or aborted.
    pub async fn run(self) {
        let conn_ids = Arc::new(AtomicU64::new(1));
        info!(
            addr = %self.listener.local_addr().map(|a| a.to_string()).unwrap_or_default(),
            auth = self.api_key.is_some(),
            "pulse-relay listening"
        );

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let conn = conn_ids.fetch_add(1, Ordering::Relaxed);
                    let registry = self.registry.clone();
                    let api_key = self.api_key.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, addr, conn, registry, api_key).await;
                    });
                }
                Err(e) => {
                    warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
}
