//! WebSocket relay server with page-based routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐                                   ┌──► Client B
//!            ├── /ws?pageId=doc1 ── ClientSession ┤
//! Client C ──┘          │                        └──► Client C
//!                       ▼
//!                   PageStore ── <storage_root>/doc1.txt
//! ```
//!
//! Every accepted TCP connection gets its own task: the handshake binds it
//! to a page, then a [`ClientSession`](crate::session::ClientSession) runs
//! until the client leaves. Nothing that happens on one connection can stop
//! the accept loop.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::protocol::{PAGE_QUERY_KEY, WS_PATH};
use crate::queue::QueueConfig;
use crate::session::Relay;
use crate::storage::{PageStore, StoreError};
use crate::transport::{self, TransportError};

/// Pause after a failed `accept`, so descriptor exhaustion does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Snapshot directory (None = in-memory only)
    pub storage_root: Option<PathBuf>,
    /// Per-client outbound queue
    pub queue: QueueConfig,
    /// Time a new connection gets to complete the WebSocket upgrade
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            storage_root: Some(PathBuf::from("./pages")),
            queue: QueueConfig::default(),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Loopback on an ephemeral port, no persistence.
    pub fn for_testing() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            storage_root: None,
            ..Self::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub rejected_connections: u64,
    pub active_pages: usize,
}

#[derive(Debug, Default)]
struct AtomicServerStats {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    rejected_connections: AtomicU64,
}

/// The relay server.
#[derive(Clone)]
pub struct RelayServer {
    config: ServerConfig,
    relay: Relay,
    stats: Arc<AtomicServerStats>,
}

impl RelayServer {
    /// Create a server, opening the configured storage.
    pub fn new(config: ServerConfig) -> Result<Self, RelayError> {
        let store = match &config.storage_root {
            Some(root) => PageStore::open(root.clone())?,
            None => {
                log::info!("Page storage is in-memory only");
                PageStore::in_memory()
            }
        };
        Ok(Self::with_store(config, Arc::new(store)))
    }

    /// Create a server on an already opened store.
    pub fn with_store(config: ServerConfig, store: Arc<PageStore>) -> Self {
        let relay = Relay::new(store, config.queue);
        Self {
            config,
            relay,
            stats: Arc::new(AtomicServerStats::default()),
        }
    }

    /// Bind the configured address and serve until the process exits.
    pub async fn run(&self) -> Result<(), RelayError> {
        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|source| RelayError::Bind {
                addr: self.config.bind_addr.clone(),
                source,
            })?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RelayError> {
        let addr = listener.local_addr()?;
        log::info!("Relay listening on ws://{addr}{WS_PATH}?{PAGE_QUERY_KEY}=<page>");

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    log::error!("Failed to accept connection: {e}");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            log::debug!("New TCP connection from {peer}");

            let server = self.clone();
            tokio::spawn(async move { server.handle_connection(stream, peer).await });
        }
    }

    /// Handle a single connection from handshake to teardown.
    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        self.stats.total_connections.fetch_add(1, Ordering::Relaxed);

        let handshake = timeout(self.config.handshake_timeout, transport::accept(stream)).await;
        let (page, source, sink) = match handshake {
            Ok(Ok(bound)) => bound,
            Ok(Err(e)) => {
                self.stats
                    .rejected_connections
                    .fetch_add(1, Ordering::Relaxed);
                match e {
                    TransportError::Rejected(reason) => {
                        log::warn!("Rejected connection from {addr}: {reason}")
                    }
                    other => log::debug!("Handshake with {addr} failed: {other}"),
                }
                return;
            }
            Err(_) => {
                self.stats
                    .rejected_connections
                    .fetch_add(1, Ordering::Relaxed);
                log::debug!("Handshake with {addr} timed out");
                return;
            }
        };

        self.stats.active_connections.fetch_add(1, Ordering::Relaxed);
        log::info!("Connection from {addr} joined page {page}");

        let summary = self.relay.session(page, source, sink).run().await;

        self.stats.active_connections.fetch_sub(1, Ordering::Relaxed);
        log::info!(
            "Connection from {addr} left page {} ({} updates received, {} sent)",
            summary.page,
            summary.received,
            summary.sent
        );
    }

    /// Get current server statistics.
    pub async fn stats(&self) -> ServerStats {
        ServerStats {
            total_connections: self.stats.total_connections.load(Ordering::Relaxed),
            active_connections: self.stats.active_connections.load(Ordering::Relaxed),
            rejected_connections: self.stats.rejected_connections.load(Ordering::Relaxed),
            active_pages: self.relay.registry().page_count().await,
        }
    }

    /// Get the shared relay state.
    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
