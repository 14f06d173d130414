//! The byte-message transport a session runs over.
//!
//! A connection is split into a [`MessageSource`] (owned by the read loop)
//! and a [`MessageSink`] (owned by the write loop). Messages are opaque
//! payloads; framing is the transport's business.
//!
//! - [`ws`]: WebSocket over any async stream (`tokio-tungstenite`)
//! - [`memory`]: in-process channel pair, for tests

pub mod memory;
pub mod ws;

pub use ws::{accept, WsSink, WsSource};

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::protocol::BindError;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("handshake rejected: {0}")]
    Rejected(#[from] BindError),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("connection closed")]
    Closed,
}

/// Inbound half of a connection.
#[async_trait]
pub trait MessageSource: Send {
    /// Next inbound payload. `Ok(None)` means the peer closed the
    /// connection in an orderly way.
    async fn read_message(&mut self) -> Result<Option<Bytes>, TransportError>;
}

/// Outbound half of a connection.
#[async_trait]
pub trait MessageSink: Send {
    async fn write_message(&mut self, payload: Bytes) -> Result<(), TransportError>;

    /// Close the connection. Safe to call more than once; errors are ignored.
    async fn close(&mut self);
}
