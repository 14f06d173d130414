//! In-process transport for driving sessions without sockets.
//!
//! [`pair`] returns the server half (source + sink) and a [`MemoryPeer`]
//! that plays the remote client. The sink→peer direction is bounded, so a
//! peer that stops reading stalls the session's write loop just like a slow
//! network client would.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::{MessageSink, MessageSource, TransportError};

pub struct MemorySource {
    rx: mpsc::UnboundedReceiver<Result<Bytes, io::ErrorKind>>,
}

pub struct MemorySink {
    tx: Option<mpsc::Sender<Bytes>>,
}

/// The remote end of an in-memory connection.
pub struct MemoryPeer {
    tx: Option<mpsc::UnboundedSender<Result<Bytes, io::ErrorKind>>>,
    rx: mpsc::Receiver<Bytes>,
}

/// Create a connection whose outbound direction buffers `capacity` messages.
pub fn pair(capacity: usize) -> (MemorySource, MemorySink, MemoryPeer) {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::channel(capacity.max(1));
    (
        MemorySource { rx: in_rx },
        MemorySink { tx: Some(out_tx) },
        MemoryPeer {
            tx: Some(in_tx),
            rx: out_rx,
        },
    )
}

impl MemoryPeer {
    /// Send a message to the server. Returns false once the server side
    /// has gone away.
    pub fn send(&self, payload: impl Into<Bytes>) -> bool {
        self.tx
            .as_ref()
            .is_some_and(|tx| tx.send(Ok(payload.into())).is_ok())
    }

    /// Make the server's next read fail.
    pub fn fail(&self) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Err(io::ErrorKind::ConnectionReset));
        }
    }

    /// Close our side; the server reads an orderly close.
    pub fn hang_up(&mut self) {
        self.tx = None;
    }

    /// Next message written by the server, `None` once it closed the
    /// connection and everything was drained.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Message already written by the server, if any.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn read_message(&mut self) -> Result<Option<Bytes>, TransportError> {
        match self.rx.recv().await {
            Some(Ok(payload)) => Ok(Some(payload)),
            Some(Err(kind)) => Err(io::Error::from(kind).into()),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl MessageSink for MemorySink {
    async fn write_message(&mut self, payload: Bytes) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(payload).await.map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) {
        self.tx = None;
    }
}
