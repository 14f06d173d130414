//! WebSocket client for a relay page.
//!
//! Provides:
//! - Connection lifecycle (connect, close)
//! - Sending full-document snapshots
//! - An event stream of snapshots published by other clients on the page
//!
//! The client does not merge anything: every [`RelayEvent::Snapshot`] is the
//! complete document as some other client last sent it.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, RwLock};

use crate::protocol::{page_url, PageId};
use crate::transport::ws;
use crate::transport::{MessageSink, MessageSource, TransportError};

/// Buffered events and outgoing snapshots per client.
const CHANNEL_CAPACITY: usize = 256;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Events emitted by the relay client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// Connection established
    Connected,
    /// Full document content from the server (join replay or a live update)
    Snapshot(Bytes),
    /// Connection lost
    Disconnected,
}

/// A client bound to one page.
pub struct RelayClient {
    page: PageId,
    url: String,
    state: Arc<RwLock<ConnectionState>>,
    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Bytes>>,
    event_rx: Option<mpsc::Receiver<RelayEvent>>,
}

impl RelayClient {
    /// Connect to the relay at `server_url` (e.g. `ws://127.0.0.1:8080`)
    /// and join `page`.
    ///
    /// Spawns background tasks for reading/writing WebSocket messages.
    pub async fn connect(server_url: &str, page: PageId) -> Result<Self, TransportError> {
        let url = page_url(server_url, &page);
        let (stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (mut source, mut sink) = ws::split(stream);
        log::debug!("Connected to {url}");

        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (out_tx, mut out_rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);
        let state = Arc::new(RwLock::new(ConnectionState::Connected));
        let _ = event_tx.send(RelayEvent::Connected).await;

        // Writer task: forward outgoing channel to the socket
        tokio::spawn(async move {
            while let Some(payload) = out_rx.recv().await {
                if let Err(e) = sink.write_message(payload).await {
                    log::debug!("Relay write failed: {e}");
                    break;
                }
            }
            sink.close().await;
        });

        // Reader task: surface every inbound snapshot
        let reader_state = state.clone();
        tokio::spawn(async move {
            loop {
                match source.read_message().await {
                    Ok(Some(payload)) => {
                        if event_tx.send(RelayEvent::Snapshot(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        log::debug!("Relay read failed: {e}");
                        break;
                    }
                }
            }

            *reader_state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(RelayEvent::Disconnected).await;
        });

        Ok(Self {
            page,
            url,
            state,
            outgoing_tx: Some(out_tx),
            event_rx: Some(event_rx),
        })
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<RelayEvent>> {
        self.event_rx.take()
    }

    /// Send the full current document.
    pub async fn send(&self, snapshot: impl Into<Bytes>) -> Result<(), TransportError> {
        if *self.state.read().await == ConnectionState::Disconnected {
            return Err(TransportError::Closed);
        }
        let tx = self.outgoing_tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(snapshot.into())
            .await
            .map_err(|_| TransportError::Closed)
    }

    pub async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        self.send(Bytes::copy_from_slice(text.as_bytes())).await
    }

    /// Close the connection once pending snapshots are written.
    ///
    /// The event stream ends with [`RelayEvent::Disconnected`].
    pub fn close(&mut self) {
        self.outgoing_tx = None;
    }

    /// Get the current connection state.
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn page(&self) -> &PageId {
        &self.page
    }

    /// Get the URL this client connected to.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = RelayClient::connect(&format!("ws://{addr}"), PageId::new("doc1").unwrap()).await;
        assert!(matches!(result, Err(TransportError::WebSocket(_))));
    }

    #[test]
    fn test_relay_event_equality() {
        assert_eq!(
            RelayEvent::Snapshot(Bytes::from_static(b"a")),
            RelayEvent::Snapshot(Bytes::from_static(b"a"))
        );
        assert_ne!(RelayEvent::Connected, RelayEvent::Disconnected);
    }
}
