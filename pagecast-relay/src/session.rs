//! One connected client, from join to teardown.
//!
//! ```text
//!            ┌──────────── ClientSession ────────────┐
//!  source ──►│ read loop ─► store.save ─► publish ───┼──► other clients' queues
//!            │                                       │
//!  sink   ◄──│ write loop ◄── outbound queue ◄───────┼─── broadcaster / join replay
//!            └───────────────────────────────────────┘
//! ```
//!
//! Lifecycle:
//! 1. register the client's queue under its page
//! 2. replay the stored snapshot into the queue (under the page lock, so no
//!    save can slip between the read and the enqueue)
//! 3. spawn the write loop, run the read loop
//! 4. whichever side stops first closes the queue, which stops the other;
//!    the client is deregistered and the transport closed
//!
//! An eviction by the broadcaster closes the queue too, so a dropped slow
//! client loses both loops and its connection.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::broadcast::Broadcaster;
use crate::protocol::PageId;
use crate::queue::{outbound_queue, ClientHandle, ClientId, CloseSignal, OutboundReceiver, QueueConfig};
use crate::registry::ConnectionRegistry;
use crate::storage::PageStore;
use crate::transport::{MessageSink, MessageSource};

/// Upper bound on closing a transport during teardown.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared state every session runs against.
#[derive(Clone)]
pub struct Relay {
    registry: Arc<ConnectionRegistry>,
    store: Arc<PageStore>,
    broadcaster: Broadcaster,
    queue: QueueConfig,
}

impl Relay {
    pub fn new(store: Arc<PageStore>, queue: QueueConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone(), queue.overflow);
        Self {
            registry,
            store,
            broadcaster,
            queue,
        }
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Get the snapshot store.
    pub fn store(&self) -> &Arc<PageStore> {
        &self.store
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn queue_config(&self) -> QueueConfig {
        self.queue
    }

    /// Prepare a session for a connection already bound to `page`.
    pub fn session<R, W>(&self, page: PageId, source: R, sink: W) -> ClientSession<R, W>
    where
        R: MessageSource,
        W: MessageSink + 'static,
    {
        ClientSession {
            relay: self.clone(),
            page,
            source,
            sink,
        }
    }
}

/// What happened during one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub client: ClientId,
    pub page: PageId,
    /// Whether a stored snapshot was queued on join.
    pub replayed: bool,
    /// Payloads read from the client.
    pub received: u64,
    /// Payloads written to the client.
    pub sent: u64,
}

pub struct ClientSession<R, W> {
    relay: Relay,
    page: PageId,
    source: R,
    sink: W,
}

impl<R, W> ClientSession<R, W>
where
    R: MessageSource,
    W: MessageSink + 'static,
{
    /// Drive the session to completion.
    ///
    /// Returns once both loops have stopped, the client is deregistered and
    /// its transport closed.
    pub async fn run(self) -> SessionSummary {
        let Self {
            relay,
            page,
            mut source,
            sink,
        } = self;

        let (handle, outbound) = outbound_queue(page.clone(), relay.queue);
        let client = handle.id();
        relay.registry.join(&page, handle.clone()).await;
        log::debug!("Client {client} joined page {page}");

        let replayed = relay
            .store
            .replay(&page, |snapshot| match snapshot {
                Some(content) if !content.is_empty() => match handle.try_enqueue(content) {
                    Ok(()) => true,
                    Err(e) => {
                        log::debug!("Skipping join snapshot for client {client}: {e}");
                        false
                    }
                },
                _ => false,
            })
            .await;

        let closed = outbound.close_signal();
        let writer = tokio::spawn(write_loop(outbound, sink, handle.clone()));
        let received = read_loop(&relay, &page, client, &mut source, closed).await;

        relay.registry.leave(&page, client).await;
        handle.close();
        let sent = writer.await.unwrap_or_else(|e| {
            log::error!("Write loop for client {client} failed: {e}");
            0
        });
        log::debug!("Client {client} left page {page} ({received} in, {sent} out)");

        SessionSummary {
            client,
            page,
            replayed,
            received,
            sent,
        }
    }
}

async fn read_loop<R: MessageSource>(
    relay: &Relay,
    page: &PageId,
    client: ClientId,
    source: &mut R,
    mut closed: CloseSignal,
) -> u64 {
    let mut received = 0;
    loop {
        let message = tokio::select! {
            message = source.read_message() => message,
            _ = closed.closed() => {
                log::debug!("Outbound queue of client {client} closed, stopping reads");
                break;
            }
        };
        match message {
            Ok(Some(payload)) => {
                received += 1;
                // Persistence failures are logged by the store; delivery goes on.
                relay.store.save(page, &payload).await;
                relay.broadcaster.publish(page, payload, Some(client)).await;
            }
            Ok(None) => {
                log::debug!("Client {client} closed the connection");
                break;
            }
            Err(e) => {
                log::debug!("Read from client {client} failed: {e}");
                break;
            }
        }
    }
    received
}

async fn write_loop<W: MessageSink>(
    mut outbound: OutboundReceiver,
    mut sink: W,
    handle: ClientHandle,
) -> u64 {
    let mut closed = outbound.close_signal();
    let mut sent = 0;
    while let Some(payload) = outbound.recv().await {
        tokio::select! {
            written = sink.write_message(payload) => {
                if let Err(e) = written {
                    log::debug!("Write to client {} failed: {e}", handle.id());
                    break;
                }
                sent += 1;
            }
            // A write stuck on a stalled peer is abandoned on eviction.
            _ = closed.closed() => break,
        }
    }

    handle.close();
    if timeout(CLOSE_TIMEOUT, sink.close()).await.is_err() {
        log::debug!("Closing transport of client {} timed out", handle.id());
    }
    sent
}
