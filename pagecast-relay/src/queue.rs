//! Per-client outbound queue.
//!
//! Many producers (the broadcaster, the session's own join replay) feed one
//! consumer (the client's write loop). The producer side is a clonable
//! [`ClientHandle`] kept in the registry; the consumer side is an
//! [`OutboundReceiver`] owned by the write loop.
//!
//! A queue can be closed explicitly, which is how a session is torn down:
//! closing wakes the write loop and the read loop of that client, and
//! whatever was still queued is discarded.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::protocol::PageId;

/// Identity of one connected client.
pub type ClientId = Uuid;

/// What the broadcaster does when a recipient's queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Drop the slow client: deregister it and close its queue.
    #[default]
    Disconnect,
    /// Wait for room in the queue. Lossless, but a slow client slows the
    /// publisher down.
    Wait,
}

/// Outbound queue sizing and overflow behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Snapshots buffered per client (clamped to at least 1).
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            overflow: OverflowPolicy::Disconnect,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    #[error("outbound queue is full")]
    Full,
    #[error("outbound queue is closed")]
    Closed,
}

/// Producer side of a client's outbound queue.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ClientId,
    page: PageId,
    tx: mpsc::Sender<Bytes>,
    closed: Arc<watch::Sender<bool>>,
}

/// Consumer side of a client's outbound queue.
#[derive(Debug)]
pub struct OutboundReceiver {
    rx: mpsc::Receiver<Bytes>,
    closed: watch::Receiver<bool>,
}

/// Create the queue for a new client bound to `page`.
pub fn outbound_queue(page: PageId, config: QueueConfig) -> (ClientHandle, OutboundReceiver) {
    let (tx, rx) = mpsc::channel(config.capacity.max(1));
    let (closed_tx, closed_rx) = watch::channel(false);
    let handle = ClientHandle {
        id: Uuid::new_v4(),
        page,
        tx,
        closed: Arc::new(closed_tx),
    };
    (handle, OutboundReceiver { rx, closed: closed_rx })
}

impl ClientHandle {
    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn page(&self) -> &PageId {
        &self.page
    }

    /// Enqueue without waiting.
    pub fn try_enqueue(&self, payload: Bytes) -> Result<(), EnqueueError> {
        if self.is_closed() {
            return Err(EnqueueError::Closed);
        }
        self.tx.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Enqueue, waiting for room if the queue is full.
    ///
    /// Gives up as soon as the queue is closed, so a waiting publisher is
    /// never stuck on a client that is going away.
    pub async fn enqueue(&self, payload: Bytes) -> Result<(), EnqueueError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(EnqueueError::Closed);
        }
        tokio::select! {
            sent = self.tx.send(payload) => sent.map_err(|_| EnqueueError::Closed),
            _ = closed.wait_for(|closed| *closed) => Err(EnqueueError::Closed),
        }
    }

    /// Mark the queue closed. Idempotent.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow() || self.tx.is_closed()
    }
}

impl PartialEq for ClientHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ClientHandle {}

impl OutboundReceiver {
    /// Next queued snapshot, or `None` once the queue is closed.
    pub async fn recv(&mut self) -> Option<Bytes> {
        if *self.closed.borrow() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.closed.wait_for(|closed| *closed) => None,
            item = self.rx.recv() => item,
        }
    }

    /// A watcher that resolves once the queue is closed.
    pub fn close_signal(&self) -> CloseSignal {
        CloseSignal(self.closed.clone())
    }
}

/// Resolves when the owning queue is closed.
#[derive(Debug, Clone)]
pub struct CloseSignal(watch::Receiver<bool>);

impl CloseSignal {
    pub async fn closed(&mut self) {
        // An error means every handle is gone, which is closed as well.
        let _ = self.0.wait_for(|closed| *closed).await;
    }

    pub fn is_closed(&self) -> bool {
        *self.0.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    fn page() -> PageId {
        PageId::new("doc1").unwrap()
    }

    fn config(capacity: usize) -> QueueConfig {
        QueueConfig {
            capacity,
            ..QueueConfig::default()
        }
    }

    #[test]
    fn test_queue_config_default() {
        let config = QueueConfig::default();
        assert_eq!(config.capacity, 64);
        assert_eq!(config.overflow, OverflowPolicy::Disconnect);
    }

    #[tokio::test]
    async fn test_enqueue_preserves_order() {
        let (handle, mut rx) = outbound_queue(page(), config(8));
        handle.try_enqueue(Bytes::from_static(b"one")).unwrap();
        handle.try_enqueue(Bytes::from_static(b"two")).unwrap();

        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"two"));
    }

    #[tokio::test]
    async fn test_try_enqueue_reports_full() {
        let (handle, _rx) = outbound_queue(page(), config(1));
        handle.try_enqueue(Bytes::from_static(b"a")).unwrap();
        assert_eq!(
            handle.try_enqueue(Bytes::from_static(b"b")),
            Err(EnqueueError::Full)
        );
    }

    #[tokio::test]
    async fn test_zero_capacity_is_clamped() {
        let (handle, mut rx) = outbound_queue(page(), config(0));
        handle.try_enqueue(Bytes::from_static(b"a")).unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"a"));
    }

    #[tokio::test]
    async fn test_close_wakes_receiver_and_rejects_producers() {
        let (handle, mut rx) = outbound_queue(page(), config(4));
        handle.try_enqueue(Bytes::from_static(b"pending")).unwrap();

        handle.close();
        handle.close(); // idempotent

        assert!(handle.is_closed());
        assert_eq!(rx.recv().await, None);
        assert_eq!(
            handle.try_enqueue(Bytes::from_static(b"late")),
            Err(EnqueueError::Closed)
        );
        assert_eq!(
            handle.enqueue(Bytes::from_static(b"late")).await,
            Err(EnqueueError::Closed)
        );
    }

    #[tokio::test]
    async fn test_waiting_enqueue_released_by_close() {
        let (handle, _rx) = outbound_queue(page(), config(1));
        handle.try_enqueue(Bytes::from_static(b"fill")).unwrap();

        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.enqueue(Bytes::from_static(b"blocked")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.close();

        let result = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(result, Err(EnqueueError::Closed));
    }

    #[tokio::test]
    async fn test_close_signal() {
        let (handle, rx) = outbound_queue(page(), config(1));
        let mut signal = rx.close_signal();
        assert!(!signal.is_closed());

        handle.close();
        timeout(Duration::from_secs(1), signal.closed()).await.unwrap();
        assert!(signal.is_closed());
    }

    #[test]
    fn test_handles_compare_by_identity() {
        let (a, _rx_a) = outbound_queue(page(), config(1));
        let (b, _rx_b) = outbound_queue(page(), config(1));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(a.page().as_str(), "doc1");
    }
}
