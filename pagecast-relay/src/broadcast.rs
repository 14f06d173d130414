//! Fan-out of a snapshot to every other client on a page.
//!
//! The membership is snapshotted from the registry first, so the registry
//! lock is never held while queues are touched. Under
//! [`OverflowPolicy::Disconnect`] a recipient whose queue is full is treated
//! as unresponsive: it is deregistered and its queue closed, which tears
//! its session down. Healthy clients are never held back by a slow one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::protocol::PageId;
use crate::queue::{ClientHandle, ClientId, EnqueueError, OverflowPolicy};
use crate::registry::ConnectionRegistry;

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub messages_published: u64,
    pub deliveries: u64,
    pub evictions: u64,
}

/// Atomic broadcast stats, so publishing never takes a lock for bookkeeping.
#[derive(Debug, Default)]
struct AtomicBroadcastStats {
    messages_published: AtomicU64,
    deliveries: AtomicU64,
    evictions: AtomicU64,
}

/// Outcome of one [`Broadcaster::publish`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub evicted: usize,
}

#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    policy: OverflowPolicy,
    stats: Arc<AtomicBroadcastStats>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>, policy: OverflowPolicy) -> Self {
        Self {
            registry,
            policy,
            stats: Arc::new(AtomicBroadcastStats::default()),
        }
    }

    /// Deliver `payload` to every client on `page` except `exclude`.
    pub async fn publish(
        &self,
        page: &PageId,
        payload: Bytes,
        exclude: Option<ClientId>,
    ) -> PublishReport {
        let members = self.registry.snapshot(page).await;
        let mut report = PublishReport::default();

        for member in members.iter().filter(|m| Some(m.id()) != exclude) {
            let outcome = match self.policy {
                OverflowPolicy::Disconnect => member.try_enqueue(payload.clone()),
                OverflowPolicy::Wait => member.enqueue(payload.clone()).await,
            };
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(reason) => {
                    self.evict(member, reason).await;
                    report.evicted += 1;
                }
            }
        }

        self.stats.messages_published.fetch_add(1, Ordering::Relaxed);
        self.stats
            .deliveries
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.stats
            .evictions
            .fetch_add(report.evicted as u64, Ordering::Relaxed);
        report
    }

    async fn evict(&self, member: &ClientHandle, reason: EnqueueError) {
        let page = member.page();
        if self.registry.leave(page, member.id()).await {
            match reason {
                EnqueueError::Full => log::warn!(
                    "Dropping slow client {} on page {page}: outbound queue full",
                    member.id()
                ),
                EnqueueError::Closed => log::debug!(
                    "Removing client {} on page {page}: outbound queue closed",
                    member.id()
                ),
            }
        }
        member.close();
    }

    /// Get broadcast statistics (lock-free snapshot).
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_published: self.stats.messages_published.load(Ordering::Relaxed),
            deliveries: self.stats.deliveries.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
        }
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }
}
