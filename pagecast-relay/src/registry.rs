//! Page → connected clients.
//!
//! One global lock guards the whole map. Every critical section is a plain
//! map operation; nothing here awaits I/O or touches a transport while the
//! lock is held.

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::protocol::PageId;
use crate::queue::{ClientHandle, ClientId};

/// Membership of every live page.
///
/// A page entry exists exactly while at least one client is bound to it.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    pages: Mutex<HashMap<PageId, HashMap<ClientId, ClientHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `client` under `page`, creating the page entry if absent.
    pub async fn join(&self, page: &PageId, client: ClientHandle) {
        let mut pages = self.pages.lock().await;
        pages
            .entry(page.clone())
            .or_default()
            .insert(client.id(), client);
    }

    /// Deregister `client`; drops the page entry once it is empty.
    ///
    /// Returns whether the client was registered.
    pub async fn leave(&self, page: &PageId, client: ClientId) -> bool {
        let mut pages = self.pages.lock().await;
        let Some(clients) = pages.get_mut(page) else {
            return false;
        };
        let removed = clients.remove(&client).is_some();
        if clients.is_empty() {
            pages.remove(page);
        }
        removed
    }

    /// Point-in-time membership of `page`.
    pub async fn snapshot(&self, page: &PageId) -> Vec<ClientHandle> {
        let pages = self.pages.lock().await;
        pages
            .get(page)
            .map(|clients| clients.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn contains(&self, page: &PageId) -> bool {
        self.pages.lock().await.contains_key(page)
    }

    pub async fn client_count(&self, page: &PageId) -> usize {
        self.pages
            .lock()
            .await
            .get(page)
            .map_or(0, |clients| clients.len())
    }

    /// Number of pages with at least one client.
    pub async fn page_count(&self) -> usize {
        self.pages.lock().await.len()
    }
}
