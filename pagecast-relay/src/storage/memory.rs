//! In-memory snapshot storage, for servers run without a storage root.

use std::collections::HashMap;
use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use super::PageBackend;
use crate::protocol::PageId;

#[derive(Debug, Default)]
pub struct MemoryBackend {
    pages: RwLock<HashMap<PageId, Bytes>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.pages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pages.read().await.is_empty()
    }
}

#[async_trait]
impl PageBackend for MemoryBackend {
    async fn read(&self, page: &PageId) -> io::Result<Option<Bytes>> {
        Ok(self.pages.read().await.get(page).cloned())
    }

    async fn write(&self, page: &PageId, content: &[u8]) -> io::Result<()> {
        self.pages
            .write()
            .await
            .insert(page.clone(), Bytes::copy_from_slice(content));
        Ok(())
    }
}
