//! Durable snapshot storage, one blob per page.
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │                 PageStore                   │
//! │                                            │
//! │  lock table: PageId → Arc<Mutex<()>>        │
//! │     (guarded by its own short-lived lock)   │
//! │                                            │
//! │  save(p) ─► lock(p) ─► backend.write(p)     │
//! │  load(p) ─► lock(p) ─► backend.read(p)      │
//! └──────────────────────┬─────────────────────┘
//!                        │
//!              ┌─────────┴─────────┐
//!              ▼                   ▼
//!        FileBackend          MemoryBackend
//!     <root>/<page>.txt      HashMap in RAM
//! ```
//!
//! Writes to one page are totally ordered by its lock; writes to different
//! pages never wait on each other. Per-page locks are created on first
//! contact and kept for the life of the store.

pub mod file;
pub mod memory;

pub use file::FileBackend;
pub use memory::MemoryBackend;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::protocol::PageId;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot open storage root {root}: {source}")]
    Open {
        root: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("I/O error on page {page}: {source}")]
    Io {
        page: PageId,
        #[source]
        source: io::Error,
    },
}

/// Where snapshots physically live.
///
/// Implementations need not serialize anything themselves; [`PageStore`]
/// guarantees at most one in-flight call per page.
#[async_trait]
pub trait PageBackend: Send + Sync {
    /// Current snapshot, or `None` if the page was never written.
    async fn read(&self, page: &PageId) -> io::Result<Option<Bytes>>;

    /// Replace the page's snapshot.
    async fn write(&self, page: &PageId, content: &[u8]) -> io::Result<()>;
}

/// Snapshot store with per-page write serialization.
pub struct PageStore {
    backend: Arc<dyn PageBackend>,
    locks: Mutex<HashMap<PageId, Arc<Mutex<()>>>>,
}

impl PageStore {
    pub fn new(backend: Arc<dyn PageBackend>) -> Self {
        Self {
            backend,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Open a file-backed store rooted at `root`, creating the directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Ok(Self::new(Arc::new(FileBackend::open(root)?)))
    }

    /// Store that keeps snapshots in memory only.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Fetch or lazily create the lock for `page`.
    ///
    /// The table lock is released before the caller takes the page lock.
    async fn page_lock(&self, page: &PageId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(page.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn try_load(&self, page: &PageId) -> Result<Option<Bytes>, StoreError> {
        let lock = self.page_lock(page).await;
        let _guard = lock.lock().await;
        self.read_locked(page).await
    }

    /// Current snapshot of `page`; `None` when it was never written.
    ///
    /// Read failures are logged and reported as "no snapshot".
    pub async fn load(&self, page: &PageId) -> Option<Bytes> {
        match self.try_load(page).await {
            Ok(content) => content,
            Err(e) => {
                log::error!("Failed to load snapshot: {e}");
                None
            }
        }
    }

    /// Load `page` and hand the result to `f` while still holding the page
    /// lock, so no save on the same page can interleave with `f`.
    pub async fn replay<F, T>(&self, page: &PageId, f: F) -> T
    where
        F: FnOnce(Option<Bytes>) -> T,
    {
        let lock = self.page_lock(page).await;
        let _guard = lock.lock().await;
        let snapshot = match self.read_locked(page).await {
            Ok(content) => content,
            Err(e) => {
                log::error!("Failed to load snapshot: {e}");
                None
            }
        };
        f(snapshot)
    }

    pub async fn try_save(&self, page: &PageId, content: &[u8]) -> Result<(), StoreError> {
        let lock = self.page_lock(page).await;
        let _guard = lock.lock().await;
        self.backend
            .write(page, content)
            .await
            .map_err(|source| StoreError::Io {
                page: page.clone(),
                source,
            })
    }

    /// Replace the snapshot of `page`.
    ///
    /// Failures are logged and swallowed: the live relay keeps running even
    /// when durability does not. Returns whether the write succeeded.
    pub async fn save(&self, page: &PageId, content: &[u8]) -> bool {
        match self.try_save(page, content).await {
            Ok(()) => {
                log::debug!("Persisted {} bytes for page {page}", content.len());
                true
            }
            Err(e) => {
                log::error!("Failed to persist snapshot: {e}");
                false
            }
        }
    }

    /// Number of pages this store has seen (size of the lock table).
    pub async fn known_pages(&self) -> usize {
        self.locks.lock().await.len()
    }

    async fn read_locked(&self, page: &PageId) -> Result<Option<Bytes>, StoreError> {
        self.backend
            .read(page)
            .await
            .map_err(|source| StoreError::Io {
                page: page.clone(),
                source,
            })
    }
}
