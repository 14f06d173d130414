//! One file per page under a storage root.
//!
//! File content is exactly the last saved snapshot, no header. A save writes
//! `<name>.tmp` and renames it over `<name>`, so a reader sees either the old
//! or the new snapshot, never a partial one.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use super::{PageBackend, StoreError};
use crate::protocol::PageId;

/// Filesystem-backed snapshot storage.
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    /// Open the backend, creating `root` if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| StoreError::Open {
            root: root.clone(),
            source,
        })?;
        log::info!("Page storage at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the snapshot file for `page`.
    pub fn path_for(&self, page: &PageId) -> PathBuf {
        self.root.join(page.file_name())
    }

    fn temp_path_for(&self, page: &PageId) -> PathBuf {
        self.root.join(format!("{}.tmp", page.file_name()))
    }
}

#[async_trait]
impl PageBackend for FileBackend {
    async fn read(&self, page: &PageId) -> io::Result<Option<Bytes>> {
        match tokio::fs::read(self.path_for(page)).await {
            Ok(content) => Ok(Some(Bytes::from(content))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn write(&self, page: &PageId, content: &[u8]) -> io::Result<()> {
        // The root may have been removed underneath us.
        tokio::fs::create_dir_all(&self.root).await?;

        let temp = self.temp_path_for(page);
        tokio::fs::write(&temp, content).await?;
        tokio::fs::rename(&temp, self.path_for(page)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_file_reads_as_none() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        let page = PageId::new("absent").unwrap();
        assert_eq!(backend.read(&page).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_holds_exact_bytes() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        let page = PageId::new("doc1").unwrap();

        backend.write(&page, b"hello").await.unwrap();

        let on_disk = std::fs::read(dir.path().join("doc1.txt")).unwrap();
        assert_eq!(on_disk, b"hello");
        assert!(!dir.path().join("doc1.txt.tmp").exists());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_content() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        let page = PageId::new("doc1").unwrap();

        backend.write(&page, b"a much longer first version").await.unwrap();
        backend.write(&page, b"short").await.unwrap();

        assert_eq!(
            backend.read(&page).await.unwrap(),
            Some(Bytes::from_static(b"short"))
        );
    }

    #[tokio::test]
    async fn test_open_creates_nested_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("a").join("b").join("pages");
        let backend = FileBackend::open(&root).unwrap();
        assert!(root.is_dir());
        assert_eq!(backend.root(), root.as_path());
    }

    #[tokio::test]
    async fn test_write_recreates_removed_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("pages");
        let backend = FileBackend::open(&root).unwrap();
        std::fs::remove_dir_all(&root).unwrap();

        let page = PageId::new("doc1").unwrap();
        backend.write(&page, b"back").await.unwrap();
        assert_eq!(std::fs::read(root.join("doc1.txt")).unwrap(), b"back");
    }

    #[test]
    fn test_open_fails_when_root_is_a_file() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("pages");
        std::fs::write(&blocker, b"not a directory").unwrap();

        match FileBackend::open(&blocker) {
            Err(StoreError::Open { root, .. }) => assert_eq!(root, blocker),
            other => panic!("expected open error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_hostile_page_id_stays_inside_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("pages");
        let backend = FileBackend::open(&root).unwrap();
        let page = PageId::new("../escape").unwrap();

        backend.write(&page, b"contained").await.unwrap();

        assert!(backend.path_for(&page).starts_with(&root));
        assert!(!dir.path().join("escape.txt").exists());
    }
}
