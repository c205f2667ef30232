//! Under-storage contract and the mount table the stores read through.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strata_core::{Error, Result};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Byte-range access to the authoritative copy of a file
#[async_trait]
pub trait UnderFileSystem: Send + Sync {
    /// Read up to `len` bytes at `offset`; shorter only at end of file
    async fn read_range(&self, path: &str, offset: u64, len: u64) -> Result<Bytes>;

    async fn file_length(&self, path: &str) -> Result<u64>;
}

/// Local directory used as under-storage
#[derive(Debug, Clone)]
pub struct LocalUnderFileSystem {
    root: PathBuf,
}

impl LocalUnderFileSystem {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

#[async_trait]
impl UnderFileSystem for LocalUnderFileSystem {
    #[tracing::instrument(level = "trace", skip(self))]
    async fn read_range(&self, path: &str, offset: u64, len: u64) -> Result<Bytes> {
        let full = self.path_for(path);
        let mut file = match fs::File::open(&full).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::under_storage(path, "read range", "file does not exist"));
            }
            Err(e) => return Err(Error::file_system(full, "open under-storage file", e)),
        };
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| Error::file_system(&full, "seek under-storage file", e))?;

        let mut buf = Vec::with_capacity(len.min(16 * 1024 * 1024) as usize);
        file.take(len)
            .read_to_end(&mut buf)
            .await
            .map_err(|e| Error::file_system(&full, "read under-storage file", e))?;
        Ok(Bytes::from(buf))
    }

    async fn file_length(&self, path: &str) -> Result<u64> {
        let full = self.path_for(path);
        match fs::metadata(&full).await {
            Ok(metadata) => Ok(metadata.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::under_storage(path, "stat", "file does not exist"))
            }
            Err(e) => Err(Error::file_system(full, "stat under-storage file", e)),
        }
    }
}

/// Mount id to under-storage lookup
#[derive(Default)]
pub struct UfsManager {
    mounts: DashMap<u64, Arc<dyn UnderFileSystem>>,
}

impl UfsManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the under-storage behind a mount
    pub fn add_mount(&self, mount_id: u64, ufs: Arc<dyn UnderFileSystem>) {
        tracing::debug!(mount_id, "under-storage mounted");
        self.mounts.insert(mount_id, ufs);
    }

    pub fn remove_mount(&self, mount_id: u64) -> bool {
        self.mounts.remove(&mount_id).is_some()
    }

    pub fn get(&self, mount_id: u64) -> Result<Arc<dyn UnderFileSystem>> {
        match self.mounts.get(&mount_id) {
            Some(ufs) => Ok(Arc::clone(ufs.value())),
            None => Err(Error::under_storage(
                format!("mount:{mount_id}"),
                "resolve mount",
                "no under-storage registered for mount",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_read_range_is_short_at_eof() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("f"), b"0123456789").unwrap();
        let ufs = LocalUnderFileSystem::new(temp_dir.path());

        assert_eq!(&ufs.read_range("/f", 2, 3).await?[..], b"234");
        assert_eq!(&ufs.read_range("f", 8, 10).await?[..], b"89");
        assert!(ufs.read_range("f", 20, 10).await?.is_empty());
        assert_eq!(ufs.file_length("f").await?, 10);
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_mount() {
        let manager = UfsManager::new();
        assert!(matches!(manager.get(7), Err(Error::UnderStorage { .. })));
    }
}
