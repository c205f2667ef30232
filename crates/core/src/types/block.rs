//! Block-level identifiers and per-request options

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Identifier of a block, unique across the cluster
pub type BlockId = u64;

/// Identifier of the logical session owning temporary blocks
pub type SessionId = u64;

/// Options consumed once when a block is created
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBlockOptions {
    /// Preferred medium ("MEM", "SSD", "HDD"); `None` lets the store pick
    pub medium_type: Option<String>,
    /// Bytes to reserve up front
    pub initial_size: u64,
}

impl CreateBlockOptions {
    pub fn new(medium_type: Option<String>, initial_size: u64) -> Self {
        Self {
            medium_type,
            initial_size,
        }
    }
}

/// How a read miss may be served from under-storage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenUfsBlockOptions {
    /// Path of the file holding the block in under-storage
    pub ufs_path: String,
    /// Mount the path belongs to
    pub mount_id: u64,
    /// Full length of the block
    pub block_size: u64,
    /// Where the block starts inside the under-storage file
    pub offset_in_file: u64,
    /// Upper bound on concurrent fallback readers of this block
    pub max_ufs_read_concurrency: u32,
    /// Serve the read without admitting it into the local store
    pub no_cache: bool,
}

impl OpenUfsBlockOptions {
    /// Whether these options point at a readable under-storage location
    pub fn is_readable(&self) -> bool {
        !self.ufs_path.is_empty() && self.block_size > 0
    }

    /// Permits available to fallback readers; anything below one means one
    pub fn concurrency_limit(&self) -> usize {
        self.max_ufs_read_concurrency.max(1) as usize
    }
}

/// Where a committed block lives on a worker
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockStoreLocation {
    pub tier_alias: String,
    pub dir_index: usize,
}

impl Display for BlockStoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tier_alias, self.dir_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrency_limit_floor() {
        let mut options = OpenUfsBlockOptions::default();
        assert_eq!(options.concurrency_limit(), 1);
        options.max_ufs_read_concurrency = 4;
        assert_eq!(options.concurrency_limit(), 4);
    }

    #[test]
    fn test_default_options_are_not_readable() {
        assert!(!OpenUfsBlockOptions::default().is_readable());
        let options = OpenUfsBlockOptions {
            ufs_path: "/ufs/file1".to_string(),
            block_size: 1024,
            ..Default::default()
        };
        assert!(options.is_readable());
    }
}
