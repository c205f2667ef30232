//! Worker configuration with defaults, builder and validation
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use strata_core::{Error, Result, DEFAULT_PAGE_SIZE, MEM_TIER, SSD_TIER};

/// Which block store layout the worker runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockStoreType {
    /// One contiguous file per block
    #[default]
    Mono,
    /// Fixed-size pages, evictable independently
    Paged,
}

/// One storage directory inside a tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirConfig {
    pub path: PathBuf,
    pub capacity_bytes: u64,
}

/// A storage tier, e.g. MEM or SSD, with its directories in allocation order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConfig {
    pub alias: String,
    pub dirs: Vec<DirConfig>,
}

/// Worker-side block store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Store layout selected at construction
    pub store_type: BlockStoreType,
    /// Tiers used by the Mono store, fastest first
    pub tiers: Vec<TierConfig>,
    /// Page size of the Paged store
    pub page_size: u64,
    /// Root directory of the Paged store
    pub page_store_dir: PathBuf,
    /// Byte budget of the Paged store
    pub page_store_capacity_bytes: u64,
    /// Medium alias the Paged store reports for its single directory
    pub page_store_medium: String,
    /// Fallback concurrency used when a read request leaves it unset
    pub default_max_ufs_read_concurrency: u32,
    /// First session id handed out by the engine
    pub session_id_base: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let root = std::env::temp_dir().join("strata-worker");
        Self {
            store_type: BlockStoreType::Mono,
            tiers: vec![TierConfig {
                alias: MEM_TIER.to_string(),
                dirs: vec![DirConfig {
                    path: root.join("mem"),
                    capacity_bytes: 1024 * 1024 * 1024, // 1GB
                }],
            }],
            page_size: DEFAULT_PAGE_SIZE,
            page_store_dir: root.join("pages"),
            page_store_capacity_bytes: 1024 * 1024 * 1024,
            page_store_medium: SSD_TIER.to_string(),
            default_max_ufs_read_concurrency: 1,
            session_id_base: 1 << 32,
        }
    }
}

impl WorkerConfig {
    /// Reject configurations the stores cannot run with
    pub fn validate(&self) -> Result<()> {
        match self.store_type {
            BlockStoreType::Mono => {
                if self.tiers.is_empty() {
                    return Err(Error::configuration("mono store needs at least one tier"));
                }
                for tier in &self.tiers {
                    if tier.alias.trim().is_empty() {
                        return Err(Error::configuration("tier alias must not be empty"));
                    }
                    if tier.dirs.is_empty() {
                        return Err(Error::configuration(format!(
                            "tier {} has no directories",
                            tier.alias
                        )));
                    }
                }
                let mut aliases: Vec<&str> = self.tiers.iter().map(|t| t.alias.as_str()).collect();
                aliases.sort_unstable();
                aliases.dedup();
                if aliases.len() != self.tiers.len() {
                    return Err(Error::configuration("tier aliases must be unique"));
                }
            }
            BlockStoreType::Paged => {
                if self.page_size == 0 {
                    return Err(Error::configuration("page_size must be positive"));
                }
                if self.page_store_capacity_bytes < self.page_size {
                    return Err(Error::configuration(format!(
                        "page store capacity {} is smaller than one page ({})",
                        self.page_store_capacity_bytes, self.page_size
                    )));
                }
            }
        }
        Ok(())
    }

    /// Position of the tier with this alias
    pub fn tier_ordinal(&self, alias: &str) -> Option<usize> {
        self.tiers.iter().position(|t| t.alias == alias)
    }
}

/// Builder for worker configurations
pub struct WorkerConfigBuilder {
    config: WorkerConfig,
}

impl WorkerConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: WorkerConfig::default(),
        }
    }

    /// Set the store layout
    pub fn with_store_type(mut self, store_type: BlockStoreType) -> Self {
        self.config.store_type = store_type;
        self
    }

    /// Replace all tiers
    pub fn with_tiers(mut self, tiers: Vec<TierConfig>) -> Self {
        self.config.tiers = tiers;
        self
    }

    /// Single-tier, single-directory layout rooted at `path`
    pub fn with_single_dir(mut self, alias: &str, path: PathBuf, capacity_bytes: u64) -> Self {
        self.config.tiers = vec![TierConfig {
            alias: alias.to_string(),
            dirs: vec![DirConfig {
                path,
                capacity_bytes,
            }],
        }];
        self
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.config.page_size = page_size;
        self
    }

    /// Set the Paged store root and budget
    pub fn with_page_store(mut self, dir: PathBuf, capacity_bytes: u64) -> Self {
        self.config.page_store_dir = dir;
        self.config.page_store_capacity_bytes = capacity_bytes;
        self
    }

    pub fn with_default_max_ufs_read_concurrency(mut self, limit: u32) -> Self {
        self.config.default_max_ufs_read_concurrency = limit;
        self
    }

    pub fn with_session_id_base(mut self, base: u64) -> Self {
        self.config.session_id_base = base;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<WorkerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for WorkerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        WorkerConfig::default().validate().unwrap();
    }

    #[test]
    fn test_duplicate_tier_alias_rejected() {
        let dir = DirConfig {
            path: PathBuf::from("/tmp/a"),
            capacity_bytes: 10,
        };
        let result = WorkerConfigBuilder::new()
            .with_tiers(vec![
                TierConfig {
                    alias: "MEM".into(),
                    dirs: vec![dir.clone()],
                },
                TierConfig {
                    alias: "MEM".into(),
                    dirs: vec![dir],
                },
            ])
            .build();
        assert!(matches!(result, Err(Error::Configuration { .. })));
    }

    #[test]
    fn test_paged_capacity_must_hold_a_page() {
        let result = WorkerConfigBuilder::new()
            .with_store_type(BlockStoreType::Paged)
            .with_page_size(4096)
            .with_page_store(PathBuf::from("/tmp/pages"), 1024)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: WorkerConfig =
            serde_json::from_str(r#"{"store_type":"paged","page_size":4096}"#).unwrap();
        assert_eq!(config.store_type, BlockStoreType::Paged);
        assert_eq!(config.page_size, 4096);
        assert_eq!(config.default_max_ufs_read_concurrency, 1);
    }
}
