/// Constants used throughout the strata codebase
// Tier aliases, highest first
pub const MEM_TIER: &str = "MEM";
pub const SSD_TIER: &str = "SSD";
pub const HDD_TIER: &str = "HDD";

// Block sizing
pub const DEFAULT_BLOCK_SIZE: u64 = 64 * 1024 * 1024;
pub const DEFAULT_PAGE_SIZE: u64 = 1024 * 1024;
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

// Client pool sizing
pub const DEFAULT_POOL_MIN: usize = 0;
pub const DEFAULT_POOL_MAX: usize = 1024;

// Unary rpc deadline
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 30_000;

// Bound of every in-process stream buffer
pub const STREAM_BUFFER_MESSAGES: usize = 64;

// Environment variable names
pub const STRATA_LOG_VAR: &str = "STRATA_LOG";

// Persisted layout
pub const TEMP_BLOCKS_DIR: &str = ".tmp_blocks";
pub const TEMP_PAGES_DIR: &str = ".tmp";
