use std::sync::Arc;

use crate::internal_key::{BytewiseComparator, Comparator};

#[derive(Debug, Clone)]
pub struct DbOptions {
    /// Flush the memtable to a level-0 table once it holds roughly this many
    /// bytes.
    pub max_memory_size: usize,
    /// Target size of one table data block.
    pub block_size: usize,
    /// Entries between restart points in a data block.
    pub block_restart_interval: usize,
    /// Snappy-compress data blocks when it pays for itself.
    pub compression: bool,
    /// Sync manifest records before publishing the version they describe.
    pub fsync_writes: bool,
    /// Ordering over user keys. The same comparator must be used for the
    /// lifetime of a database directory.
    pub comparator: Arc<dyn Comparator>,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            max_memory_size: 4 * 1024 * 1024,
            block_size: 4096,
            block_restart_interval: 16,
            compression: true,
            fsync_writes: true,
            comparator: Arc::new(BytewiseComparator),
        }
    }
}
