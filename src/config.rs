//! Configuration for table building and reading.

use std::sync::Arc;

use crate::cache::ShardedCache;
use crate::comparator::{BytewiseComparator, Comparator};
use crate::filter::FilterPolicy;
use crate::sstable::block::Block;
use crate::sstable::format::CompressionType;

/// Knobs affecting how tables are built and read.
///
/// The comparator and filter policy are part of the on-disk contract: a
/// table must be read with the comparator it was built with, and the filter
/// policy's name is embedded in the file's meta-index.
#[derive(Clone)]
pub struct Options {
    /// Total order over keys in blocks and tables.
    pub comparator: Arc<dyn Comparator>,

    /// Uncompressed payload threshold at which a data block is cut
    /// (default: 4KB).
    pub block_size: usize,

    /// Entries between prefix-compression restart points (default: 16).
    /// Index blocks always use an interval of 1.
    pub block_restart_interval: usize,

    /// Codec applied to block bodies; falls back to raw bytes per block
    /// when compression does not pay for itself.
    pub compression: CompressionType,

    /// Optional per-block key filter written into the table.
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,

    /// Shared cache of decoded data blocks. `None` reads every block from
    /// the file.
    pub block_cache: Option<Arc<ShardedCache<Block>>>,

    /// Verify checksums on every internal read, not just user-initiated
    /// ones (default: false).
    pub paranoid_checks: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            comparator: Arc::new(BytewiseComparator),
            block_size: 4 * 1024,
            block_restart_interval: 16,
            compression: CompressionType::None,
            filter_policy: None,
            block_cache: None,
            paranoid_checks: false,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn comparator(mut self, comparator: Arc<dyn Comparator>) -> Self {
        self.comparator = comparator;
        self
    }

    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    pub fn block_restart_interval(mut self, interval: usize) -> Self {
        self.block_restart_interval = interval;
        self
    }

    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    pub fn filter_policy(mut self, policy: Arc<dyn FilterPolicy>) -> Self {
        self.filter_policy = Some(policy);
        self
    }

    pub fn block_cache(mut self, cache: Arc<ShardedCache<Block>>) -> Self {
        self.block_cache = Some(cache);
        self
    }

    pub fn paranoid_checks(mut self, enabled: bool) -> Self {
        self.paranoid_checks = enabled;
        self
    }
}

/// Per-read knobs.
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    /// Verify block checksums for this read.
    pub verify_checksums: bool,

    /// Admit blocks read on behalf of this operation into the block cache.
    /// Bulk scans typically turn this off.
    pub fill_cache: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            verify_checksums: false,
            fill_cache: true,
        }
    }
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn verify_checksums(mut self, enabled: bool) -> Self {
        self.verify_checksums = enabled;
        self
    }

    pub fn fill_cache(mut self, enabled: bool) -> Self {
        self.fill_cache = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = Options::default();
        assert_eq!(options.block_size, 4096);
        assert_eq!(options.block_restart_interval, 16);
        assert_eq!(options.compression, CompressionType::None);
        assert!(options.filter_policy.is_none());
        assert!(options.block_cache.is_none());
        assert!(!options.paranoid_checks);
    }

    #[test]
    fn test_builder_chaining() {
        let options = Options::new()
            .block_size(1024)
            .block_restart_interval(4)
            .compression(CompressionType::Snappy)
            .paranoid_checks(true);
        assert_eq!(options.block_size, 1024);
        assert_eq!(options.block_restart_interval, 4);
        assert_eq!(options.compression, CompressionType::Snappy);
        assert!(options.paranoid_checks);

        let read = ReadOptions::new().verify_checksums(true).fill_cache(false);
        assert!(read.verify_checksums);
        assert!(!read.fill_cache);
    }
}
