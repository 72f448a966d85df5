//! Immutable table files: open, point-lookup, and scan.

use std::cmp::Ordering;
use std::sync::Arc;

use log::warn;

use crate::coding::put_fixed64;
use crate::comparator::Comparator;
use crate::config::{Options, ReadOptions};
use crate::corruption;
use crate::env::RandomAccessFile;
use crate::error::{Error, Result};
use crate::iterator::Iter;
use crate::key::{LookupKey, ParsedInternalKey, ValueType};
use crate::sstable::block::{Block, BlockIter};
use crate::sstable::filter_block::FilterBlockReader;
use crate::sstable::format::{read_block, BlockHandle, Footer};
use crate::sstable::two_level::TwoLevelIter;

/// An open table file. Immutable once built, so a `Table` is safe to share
/// across threads; each operation opens its own iterators.
pub struct Table {
    options: Options,
    file: Arc<dyn RandomAccessFile>,
    /// Namespaces this table's blocks inside the shared block cache.
    cache_id: u64,
    index_block: Block,
    metaindex_handle: BlockHandle,
    filter: Option<FilterBlockReader>,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table").field("cache_id", &self.cache_id).finish()
    }
}

impl Table {
    /// Opens a table of `size` bytes: reads the footer, the index block,
    /// and the filter block when the options carry a policy.
    pub fn open(options: Options, file: Arc<dyn RandomAccessFile>, size: u64) -> Result<Table> {
        if size < Footer::ENCODED_LENGTH as u64 {
            return corruption!("file too short to be a table: {size} bytes");
        }
        let footer_input = file.read(
            size - Footer::ENCODED_LENGTH as u64,
            Footer::ENCODED_LENGTH,
        )?;
        let footer = Footer::decode_from(&footer_input)?;

        let read_options = ReadOptions::new().verify_checksums(options.paranoid_checks);
        let index_contents = read_block(file.as_ref(), &read_options, &footer.index_handle)?;
        let index_block = Block::new(index_contents)?;

        let cache_id = options
            .block_cache
            .as_ref()
            .map_or(0, |cache| cache.new_id());

        let mut table = Table {
            options,
            file,
            cache_id,
            index_block,
            metaindex_handle: footer.metaindex_handle,
            filter: None,
        };
        table.read_meta(&read_options);
        Ok(table)
    }

    /// Loads the filter block via the meta-index. Failures leave the table
    /// filterless rather than unusable: filters only suppress reads.
    fn read_meta(&mut self, read_options: &ReadOptions) {
        let Some(policy) = self.options.filter_policy.clone() else {
            return;
        };
        let contents = match read_block(self.file.as_ref(), read_options, &self.metaindex_handle)
            .and_then(Block::new)
        {
            Ok(block) => block,
            Err(err) => {
                warn!("ignoring unreadable meta-index block: {err}");
                return;
            }
        };

        // The meta-index maps well-known names to block handles; entries we
        // do not recognize are skipped.
        let key = format!("filter.{}", policy.name());
        let mut iter = contents.iter(Arc::new(crate::comparator::BytewiseComparator));
        iter.seek(key.as_bytes());
        if !iter.valid() || iter.key() != key.as_bytes() {
            return;
        }
        let mut input = iter.value();
        let Ok(handle) = BlockHandle::decode_from(&mut input) else {
            warn!("ignoring undecodable filter handle");
            return;
        };
        match read_block(self.file.as_ref(), read_options, &handle) {
            Ok(filter_data) => {
                self.filter = Some(FilterBlockReader::new(policy, &filter_data));
            }
            Err(err) => warn!("ignoring unreadable filter block: {err}"),
        }
    }

    /// Resolves an index-entry value into a positioned data-block iterator,
    /// going through the block cache when one is configured.
    fn block_iter_for(&self, options: &ReadOptions, index_value: &[u8]) -> Result<BlockIter> {
        let mut input = index_value;
        let handle = BlockHandle::decode_from(&mut input)?;

        let block = match &self.options.block_cache {
            Some(cache) => {
                let mut cache_key = Vec::with_capacity(16);
                put_fixed64(&mut cache_key, self.cache_id);
                put_fixed64(&mut cache_key, handle.offset);
                match cache.lookup(&cache_key) {
                    Some(cached) => cached.value().clone(),
                    None => {
                        let contents = read_block(self.file.as_ref(), options, &handle)?;
                        let block = Block::new(contents)?;
                        if options.fill_cache {
                            let charge = block.size();
                            cache.insert(&cache_key, block.clone(), charge);
                        }
                        block
                    }
                }
            }
            None => {
                let contents = read_block(self.file.as_ref(), options, &handle)?;
                Block::new(contents)?
            }
        };
        Ok(block.iter(self.options.comparator.clone()))
    }

    /// An iterator over every entry in the file, in key order.
    pub fn iter(&self, options: ReadOptions) -> TwoLevelIter<'_> {
        TwoLevelIter::new(
            self.index_block.iter(self.options.comparator.clone()),
            Box::new(move |index_value| self.block_iter_for(&options, index_value)),
        )
    }

    /// Point lookup for the newest version visible at the lookup key's
    /// sequence. The table must have been built under the internal-key
    /// order wrapping `user_comparator`.
    ///
    /// Returns `None` when the user key is absent from this table,
    /// `Some(Ok(value))` for a live entry, and `Some(Err(NotFound))` when
    /// the visible version is a tombstone.
    pub fn internal_get(
        &self,
        options: &ReadOptions,
        key: &LookupKey,
        user_comparator: &dyn Comparator,
    ) -> Option<Result<Vec<u8>>> {
        let internal_key = key.internal_key();

        let mut index_iter = self.index_block.iter(self.options.comparator.clone());
        index_iter.seek(internal_key);
        if !index_iter.valid() {
            if let Err(err) = index_iter.status() {
                return Some(Err(err));
            }
            return None;
        }
        let handle_value = index_iter.value().to_vec();

        if let Some(filter) = &self.filter {
            let mut input = handle_value.as_slice();
            if let Ok(handle) = BlockHandle::decode_from(&mut input) {
                if !filter.key_may_match(handle.offset, internal_key) {
                    // Definitely absent; the data block is never touched.
                    return None;
                }
            }
        }

        let mut block_iter = match self.block_iter_for(options, &handle_value) {
            Ok(iter) => iter,
            Err(err) => return Some(Err(err)),
        };
        block_iter.seek(internal_key);
        if !block_iter.valid() {
            if let Err(err) = block_iter.status() {
                return Some(Err(err));
            }
            return None;
        }

        let parsed = match ParsedInternalKey::parse(block_iter.key()) {
            Ok(parsed) => parsed,
            Err(err) => return Some(Err(err)),
        };
        if user_comparator.compare(parsed.user_key, key.user_key()) != Ordering::Equal {
            return None;
        }
        match parsed.value_type {
            ValueType::Put => Some(Ok(block_iter.value().to_vec())),
            ValueType::Delete => Some(Err(Error::NotFound)),
        }
    }

    /// Approximate file offset where `key` would live. Keys past the last
    /// entry map to the start of the table's tail (the meta section).
    pub fn approximate_offset_of(&self, key: &[u8]) -> u64 {
        let mut index_iter = self.index_block.iter(self.options.comparator.clone());
        index_iter.seek(key);
        if index_iter.valid() {
            let mut input = index_iter.value();
            if let Ok(handle) = BlockHandle::decode_from(&mut input) {
                return handle.offset;
            }
        }
        self.metaindex_handle.offset
    }
}
