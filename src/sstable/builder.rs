//! Table construction: a sorted stream of entries in, an immutable table
//! file out.

use std::path::Path;

use log::warn;

use crate::coding::put_fixed32;
use crate::config::{Options, ReadOptions};
use crate::env::{Env, WritableFile};
use crate::error::{Error, Result};
use crate::filename::table_file_name;
use crate::iterator::Iter;
use crate::key::InternalKey;
use crate::manifest::FileMetaData;
use crate::sstable::block::BlockBuilder;
use crate::sstable::filter_block::FilterBlockBuilder;
use crate::sstable::format::{
    mask_crc, trailer_crc, BlockHandle, CompressionType, Footer, BLOCK_TRAILER_SIZE,
};
use crate::sstable::table::Table;

/// Assembles a table file from entries added in strictly increasing key
/// order.
///
/// The builder cuts a data block whenever the current one reaches
/// `Options::block_size`, records one index entry per emitted block (with a
/// shortened separator key), and on `finish` lays down the filter block,
/// meta-index, index, and footer. Any write error becomes a sticky status:
/// every later call is a no-op returning it. The caller owns syncing and
/// closing the file after `finish`.
pub struct TableBuilder {
    options: Options,
    file: Box<dyn WritableFile>,
    offset: u64,
    status: Option<Error>,
    data_block: BlockBuilder,
    index_block: BlockBuilder,
    last_key: Vec<u8>,
    num_entries: u64,
    closed: bool,
    filter_block: Option<FilterBlockBuilder>,

    // An index entry is withheld until the next key arrives so the
    // separator can be shortened against it (see `add`).
    pending_index_entry: bool,
    pending_handle: BlockHandle,
}

impl TableBuilder {
    pub fn new(options: Options, file: Box<dyn WritableFile>) -> Self {
        let mut filter_block = options
            .filter_policy
            .clone()
            .map(FilterBlockBuilder::new);
        if let Some(fb) = &mut filter_block {
            fb.start_block(0);
        }
        TableBuilder {
            data_block: BlockBuilder::new(options.block_restart_interval),
            // Index entries are all restarts so lookups can binary search.
            index_block: BlockBuilder::new(1),
            options,
            file,
            offset: 0,
            status: None,
            last_key: Vec::new(),
            num_entries: 0,
            closed: false,
            filter_block,
            pending_index_entry: false,
            pending_handle: BlockHandle::default(),
        }
    }

    fn ok(&self) -> Result<()> {
        match &self.status {
            None => Ok(()),
            Some(err) => Err(err.clone()),
        }
    }

    /// Adds an entry. `key` must be strictly greater than every key added
    /// before it.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        assert!(!self.closed);
        self.ok()?;
        if self.num_entries > 0 {
            assert_eq!(
                self.options.comparator.compare(key, &self.last_key),
                std::cmp::Ordering::Greater,
                "keys added out of order"
            );
        }

        if self.pending_index_entry {
            debug_assert!(self.data_block.is_empty());
            self.options
                .comparator
                .find_shortest_separator(&mut self.last_key, key);
            let handle_encoding = self.pending_handle.encoded();
            self.index_block.add(&self.last_key, &handle_encoding);
            self.pending_index_entry = false;
        }

        if let Some(fb) = &mut self.filter_block {
            fb.add_key(key);
        }

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.num_entries += 1;
        self.data_block.add(key, value);

        if self.data_block.current_size_estimate() >= self.options.block_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Cuts the current data block and writes it out with its trailer.
    pub fn flush(&mut self) -> Result<()> {
        assert!(!self.closed);
        self.ok()?;
        if self.data_block.is_empty() {
            return Ok(());
        }
        debug_assert!(!self.pending_index_entry, "flush without a following add");

        let contents = self.data_block.finish().to_vec();
        self.data_block.reset();
        self.pending_handle = self.write_block(contents)?;
        self.pending_index_entry = true;
        let flushed = self.file.flush();
        self.capture(flushed)?;

        if let Some(fb) = &mut self.filter_block {
            fb.start_block(self.offset);
        }
        Ok(())
    }

    fn write_block(&mut self, contents: Vec<u8>) -> Result<BlockHandle> {
        let (block_contents, compression) = match self.options.compression {
            CompressionType::None => (contents, CompressionType::None),
            CompressionType::Snappy => {
                let mut encoder = snap::raw::Encoder::new();
                match encoder.compress_vec(&contents) {
                    // Keep compression only when it saves more than 1/8th.
                    Ok(compressed) if compressed.len() < contents.len() - contents.len() / 8 => {
                        (compressed, CompressionType::Snappy)
                    }
                    _ => (contents, CompressionType::None),
                }
            }
        };
        self.write_raw_block(&block_contents, compression)
    }

    fn write_raw_block(
        &mut self,
        contents: &[u8],
        compression: CompressionType,
    ) -> Result<BlockHandle> {
        let handle = BlockHandle::new(self.offset, contents.len() as u64);
        let appended = self.file.append(contents);
        self.capture(appended)?;

        let mut trailer = Vec::with_capacity(BLOCK_TRAILER_SIZE);
        trailer.push(compression as u8);
        put_fixed32(
            &mut trailer,
            mask_crc(trailer_crc(contents, compression as u8)),
        );
        let appended = self.file.append(&trailer);
        self.capture(appended)?;

        self.offset += (contents.len() + BLOCK_TRAILER_SIZE) as u64;
        Ok(handle)
    }

    fn capture<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if self.status.is_none() {
                self.status = Some(err.clone());
            }
        }
        result
    }

    /// Writes everything after the data blocks, in order: filter block,
    /// meta-index, index, footer. The file still needs a sync and close by
    /// the caller.
    pub fn finish(&mut self) -> Result<()> {
        self.flush()?;
        assert!(!self.closed);
        self.closed = true;

        // Filter block is stored raw; its format is not CRC-restartable and
        // recompression gains nothing.
        let mut filter_block_handle = None;
        if let Some(fb) = &mut self.filter_block {
            let contents = fb.finish().to_vec();
            filter_block_handle = Some(self.write_raw_block(&contents, CompressionType::None)?);
        }

        // Meta-index: one entry per meta block; today just the filter.
        let mut meta_index_block = BlockBuilder::new(self.options.block_restart_interval);
        if let (Some(handle), Some(policy)) = (filter_block_handle, &self.options.filter_policy) {
            let key = format!("filter.{}", policy.name());
            meta_index_block.add(key.as_bytes(), &handle.encoded());
        }
        let metaindex_handle = self.write_block(meta_index_block.finish().to_vec())?;

        if self.pending_index_entry {
            self.options
                .comparator
                .find_short_successor(&mut self.last_key);
            let handle_encoding = self.pending_handle.encoded();
            self.index_block.add(&self.last_key, &handle_encoding);
            self.pending_index_entry = false;
        }
        let index_contents = self.index_block.finish().to_vec();
        let index_handle = self.write_block(index_contents)?;

        let footer = Footer {
            metaindex_handle,
            index_handle,
        };
        let mut footer_encoding = Vec::new();
        footer.encode_to(&mut footer_encoding);
        let appended = self.file.append(&footer_encoding);
        self.capture(appended)?;
        self.offset += footer_encoding.len() as u64;
        Ok(())
    }

    /// Discards buffered state without emitting the table tail. The file
    /// contents are unspecified afterwards; callers unlink it.
    pub fn abandon(&mut self) {
        assert!(!self.closed);
        self.closed = true;
    }

    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Bytes written so far; after `finish`, the exact file size.
    pub fn file_size(&self) -> u64 {
        self.offset
    }

    pub fn status(&self) -> Result<()> {
        self.ok()
    }

    /// Hands the underlying file back for syncing and closing.
    pub fn into_file(self) -> Box<dyn WritableFile> {
        self.file
    }
}

/// Drains an ordered stream of internal-key entries into table file
/// `file_number` under `dir`, returning its metadata.
///
/// The resulting file is synced, then verified by reopening it; a file that
/// fails verification (or an empty input) leaves nothing on disk. Callers
/// publish the returned metadata through a version edit.
pub fn build_table<I>(
    env: &dyn Env,
    dir: &Path,
    options: &Options,
    file_number: u64,
    entries: I,
) -> Result<FileMetaData>
where
    I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
{
    let path = table_file_name(dir, file_number);
    let mut meta = FileMetaData {
        number: file_number,
        ..FileMetaData::default()
    };

    let file = env.new_writable_file(&path)?;
    let mut builder = TableBuilder::new(options.clone(), file);

    let mut result = (|| {
        for (key, value) in entries {
            if builder.num_entries() == 0 {
                meta.smallest = InternalKey::decode(&key)?;
            }
            meta.largest = InternalKey::decode(&key)?;
            builder.add(&key, &value)?;
        }
        if builder.num_entries() == 0 {
            builder.abandon();
            return Ok(());
        }
        builder.finish()
    })();

    meta.file_size = builder.file_size();
    let entry_count = builder.num_entries();
    let mut file = builder.into_file();
    if result.is_ok() && entry_count > 0 {
        result = file.sync();
    }
    drop(file);

    if result.is_ok() && entry_count > 0 {
        // Verify that the table is usable before publishing it.
        result = (|| {
            let raf = env.new_random_access_file(&path)?;
            let table = Table::open(options.clone(), raf, meta.file_size)?;
            let mut iter = table.iter(ReadOptions::new().verify_checksums(true));
            iter.seek_to_first();
            iter.status()
        })();
    }

    if result.is_err() || entry_count == 0 {
        if let Err(remove_err) = env.remove_file(&path) {
            if entry_count > 0 {
                warn!(
                    "failed to remove unusable table file {}: {remove_err}",
                    path.display()
                );
            }
        }
    }

    result.map(|_| meta)
}
