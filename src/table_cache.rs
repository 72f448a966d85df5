//! Cache of open table files, keyed by file number.
//!
//! Opening a table costs a footer read, an index-block read, and possibly a
//! filter-block read; reads of the same file should pay that once. Entries
//! are charged one unit each, so capacity bounds the number of open files.

use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::{CacheHandle, ShardedCache};
use crate::coding::put_fixed64;
use crate::comparator::Comparator;
use crate::config::{Options, ReadOptions};
use crate::env::Env;
use crate::error::Result;
use crate::filename::table_file_name;
use crate::key::LookupKey;
use crate::sstable::table::Table;

pub struct TableCache {
    env: Arc<dyn Env>,
    dir: PathBuf,
    options: Options,
    cache: Arc<ShardedCache<Table>>,
}

impl TableCache {
    /// `entries` bounds how many tables stay open at once.
    pub fn new(env: Arc<dyn Env>, dir: impl Into<PathBuf>, options: Options, entries: usize) -> Self {
        TableCache {
            env,
            dir: dir.into(),
            options,
            cache: ShardedCache::new(entries),
        }
    }

    fn find_table(&self, file_number: u64, file_size: u64) -> Result<CacheHandle<Table>> {
        let mut key = Vec::with_capacity(8);
        put_fixed64(&mut key, file_number);
        if let Some(handle) = self.cache.lookup(&key) {
            return Ok(handle);
        }
        let path = table_file_name(&self.dir, file_number);
        let file = self.env.new_random_access_file(&path)?;
        let table = Table::open(self.options.clone(), file, file_size)?;
        Ok(self.cache.insert(&key, table, 1))
    }

    /// Point lookup in table `file_number`, same contract as
    /// [`Table::internal_get`].
    pub fn get(
        &self,
        options: &ReadOptions,
        file_number: u64,
        file_size: u64,
        key: &LookupKey,
        user_comparator: &dyn Comparator,
    ) -> Option<Result<Vec<u8>>> {
        let handle = match self.find_table(file_number, file_size) {
            Ok(handle) => handle,
            Err(err) => return Some(Err(err)),
        };
        handle.value().internal_get(options, key, user_comparator)
    }

    /// Runs `f` against the opened table; the cache handle pins the table
    /// for the duration. Scans go through here so the iterator cannot
    /// outlive the cached table.
    pub fn with_table<R>(
        &self,
        file_number: u64,
        file_size: u64,
        f: impl FnOnce(&Table) -> R,
    ) -> Result<R> {
        let handle = self.find_table(file_number, file_size)?;
        Ok(f(handle.value()))
    }

    /// Drops the cache entry for a deleted file. Outstanding uses finish
    /// against the old handle.
    pub fn evict(&self, file_number: u64) {
        let mut key = Vec::with_capacity(8);
        put_fixed64(&mut key, file_number);
        self.cache.erase(&key);
    }
}
