//! emberdb: the storage core of an embedded ordered key-value engine.
//!
//! Writes buffer in a concurrent [`memtable::Memtable`] and flush into
//! immutable sorted-string tables ([`sstable`]); reads consult the memtable
//! and then tables, with decoded blocks and open files held in a sharded
//! LRU [`cache::ShardedCache`]. Everything persisted is varint/fixed coded
//! ([`coding`]) and CRC-framed.

pub mod cache;
pub mod coding;
pub mod comparator;
pub mod config;
pub mod env;
pub mod error;
pub mod filename;
pub mod filter;
pub mod flock;
pub mod hash;
pub mod iterator;
pub mod key;
pub mod manifest;
pub mod memtable;
pub mod sstable;
pub mod table_cache;
pub mod wal;

#[cfg(test)]
pub mod tmpfs;

pub use cache::{CacheHandle, ShardedCache};
pub use comparator::{BytewiseComparator, Comparator};
pub use config::{Options, ReadOptions};
pub use env::{Env, FsEnv};
pub use error::{Error, Result};
pub use filter::{BloomFilterPolicy, FilterPolicy};
pub use iterator::Iter;
pub use key::{
    InternalKey, InternalKeyComparator, LookupKey, SequenceNumber, ValueType,
    MAX_SEQUENCE_NUMBER,
};
pub use memtable::Memtable;
pub use sstable::{build_table, Table, TableBuilder};
pub use table_cache::TableCache;
