//! In-memory write buffer: a concurrent skip list ordered by internal key.
//!
//! Writes land here first and are served from here until a flush drains the
//! table into an SSTable. The skip list admits one writer concurrently with
//! any number of readers; writer serialization is the caller's job (the
//! database holds a write mutex above this layer).

use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_skiplist::SkipMap;

use crate::coding::{decode_fixed64, varint_length};
use crate::error::{Error, Result};
use crate::key::{append_internal_key, LookupKey, ParsedInternalKey, SequenceNumber, ValueType};

/// Encoded internal key with the engine's ordering: user key ascending,
/// then tag (sequence, type) descending, so the newest version of a user
/// key is the first one a lower-bound probe meets.
#[derive(PartialEq, Eq)]
struct MemKey(Vec<u8>);

impl MemKey {
    fn user_key(&self) -> &[u8] {
        &self.0[..self.0.len() - 8]
    }

    fn tag(&self) -> u64 {
        decode_fixed64(&self.0[self.0.len() - 8..])
    }
}

impl Ord for MemKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.user_key()
            .cmp(other.user_key())
            .then_with(|| other.tag().cmp(&self.tag()))
    }
}

impl PartialOrd for MemKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// The memtable. Append-only: entries are never mutated or removed; the
/// whole table is dropped after a successful flush.
#[derive(Default)]
pub struct Memtable {
    table: SkipMap<MemKey, Vec<u8>>,
    /// Approximate bytes of entry data, tracked as the wire-format size of
    /// each entry (length-prefixed key and value).
    size: AtomicUsize,
}

impl Memtable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entry. Sequence numbers must never repeat for the same
    /// user key; the database's write path guarantees this.
    pub fn add(
        &self,
        sequence: SequenceNumber,
        value_type: ValueType,
        user_key: &[u8],
        value: &[u8],
    ) {
        let internal_key_len = user_key.len() + 8;
        let mut key = Vec::with_capacity(internal_key_len);
        append_internal_key(&mut key, user_key, sequence, value_type);

        let encoded_size = varint_length(internal_key_len as u64)
            + internal_key_len
            + varint_length(value.len() as u64)
            + value.len();
        self.size.fetch_add(encoded_size, Ordering::SeqCst);

        self.table.insert(MemKey(key), value.to_vec());
    }

    /// Looks up the newest version visible at the lookup key's sequence.
    ///
    /// Returns `None` when this memtable holds no version of the user key
    /// (the caller falls through to older tables), `Some(Ok(value))` for a
    /// live entry, and `Some(Err(NotFound))` when the newest visible
    /// version is a tombstone.
    pub fn get(&self, key: &LookupKey) -> Option<Result<Vec<u8>>> {
        let probe = MemKey(key.internal_key().to_vec());
        let entry = self.table.lower_bound(Bound::Included(&probe))?;

        // The comparator already placed us at the newest version at or
        // below the lookup sequence; only the user key needs checking.
        let found = entry.key();
        if found.user_key() != key.user_key() {
            return None;
        }
        match ParsedInternalKey::parse(&found.0) {
            Ok(parsed) => match parsed.value_type {
                ValueType::Put => Some(Ok(entry.value().clone())),
                ValueType::Delete => Some(Err(Error::NotFound)),
            },
            Err(err) => Some(Err(err)),
        }
    }

    /// Ordered iteration over `(internal_key, value)` pairs. Keys carry
    /// their tags; flushing feeds these directly to a table builder.
    pub fn iter(&self) -> MemtableIter<'_> {
        MemtableIter {
            table: &self.table,
            last_key: None,
        }
    }

    pub fn approximate_memory_usage(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Lazy forward iterator; resumes from the last yielded key so it never
/// holds a skip-list cursor across yields.
pub struct MemtableIter<'a> {
    table: &'a SkipMap<MemKey, Vec<u8>>,
    last_key: Option<Vec<u8>>,
}

impl Iterator for MemtableIter<'_> {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        let entry = match &self.last_key {
            None => self.table.front()?,
            Some(last) => {
                let probe = MemKey(last.clone());
                let mut range = self.table.range((Bound::Excluded(probe), Bound::Unbounded));
                range.next()?
            }
        };
        let key = entry.key().0.clone();
        let value = entry.value().clone();
        self.last_key = Some(key.clone());
        Some((key, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::MAX_SEQUENCE_NUMBER;
    use rand::prelude::*;
    use std::sync::atomic::AtomicU64;

    fn get_value(memtable: &Memtable, user_key: &[u8], seq: SequenceNumber) -> Option<Vec<u8>> {
        match memtable.get(&LookupKey::new(user_key, seq)) {
            Some(Ok(value)) => Some(value),
            _ => None,
        }
    }

    #[test]
    fn test_versions_resolve_by_sequence() {
        let memtable = Memtable::new();
        memtable.add(1, ValueType::Put, b"age", b"21");
        memtable.add(2, ValueType::Put, b"age", b"22");

        assert_eq!(get_value(&memtable, b"age", 1), Some(b"21".to_vec()));
        assert_eq!(get_value(&memtable, b"age", 2), Some(b"22".to_vec()));
        assert_eq!(get_value(&memtable, b"age", 100), Some(b"22".to_vec()));
        assert!(memtable.get(&LookupKey::new(b"name", 100)).is_none());
    }

    #[test]
    fn test_tombstone_shadows_older_put() {
        let memtable = Memtable::new();
        memtable.add(1, ValueType::Put, b"age", b"21");
        memtable.add(2, ValueType::Delete, b"age", b"");

        // At sequence 1 the put is still visible.
        assert_eq!(get_value(&memtable, b"age", 1), Some(b"21".to_vec()));

        // From sequence 2 on, the tombstone answers with NotFound.
        let result = memtable.get(&LookupKey::new(b"age", 2));
        assert!(matches!(result, Some(Err(Error::NotFound))));
        let result = memtable.get(&LookupKey::new(b"age", MAX_SEQUENCE_NUMBER));
        assert!(matches!(result, Some(Err(Error::NotFound))));
    }

    #[test]
    fn test_iter_yields_internal_keys_in_order() {
        let memtable = Memtable::new();
        memtable.add(3, ValueType::Put, b"banana", b"3");
        memtable.add(1, ValueType::Put, b"apple", b"1");
        memtable.add(2, ValueType::Put, b"apple", b"2");
        memtable.add(4, ValueType::Delete, b"cherry", b"");

        let entries: Vec<_> = memtable.iter().collect();
        assert_eq!(entries.len(), 4);

        let parsed: Vec<(Vec<u8>, SequenceNumber, ValueType)> = entries
            .iter()
            .map(|(key, _)| {
                let p = ParsedInternalKey::parse(key).expect("bad internal key");
                (p.user_key.to_vec(), p.sequence, p.value_type)
            })
            .collect();

        // Same user key: newest sequence first.
        assert_eq!(
            parsed,
            vec![
                (b"apple".to_vec(), 2, ValueType::Put),
                (b"apple".to_vec(), 1, ValueType::Put),
                (b"banana".to_vec(), 3, ValueType::Put),
                (b"cherry".to_vec(), 4, ValueType::Delete),
            ]
        );
        assert_eq!(entries[0].1, b"2");
    }

    #[test]
    fn test_memory_usage_tracks_adds() {
        let memtable = Memtable::new();
        assert_eq!(memtable.approximate_memory_usage(), 0);
        memtable.add(1, ValueType::Put, b"key", b"value");
        let after_one = memtable.approximate_memory_usage();
        // varint(11) + 11 + varint(5) + 5
        assert_eq!(after_one, 18);
        memtable.add(2, ValueType::Put, b"key", b"value");
        assert_eq!(memtable.approximate_memory_usage(), 2 * after_one);
        assert_eq!(memtable.len(), 2);
    }

    #[test]
    fn test_concurrent_readers_see_published_writes() {
        const WRITES: u64 = 100_000;
        const READERS: usize = 4;
        const PROBES: usize = 20_000;

        let memtable = Memtable::new();
        let published = AtomicU64::new(0);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..WRITES {
                    let key = format!("key_{i:06}");
                    let value = format!("value_{i:06}");
                    memtable.add(i + 1, ValueType::Put, key.as_bytes(), value.as_bytes());
                    published.store(i + 1, Ordering::Release);
                }
            });

            for reader in 0..READERS {
                let memtable = &memtable;
                let published = &published;
                scope.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(reader as u64);
                    let mut probes = 0;
                    while probes < PROBES {
                        let limit = published.load(Ordering::Acquire);
                        if limit == 0 {
                            std::hint::spin_loop();
                            continue;
                        }
                        let i = rng.gen_range(0..limit);
                        let key = format!("key_{i:06}");
                        let found = memtable.get(&LookupKey::new(
                            key.as_bytes(),
                            MAX_SEQUENCE_NUMBER,
                        ));
                        // Every published write must be visible and exact.
                        match found {
                            Some(Ok(value)) => {
                                assert_eq!(value, format!("value_{i:06}").into_bytes())
                            }
                            other => panic!("missing published key {key}: {other:?}"),
                        }
                        probes += 1;
                    }
                });
            }
        });

        assert_eq!(memtable.len(), WRITES as usize);
    }
}
