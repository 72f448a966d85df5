//! Key-membership filter policies.
//!
//! A filter policy summarizes a set of keys into a compact byte string so a
//! reader can skip a data block that definitely does not contain a key.
//! "Maybe present" answers are allowed (and bound the false-positive rate);
//! "definitely absent" answers must never be wrong.

use std::sync::Arc;

use crate::hash::hash;
use crate::key::extract_user_key;

pub trait FilterPolicy: Send + Sync {
    /// Persisted alongside the filter data (the meta-index key embeds it).
    /// Changing the filter's encoding requires a new name.
    fn name(&self) -> &'static str;

    /// Appends a filter summarizing `keys` to `dst`. Keys may repeat.
    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>);

    /// Must return true if `key` was in the set the filter was built from;
    /// may return true for keys that were not (false positive).
    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool;
}

fn bloom_hash(key: &[u8]) -> u32 {
    hash(key, 0xbc9f1d34)
}

/// Bloom filter policy.
///
/// Sizing: at 10 bits per key the false-positive rate is roughly 1%. The
/// probe count k is derived as `bits_per_key * ln 2` and clamped to [1, 30];
/// all k probes come from one base hash via double hashing (rotate the hash
/// and keep adding the delta), so membership tests hash each key once.
pub struct BloomFilterPolicy {
    bits_per_key: usize,
    k: usize,
}

impl BloomFilterPolicy {
    pub fn new(bits_per_key: usize) -> Self {
        let k = (bits_per_key as f64 * 0.69) as usize; // 0.69 =~ ln(2)
        BloomFilterPolicy {
            bits_per_key,
            k: k.clamp(1, 30),
        }
    }
}

impl FilterPolicy for BloomFilterPolicy {
    fn name(&self) -> &'static str {
        "emberdb.BuiltinBloomFilter"
    }

    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>) {
        // A short filter over few keys would be all ones; 64 bits minimum.
        let bits = (keys.len() * self.bits_per_key).max(64);
        let bytes = (bits + 7) / 8;
        let bits = bytes * 8;

        let init_size = dst.len();
        dst.resize(init_size + bytes, 0);
        dst.push(self.k as u8); // Remember # of probes in filter
        let array = &mut dst[init_size..init_size + bytes];

        for key in keys {
            let mut h = bloom_hash(key);
            let delta = h.rotate_right(15);
            for _ in 0..self.k {
                let bit_pos = (h % bits as u32) as usize;
                array[bit_pos / 8] |= 1 << (bit_pos % 8);
                h = h.wrapping_add(delta);
            }
        }
    }

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        if filter.len() < 2 {
            return false;
        }
        let array = &filter[..filter.len() - 1];
        let bits = array.len() * 8;

        let k = filter[filter.len() - 1] as usize;
        if k > 30 {
            // Reserved for potentially new encodings. Consider it a match.
            return true;
        }

        let mut h = bloom_hash(key);
        let delta = h.rotate_right(15);
        for _ in 0..k {
            let bit_pos = (h % bits as u32) as usize;
            if array[bit_pos / 8] & (1 << (bit_pos % 8)) == 0 {
                return false;
            }
            h = h.wrapping_add(delta);
        }
        true
    }
}

/// Wraps a user policy so it can be fed internal keys: the 8-byte tag is
/// stripped before delegating, making the filter a user-key filter.
pub struct InternalFilterPolicy {
    user_policy: Arc<dyn FilterPolicy>,
}

impl InternalFilterPolicy {
    pub fn new(user_policy: Arc<dyn FilterPolicy>) -> Self {
        InternalFilterPolicy { user_policy }
    }
}

impl FilterPolicy for InternalFilterPolicy {
    fn name(&self) -> &'static str {
        self.user_policy.name()
    }

    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>) {
        let stripped: Vec<&[u8]> = keys.iter().map(|k| extract_user_key(k)).collect();
        self.user_policy.create_filter(&stripped, dst)
    }

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        self.user_policy.key_may_match(extract_user_key(key), filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coding::put_fixed32;
    use crate::key::{append_internal_key, ValueType};

    fn key(i: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        put_fixed32(&mut buf, i);
        buf
    }

    struct BloomTester {
        policy: BloomFilterPolicy,
        keys: Vec<Vec<u8>>,
        filter: Vec<u8>,
    }

    impl BloomTester {
        fn new() -> Self {
            BloomTester {
                policy: BloomFilterPolicy::new(10),
                keys: Vec::new(),
                filter: Vec::new(),
            }
        }

        fn add(&mut self, key: &[u8]) {
            self.keys.push(key.to_vec());
        }

        fn build(&mut self) {
            let refs: Vec<&[u8]> = self.keys.iter().map(|k| k.as_slice()).collect();
            self.filter.clear();
            self.policy.create_filter(&refs, &mut self.filter);
            self.keys.clear();
        }

        fn matches(&mut self, key: &[u8]) -> bool {
            if !self.keys.is_empty() {
                self.build();
            }
            self.policy.key_may_match(key, &self.filter)
        }

        fn false_positive_rate(&mut self) -> f64 {
            let mut hits = 0;
            for i in 0..10_000u32 {
                if self.matches(&key(i + 1_000_000_000)) {
                    hits += 1;
                }
            }
            hits as f64 / 10_000.0
        }
    }

    #[test]
    fn test_empty_filter() {
        let mut t = BloomTester::new();
        assert!(!t.matches(b"hello"));
        assert!(!t.matches(b"world"));
    }

    #[test]
    fn test_small_filter() {
        let mut t = BloomTester::new();
        t.add(b"hello");
        t.add(b"world");
        assert!(t.matches(b"hello"));
        assert!(t.matches(b"world"));
        assert!(!t.matches(b"x"));
        assert!(!t.matches(b"foo"));
    }

    #[test]
    fn test_varying_lengths() {
        // Scan a range of set sizes; no false negatives ever, and the
        // false-positive rate stays within the designed bound.
        let mut mediocre = 0;
        let mut good = 0;
        let mut length = 1u32;
        while length <= 10_000 {
            let mut t = BloomTester::new();
            for i in 0..length {
                t.add(&key(i));
            }
            t.build();

            assert!(
                t.filter.len() <= (length as usize * 10 / 8) + 40,
                "filter oversized at length {length}"
            );

            for i in 0..length {
                assert!(t.matches(&key(i)), "length {length}; key {i}");
            }

            let rate = t.false_positive_rate();
            assert!(rate <= 0.02, "rate {rate} at length {length}");
            if rate > 0.0125 {
                mediocre += 1;
            } else {
                good += 1;
            }

            length = if length < 10 { length + 1 } else { length * 10 };
        }
        assert!(mediocre <= good / 5, "{mediocre} mediocre vs {good} good");
    }

    #[test]
    fn test_repeated_key_prefixes() {
        // Keys "a"*i probed with "b"*i: ~1% false positives at 10 bits/key.
        let mut t = BloomTester::new();
        for i in 1..=1000usize {
            t.add(&b"a".repeat(i));
        }
        t.build();
        for i in 1..=1000usize {
            assert!(t.matches(&b"a".repeat(i)));
        }
        let mut hits = 0;
        for i in 1..=1000usize {
            if t.matches(&b"b".repeat(i)) {
                hits += 1;
            }
        }
        assert!(hits <= 20, "{hits} false positives out of 1000");
    }

    #[test]
    fn test_internal_policy_strips_tag() {
        let policy = InternalFilterPolicy::new(Arc::new(BloomFilterPolicy::new(10)));

        let mut ikey = Vec::new();
        append_internal_key(&mut ikey, b"user_key", 42, ValueType::Put);
        let keys: Vec<&[u8]> = vec![&ikey];
        let mut filter = Vec::new();
        policy.create_filter(&keys, &mut filter);

        // A probe at a different sequence must still match: the filter
        // covers user keys, not versions.
        let mut probe = Vec::new();
        append_internal_key(&mut probe, b"user_key", 7, ValueType::Delete);
        assert!(policy.key_may_match(&probe, &filter));

        let mut other = Vec::new();
        append_internal_key(&mut other, b"other_key", 42, ValueType::Put);
        assert!(!policy.key_may_match(&other, &filter));
    }
}
