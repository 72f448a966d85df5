//! Per-range filter blocks.
//!
//! Unlike data blocks, the filter block has its own format: a sequence of
//! filters followed by their offsets and a final `base_lg` byte. Filter `i`
//! summarizes every key whose containing data block starts in the file byte
//! range `[i << base_lg, (i+1) << base_lg)`:
//!
//! ```text
//! filter_0 .. filter_k
//! fixed32 offset_0 .. fixed32 offset_k
//! fixed32 offset_of_offsets_array
//! u8 base_lg
//! ```

use std::sync::Arc;

use crate::coding::{decode_fixed32, put_fixed32};
use crate::filter::FilterPolicy;

/// Generate a filter for every 2KB of file space. Baked into the on-disk
/// layout; changing it requires a new filter-policy name.
const FILTER_BASE_LG: usize = 11;
const FILTER_BASE: usize = 1 << FILTER_BASE_LG;

pub struct FilterBlockBuilder {
    policy: Arc<dyn FilterPolicy>,
    /// Flattened key bytes for the current range.
    keys: Vec<u8>,
    /// Start offset of each key within `keys`.
    starts: Vec<usize>,
    result: Vec<u8>,
    filter_offsets: Vec<u32>,
}

impl FilterBlockBuilder {
    pub fn new(policy: Arc<dyn FilterPolicy>) -> Self {
        FilterBlockBuilder {
            policy,
            keys: Vec::new(),
            starts: Vec::new(),
            result: Vec::new(),
            filter_offsets: Vec::new(),
        }
    }

    /// Called whenever a data block begins at `block_offset`; emits filters
    /// for every range boundary crossed since the last call.
    pub fn start_block(&mut self, block_offset: u64) {
        let filter_index = block_offset as usize / FILTER_BASE;
        assert!(filter_index >= self.filter_offsets.len());
        while filter_index > self.filter_offsets.len() {
            self.generate_filter();
        }
    }

    pub fn add_key(&mut self, key: &[u8]) {
        self.starts.push(self.keys.len());
        self.keys.extend_from_slice(key);
    }

    pub fn finish(&mut self) -> &[u8] {
        if !self.starts.is_empty() {
            self.generate_filter();
        }

        let offsets_start = self.result.len() as u32;
        let offsets = std::mem::take(&mut self.filter_offsets);
        for offset in offsets {
            put_fixed32(&mut self.result, offset);
        }
        put_fixed32(&mut self.result, offsets_start);
        self.result.push(FILTER_BASE_LG as u8);
        &self.result
    }

    fn generate_filter(&mut self) {
        let num_keys = self.starts.len();
        self.filter_offsets.push(self.result.len() as u32);
        if num_keys == 0 {
            // Fast path for ranges no data block started in.
            return;
        }

        self.starts.push(self.keys.len()); // simplify length computation
        let keys: Vec<&[u8]> = (0..num_keys)
            .map(|i| &self.keys[self.starts[i]..self.starts[i + 1]])
            .collect();
        self.policy.create_filter(&keys, &mut self.result);

        self.keys.clear();
        self.starts.clear();
    }
}

pub struct FilterBlockReader {
    policy: Arc<dyn FilterPolicy>,
    data: Vec<u8>,
    /// Start of the offsets array within `data`.
    offsets_start: usize,
    num_filters: usize,
    base_lg: usize,
}

impl FilterBlockReader {
    /// Accepts the raw filter block contents. A malformed block yields a
    /// reader that matches everything; filters only ever suppress reads.
    pub fn new(policy: Arc<dyn FilterPolicy>, contents: &[u8]) -> Self {
        let mut reader = FilterBlockReader {
            policy,
            data: Vec::new(),
            offsets_start: 0,
            num_filters: 0,
            base_lg: 0,
        };
        let n = contents.len();
        if n < 5 {
            // 1 byte base_lg + 4 for the offsets-array pointer.
            return reader;
        }
        let base_lg = contents[n - 1] as usize;
        let offsets_start = decode_fixed32(&contents[n - 5..]) as usize;
        if offsets_start > n - 5 {
            return reader;
        }
        reader.base_lg = base_lg;
        reader.offsets_start = offsets_start;
        reader.num_filters = (n - 5 - offsets_start) / 4;
        reader.data = contents.to_vec();
        reader
    }

    /// Whether the key may be present in the data block starting at
    /// `block_offset`. Errors are treated as potential matches.
    pub fn key_may_match(&self, block_offset: u64, key: &[u8]) -> bool {
        let index = (block_offset >> self.base_lg) as usize;
        if index >= self.num_filters {
            return true;
        }
        let start =
            decode_fixed32(&self.data[self.offsets_start + index * 4..]) as usize;
        let limit =
            decode_fixed32(&self.data[self.offsets_start + index * 4 + 4..]) as usize;
        if start > limit || limit > self.offsets_start {
            // Bad offsets: consider it a match.
            return true;
        }
        if start == limit {
            // Empty filters do not match any keys.
            return false;
        }
        self.policy.key_may_match(key, &self.data[start..limit])
    }
}
