//! Prefix-compressed, restart-indexed sorted blocks.
//!
//! A block body is a run of entries, each storing only the suffix of its key
//! that differs from the previous entry:
//!
//! ```text
//! varint(shared) || varint(non_shared) || varint(value_len)
//!               || key_delta bytes     || value bytes
//! ```
//!
//! Every `restart_interval` entries the shared count resets to zero and the
//! entry's offset is recorded in a restart array at the end of the body:
//!
//! ```text
//! entries... || fixed32 restart[0..n] || fixed32 num_restarts
//! ```
//!
//! Restart points are where iterators binary-search before scanning.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::coding::{decode_fixed32, get_varint32, put_fixed32, put_varint32};
use crate::comparator::Comparator;
use crate::corruption;
use crate::error::{Error, Result};
use crate::iterator::Iter;

pub struct BlockBuilder {
    block_restart_interval: usize,
    buffer: Vec<u8>,
    restarts: Vec<u32>,
    counter: usize,
    finished: bool,
    last_key: Vec<u8>,
}

impl BlockBuilder {
    pub fn new(block_restart_interval: usize) -> Self {
        assert!(block_restart_interval >= 1);
        BlockBuilder {
            block_restart_interval,
            buffer: Vec::new(),
            restarts: vec![0],
            counter: 0,
            finished: false,
            last_key: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.restarts.clear();
        self.restarts.push(0);
        self.counter = 0;
        self.finished = false;
        self.last_key.clear();
    }

    /// Appends an entry. Keys must arrive in strictly increasing order under
    /// the comparator of whoever owns this builder; the builder itself only
    /// tracks bytes.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        assert!(!self.finished);
        assert!(self.counter <= self.block_restart_interval);

        let shared = if self.counter < self.block_restart_interval {
            // Prefix length shared with the previous key.
            self.last_key
                .iter()
                .zip(key.iter())
                .take_while(|(a, b)| a == b)
                .count()
        } else {
            // Restart compression from this entry.
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
            0
        };
        let non_shared = key.len() - shared;

        put_varint32(&mut self.buffer, shared as u32);
        put_varint32(&mut self.buffer, non_shared as u32);
        put_varint32(&mut self.buffer, value.len() as u32);
        self.buffer.extend_from_slice(&key[shared..]);
        self.buffer.extend_from_slice(value);

        self.last_key.truncate(shared);
        self.last_key.extend_from_slice(&key[shared..]);
        debug_assert_eq!(self.last_key, key);
        self.counter += 1;
    }

    /// Appends the restart array and returns the finished body. The output
    /// is deterministic for a given sequence of `add`s and options.
    pub fn finish(&mut self) -> &[u8] {
        for &restart in &self.restarts {
            put_fixed32(&mut self.buffer, restart);
        }
        put_fixed32(&mut self.buffer, self.restarts.len() as u32);
        self.finished = true;
        &self.buffer
    }

    /// Uncompressed size of the block if `finish` were called now.
    pub fn current_size_estimate(&self) -> usize {
        self.buffer.len() + self.restarts.len() * 4 + 4
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// An immutable decoded block. Cheap to clone; the body is shared.
#[derive(Clone)]
pub struct Block {
    data: Arc<Vec<u8>>,
    restart_offset: usize,
    num_restarts: u32,
}

impl Block {
    pub fn new(data: Vec<u8>) -> Result<Self> {
        if data.len() < 4 {
            return corruption!("block too short: {} bytes", data.len());
        }
        let num_restarts = decode_fixed32(&data[data.len() - 4..]);
        let max_restarts = ((data.len() - 4) / 4) as u32;
        if num_restarts > max_restarts {
            return corruption!("restart array overflows block ({num_restarts} restarts)");
        }
        let restart_offset = data.len() - (1 + num_restarts as usize) * 4;
        Ok(Block {
            data: Arc::new(data),
            restart_offset,
            num_restarts,
        })
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn iter(&self, comparator: Arc<dyn Comparator>) -> BlockIter {
        BlockIter {
            block: self.clone(),
            comparator,
            current: self.restart_offset,
            restart_index: self.num_restarts as usize,
            key: Vec::new(),
            value_offset: 0,
            value_len: 0,
            status: None,
        }
    }

    fn restart_point(&self, index: usize) -> usize {
        debug_assert!(index < self.num_restarts as usize);
        decode_fixed32(&self.data[self.restart_offset + 4 * index..]) as usize
    }
}

/// Decodes an entry header at `offset`, returning
/// `(shared, non_shared, value_len, header_len)`, or None when the entry is
/// malformed or out of bounds.
fn decode_entry(data: &[u8], offset: usize, limit: usize) -> Option<(usize, usize, usize, usize)> {
    if offset >= limit || limit > data.len() {
        return None;
    }
    let mut p = &data[offset..limit];
    let available = p.len();
    let shared = get_varint32(&mut p).ok()? as usize;
    let non_shared = get_varint32(&mut p).ok()? as usize;
    let value_len = get_varint32(&mut p).ok()? as usize;
    let header_len = available - p.len();
    if p.len() < non_shared + value_len {
        return None;
    }
    Some((shared, non_shared, value_len, header_len))
}

/// Cursor over one block. Positioning seeks binary-search the restart array
/// and then scan forward within the restart interval.
pub struct BlockIter {
    block: Block,
    comparator: Arc<dyn Comparator>,
    /// Offset of the current entry; `restart_offset` when invalid.
    current: usize,
    /// Restart block containing `current`.
    restart_index: usize,
    key: Vec<u8>,
    value_offset: usize,
    value_len: usize,
    status: Option<Error>,
}

impl BlockIter {
    fn next_entry_offset(&self) -> usize {
        self.value_offset + self.value_len
    }

    fn seek_to_restart_point(&mut self, restart_index: usize) {
        self.key.clear();
        self.restart_index = restart_index;
        // parse_next_key picks the entry up from here.
        self.value_offset = self.block.restart_point(restart_index);
        self.value_len = 0;
    }

    fn corruption_error(&mut self, message: &str) {
        self.current = self.block.restart_offset;
        self.restart_index = self.block.num_restarts as usize;
        self.key.clear();
        self.value_len = 0;
        if self.status.is_none() {
            self.status = Some(Error::Corruption(message.to_string()));
        }
    }

    fn parse_next_key(&mut self) -> bool {
        self.current = self.next_entry_offset();
        if self.current >= self.block.restart_offset {
            // No more entries; mark invalid.
            self.current = self.block.restart_offset;
            self.restart_index = self.block.num_restarts as usize;
            return false;
        }

        match decode_entry(&self.block.data, self.current, self.block.restart_offset) {
            Some((shared, non_shared, value_len, header_len)) if shared <= self.key.len() => {
                let delta_start = self.current + header_len;
                self.key.truncate(shared);
                self.key
                    .extend_from_slice(&self.block.data[delta_start..delta_start + non_shared]);
                self.value_offset = delta_start + non_shared;
                self.value_len = value_len;
                while self.restart_index + 1 < self.block.num_restarts as usize
                    && self.block.restart_point(self.restart_index + 1) < self.current
                {
                    self.restart_index += 1;
                }
                true
            }
            _ => {
                self.corruption_error("bad entry in block");
                false
            }
        }
    }
}

impl Iter for BlockIter {
    fn valid(&self) -> bool {
        self.current < self.block.restart_offset
    }

    fn seek_to_first(&mut self) {
        if self.block.num_restarts == 0 {
            self.corruption_error("block has no restart points");
            return;
        }
        self.seek_to_restart_point(0);
        self.parse_next_key();
    }

    fn seek_to_last(&mut self) {
        if self.block.num_restarts == 0 {
            self.corruption_error("block has no restart points");
            return;
        }
        self.seek_to_restart_point(self.block.num_restarts as usize - 1);
        while self.parse_next_key() && self.next_entry_offset() < self.block.restart_offset {
            // Keep skipping until we hit the tail of the block.
        }
    }

    fn seek(&mut self, target: &[u8]) {
        if self.block.num_restarts == 0 {
            self.corruption_error("block has no restart points");
            return;
        }
        // Binary search for the last restart point whose key < target.
        let mut left = 0usize;
        let mut right = self.block.num_restarts as usize - 1;
        while left < right {
            let mid = (left + right + 1) / 2;
            let region_offset = self.block.restart_point(mid);
            let entry = decode_entry(
                &self.block.data,
                region_offset,
                self.block.restart_offset,
            );
            let (shared, non_shared, _, header_len) = match entry {
                Some(e) => e,
                None => {
                    self.corruption_error("bad entry in block");
                    return;
                }
            };
            if shared != 0 {
                // Restart entries never share a prefix.
                self.corruption_error("restart point entry has shared bytes");
                return;
            }
            let key_start = region_offset + header_len;
            let mid_key = &self.block.data[key_start..key_start + non_shared];
            if self.comparator.compare(mid_key, target) == Ordering::Less {
                left = mid;
            } else {
                right = mid - 1;
            }
        }

        // Linear scan within the restart interval for the first key >= target.
        self.seek_to_restart_point(left);
        loop {
            if !self.parse_next_key() {
                return;
            }
            if self.comparator.compare(&self.key, target) != Ordering::Less {
                return;
            }
        }
    }

    fn next(&mut self) {
        assert!(self.valid());
        self.parse_next_key();
    }

    fn prev(&mut self) {
        assert!(self.valid());

        // Back up to the restart point strictly before the current entry,
        // then walk forward to the entry preceding it.
        let original = self.current;
        while self.block.restart_point(self.restart_index) >= original {
            if self.restart_index == 0 {
                // No entries before the first one.
                self.current = self.block.restart_offset;
                self.restart_index = self.block.num_restarts as usize;
                return;
            }
            self.restart_index -= 1;
        }

        self.seek_to_restart_point(self.restart_index);
        while self.parse_next_key() && self.next_entry_offset() < original {
            // Walk up to the entry just before `original`.
        }
    }

    fn key(&self) -> &[u8] {
        assert!(self.valid());
        &self.key
    }

    fn value(&self) -> &[u8] {
        assert!(self.valid());
        &self.block.data[self.value_offset..self.value_offset + self.value_len]
    }

    fn status(&self) -> Result<()> {
        match &self.status {
            None => Ok(()),
            Some(err) => Err(err.clone()),
        }
    }
}
