//! Internal key format: user key + packed (sequence, type) tag.
//!
//! The storage engine never orders raw user keys. Every entry carries an
//! 8-byte tag so that multiple versions of the same user key coexist, with
//! the ordering arranged so a seek lands on the newest version visible at
//! the seek's sequence number:
//!
//! ```text
//! internal_key = user_key || fixed64(sequence << 8 | type)
//! order: user_key ascending, then sequence descending, then type descending
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::coding::{decode_fixed64, put_fixed64, put_varint32, varint_length};
use crate::comparator::Comparator;
use crate::corruption;
use crate::error::Result;

/// Monotonic per-database write counter. 56 usable bits; the low byte of
/// the packed tag holds the value type.
pub type SequenceNumber = u64;

pub const MAX_SEQUENCE_NUMBER: SequenceNumber = (1 << 56) - 1;

/// Distinguishes puts from deletes. A delete writes a tombstone; the key is
/// shadowed, not removed, until compaction drops it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueType {
    Delete = 0,
    Put = 1,
}

/// Reserved tag type used only when constructing lookup keys and shortened
/// index separators. Sits immediately above `Put`, so under the descending
/// type order a seek tag sorts ahead of any stored entry with the same
/// sequence. Never appears in a stored entry.
pub const TYPE_FOR_SEEK: u8 = 2;

impl ValueType {
    pub fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(ValueType::Delete),
            1 => Ok(ValueType::Put),
            _ => corruption!("invalid value type: {byte}"),
        }
    }
}

pub(crate) fn pack_sequence_and_type(seq: SequenceNumber, tag_type: u8) -> u64 {
    debug_assert!(seq <= MAX_SEQUENCE_NUMBER);
    debug_assert!(tag_type <= TYPE_FOR_SEEK);
    (seq << 8) | tag_type as u64
}

/// Appends `user_key || tag` to `dst`.
pub fn append_internal_key(
    dst: &mut Vec<u8>,
    user_key: &[u8],
    sequence: SequenceNumber,
    value_type: ValueType,
) {
    dst.extend_from_slice(user_key);
    put_fixed64(dst, pack_sequence_and_type(sequence, value_type as u8));
}

/// Returns the user-key portion of an encoded internal key.
pub fn extract_user_key(internal_key: &[u8]) -> &[u8] {
    assert!(internal_key.len() >= 8, "internal key shorter than its tag");
    &internal_key[..internal_key.len() - 8]
}

/// An internal key decomposed into its parts, borrowing the user key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    pub user_key: &'a [u8],
    pub sequence: SequenceNumber,
    pub value_type: ValueType,
}

impl<'a> ParsedInternalKey<'a> {
    pub fn parse(internal_key: &'a [u8]) -> Result<Self> {
        if internal_key.len() < 8 {
            return corruption!("internal key too short: {} bytes", internal_key.len());
        }
        let tag = decode_fixed64(&internal_key[internal_key.len() - 8..]);
        let value_type = ValueType::from_u8((tag & 0xff) as u8)?;
        Ok(ParsedInternalKey {
            user_key: &internal_key[..internal_key.len() - 8],
            sequence: tag >> 8,
            value_type,
        })
    }
}

/// An owned, encoded internal key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InternalKey {
    rep: Vec<u8>,
}

impl InternalKey {
    pub fn new(user_key: &[u8], sequence: SequenceNumber, value_type: ValueType) -> Self {
        let mut rep = Vec::with_capacity(user_key.len() + 8);
        append_internal_key(&mut rep, user_key, sequence, value_type);
        InternalKey { rep }
    }

    /// Wraps already-encoded bytes, validating only the minimum length.
    pub fn decode(encoded: &[u8]) -> Result<Self> {
        if encoded.len() < 8 {
            return corruption!("internal key too short: {} bytes", encoded.len());
        }
        Ok(InternalKey {
            rep: encoded.to_vec(),
        })
    }

    pub fn encoded(&self) -> &[u8] {
        &self.rep
    }

    pub fn user_key(&self) -> &[u8] {
        extract_user_key(&self.rep)
    }
}

fn escape_bytes(f: &mut fmt::Formatter, bytes: &[u8]) -> fmt::Result {
    for &b in bytes {
        if (0x20..0x7f).contains(&b) {
            write!(f, "{}", b as char)?;
        } else {
            write!(f, "\\x{b:02x}")?;
        }
    }
    Ok(())
}

/// Renders as `'user_key' @ sequence : type`, e.g. `'name' @ 1234 : 1`.
impl fmt::Display for InternalKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match ParsedInternalKey::parse(&self.rep) {
            Ok(parsed) => {
                write!(f, "'")?;
                escape_bytes(f, parsed.user_key)?;
                write!(f, "' @ {} : {}", parsed.sequence, parsed.value_type as u8)
            }
            Err(_) => {
                write!(f, "(bad)")?;
                escape_bytes(f, &self.rep)
            }
        }
    }
}

/// Orders internal keys: user key ascending per the wrapped comparator,
/// then sequence descending, then type descending.
#[derive(Clone)]
pub struct InternalKeyComparator {
    user_comparator: Arc<dyn Comparator>,
}

impl InternalKeyComparator {
    pub fn new(user_comparator: Arc<dyn Comparator>) -> Self {
        InternalKeyComparator { user_comparator }
    }

    pub fn user_comparator(&self) -> &dyn Comparator {
        self.user_comparator.as_ref()
    }
}

impl Comparator for InternalKeyComparator {
    fn name(&self) -> &'static str {
        "emberdb.InternalKeyComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        let ord = self
            .user_comparator
            .compare(extract_user_key(a), extract_user_key(b));
        if ord != Ordering::Equal {
            return ord;
        }
        // The sequence occupies the tag's high bits, so comparing whole
        // packed tags gives (sequence, type) in one shot. Reversed: a
        // larger tag means a newer entry, which sorts first.
        let a_tag = decode_fixed64(&a[a.len() - 8..]);
        let b_tag = decode_fixed64(&b[b.len() - 8..]);
        b_tag.cmp(&a_tag)
    }

    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]) {
        let user_start = extract_user_key(start);
        let user_limit = extract_user_key(limit);
        let mut tmp = user_start.to_vec();
        self.user_comparator
            .find_shortest_separator(&mut tmp, user_limit);
        if tmp.len() < user_start.len()
            && self.user_comparator.compare(user_start, &tmp) == Ordering::Less
        {
            // The user portion shrank and grew strictly larger. Tack on the
            // earliest possible tag so the result still sorts before every
            // real entry for the shortened user key.
            put_fixed64(
                &mut tmp,
                pack_sequence_and_type(MAX_SEQUENCE_NUMBER, TYPE_FOR_SEEK),
            );
            debug_assert_eq!(self.compare(start, &tmp), Ordering::Less);
            debug_assert_eq!(self.compare(&tmp, limit), Ordering::Less);
            *start = tmp;
        }
    }

    fn find_short_successor(&self, key: &mut Vec<u8>) {
        let user_key = extract_user_key(key);
        let mut tmp = user_key.to_vec();
        self.user_comparator.find_short_successor(&mut tmp);
        if tmp.len() < user_key.len()
            && self.user_comparator.compare(user_key, &tmp) == Ordering::Less
        {
            put_fixed64(
                &mut tmp,
                pack_sequence_and_type(MAX_SEQUENCE_NUMBER, TYPE_FOR_SEEK),
            );
            debug_assert_eq!(self.compare(key, &tmp), Ordering::Less);
            *key = tmp;
        }
    }
}

/// A memtable probe for `(user_key, sequence)`.
///
/// Holds one buffer with three materialized positions:
///
/// ```text
/// varint32(user_key_len + 8) || user_key || fixed64(seq << 8 | for_seek)
/// ^ start                       ^ kstart                             ^ end
/// ```
pub struct LookupKey {
    data: Vec<u8>,
    kstart: usize,
}

impl LookupKey {
    pub fn new(user_key: &[u8], sequence: SequenceNumber) -> Self {
        let internal_len = user_key.len() + 8;
        let mut data = Vec::with_capacity(varint_length(internal_len as u64) + internal_len);
        put_varint32(&mut data, internal_len as u32);
        let kstart = data.len();
        data.extend_from_slice(user_key);
        put_fixed64(&mut data, pack_sequence_and_type(sequence, TYPE_FOR_SEEK));
        LookupKey { data, kstart }
    }

    /// The length-prefixed form: a key suitable for probing the memtable.
    pub fn memtable_key(&self) -> &[u8] {
        &self.data
    }

    /// The internal key, as stored in table files.
    pub fn internal_key(&self) -> &[u8] {
        &self.data[self.kstart..]
    }

    pub fn user_key(&self) -> &[u8] {
        &self.data[self.kstart..self.data.len() - 8]
    }
}
