//! Tagged version-edit records.
//!
//! A version edit describes one atomic change to the table layout: files
//! added and removed per level, plus bookkeeping counters. Each field is
//! introduced by a small integer tag and varint-coded, so old readers skip
//! nothing and new fields only ever append tags.

use crate::coding::{
    get_length_prefixed_slice, get_varint32, get_varint64, put_length_prefixed_slice,
    put_varint32, put_varint64,
};
use crate::corruption;
use crate::error::Result;
use crate::key::{InternalKey, SequenceNumber};

const COMPARATOR: u32 = 1;
const LOG_NUMBER: u32 = 2;
const NEXT_FILE_NUMBER: u32 = 3;
const LAST_SEQUENCE: u32 = 4;
const COMPACT_POINTER: u32 = 5;
const DELETED_FILE: u32 = 6;
const NEW_FILE: u32 = 7;
const PREV_LOG_NUMBER: u32 = 9;

/// Levels a file can be placed at. Persisted level numbers beyond this are
/// corruption.
pub const NUM_LEVELS: u32 = 7;

/// Everything a version needs to know about one table file. The boundary
/// keys are the file's actual smallest and largest internal keys; readers
/// prune files by them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileMetaData {
    pub number: u64,
    pub file_size: u64,
    pub smallest: InternalKey,
    pub largest: InternalKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionEdit {
    comparator: Option<String>,
    log_number: Option<u64>,
    prev_log_number: Option<u64>,
    next_file_number: Option<u64>,
    last_sequence: Option<SequenceNumber>,
    compact_pointers: Vec<(u32, InternalKey)>,
    deleted_files: Vec<(u32, u64)>,
    new_files: Vec<(u32, FileMetaData)>,
}

impl VersionEdit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn set_comparator_name(&mut self, name: &str) {
        self.comparator = Some(name.to_string());
    }

    pub fn set_log_number(&mut self, number: u64) {
        self.log_number = Some(number);
    }

    pub fn set_prev_log_number(&mut self, number: u64) {
        self.prev_log_number = Some(number);
    }

    pub fn set_next_file_number(&mut self, number: u64) {
        self.next_file_number = Some(number);
    }

    pub fn set_last_sequence(&mut self, sequence: SequenceNumber) {
        self.last_sequence = Some(sequence);
    }

    pub fn set_compact_pointer(&mut self, level: u32, key: InternalKey) {
        self.compact_pointers.push((level, key));
    }

    /// Records that the file is part of the new version at `level`.
    pub fn add_file(&mut self, level: u32, meta: FileMetaData) {
        self.new_files.push((level, meta));
    }

    /// Records that file `number` is dropped from `level`.
    pub fn remove_file(&mut self, level: u32, number: u64) {
        self.deleted_files.push((level, number));
    }

    pub fn comparator_name(&self) -> Option<&str> {
        self.comparator.as_deref()
    }

    pub fn log_number(&self) -> Option<u64> {
        self.log_number
    }

    pub fn last_sequence(&self) -> Option<SequenceNumber> {
        self.last_sequence
    }

    pub fn new_files(&self) -> &[(u32, FileMetaData)] {
        &self.new_files
    }

    pub fn deleted_files(&self) -> &[(u32, u64)] {
        &self.deleted_files
    }

    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        if let Some(name) = &self.comparator {
            put_varint32(dst, COMPARATOR);
            put_length_prefixed_slice(dst, name.as_bytes());
        }
        if let Some(number) = self.log_number {
            put_varint32(dst, LOG_NUMBER);
            put_varint64(dst, number);
        }
        if let Some(number) = self.prev_log_number {
            put_varint32(dst, PREV_LOG_NUMBER);
            put_varint64(dst, number);
        }
        if let Some(number) = self.next_file_number {
            put_varint32(dst, NEXT_FILE_NUMBER);
            put_varint64(dst, number);
        }
        if let Some(sequence) = self.last_sequence {
            put_varint32(dst, LAST_SEQUENCE);
            put_varint64(dst, sequence);
        }

        for (level, key) in &self.compact_pointers {
            put_varint32(dst, COMPACT_POINTER);
            put_varint32(dst, *level);
            put_length_prefixed_slice(dst, key.encoded());
        }
        for (level, number) in &self.deleted_files {
            put_varint32(dst, DELETED_FILE);
            put_varint32(dst, *level);
            put_varint64(dst, *number);
        }
        for (level, meta) in &self.new_files {
            put_varint32(dst, NEW_FILE);
            put_varint32(dst, *level);
            put_varint64(dst, meta.number);
            put_varint64(dst, meta.file_size);
            put_length_prefixed_slice(dst, meta.smallest.encoded());
            put_length_prefixed_slice(dst, meta.largest.encoded());
        }
    }

    pub fn decode_from(mut input: &[u8]) -> Result<Self> {
        let mut edit = VersionEdit::new();
        while !input.is_empty() {
            let tag = get_varint32(&mut input)?;
            match tag {
                COMPARATOR => {
                    let name = get_length_prefixed_slice(&mut input)?;
                    let name = std::str::from_utf8(name)
                        .map_err(|_| bad_field("comparator name"))?;
                    edit.comparator = Some(name.to_string());
                }
                LOG_NUMBER => edit.log_number = Some(get_varint64(&mut input)?),
                PREV_LOG_NUMBER => edit.prev_log_number = Some(get_varint64(&mut input)?),
                NEXT_FILE_NUMBER => edit.next_file_number = Some(get_varint64(&mut input)?),
                LAST_SEQUENCE => edit.last_sequence = Some(get_varint64(&mut input)?),
                COMPACT_POINTER => {
                    let level = get_level(&mut input)?;
                    let key = InternalKey::decode(get_length_prefixed_slice(&mut input)?)?;
                    edit.compact_pointers.push((level, key));
                }
                DELETED_FILE => {
                    let level = get_level(&mut input)?;
                    let number = get_varint64(&mut input)?;
                    edit.deleted_files.push((level, number));
                }
                NEW_FILE => {
                    let level = get_level(&mut input)?;
                    let meta = FileMetaData {
                        number: get_varint64(&mut input)?,
                        file_size: get_varint64(&mut input)?,
                        smallest: InternalKey::decode(get_length_prefixed_slice(&mut input)?)?,
                        largest: InternalKey::decode(get_length_prefixed_slice(&mut input)?)?,
                    };
                    edit.new_files.push((level, meta));
                }
                _ => return corruption!("unknown version edit tag: {tag}"),
            }
        }
        Ok(edit)
    }
}

fn get_level(input: &mut &[u8]) -> Result<u32> {
    let level = get_varint32(input)?;
    if level >= NUM_LEVELS {
        return corruption!("level {level} out of range");
    }
    Ok(level)
}

fn bad_field(what: &str) -> crate::error::Error {
    crate::error::Error::Corruption(format!("invalid {what} in version edit"))
}
