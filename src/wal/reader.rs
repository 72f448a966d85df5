use log::warn;

use crate::coding::decode_fixed32;
use crate::env::SequentialFile;
use crate::error::Result;
use crate::sstable::format::{typed_crc, unmask_crc};
use crate::wal::{RecordType, BLOCK_SIZE, HEADER_SIZE, MAX_RECORD_TYPE};

/// Outcome of reading one physical fragment.
enum Physical {
    Record(RecordType, Vec<u8>),
    Eof,
    /// A fragment that failed validation; the surrounding region was
    /// dropped and reading resumes at the next block.
    Bad,
}

/// Reassembles records from a log file, skipping damaged regions.
///
/// Corruption never fails the read: the bad region is counted in
/// `dropped_bytes`, logged, and reading resynchronizes at the next block
/// boundary. A truncated final record (a torn write at the tail) reads as a
/// clean end of file.
pub struct LogReader {
    file: Box<dyn SequentialFile>,
    verify_checksums: bool,
    /// Unconsumed bytes of the current block.
    buffer: Vec<u8>,
    buffer_offset: usize,
    eof: bool,
    dropped_bytes: u64,
}

impl LogReader {
    pub fn new(file: Box<dyn SequentialFile>, verify_checksums: bool) -> Self {
        LogReader {
            file,
            verify_checksums,
            buffer: Vec::new(),
            buffer_offset: 0,
            eof: false,
            dropped_bytes: 0,
        }
    }

    /// Reads the next complete record, or `None` at end of file.
    pub fn read_record(&mut self) -> Result<Option<Vec<u8>>> {
        let mut in_fragmented_record = false;
        let mut scratch = Vec::new();

        loop {
            match self.read_physical_record()? {
                Physical::Record(RecordType::Full, data) => {
                    if in_fragmented_record {
                        self.report_drop(scratch.len(), "partial record without end");
                    }
                    return Ok(Some(data));
                }
                Physical::Record(RecordType::First, data) => {
                    if in_fragmented_record {
                        self.report_drop(scratch.len(), "partial record without end");
                    }
                    scratch = data;
                    in_fragmented_record = true;
                }
                Physical::Record(RecordType::Middle, data) => {
                    if !in_fragmented_record {
                        self.report_drop(data.len(), "missing start of fragmented record");
                    } else {
                        scratch.extend_from_slice(&data);
                    }
                }
                Physical::Record(RecordType::Last, data) => {
                    if !in_fragmented_record {
                        self.report_drop(data.len(), "missing start of fragmented record");
                    } else {
                        scratch.extend_from_slice(&data);
                        return Ok(Some(scratch));
                    }
                }
                Physical::Record(RecordType::Zero, _) => unreachable!(),
                Physical::Eof => {
                    // A record cut off mid-write is indistinguishable from a
                    // crash during the write; treat it as a clean end.
                    return Ok(None);
                }
                Physical::Bad => {
                    if in_fragmented_record {
                        self.report_drop(scratch.len(), "error in middle of record");
                        in_fragmented_record = false;
                        scratch.clear();
                    }
                }
            }
        }
    }

    /// Total bytes skipped over damaged or unparseable regions so far.
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped_bytes
    }

    fn remaining(&self) -> usize {
        self.buffer.len() - self.buffer_offset
    }

    fn report_drop(&mut self, bytes: usize, reason: &str) {
        self.dropped_bytes += bytes as u64;
        warn!("log reader dropping {bytes} bytes: {reason}");
    }

    fn read_physical_record(&mut self) -> Result<Physical> {
        loop {
            if self.remaining() < HEADER_SIZE {
                if !self.eof {
                    // Skip the zero-filled block trailer, if any, and read
                    // the next block.
                    self.buffer.resize(BLOCK_SIZE, 0);
                    let n = self.file.read(&mut self.buffer)?;
                    self.buffer.truncate(n);
                    self.buffer_offset = 0;
                    if n < BLOCK_SIZE {
                        self.eof = true;
                    }
                    if n == 0 {
                        return Ok(Physical::Eof);
                    }
                    continue;
                }
                // A truncated header at the tail reads as EOF.
                return Ok(Physical::Eof);
            }

            let offset = self.buffer_offset;
            let length = self.buffer[offset + 4] as usize | ((self.buffer[offset + 5] as usize) << 8);
            let record_type = self.buffer[offset + 6];
            let expected_crc = unmask_crc(decode_fixed32(&self.buffer[offset..]));

            if HEADER_SIZE + length > self.remaining() {
                let drop_size = self.remaining();
                self.buffer_offset = self.buffer.len();
                if !self.eof {
                    // Length field cannot be trusted; drop the block.
                    self.report_drop(drop_size, "bad record length");
                    return Ok(Physical::Bad);
                }
                // The writer died mid-record; don't report it.
                return Ok(Physical::Eof);
            }

            if record_type == RecordType::Zero as u8 && length == 0 {
                // Padding from preallocated file space; skip the block
                // without counting it as dropped.
                self.buffer_offset = self.buffer.len();
                return Ok(Physical::Bad);
            }

            if self.verify_checksums {
                let payload = &self.buffer[offset + HEADER_SIZE..][..length];
                if typed_crc(record_type, payload) != expected_crc {
                    let drop_size = self.remaining();
                    self.buffer_offset = self.buffer.len();
                    self.report_drop(drop_size, "checksum mismatch");
                    return Ok(Physical::Bad);
                }
            }

            let payload_start = offset + HEADER_SIZE;
            let payload = self.buffer[payload_start..payload_start + length].to_vec();
            self.buffer_offset += HEADER_SIZE + length;

            if record_type == 0 || record_type > MAX_RECORD_TYPE {
                self.report_drop(HEADER_SIZE + length, "unknown record type");
                return Ok(Physical::Bad);
            }
            let record_type = match record_type {
                1 => RecordType::Full,
                2 => RecordType::First,
                3 => RecordType::Middle,
                _ => RecordType::Last,
            };
            return Ok(Physical::Record(record_type, payload));
        }
    }
}
