use crate::coding::put_fixed32;
use crate::env::WritableFile;
use crate::error::Result;
use crate::sstable::format::{mask_crc, typed_crc};
use crate::wal::{RecordType, BLOCK_SIZE, HEADER_SIZE};

/// Appends framed records to a log file.
pub struct LogWriter {
    dest: Box<dyn WritableFile>,
    /// Write position within the current 32KB block.
    block_offset: usize,
}

impl LogWriter {
    pub fn new(dest: Box<dyn WritableFile>) -> Self {
        LogWriter {
            dest,
            block_offset: 0,
        }
    }

    /// Appends one record, fragmenting it across blocks as needed. The
    /// record is buffered; call `sync` to make it durable.
    pub fn add_record(&mut self, data: &[u8]) -> Result<()> {
        let mut left = data;
        let mut begin = true;
        loop {
            let leftover = BLOCK_SIZE - self.block_offset;
            if leftover < HEADER_SIZE {
                // Not even a header fits; zero-fill and move on.
                if leftover > 0 {
                    self.dest.append(&[0u8; HEADER_SIZE - 1][..leftover])?;
                }
                self.block_offset = 0;
            }

            let available = BLOCK_SIZE - self.block_offset - HEADER_SIZE;
            let fragment_length = left.len().min(available);
            let end = fragment_length == left.len();
            let record_type = match (begin, end) {
                (true, true) => RecordType::Full,
                (true, false) => RecordType::First,
                (false, true) => RecordType::Last,
                (false, false) => RecordType::Middle,
            };

            self.emit_physical_record(record_type, &left[..fragment_length])?;
            left = &left[fragment_length..];
            begin = false;
            if left.is_empty() {
                return Ok(());
            }
        }
    }

    pub fn sync(&mut self) -> Result<()> {
        self.dest.sync()
    }

    fn emit_physical_record(&mut self, record_type: RecordType, data: &[u8]) -> Result<()> {
        debug_assert!(data.len() <= 0xffff);
        debug_assert!(self.block_offset + HEADER_SIZE + data.len() <= BLOCK_SIZE);

        let mut header = Vec::with_capacity(HEADER_SIZE);
        // The checksum covers the type byte and the payload.
        put_fixed32(&mut header, mask_crc(typed_crc(record_type as u8, data)));
        header.push((data.len() & 0xff) as u8);
        header.push((data.len() >> 8) as u8);
        header.push(record_type as u8);

        self.dest.append(&header)?;
        self.dest.append(data)?;
        self.dest.flush()?;
        self.block_offset += HEADER_SIZE + data.len();
        Ok(())
    }
}
