//! Write-ahead log framing.
//!
//! A log file is a sequence of 32KB physical blocks. Each record is stored
//! as one or more fragments, each framed by a 7-byte header:
//!
//! ```text
//! masked_crc32c(u32) || length(u16, LE) || type(u8) || payload
//! ```
//!
//! The type marks the fragment's position in its record (Full, or
//! First/Middle/Last for records that span blocks). A block tail too small
//! to hold a header is zero-filled; readers treat a zero type as padding.
//! The framing lets a reader resynchronize at the next block after a torn
//! write or corrupt region instead of abandoning the whole file.

pub mod reader;
pub mod writer;

pub use reader::LogReader;
pub use writer::LogWriter;

pub const BLOCK_SIZE: usize = 32 * 1024;

/// Checksum (4) + length (2) + type (1).
pub const HEADER_SIZE: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum RecordType {
    /// Preallocated-file padding; never written by the writer.
    Zero = 0,
    Full = 1,
    First = 2,
    Middle = 3,
    Last = 4,
}

pub(crate) const MAX_RECORD_TYPE: u8 = RecordType::Last as u8;
