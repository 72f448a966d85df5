//! On-disk framing shared by every block in a table file: handles, the
//! footer, and the CRC-protected 5-byte block trailer.

use crc::{Crc, CRC_32_ISCSI};

use crate::coding::{decode_fixed64, get_varint64, put_fixed64, put_varint64};
use crate::config::ReadOptions;
use crate::corruption;
use crate::env::RandomAccessFile;
use crate::error::{Error, Result};

/// `0xdb4775248b80fb57`, little-endian in the footer's final 8 bytes.
pub const TABLE_MAGIC_NUMBER: u64 = 0xdb4775248b80fb57;

/// 1-byte compression type + 32-bit masked crc.
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Maximum encoded length of a BlockHandle: two varint64s.
pub const MAX_HANDLE_ENCODED_LENGTH: usize = 10 + 10;

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

const MASK_DELTA: u32 = 0xa282ead8;

/// Masks a CRC so that storing a CRC of data that itself contains CRCs does
/// not degrade the checksum's error detection.
pub(crate) fn mask_crc(crc: u32) -> u32 {
    ((crc >> 15) | (crc << 17)).wrapping_add(MASK_DELTA)
}

pub(crate) fn unmask_crc(masked: u32) -> u32 {
    let rot = masked.wrapping_sub(MASK_DELTA);
    (rot >> 17) | (rot << 15)
}

/// CRC-32C over a block body plus its compression-type byte.
pub(crate) fn trailer_crc(body: &[u8], compression_byte: u8) -> u32 {
    let mut digest = CASTAGNOLI.digest();
    digest.update(body);
    digest.update(&[compression_byte]);
    digest.finalize()
}

/// CRC-32C over a log fragment's type byte followed by its payload.
pub(crate) fn typed_crc(record_type: u8, data: &[u8]) -> u32 {
    let mut digest = CASTAGNOLI.digest();
    digest.update(&[record_type]);
    digest.update(data);
    digest.finalize()
}

/// Block codec recorded in the trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CompressionType {
    #[default]
    None = 0,
    Snappy = 1,
}

impl CompressionType {
    pub fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(CompressionType::None),
            1 => Ok(CompressionType::Snappy),
            _ => corruption!("unknown block compression type: {byte}"),
        }
    }
}

/// Locates a block within a file: `(offset, size)`, both varint64-coded.
/// The size excludes the trailer that follows the block on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    pub fn new(offset: u64, size: u64) -> Self {
        BlockHandle { offset, size }
    }

    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        put_varint64(dst, self.offset);
        put_varint64(dst, self.size);
    }

    pub fn encoded(&self) -> Vec<u8> {
        let mut dst = Vec::with_capacity(MAX_HANDLE_ENCODED_LENGTH);
        self.encode_to(&mut dst);
        dst
    }

    pub fn decode_from(input: &mut &[u8]) -> Result<Self> {
        let offset = get_varint64(input).map_err(|_| bad_handle())?;
        let size = get_varint64(input).map_err(|_| bad_handle())?;
        Ok(BlockHandle { offset, size })
    }
}

fn bad_handle() -> Error {
    Error::Corruption("bad block handle".to_string())
}

/// Fixed 48-byte table tail: the meta-index and index handles, zero padding,
/// and the magic number.
#[derive(Debug, Clone, Default)]
pub struct Footer {
    pub metaindex_handle: BlockHandle,
    pub index_handle: BlockHandle,
}

impl Footer {
    /// Two max-length handles plus the 8-byte magic.
    pub const ENCODED_LENGTH: usize = 2 * MAX_HANDLE_ENCODED_LENGTH + 8;

    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        let original_size = dst.len();
        self.metaindex_handle.encode_to(dst);
        self.index_handle.encode_to(dst);
        dst.resize(original_size + 2 * MAX_HANDLE_ENCODED_LENGTH, 0);
        put_fixed64(dst, TABLE_MAGIC_NUMBER);
        debug_assert_eq!(dst.len(), original_size + Self::ENCODED_LENGTH);
    }

    pub fn decode_from(input: &[u8]) -> Result<Self> {
        if input.len() < Self::ENCODED_LENGTH {
            return corruption!("footer truncated: {} bytes", input.len());
        }
        let magic = decode_fixed64(&input[Self::ENCODED_LENGTH - 8..]);
        if magic != TABLE_MAGIC_NUMBER {
            // A wrong magic is far more likely a stray file than a future
            // format, but distinguish total garbage from a near miss.
            if magic & 0xffff_ffff == TABLE_MAGIC_NUMBER & 0xffff_ffff {
                return Err(Error::NotSupported(format!(
                    "unrecognized table format variant (magic {magic:#018x})"
                )));
            }
            return corruption!("not a table file (magic {magic:#018x})");
        }
        let mut cursor = &input[..Self::ENCODED_LENGTH - 8];
        let metaindex_handle = BlockHandle::decode_from(&mut cursor)?;
        let index_handle = BlockHandle::decode_from(&mut cursor)?;
        Ok(Footer {
            metaindex_handle,
            index_handle,
        })
    }
}

/// Reads the block at `handle` and strips its trailer, verifying the
/// checksum when asked and undoing compression.
pub fn read_block(
    file: &dyn RandomAccessFile,
    options: &ReadOptions,
    handle: &BlockHandle,
) -> Result<Vec<u8>> {
    let n = handle.size as usize;
    let raw = file.read(handle.offset, n + BLOCK_TRAILER_SIZE)?;
    if raw.len() != n + BLOCK_TRAILER_SIZE {
        return corruption!("truncated block read at offset {}", handle.offset);
    }

    let body = &raw[..n];
    let compression_byte = raw[n];
    if options.verify_checksums {
        let expected = unmask_crc(crate::coding::decode_fixed32(&raw[n + 1..]));
        let actual = trailer_crc(body, compression_byte);
        if actual != expected {
            return corruption!("block checksum mismatch at offset {}", handle.offset);
        }
    }

    match CompressionType::from_u8(compression_byte)? {
        CompressionType::None => Ok(body.to_vec()),
        CompressionType::Snappy => {
            let mut decoder = snap::raw::Decoder::new();
            decoder
                .decompress_vec(body)
                .map_err(|e| Error::Corruption(format!("corrupted snappy block: {e}")))
        }
    }
}
