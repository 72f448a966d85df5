//! The sorted-string-table file format.
//!
//! ```text
//! +---------------------+
//! | data block 1        |  prefix-compressed entries + 5-byte trailer
//! +---------------------+
//! | ...                 |
//! +---------------------+
//! | data block N        |
//! +---------------------+
//! | filter block        |  optional, per-2KB-range key filters
//! +---------------------+
//! | meta-index block    |  "filter.<policy>" -> filter block handle
//! +---------------------+
//! | index block         |  separator key -> data block handle
//! +---------------------+
//! | footer (48 bytes)   |  meta-index + index handles, magic
//! +---------------------+
//! ```
//!
//! Every block (data, meta-index, index) carries a 5-byte trailer with a
//! compression tag and a masked CRC-32C, so any single-bit flip in the file
//! body surfaces as `Corruption` on read.

pub mod block;
pub mod builder;
pub mod filter_block;
pub mod format;
pub mod table;
pub mod two_level;

pub use block::{Block, BlockBuilder, BlockIter};
pub use builder::{build_table, TableBuilder};
pub use format::{BlockHandle, CompressionType, Footer};
pub use table::Table;
pub use two_level::TwoLevelIter;
