//! Version metadata records.
//!
//! The version set and its manifest replay live above this crate; what is
//! fixed here is the persisted shape they exchange: per-file metadata and
//! the tagged version-edit record stream.

pub mod edit;

pub use edit::{FileMetaData, VersionEdit};
