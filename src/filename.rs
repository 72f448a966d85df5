//! File naming inside a database directory.

use std::path::{Path, PathBuf};

/// The kinds of files the storage core creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// `NNNNNN.log`: write-ahead log.
    Log,
    /// `NNNNNN.sst`: table file.
    Table,
    /// `LOCK`: directory lock.
    Lock,
}

pub fn log_file_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{number:06}.log"))
}

pub fn table_file_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{number:06}.sst"))
}

pub fn lock_file_name(dir: &Path) -> PathBuf {
    dir.join("LOCK")
}

/// Parses a bare file name into its type and number (`Lock` has number 0).
/// Returns None for names this crate does not own.
pub fn parse_file_name(name: &str) -> Option<(FileType, u64)> {
    if name == "LOCK" {
        return Some((FileType::Lock, 0));
    }
    let (stem, suffix) = name.split_once('.')?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let number = stem.parse::<u64>().ok()?;
    match suffix {
        "log" => Some((FileType::Log, number)),
        "sst" => Some((FileType::Table, number)),
        _ => None,
    }
}
