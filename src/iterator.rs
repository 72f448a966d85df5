//! Bidirectional iteration over sorted key-value runs.

use crate::error::Result;

/// A positionable cursor over an ordered sequence of entries.
///
/// Unlike `std::iter::Iterator`, this supports seeking and backward
/// traversal, which block and table iteration need. An iterator is either
/// positioned at an entry (`valid()`) or not; `key`/`value` may only be
/// called while valid. Errors encountered while moving are latched and
/// surfaced through `status()`, with the iterator left invalid.
///
/// Iterators are not thread-safe; distinct iterators over the same
/// underlying data are safe to use from different threads.
pub trait Iter {
    fn valid(&self) -> bool;

    fn seek_to_first(&mut self);

    fn seek_to_last(&mut self);

    /// Positions at the first entry with key >= `target`.
    fn seek(&mut self, target: &[u8]);

    fn next(&mut self);

    fn prev(&mut self);

    /// Key at the current position. Panics if `!valid()`.
    fn key(&self) -> &[u8];

    /// Value at the current position. Panics if `!valid()`.
    fn value(&self) -> &[u8];

    /// First non-OK status observed, if any.
    fn status(&self) -> Result<()>;
}
