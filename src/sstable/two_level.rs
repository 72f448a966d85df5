//! Streams a whole table as one ordered sequence by nesting a data-block
//! iterator inside an index iterator.

use crate::error::{Error, Result};
use crate::iterator::Iter;
use crate::sstable::block::BlockIter;

/// Resolves an index entry's value (an encoded block handle) into an
/// iterator over that block.
pub type BlockFunction<'a> = Box<dyn Fn(&[u8]) -> Result<BlockIter> + 'a>;

/// Iterator over `(index entry -> data block)` pairs, presented as a single
/// flat sequence.
///
/// The data iterator is rebuilt whenever the index iterator moves to an
/// entry whose handle differs from the one currently open; consecutive
/// operations that stay within one block reuse the existing data iterator.
/// Data blocks that turn out to be empty are skipped in whichever direction
/// the caller is moving.
pub struct TwoLevelIter<'a> {
    block_function: BlockFunction<'a>,
    index_iter: BlockIter,
    data_iter: Option<BlockIter>,
    /// Handle bytes backing `data_iter`, for reuse detection.
    data_block_handle: Vec<u8>,
    status: Option<Error>,
}

impl<'a> TwoLevelIter<'a> {
    pub fn new(index_iter: BlockIter, block_function: BlockFunction<'a>) -> Self {
        TwoLevelIter {
            block_function,
            index_iter,
            data_iter: None,
            data_block_handle: Vec::new(),
            status: None,
        }
    }

    fn save_error(&mut self, err: Error) {
        if self.status.is_none() {
            self.status = Some(err);
        }
    }

    fn set_data_iter(&mut self, iter: Option<BlockIter>) {
        if let Some(old) = &self.data_iter {
            if let Err(err) = old.status() {
                self.save_error(err);
            }
        }
        self.data_iter = iter;
    }

    fn init_data_block(&mut self) {
        if !self.index_iter.valid() {
            self.set_data_iter(None);
            return;
        }
        let handle = self.index_iter.value().to_vec();
        if self.data_iter.is_some() && handle == self.data_block_handle {
            // Already positioned in this block; keep the open iterator.
            return;
        }
        match (self.block_function)(&handle) {
            Ok(iter) => {
                self.data_block_handle = handle;
                self.set_data_iter(Some(iter));
            }
            Err(err) => {
                self.save_error(err);
                self.set_data_iter(None);
            }
        }
    }

    fn data_iter_valid(&self) -> bool {
        self.data_iter.as_ref().is_some_and(|iter| iter.valid())
    }

    fn skip_empty_data_blocks_forward(&mut self) {
        while !self.data_iter_valid() {
            if !self.index_iter.valid() {
                self.set_data_iter(None);
                return;
            }
            self.index_iter.next();
            self.init_data_block();
            if let Some(iter) = &mut self.data_iter {
                iter.seek_to_first();
            }
        }
    }

    fn skip_empty_data_blocks_backward(&mut self) {
        while !self.data_iter_valid() {
            if !self.index_iter.valid() {
                self.set_data_iter(None);
                return;
            }
            self.index_iter.prev();
            self.init_data_block();
            if let Some(iter) = &mut self.data_iter {
                iter.seek_to_last();
            }
        }
    }
}

impl Iter for TwoLevelIter<'_> {
    fn valid(&self) -> bool {
        self.data_iter_valid()
    }

    fn seek(&mut self, target: &[u8]) {
        self.index_iter.seek(target);
        self.init_data_block();
        if let Some(iter) = &mut self.data_iter {
            iter.seek(target);
        }
        self.skip_empty_data_blocks_forward();
    }

    fn seek_to_first(&mut self) {
        self.index_iter.seek_to_first();
        self.init_data_block();
        if let Some(iter) = &mut self.data_iter {
            iter.seek_to_first();
        }
        self.skip_empty_data_blocks_forward();
    }

    fn seek_to_last(&mut self) {
        self.index_iter.seek_to_last();
        self.init_data_block();
        if let Some(iter) = &mut self.data_iter {
            iter.seek_to_last();
        }
        self.skip_empty_data_blocks_backward();
    }

    fn next(&mut self) {
        assert!(self.valid());
        self.data_iter.as_mut().unwrap().next();
        self.skip_empty_data_blocks_forward();
    }

    fn prev(&mut self) {
        assert!(self.valid());
        self.data_iter.as_mut().unwrap().prev();
        self.skip_empty_data_blocks_backward();
    }

    fn key(&self) -> &[u8] {
        self.data_iter.as_ref().unwrap().key()
    }

    fn value(&self) -> &[u8] {
        self.data_iter.as_ref().unwrap().value()
    }

    fn status(&self) -> Result<()> {
        self.index_iter.status()?;
        if let Some(iter) = &self.data_iter {
            iter.status()?;
        }
        match &self.status {
            None => Ok(()),
            Some(err) => Err(err.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::{BytewiseComparator, Comparator};
    use crate::corruption;
    use crate::sstable::block::{Block, BlockBuilder};
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::Arc;

    fn comparator() -> Arc<dyn Comparator> {
        Arc::new(BytewiseComparator)
    }

    /// Builds data blocks (possibly empty) plus an index block whose entry
    /// values are single-byte block ids, and wires them into a
    /// TwoLevelIter whose block function counts loads.
    struct Fixture {
        blocks: Vec<Block>,
        index: Block,
        loads: Rc<Cell<usize>>,
    }

    impl Fixture {
        /// `groups`: per block, the (key, value) entries it holds. Index
        /// keys are each block's largest key, or a filler for empty blocks.
        fn new(groups: Vec<Vec<(&str, &str)>>) -> Self {
            let mut blocks = Vec::new();
            let mut index_builder = BlockBuilder::new(1);
            let mut last_key = String::from("a");
            for (id, group) in groups.iter().enumerate() {
                let mut builder = BlockBuilder::new(4);
                for (key, value) in group {
                    builder.add(key.as_bytes(), value.as_bytes());
                    last_key = key.to_string();
                }
                blocks.push(Block::new(builder.finish().to_vec()).expect("bad block"));
                // Empty blocks reuse the previous separator with a suffix so
                // index keys stay strictly increasing.
                last_key.push('~');
                index_builder.add(last_key.as_bytes(), &[id as u8]);
            }
            let index = Block::new(index_builder.finish().to_vec()).expect("bad index");
            Fixture {
                blocks,
                index,
                loads: Rc::new(Cell::new(0)),
            }
        }

        fn iter(&self) -> TwoLevelIter<'_> {
            let loads = Rc::clone(&self.loads);
            let blocks = &self.blocks;
            TwoLevelIter::new(
                self.index.iter(comparator()),
                Box::new(move |handle| {
                    loads.set(loads.get() + 1);
                    Ok(blocks[handle[0] as usize].iter(comparator()))
                }),
            )
        }
    }

    fn collect_forward(iter: &mut TwoLevelIter) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut out = Vec::new();
        iter.seek_to_first();
        while iter.valid() {
            out.push((iter.key().to_vec(), iter.value().to_vec()));
            iter.next();
        }
        out
    }

    #[test]
    fn test_flattens_blocks_in_order() {
        let fixture = Fixture::new(vec![
            vec![("b", "1"), ("c", "2")],
            vec![("d", "3")],
            vec![("e", "4"), ("f", "5"), ("g", "6")],
        ]);
        let mut iter = fixture.iter();
        let entries = collect_forward(&mut iter);
        let keys: Vec<&[u8]> = entries.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(keys, vec![b"b", b"c", b"d", b"e", b"f", b"g"]);
        iter.status().expect("clean scan errored");
    }

    #[test]
    fn test_skips_chains_of_empty_blocks() {
        let fixture = Fixture::new(vec![
            vec![],
            vec![],
            vec![("b", "1")],
            vec![],
            vec![],
            vec![("e", "2")],
            vec![],
        ]);
        let mut iter = fixture.iter();
        let entries = collect_forward(&mut iter);
        let keys: Vec<&[u8]> = entries.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(keys, vec![b"b", b"e"]);

        // And backward.
        iter.seek_to_last();
        assert!(iter.valid());
        assert_eq!(iter.key(), b"e");
        iter.prev();
        assert!(iter.valid());
        assert_eq!(iter.key(), b"b");
        iter.prev();
        assert!(!iter.valid());
    }

    #[test]
    fn test_seek_crosses_block_boundary() {
        let fixture = Fixture::new(vec![
            vec![("b", "1"), ("c", "2")],
            vec![("f", "3")],
        ]);
        let mut iter = fixture.iter();

        iter.seek(b"c");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"c");

        // Between blocks: lands on the next block's first entry.
        iter.seek(b"d");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"f");

        iter.seek(b"zz");
        assert!(!iter.valid());
    }

    #[test]
    fn test_block_reuse_within_one_block() {
        let fixture = Fixture::new(vec![vec![("b", "1"), ("c", "2"), ("d", "3")]]);
        let mut iter = fixture.iter();
        iter.seek_to_first();
        while iter.valid() {
            iter.next();
        }
        // One data block, loaded exactly once despite several moves.
        assert_eq!(fixture.loads.get(), 1);

        // Re-seeking into the same block reuses the open iterator.
        iter.seek(b"c");
        assert!(iter.valid());
        assert_eq!(fixture.loads.get(), 1);
    }

    #[test]
    fn test_block_function_error_is_latched() {
        let index = {
            let mut builder = BlockBuilder::new(1);
            builder.add(b"m", &[0]);
            Block::new(builder.finish().to_vec()).expect("bad index")
        };
        let mut iter = TwoLevelIter::new(
            index.iter(comparator()),
            Box::new(|_| corruption!("no such block")),
        );
        iter.seek_to_first();
        assert!(!iter.valid());
        assert!(iter.status().unwrap_err().is_corruption());
    }
}
