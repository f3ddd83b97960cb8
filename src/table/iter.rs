use super::index_block::IndexBlock;
use super::record_block::RecordBlock;
use super::SsTable;
use crate::binary_search::partition_point;
use crate::key::Key;
use crate::value::Tuple;
use crate::fail_iter;
use std::sync::Arc;

/// Sentinel position for an exhausted descending cursor
const EXHAUSTED: usize = usize::MAX;

/// Single-direction cursor over the tuples of one table file
///
/// Walks the index tree to the start position, then streams record blocks
/// sideways: when a block is exhausted, the deepest index level with
/// remaining children advances and the edge-most path below it is loaded.
///
/// Blocks are fetched through the shared caches; the iterator holds a
/// reference to its table, so the file cannot be unlinked mid-scan.
pub struct TableIter {
    table: Arc<SsTable>,
    descending: bool,
    start: Option<Key>,

    /// Path of index blocks from the root, with the active child per level
    stack: Vec<(Arc<IndexBlock>, usize)>,

    /// Active record block and the next position to yield
    block: Option<(Arc<RecordBlock>, usize)>,

    initialized: bool,
    done: bool,
}

impl TableIter {
    #[must_use]
    pub fn new(table: Arc<SsTable>, start: Option<Key>, descending: bool) -> Self {
        Self {
            table,
            descending,
            start,
            stack: Vec::new(),
            block: None,
            initialized: false,
            done: false,
        }
    }

    /// Index of the active child when entering a fresh index block.
    fn entry_idx(&self, block: &IndexBlock) -> usize {
        match &self.start {
            Some(key) => block.get_idx(key),
            None if self.descending => block.len() - 1,
            None => 0,
        }
    }

    /// Position of the first tuple to yield when entering the start block.
    fn entry_pos(&self, block: &RecordBlock) -> usize {
        match &self.start {
            Some(key) if self.descending => {
                // Last tuple with key <= start, if any
                let count = partition_point(block.items(), |item| item.key <= *key);
                count.checked_sub(1).unwrap_or(EXHAUSTED)
            }
            Some(key) => block.seek_idx(key),
            None if self.descending => block.len() - 1,
            None => 0,
        }
    }

    /// Walks from the current stack top down to a record block,
    /// choosing the start-aware child at every level.
    fn descend(&mut self) -> crate::Result<()> {
        loop {
            // NOTE: Descend is only called with a non-empty stack
            #[allow(clippy::expect_used)]
            let (block, idx) = self.stack.last().expect("stack should not be empty");

            // NOTE: Child indices are always clamped to the block length
            #[allow(clippy::expect_used)]
            let child = block.records().get(*idx).expect("should exist").clone();

            if self.table.is_record_child(child.child_offset) {
                let record_block = self
                    .table
                    .load_record_block(child.child_offset, child.child_size)?;

                let pos = self.entry_pos(&record_block);
                self.block = Some((record_block, pos));

                return Ok(());
            }

            let index_block = self
                .table
                .load_index_block(child.child_offset, child.child_size)?;

            let idx = self.entry_idx(&index_block);
            self.stack.push((index_block, idx));
        }
    }

    fn initialize(&mut self) -> crate::Result<()> {
        self.initialized = true;

        let root = self.table.root_index().clone();
        let idx = self.entry_idx(&root);
        self.stack.push((root, idx));

        self.descend()?;

        // The start key only applies to the entry path
        self.start = None;

        Ok(())
    }

    /// Moves the deepest index level sideways and loads the next record block.
    ///
    /// Returns `false` if the table is exhausted.
    fn advance_block(&mut self) -> crate::Result<bool> {
        self.block = None;

        loop {
            let Some((block, idx)) = self.stack.last_mut() else {
                return Ok(false);
            };

            let next_idx = if self.descending {
                idx.checked_sub(1)
            } else {
                let next = *idx + 1;
                (next < block.len()).then_some(next)
            };

            if let Some(next_idx) = next_idx {
                *idx = next_idx;
                self.descend()?;
                return Ok(true);
            }

            self.stack.pop();
        }
    }
}

impl Iterator for TableIter {
    type Item = crate::Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if !self.initialized {
            fail_iter!(self.initialize());
        }

        loop {
            if let Some((block, pos)) = &mut self.block {
                if self.descending {
                    if *pos != EXHAUSTED {
                        // NOTE: pos is a valid index here
                        #[allow(clippy::expect_used)]
                        let item = block.items().get(*pos).expect("should exist").clone();

                        *pos = pos.checked_sub(1).unwrap_or(EXHAUSTED);
                        return Some(Ok(item));
                    }
                } else if *pos < block.len() {
                    // NOTE: pos is a valid index here
                    #[allow(clippy::expect_used)]
                    let item = block.items().get(*pos).expect("should exist").clone();

                    *pos += 1;
                    return Some(Ok(item));
                }
            }

            if !fail_iter!(self.advance_block()) {
                self.done = true;
                return None;
            }
        }
    }
}
