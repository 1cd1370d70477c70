//! Merging iterator: k-way merge of sorted segments with newest-wins
//! deduplication.
//!
//! Each source is a [`ChunkIterator`] positioned on its next record. The
//! frontier holds one entry per live source in a [`BinaryHeap`] ordered so
//! that the smallest key pops first and, among equal keys, the most recent
//! source pops first. After emitting that winner every other source
//! holding the same key is advanced past it, so each key is produced once
//! with the value from the newest segment that contains it.

use std::{
    cmp::Ordering,
    collections::{BinaryHeap, binary_heap::PeekMut},
};

use crate::segment::{ChunkIterator, SegmentError};

use super::order::SegmentOrder;

// ------------------------------------------------------------------------------------------------
// Heap entry
// ------------------------------------------------------------------------------------------------

#[derive(Debug)]
struct HeapEntry {
    key: Vec<u8>,
    source: usize,
    /// Higher is more recent.
    rank: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.rank == other.rank
    }
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: reverse the key so the smallest key wins,
        // keep rank so the most recent source wins a tie.
        other
            .key
            .cmp(&self.key)
            .then_with(|| self.rank.cmp(&other.rank))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ------------------------------------------------------------------------------------------------
// MergingIterator
// ------------------------------------------------------------------------------------------------

/// Pull-based merge over several segments sorted by a [`SegmentOrder`].
pub struct MergingIterator<B: AsRef<[u8]> = Vec<u8>> {
    sources: Vec<ChunkIterator<B>>,
    ranks: Vec<usize>,
    heap: BinaryHeap<HeapEntry>,

    key: Vec<u8>,
    value: Vec<u8>,
    valid: bool,

    num_keys_after_compaction: u64,
}

impl<B: AsRef<[u8]>> MergingIterator<B> {
    /// Builds the merge over `sources`, which must already be sorted
    /// according to `order`. Every source is positioned on its first record.
    pub fn new(sources: Vec<ChunkIterator<B>>, order: SegmentOrder) -> Result<Self, SegmentError> {
        let len = sources.len();
        let mut merge = Self {
            ranks: (0..len).map(|idx| order.recency_rank(idx, len)).collect(),
            heap: BinaryHeap::with_capacity(len),
            sources,
            key: Vec::new(),
            value: Vec::new(),
            valid: false,
            num_keys_after_compaction: 0,
        };
        for source in 0..len {
            merge.refill(source)?;
        }
        Ok(merge)
    }

    /// Moves to the next distinct key.
    ///
    /// Returns `Ok(false)` once every source is exhausted. A decode error
    /// from any source is returned as-is and leaves the merge unusable.
    pub fn advance(&mut self) -> Result<bool, SegmentError> {
        let Some(winner) = self.heap.pop() else {
            self.valid = false;
            self.key.clear();
            self.value.clear();
            return Ok(false);
        };

        self.value.clear();
        self.value
            .extend_from_slice(self.sources[winner.source].value());
        self.refill(winner.source)?;

        // Skip the shadowed copies of this key in older sources.
        loop {
            let shadowed = match self.heap.peek_mut() {
                Some(top) if top.key == winner.key => PeekMut::pop(top).source,
                _ => break,
            };
            self.refill(shadowed)?;
        }

        self.key = winner.key;
        self.valid = true;
        self.num_keys_after_compaction += 1;
        Ok(true)
    }

    /// Key of the current record.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Value of the current record, taken from the most recent source.
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Returns `true` while positioned on a record.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Distinct keys emitted so far.
    pub fn num_keys_after_compaction(&self) -> u64 {
        self.num_keys_after_compaction
    }

    /// Records consumed from all sources so far, duplicates included.
    pub fn keys_before(&self) -> u64 {
        self.sources.iter().map(ChunkIterator::num_keys).sum()
    }

    /// Advances `source` and pushes its next record onto the frontier.
    fn refill(&mut self, source: usize) -> Result<(), SegmentError> {
        let it = &mut self.sources[source];
        if it.advance()? {
            self.heap.push(HeapEntry {
                key: it.key().to_vec(),
                source,
                rank: self.ranks[source],
            });
        }
        Ok(())
    }
}
