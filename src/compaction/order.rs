//! Recency ordering of segments ("ByTime").
//!
//! The merge resolves duplicate keys by segment recency, so the order
//! in which a bucket's segments are handed to the merging iterator is
//! part of the correctness contract, not an incidental detail.

use crate::fs::{FsError, SegmentName};

/// Direction in which a bucket's segments are sorted before merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmentOrder {
    /// Oldest segment first; the last source is the most recent.
    #[default]
    OldestFirst,

    /// Newest segment first; the first source is the most recent.
    NewestFirst,
}

impl SegmentOrder {
    /// Sorts segment names by the creation time embedded in each name.
    ///
    /// Fails without reordering anything if a name cannot be parsed.
    pub fn sort(&self, files: &mut [String]) -> Result<(), FsError> {
        let mut keyed = files
            .iter()
            .map(|f| SegmentName::parse(f).map(|name| (name, f.clone())))
            .collect::<Result<Vec<_>, _>>()?;

        match self {
            Self::OldestFirst => keyed.sort_by(|a, b| a.0.cmp(&b.0)),
            Self::NewestFirst => keyed.sort_by(|a, b| b.0.cmp(&a.0)),
        }

        for (slot, (_, file)) in files.iter_mut().zip(keyed) {
            *slot = file;
        }
        Ok(())
    }

    /// Recency rank of position `idx` in a list of `len` sources sorted
    /// in this order. Higher rank means more recent.
    pub fn recency_rank(&self, idx: usize, len: usize) -> usize {
        match self {
            Self::OldestFirst => idx,
            Self::NewestFirst => len - 1 - idx,
        }
    }

    /// Whether position `a` holds a more recent segment than position `b`
    /// in a list sorted in this order.
    pub fn is_newer(&self, a: usize, b: usize) -> bool {
        match self {
            Self::OldestFirst => a > b,
            Self::NewestFirst => a < b,
        }
    }

    /// Returns the most recent name in a list sorted in this order.
    pub fn newest<'a>(&self, sorted: &'a [String]) -> Option<&'a String> {
        match self {
            Self::OldestFirst => sorted.last(),
            Self::NewestFirst => sorted.first(),
        }
    }
}
