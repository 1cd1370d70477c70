//! Bucketing planner: splits the candidate segment list into groups
//! that are each merged into one output segment.
//!
//! A list whose length lies in `[min, max]` becomes one bucket. A longer
//! list is halved at `len / 2` and each half is planned independently,
//! which yields balanced buckets (10 files with `max = 8` become 5 + 5,
//! not 8 + 2). A list shorter than `min` becomes no bucket at all: its
//! segments are left for a later run rather than force-merged. Each
//! recursive call sees a strictly shorter list, so planning terminates
//! for every input, including empty and single-file lists.

/// A group of segments merged together in one compaction unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    files: Vec<String>,

    /// Set only once the merged output and its filter are durable.
    processed: bool,
}

impl Bucket {
    pub(crate) fn new(files: Vec<String>) -> Self {
        Self {
            files,
            processed: false,
        }
    }

    /// Segment names in planned order.
    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// Number of segments in the bucket.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns `true` if the bucket holds no segments.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Whether the bucket's output was fully written; only then may its
    /// inputs be deleted.
    pub fn is_processed(&self) -> bool {
        self.processed
    }

    pub(crate) fn mark_processed(&mut self) {
        self.processed = true;
    }
}

/// Plans buckets over `files`, preserving their relative order.
///
/// Every returned bucket has between `min` and `max` files inclusive and
/// no file appears twice. Files in sublists shorter than `min` are not
/// assigned to any bucket. Callers guarantee `2 <= min <= max`.
pub fn make_buckets(files: &[String], min: usize, max: usize) -> Vec<Bucket> {
    let mut buckets = Vec::new();
    plan_into(files, min, max, &mut buckets);
    buckets
}

fn plan_into(files: &[String], min: usize, max: usize, out: &mut Vec<Bucket>) {
    if files.len() < min {
        return;
    }
    if files.len() <= max {
        out.push(Bucket::new(files.to_vec()));
        return;
    }
    let (left, right) = files.split_at(files.len() / 2);
    plan_into(left, min, max, out);
    plan_into(right, min, max, out);
}
