//! # segcompact
//!
//! The compaction engine of a **Log-Structured Merge Tree (LSM-tree)**
//! key-value store. It merges groups of immutable, key-sorted segment
//! files into single segments, keeps only the most recent value of every
//! key, writes a bloom filter for each output, and deletes the segments
//! that were replaced.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use segcompact::{CompactionConfig, CompactionOutcome, Compactor};
//!
//! let compactor = Compactor::open("/tmp/my_store", CompactionConfig::default()).unwrap();
//! match compactor.compact().unwrap() {
//!     CompactionOutcome::NothingToDo => {}
//!     CompactionOutcome::Compacted(report) => {
//!         for stats in &report.stats {
//!             println!("{stats}");
//!         }
//!     }
//! }
//! ```
//!
//! ## Features
//!
//! - **Balanced bucketing**: candidates are split into groups of bounded size.
//! - **Newest-wins merge**: duplicate keys resolve to the most recent segment.
//! - **Streaming**: segments are memory-mapped and decoded chunk by chunk.
//! - **Bloom filters**: every merged segment gets a fresh membership filter.
//! - **CRC32 integrity**: header, chunks, footer and filter are checksummed.
//! - **Crash safety**: outputs are staged and renamed; inputs are deleted
//!   only after their replacement is durable.
//! - **Cancellation**: a running compaction stops between buckets on request.

pub mod compaction;
pub mod encoding;
pub mod filter;
pub mod fs;
pub mod segment;

pub use compaction::{
    Bucket, CancelHandle, CompactionConfig, CompactionError, CompactionOutcome, CompactionReport,
    CompactionStats, Compactor, MergingIterator, SegmentOrder, make_buckets,
};
pub use filter::{FilterBuilder, FilterError, FilterReader};
pub use fs::{FileSystem, FsError, FsOptions, NewSegment, SegmentName};
pub use segment::{ChunkIterator, SegmentError, SegmentWriter};
