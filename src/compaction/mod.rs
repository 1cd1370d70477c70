//! # Compaction Module
//!
//! Merges groups of segments into single segments and removes the
//! segments they replace.
//!
//! ## Planning
//!
//! The candidate segment list is split into [`Bucket`]s of between
//! `min_bucket_size` and `max_bucket_size` files by [`make_buckets`].
//! Each bucket is compacted independently into exactly one new segment.
//!
//! ## Merging
//!
//! A bucket's segments are sorted by recency ([`SegmentOrder`]), decoded
//! with [`ChunkIterator`]s, and combined by a [`MergingIterator`]. When a
//! key appears in several segments the value from the most recent one
//! wins. The output is written through [`FileSystem::create_segment_after`]
//! together with a freshly built bloom filter.
//!
//! ## Pipeline
//!
//! [`Compactor::compact`] runs the buckets on one named worker thread,
//! strictly one after another. Each bucket's [`CompactionStats`] is handed
//! to the calling thread through a zero-capacity channel, so the worker
//! never runs ahead of the consumer. Inputs are deleted only after every
//! bucket has been attempted, and only for buckets whose output was fully
//! written. A failing bucket never aborts the run and never loses data.
//!
//! ## Cancellation
//!
//! [`CancelHandle::cancel`] stops the worker before it starts the next
//! bucket. The bucket in progress still completes or fails as a unit.

pub mod bucket;
pub mod merge;
pub mod order;

#[cfg(test)]
mod tests;

pub use bucket::{Bucket, make_buckets};
pub use merge::MergingIterator;
pub use order::SegmentOrder;

use std::{
    fmt, io,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use memmap2::Mmap;
use tracing::{debug, error, info, warn};

use crate::filter::{DEFAULT_FALSE_POSITIVE_RATE, FilterBuilder, FilterError};
use crate::fs::{FileSystem, FsError, FsOptions, NewSegment, SegmentName};
use crate::segment::{ChunkIterator, SegmentError};

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Compaction tuning knobs.
///
/// # Example
///
/// ```rust
/// use segcompact::{CompactionConfig, SegmentOrder};
///
/// let config = CompactionConfig {
///     max_bucket_size: 4,
///     order: SegmentOrder::NewestFirst,
///     ..CompactionConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompactionConfig {
    /// Smallest number of segments merged together. A run only starts
    /// when more candidate segments than this exist.
    ///
    /// Default: `2`. Must be >= 2.
    pub min_bucket_size: usize,

    /// Largest number of segments merged together.
    ///
    /// Default: `8`. Must be >= `min_bucket_size`.
    pub max_bucket_size: usize,

    /// Target false-positive rate of the filter written with each output.
    ///
    /// Default: `0.01`. Must be in (0.0, 1.0).
    pub filter_false_positive_rate: f64,

    /// Direction in which bucket inputs are handed to the merge.
    ///
    /// Default: [`SegmentOrder::OldestFirst`].
    pub order: SegmentOrder,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            min_bucket_size: 2,
            max_bucket_size: 8,
            filter_false_positive_rate: DEFAULT_FALSE_POSITIVE_RATE,
            order: SegmentOrder::default(),
        }
    }
}

impl CompactionConfig {
    /// Rejects out-of-range settings.
    pub fn validate(&self) -> Result<(), CompactionError> {
        if self.min_bucket_size < 2 {
            return Err(CompactionError::InvalidConfig(
                "min_bucket_size must be >= 2".into(),
            ));
        }
        if self.max_bucket_size < self.min_bucket_size {
            return Err(CompactionError::InvalidConfig(
                "max_bucket_size must be >= min_bucket_size".into(),
            ));
        }
        if !(self.filter_false_positive_rate > 0.0 && self.filter_false_positive_rate < 1.0) {
            return Err(CompactionError::InvalidConfig(
                "filter_false_positive_rate must be in (0.0, 1.0)".into(),
            ));
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors raised while compacting.
///
/// Per-bucket failures are recorded in that bucket's [`CompactionStats`];
/// only [`InvalidConfig`](Self::InvalidConfig) and [`Spawn`](Self::Spawn)
/// are returned from the run itself.
#[derive(Debug, thiserror::Error)]
pub enum CompactionError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("File system error: {0}")]
    Fs(#[from] FsError),

    #[error("Segment error: {0}")]
    Segment(#[from] SegmentError),

    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    #[error("Bucket has no segments")]
    EmptyBucket,

    #[error("Failed to spawn compaction worker: {0}")]
    Spawn(#[source] io::Error),
}

// ------------------------------------------------------------------------------------------------
// Statistics and outcome
// ------------------------------------------------------------------------------------------------

/// What happened to one bucket.
#[derive(Debug)]
pub struct CompactionStats {
    /// Input segments in the bucket.
    pub files_before: usize,

    /// `1` when the merged segment was written, `0` on failure.
    pub files_after: usize,

    /// Records read from the inputs, duplicates included.
    pub keys_before: u64,

    /// Distinct records written to the output.
    pub keys_after: u64,

    pub elapsed: Duration,

    /// Name of the merged segment on success.
    pub segment: Option<String>,

    /// Why the bucket failed, if it did.
    pub error: Option<CompactionError>,
}

impl CompactionStats {
    /// Returns `true` when the bucket's output was fully written.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

impl fmt::Display for CompactionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "files_before={} files_after={} keys_before={} keys_after={} elapsed={:?} error=",
            self.files_before, self.files_after, self.keys_before, self.keys_after, self.elapsed
        )?;
        match &self.error {
            Some(e) => write!(f, "{e}"),
            None => f.write_str("none"),
        }
    }
}

/// Result of a compaction run that passed the size gate.
#[derive(Debug)]
pub struct CompactionReport {
    /// One entry per attempted bucket, in planned order.
    pub stats: Vec<CompactionStats>,

    /// Buckets planned for the run. Exceeds `stats.len()` when cancelled.
    pub buckets_planned: usize,

    /// Input segments removed after their bucket succeeded.
    pub deleted: Vec<String>,

    /// Whether the run stopped early on request.
    pub cancelled: bool,

    pub elapsed: Duration,
}

impl CompactionReport {
    /// Number of buckets whose compaction failed.
    pub fn failed(&self) -> usize {
        self.stats.iter().filter(|s| !s.is_ok()).count()
    }

    /// Names of the segments produced by the run.
    pub fn outputs(&self) -> impl Iterator<Item = &str> {
        self.stats.iter().filter_map(|s| s.segment.as_deref())
    }
}

/// Result of [`Compactor::compact`].
#[derive(Debug)]
pub enum CompactionOutcome {
    /// Too few segments; nothing was read, written, or deleted.
    NothingToDo,

    /// Buckets were attempted.
    Compacted(CompactionReport),
}

// ------------------------------------------------------------------------------------------------
// Cancellation
// ------------------------------------------------------------------------------------------------

/// Cloneable handle that stops a running compaction between buckets.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Requests cancellation. Takes effect before the next bucket starts.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// ------------------------------------------------------------------------------------------------
// Compactor
// ------------------------------------------------------------------------------------------------

/// One compaction run over a fixed list of candidate segments.
///
/// A `Compactor` plans its buckets on construction and is consumed by
/// [`compact`](Self::compact); create a new one for the next run.
#[derive(Debug)]
pub struct Compactor {
    fs: Arc<FileSystem>,
    files: Vec<String>,
    buckets: Vec<Bucket>,
    config: CompactionConfig,
    cancel: CancelHandle,
}

impl Compactor {
    /// Opens the store at `path` with default [`FsOptions`] and takes
    /// every segment in it as a candidate.
    pub fn open(path: impl AsRef<Path>, config: CompactionConfig) -> Result<Self, CompactionError> {
        let fs = FileSystem::new(path, FsOptions::default())?;
        let files = fs.list_segments()?;
        Self::new(Arc::new(fs), files, config)
    }

    /// Plans a run over `files`, which should be sorted oldest first as
    /// returned by [`FileSystem::list_segments`].
    pub fn new(
        fs: Arc<FileSystem>,
        files: Vec<String>,
        config: CompactionConfig,
    ) -> Result<Self, CompactionError> {
        config.validate()?;
        let buckets = make_buckets(&files, config.min_bucket_size, config.max_bucket_size);
        debug!(
            files = files.len(),
            buckets = buckets.len(),
            min = config.min_bucket_size,
            max = config.max_bucket_size,
            "compaction planned"
        );
        Ok(Self {
            fs,
            files,
            buckets,
            config,
            cancel: CancelHandle::default(),
        })
    }

    /// Candidate segments.
    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// Planned buckets.
    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    /// Configuration this run was planned with.
    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Handle that can cancel this run from another thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Whether there are enough candidates for a run.
    pub fn should_compact(&self) -> bool {
        self.files.len() > self.config.min_bucket_size
    }

    /// Merges `bucket` into one new segment.
    ///
    /// Never fails as a whole: an error is recorded in the returned stats,
    /// any partial output is removed, and the bucket stays unprocessed.
    pub fn compact_bucket(&self, bucket: &mut Bucket) -> CompactionStats {
        run_bucket(&self.fs, &self.config, bucket)
    }

    /// Runs every planned bucket and deletes the inputs of those that
    /// succeeded.
    pub fn compact(mut self) -> Result<CompactionOutcome, CompactionError> {
        if !self.should_compact() {
            info!(
                files = self.files.len(),
                min = self.config.min_bucket_size,
                "nothing to do"
            );
            return Ok(CompactionOutcome::NothingToDo);
        }

        let started = Instant::now();
        info!(
            files = self.files.len(),
            buckets = self.buckets.len(),
            "compaction started"
        );

        let stats = self.run_pipeline()?;
        let cancelled = stats.len() < self.buckets.len() && self.cancel.is_cancelled();
        let deleted = delete_processed_files(&self.fs, &self.buckets);

        let report = CompactionReport {
            buckets_planned: self.buckets.len(),
            stats,
            deleted,
            cancelled,
            elapsed: started.elapsed(),
        };
        info!(
            attempted = report.stats.len(),
            planned = report.buckets_planned,
            failed = report.failed(),
            deleted = report.deleted.len(),
            cancelled,
            elapsed = ?report.elapsed,
            "compaction finished"
        );
        Ok(CompactionOutcome::Compacted(report))
    }

    /// Produces stats on a worker thread and collects them here.
    fn run_pipeline(&mut self) -> Result<Vec<CompactionStats>, CompactionError> {
        let fs: &FileSystem = &self.fs;
        let config = &self.config;
        let cancel = &self.cancel;
        let buckets = &mut self.buckets;
        let mut collected = Vec::with_capacity(buckets.len());

        let (tx, rx) = crossbeam::channel::bounded::<CompactionStats>(0);

        thread::scope(|scope| -> Result<(), CompactionError> {
            let worker = thread::Builder::new()
                .name("segcompact-worker".into())
                .spawn_scoped(scope, move || {
                    for (idx, bucket) in buckets.iter_mut().enumerate() {
                        if cancel.is_cancelled() {
                            info!(bucket = idx, "compaction cancelled");
                            break;
                        }
                        let stats = run_bucket(fs, config, bucket);
                        if tx.send(stats).is_err() {
                            break;
                        }
                    }
                })
                .map_err(CompactionError::Spawn)?;

            for (idx, stats) in rx.iter().enumerate() {
                if stats.is_ok() {
                    info!(bucket = idx, "{stats}");
                } else {
                    warn!(bucket = idx, "{stats}");
                }
                collected.push(stats);
            }

            if worker.join().is_err() {
                error!("compaction worker panicked; remaining buckets were skipped");
            }
            Ok(())
        })?;

        Ok(collected)
    }
}

// ------------------------------------------------------------------------------------------------
// Bucket execution
// ------------------------------------------------------------------------------------------------

fn run_bucket(fs: &FileSystem, config: &CompactionConfig, bucket: &mut Bucket) -> CompactionStats {
    let started = Instant::now();
    let mut stats = CompactionStats {
        files_before: bucket.len(),
        files_after: 0,
        keys_before: 0,
        keys_after: 0,
        elapsed: Duration::ZERO,
        segment: None,
        error: None,
    };

    match merge_bucket(fs, config, bucket.files(), &mut stats) {
        Ok(name) => {
            stats.files_after = 1;
            stats.segment = Some(name);
            bucket.mark_processed();
        }
        Err(e) => stats.error = Some(e),
    }
    stats.elapsed = started.elapsed();
    stats
}

/// Merges `files` into a new segment and returns its name.
fn merge_bucket(
    fs: &FileSystem,
    config: &CompactionConfig,
    files: &[String],
    stats: &mut CompactionStats,
) -> Result<String, CompactionError> {
    let mut sorted = files.to_vec();
    config.order.sort(&mut sorted)?;
    let newest = config
        .order
        .newest(&sorted)
        .ok_or(CompactionError::EmptyBucket)?;
    let newest = SegmentName::parse(newest)?;

    let mut sources = Vec::with_capacity(sorted.len());
    for name in &sorted {
        let data = fs.read_segment(name)?;
        sources.push(ChunkIterator::new(data)?);
    }
    let expected: u64 = sources.iter().map(ChunkIterator::expected_records).sum();
    let mut merge = MergingIterator::new(sources, config.order)?;

    let output = fs.create_segment_after(&newest)?;
    let name = output.name().to_string();
    debug!(segment = %name, inputs = ?sorted, expected, "merging bucket");

    let written = write_merged(&mut merge, output, config, expected);
    stats.keys_before = merge.keys_before();
    stats.keys_after = merge.num_keys_after_compaction();

    if let Err(e) = written {
        if let Err(cleanup) = fs.discard_segment(&name) {
            warn!(segment = %name, %cleanup, "failed to discard partial output");
        }
        return Err(e);
    }
    Ok(name)
}

/// Streams the merge into `output`, then persists the filter and
/// publishes the segment.
fn write_merged(
    merge: &mut MergingIterator<Mmap>,
    mut output: NewSegment,
    config: &CompactionConfig,
    expected: u64,
) -> Result<(), CompactionError> {
    let expected = usize::try_from(expected).unwrap_or(usize::MAX);
    let mut filter = FilterBuilder::new(expected, config.filter_false_positive_rate)?;

    while merge.advance()? {
        filter.add(merge.key());
        output.set(merge.key(), merge.value())?;
    }

    output.write_filter(&filter)?;
    output.close()?;
    Ok(())
}

/// Deletes the inputs of every processed bucket and returns their names.
///
/// A failed deletion is logged and skipped; the merged output already
/// supersedes the segment.
fn delete_processed_files(fs: &FileSystem, buckets: &[Bucket]) -> Vec<String> {
    let mut deleted = Vec::new();
    for bucket in buckets.iter().filter(|b| b.is_processed()) {
        for file in bucket.files() {
            match fs.delete_segment(file) {
                Ok(()) => deleted.push(file.clone()),
                Err(e) => warn!(segment = %file, %e, "failed to remove compacted segment"),
            }
        }
    }
    deleted
}
