//! Store directory access: naming, enumeration, reading, creation and
//! deletion of segments and their filter files.
//!
//! # Naming
//!
//! Every segment is identified by a [`SegmentName`] of the form
//!
//! ```text
//! <timestamp: 20 digits>-<generation: 6 digits>
//! ```
//!
//! stored as `<name>.seg` with its filter at `<name>.flt`. Names order by
//! `(timestamp, generation)`, and that order *is* segment recency:
//!
//! - [`FileSystem::create_segment`] stamps the current wall-clock time
//!   in nanoseconds with generation 0, bumped so that names handed out
//!   by one [`FileSystem`] strictly increase.
//! - [`FileSystem::create_segment_after`] gives a compaction output the
//!   timestamp of its newest input and the next generation, so the
//!   merged segment takes exactly its inputs' place in recency order.
//!
//! # Options
//!
//! [`FsOptions`] carries the read-only, compression, and sync-write
//! switches. A read-only file system refuses every mutation.


use std::{
    cmp::Ordering as CmpOrdering,
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use memmap2::Mmap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::filter::{FilterBuilder, FilterError};
use crate::segment::writer::{staging_path, sync_parent_dir};
use crate::segment::{SegmentError, SegmentWriter};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Extension of segment data files.
pub const DATA_FILE_EXT: &str = "seg";

/// Extension of segment filter files.
pub const FILTER_FILE_EXT: &str = "flt";

const TIMESTAMP_WIDTH: usize = 20;
const GENERATION_WIDTH: usize = 6;
const MAX_GENERATION: u32 = 999_999;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned by [`FileSystem`] operations.
#[derive(Debug, Error)]
pub enum FsError {
    /// Underlying I/O error, with the path involved.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// File or directory being accessed.
        path: PathBuf,
        /// The originating error.
        source: io::Error,
    },

    /// Writing a segment failed.
    #[error("segment error: {0}")]
    Segment(#[from] SegmentError),

    /// Persisting a filter failed.
    #[error("filter error: {0}")]
    Filter(#[from] FilterError),

    /// A mutation was attempted on a read-only file system.
    #[error("file system is read-only; refusing to {0}")]
    ReadOnly(&'static str),

    /// A name does not follow the segment naming scheme.
    #[error("invalid segment name: {0:?}")]
    InvalidName(String),

    /// The segment about to be created is already on disk, or every
    /// generation after the requested input is used up.
    ///
    /// Expected after a crash between publishing a compaction output and
    /// deleting its inputs: the leftover output is itself a candidate, so
    /// a later run merges it away.
    #[error("segment already exists: {0}")]
    AlreadyExists(String),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> FsError + '_ {
    move |source| FsError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ------------------------------------------------------------------------------------------------
// Options
// ------------------------------------------------------------------------------------------------

/// Behaviour switches for a [`FileSystem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsOptions {
    /// Refuse to create or delete segments.
    ///
    /// Default: `false`.
    pub read_only: bool,

    /// Snappy-compress chunk payloads of newly written segments.
    ///
    /// Default: `true`.
    pub use_compression: bool,

    /// Fsync after every chunk instead of only when a segment is closed.
    ///
    /// Default: `false`.
    pub sync_writes: bool,
}

impl Default for FsOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            use_compression: true,
            sync_writes: false,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// SegmentName
// ------------------------------------------------------------------------------------------------

/// Parsed segment identifier; its ordering is segment recency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentName {
    /// Creation time in nanoseconds since the UNIX epoch.
    pub timestamp: u64,
    /// Compaction generation within the same timestamp.
    pub generation: u32,
}

impl SegmentName {
    /// Parses `<20 digits>-<6 digits>`.
    pub fn parse(name: &str) -> Result<Self, FsError> {
        let invalid = || FsError::InvalidName(name.to_string());

        let (ts, generation) = name.split_once('-').ok_or_else(invalid)?;
        let well_formed = |part: &str, width: usize| {
            part.len() == width && part.bytes().all(|b| b.is_ascii_digit())
        };
        if !well_formed(ts, TIMESTAMP_WIDTH) || !well_formed(generation, GENERATION_WIDTH) {
            return Err(invalid());
        }

        Ok(Self {
            timestamp: ts.parse().map_err(|_| invalid())?,
            generation: generation.parse().map_err(|_| invalid())?,
        })
    }
}

impl Ord for SegmentName {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.timestamp
            .cmp(&other.timestamp)
            .then(self.generation.cmp(&other.generation))
    }
}

impl PartialOrd for SegmentName {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SegmentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:0tw$}-{:0gw$}",
            self.timestamp,
            self.generation,
            tw = TIMESTAMP_WIDTH,
            gw = GENERATION_WIDTH
        )
    }
}

// ------------------------------------------------------------------------------------------------
// FileSystem
// ------------------------------------------------------------------------------------------------

/// Handle on one store directory.
#[derive(Debug)]
pub struct FileSystem {
    path: PathBuf,
    options: FsOptions,

    /// Highest timestamp handed out (or found on disk).
    last_timestamp: AtomicU64,
}

impl FileSystem {
    /// Opens the store directory at `path`, creating it unless read-only.
    pub fn new(path: impl AsRef<Path>, options: FsOptions) -> Result<Self, FsError> {
        let path = path.as_ref().to_path_buf();
        if !options.read_only {
            fs::create_dir_all(&path).map_err(io_err(&path))?;
        }

        let fs = Self {
            path,
            options,
            last_timestamp: AtomicU64::new(0),
        };
        let newest = fs
            .list_segments()?
            .iter()
            .filter_map(|name| SegmentName::parse(name).ok())
            .map(|name| name.timestamp)
            .max()
            .unwrap_or(0);
        fs.last_timestamp.store(newest, Ordering::Release);

        info!(path = %fs.path.display(), ?options, "store directory opened");
        Ok(fs)
    }

    /// Store directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Options this handle was opened with.
    pub fn options(&self) -> &FsOptions {
        &self.options
    }

    /// Path of the data file for segment `name`.
    pub fn data_path(&self, name: &str) -> PathBuf {
        self.path.join(format!("{name}.{DATA_FILE_EXT}"))
    }

    /// Path of the filter file for segment `name`.
    pub fn filter_path(&self, name: &str) -> PathBuf {
        self.path.join(format!("{name}.{FILTER_FILE_EXT}"))
    }

    /// Enumerates segment names in the store, oldest first.
    ///
    /// Staging files, filter files, and anything not following the
    /// naming scheme are ignored.
    pub fn list_segments(&self) -> Result<Vec<String>, FsError> {
        let entries = match fs::read_dir(&self.path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound && self.options.read_only => {
                return Ok(Vec::new());
            }
            Err(e) => return Err(io_err(&self.path)(e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_err(&self.path))?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(stem) = file_name
                .strip_suffix(DATA_FILE_EXT)
                .and_then(|s| s.strip_suffix('.'))
            else {
                continue;
            };
            if let Ok(parsed) = SegmentName::parse(stem) {
                names.push(parsed);
            }
        }

        names.sort();
        Ok(names.into_iter().map(|n| n.to_string()).collect())
    }

    /// Maps the full encoded contents of segment `name` into memory.
    pub fn read_segment(&self, name: &str) -> Result<Mmap, FsError> {
        let path = self.data_path(name);
        let file = fs::File::open(&path).map_err(io_err(&path))?;
        // SAFETY: segments are immutable once published and are only
        // removed through `delete_segment`, which unlinks rather than
        // truncates, so the mapping stays valid for its lifetime.
        let mmap = unsafe { Mmap::map(&file) }.map_err(io_err(&path))?;
        Ok(mmap)
    }

    /// Starts a brand-new segment stamped with the current time.
    pub fn create_segment(&self) -> Result<NewSegment, FsError> {
        self.ensure_writable("create a segment")?;
        let name = SegmentName {
            timestamp: self.next_timestamp(),
            generation: 0,
        };
        self.open_new(name)
    }

    /// Starts the output segment of a compaction whose newest input is
    /// `newest_input`.
    pub fn create_segment_after(&self, newest_input: &SegmentName) -> Result<NewSegment, FsError> {
        self.ensure_writable("create a segment")?;
        if newest_input.generation >= MAX_GENERATION {
            return Err(FsError::AlreadyExists(format!(
                "every generation after {newest_input}"
            )));
        }
        let name = SegmentName {
            timestamp: newest_input.timestamp,
            generation: newest_input.generation + 1,
        };
        self.open_new(name)
    }

    /// Removes every trace of segment `name`, published or not.
    ///
    /// Used to clean up after a failed write. Every file is attempted even
    /// if an earlier one cannot be removed; the first failure is returned.
    pub fn discard_segment(&self, name: &str) -> Result<(), FsError> {
        self.ensure_writable("discard a segment")?;
        let data = self.data_path(name);
        let filter = self.filter_path(name);
        let mut first_err = None;
        for path in [
            staging_path(&data),
            staging_path(&filter),
            data,
            filter,
        ] {
            if let Err(e) = remove_if_exists(&path) {
                first_err.get_or_insert(e);
            }
        }
        if let Some(e) = first_err {
            return Err(e);
        }
        debug!(segment = name, "segment discarded");
        Ok(())
    }

    /// Deletes segment `name` and its filter. Deleting a segment that no
    /// longer exists succeeds.
    pub fn delete_segment(&self, name: &str) -> Result<(), FsError> {
        self.ensure_writable("delete a segment")?;
        remove_if_exists(&self.data_path(name))?;
        remove_if_exists(&self.filter_path(name))?;
        debug!(segment = name, "segment deleted");
        Ok(())
    }

    fn ensure_writable(&self, operation: &'static str) -> Result<(), FsError> {
        if self.options.read_only {
            return Err(FsError::ReadOnly(operation));
        }
        Ok(())
    }

    fn open_new(&self, name: SegmentName) -> Result<NewSegment, FsError> {
        let name = name.to_string();
        let data_path = self.data_path(&name);
        if data_path.exists() {
            return Err(FsError::AlreadyExists(name));
        }
        // Leftover from an interrupted write; never published.
        remove_if_exists(&staging_path(&data_path))?;
        let writer = SegmentWriter::create(
            &data_path,
            self.options.use_compression,
            self.options.sync_writes,
        )?;
        debug!(segment = %name, "segment created");
        Ok(NewSegment {
            filter_path: self.filter_path(&name),
            name,
            writer,
        })
    }

    /// Next strictly increasing wall-clock timestamp.
    fn next_timestamp(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(0);

        let mut last = self.last_timestamp.load(Ordering::Acquire);
        loop {
            let next = now.max(last.saturating_add(1));
            match self.last_timestamp.compare_exchange_weak(
                last,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }
}

fn remove_if_exists(path: &Path) -> Result<(), FsError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(path)(e)),
    }
}

// ------------------------------------------------------------------------------------------------
// NewSegment
// ------------------------------------------------------------------------------------------------

/// A segment being written: the data writer plus its filter sink.
pub struct NewSegment {
    name: String,
    writer: SegmentWriter,
    filter_path: PathBuf,
}

impl NewSegment {
    /// Name the segment will be published under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends one record; keys must be strictly ascending.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), FsError> {
        self.writer.set(key, value)?;
        Ok(())
    }

    /// Durably writes the segment's filter file.
    pub fn write_filter(&mut self, filter: &FilterBuilder) -> Result<(), FsError> {
        let tmp = staging_path(&self.filter_path);
        let result = (|| -> Result<(), FsError> {
            let mut file = fs::File::create(&tmp).map_err(io_err(&tmp))?;
            filter.write_to(&mut file)?;
            file.sync_all().map_err(io_err(&tmp))?;
            fs::rename(&tmp, &self.filter_path).map_err(io_err(&self.filter_path))?;
            Ok(())
        })();

        if result.is_err() {
            if let Err(e) = remove_if_exists(&tmp) {
                warn!(%e, "failed to remove staged filter");
            }
        }
        result
    }

    /// Finalizes and publishes the data file, returning the record count.
    pub fn close(self) -> Result<u64, FsError> {
        let records = self.writer.close()?;
        sync_parent_dir(&self.filter_path);
        Ok(records)
    }
}
