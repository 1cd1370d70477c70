//! Segment writer: streams sorted records into a new segment file.
//!
//! # Input requirements
//!
//! Keys passed to [`SegmentWriter::set`] must be strictly ascending.
//! A key that does not sort after its predecessor is rejected with
//! [`SegmentError::OutOfOrder`] and nothing is appended.
//!
//! # Atomicity
//!
//! 1. Everything is written to `<path>.tmp`.
//! 2. [`SegmentWriter::close`] writes the footer, flushes, and fsyncs.
//! 3. The temporary file is renamed to `<path>` and the directory synced.
//!
//! A writer dropped before `close` removes its temporary file, so a
//! failed compaction never leaves a visible segment behind.

use std::{
    ffi::OsString,
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    mem,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::encoding::{self, Encode};

use super::{
    SEG_CHUNK_TARGET_SIZE, SegmentCell, SegmentError, SegmentFooter, SegmentHeader, crc32, seal,
};

/// Returns `<path>.tmp`, the staging location used for atomic publication.
pub(crate) fn staging_path(path: &Path) -> PathBuf {
    let mut raw = OsString::from(path.as_os_str());
    raw.push(".tmp");
    PathBuf::from(raw)
}

/// Builds one segment file from a sorted stream of records.
pub struct SegmentWriter {
    path: PathBuf,
    tmp_path: PathBuf,

    /// `None` once the writer has been closed.
    out: Option<BufWriter<File>>,

    compressed: bool,
    sync_writes: bool,

    /// Uncompressed cells of the chunk being assembled.
    chunk: Vec<u8>,
    chunk_count: u32,
    record_count: u64,
    last_key: Option<Vec<u8>>,

    /// Set after the rename succeeded.
    published: bool,
}

impl SegmentWriter {
    /// Creates the staging file for a segment that will appear at `path`.
    ///
    /// Fails if the staging file already exists.
    pub fn create(
        path: impl AsRef<Path>,
        compressed: bool,
        sync_writes: bool,
    ) -> Result<Self, SegmentError> {
        let path = path.as_ref().to_path_buf();
        let tmp_path = staging_path(&path);

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)?;
        let mut out = BufWriter::new(file);
        out.write_all(&seal(&SegmentHeader::new(compressed))?)?;

        Ok(Self {
            path,
            tmp_path,
            out: Some(out),
            compressed,
            sync_writes,
            chunk: Vec::with_capacity(SEG_CHUNK_TARGET_SIZE * 2),
            chunk_count: 0,
            record_count: 0,
            last_key: None,
            published: false,
        })
    }

    /// Final path of the segment.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records accepted so far.
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Appends one record.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), SegmentError> {
        match &mut self.last_key {
            Some(previous) => {
                if key <= previous.as_slice() {
                    return Err(SegmentError::OutOfOrder {
                        previous: previous.clone(),
                        next: key.to_vec(),
                    });
                }
                previous.clear();
                previous.extend_from_slice(key);
            }
            None => self.last_key = Some(key.to_vec()),
        }

        let cell = SegmentCell {
            key_len: encoding::len_to_u32(key.len())?,
            value_len: encoding::len_to_u32(value.len())?,
        };
        cell.encode_to(&mut self.chunk)?;
        self.chunk.extend_from_slice(key);
        self.chunk.extend_from_slice(value);
        self.record_count += 1;

        if self.chunk.len() >= SEG_CHUNK_TARGET_SIZE {
            self.flush_chunk()?;
        }
        Ok(())
    }

    /// Finalizes the segment: writes the footer, fsyncs, and publishes
    /// the file under its final name.
    ///
    /// Returns the number of records written.
    pub fn close(mut self) -> Result<u64, SegmentError> {
        if !self.chunk.is_empty() {
            self.flush_chunk()?;
        }

        let footer = SegmentFooter {
            record_count: self.record_count,
            chunk_count: self.chunk_count,
        };
        let mut out = self
            .out
            .take()
            .ok_or_else(|| SegmentError::Malformed("writer already closed".into()))?;
        out.write_all(&seal(&footer)?)?;
        out.flush()?;
        let file = out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.tmp_path, &self.path)?;
        self.published = true;
        sync_parent_dir(&self.path);

        debug!(
            path = %self.path.display(),
            records = self.record_count,
            chunks = self.chunk_count,
            "segment published"
        );
        Ok(self.record_count)
    }

    /// Frames the pending chunk as `[len][payload][crc]` and writes it.
    fn flush_chunk(&mut self) -> Result<(), SegmentError> {
        let out = self
            .out
            .as_mut()
            .ok_or_else(|| SegmentError::Malformed("writer already closed".into()))?;

        let payload = if self.compressed {
            let compressed = snap::raw::Encoder::new().compress_vec(&self.chunk)?;
            self.chunk.clear();
            compressed
        } else {
            mem::take(&mut self.chunk)
        };

        let len = encoding::len_to_u32(payload.len())?;
        out.write_all(&len.to_le_bytes())?;
        out.write_all(&payload)?;
        out.write_all(&crc32(&payload).to_le_bytes())?;
        self.chunk_count += 1;

        if self.sync_writes {
            out.flush()?;
            out.get_ref().sync_data()?;
        }
        Ok(())
    }
}

impl Drop for SegmentWriter {
    fn drop(&mut self) {
        if self.published {
            return;
        }
        drop(self.out.take());
        if let Err(e) = fs::remove_file(&self.tmp_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.tmp_path.display(), %e, "failed to remove unpublished segment");
            }
        }
    }
}

/// Best-effort fsync of the directory holding `path`, making the rename durable.
pub(crate) fn sync_parent_dir(path: &Path) {
    let Some(parent) = path.parent() else {
        return;
    };
    match File::open(parent).and_then(|dir| dir.sync_all()) {
        Ok(()) => {}
        Err(e) => warn!(dir = %parent.display(), %e, "failed to sync directory"),
    }
}
