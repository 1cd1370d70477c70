//! Chunk iterator: lazy, forward-only decoding of one segment buffer.
//!
//! [`ChunkIterator`] wraps the complete encoded bytes of a segment (an
//! owned `Vec<u8>` or a memory map) and exposes a pull protocol:
//!
//! ```rust,ignore
//! let mut it = ChunkIterator::new(bytes)?;
//! while it.advance()? {
//!     handle(it.key(), it.value());
//! }
//! ```
//!
//! The header and footer are validated eagerly in [`ChunkIterator::new`].
//! Chunks are checksummed, decompressed, and decoded only when the
//! cursor reaches them, so at most one decoded chunk is resident at a
//! time. Unlike a read-path scan, this iterator never treats corruption
//! as end-of-data: every truncated or malformed structure surfaces as a
//! [`SegmentError`] from [`ChunkIterator::advance`].

use std::ops::Range;

use crate::encoding;

use super::{
    SEG_CELL_HEADER_SIZE, SEG_CHUNK_CHECKSUM_SIZE, SEG_CHUNK_LEN_SIZE, SEG_FOOTER_SIZE,
    SEG_HDR_SIZE, SegmentCell, SegmentError, SegmentFooter, SegmentHeader, crc32,
};

/// Pull-based decoder over the records of a single segment.
///
/// Records come out in the order they were written, which the write
/// path guarantees is strictly ascending by key. The iterator does not
/// re-check that order.
pub struct ChunkIterator<B: AsRef<[u8]> = Vec<u8>> {
    /// Complete encoded segment.
    data: B,

    compressed: bool,

    /// Offset of the next chunk frame in `data`.
    next_chunk: usize,

    /// Offset where the footer starts; chunk frames must end before it.
    chunks_end: usize,

    footer: SegmentFooter,

    chunks_read: u32,

    /// Decoded cells of the current chunk.
    chunk: Vec<u8>,

    /// Offset of the next cell within `chunk`.
    cursor: usize,

    key: Range<usize>,
    value: Range<usize>,
    valid: bool,

    /// Records yielded so far.
    num_keys: u64,
}

impl<B: AsRef<[u8]>> ChunkIterator<B> {
    /// Validates the header and footer of `data` and positions the
    /// iterator before the first record.
    pub fn new(data: B) -> Result<Self, SegmentError> {
        let bytes = data.as_ref();
        if bytes.len() < SEG_HDR_SIZE + SEG_FOOTER_SIZE {
            return Err(SegmentError::Truncated(format!(
                "segment of {} bytes is shorter than header plus footer",
                bytes.len()
            )));
        }

        let header = SegmentHeader::read(bytes)?;
        let footer = SegmentFooter::read(bytes)?;
        let chunks_end = bytes.len() - SEG_FOOTER_SIZE;

        Ok(Self {
            compressed: header.is_compressed(),
            next_chunk: SEG_HDR_SIZE,
            chunks_end,
            footer,
            chunks_read: 0,
            chunk: Vec::new(),
            cursor: 0,
            key: 0..0,
            value: 0..0,
            valid: false,
            num_keys: 0,
            data,
        })
    }

    /// Moves to the next record.
    ///
    /// Returns `Ok(true)` when a record is available through [`key`](Self::key)
    /// and [`value`](Self::value), `Ok(false)` once the segment is exhausted.
    pub fn advance(&mut self) -> Result<bool, SegmentError> {
        loop {
            if self.cursor < self.chunk.len() {
                self.decode_cell()?;
                return Ok(true);
            }
            if !self.load_next_chunk()? {
                self.valid = false;
                self.key = 0..0;
                self.value = 0..0;
                return Ok(false);
            }
        }
    }

    /// Key of the current record; empty when the iterator is not positioned.
    pub fn key(&self) -> &[u8] {
        &self.chunk[self.key.clone()]
    }

    /// Value of the current record; empty when the iterator is not positioned.
    pub fn value(&self) -> &[u8] {
        &self.chunk[self.value.clone()]
    }

    /// Returns `true` while positioned on a record.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Number of records yielded so far.
    pub fn num_keys(&self) -> u64 {
        self.num_keys
    }

    /// Record count declared by the segment footer.
    pub fn expected_records(&self) -> u64 {
        self.footer.record_count
    }

    fn decode_cell(&mut self) -> Result<(), SegmentError> {
        let remaining = &self.chunk[self.cursor..];
        if remaining.len() < SEG_CELL_HEADER_SIZE {
            return Err(SegmentError::Malformed(format!(
                "chunk {} ends inside a cell header",
                self.chunks_read
            )));
        }
        let (cell, header_len) = encoding::decode_from_slice::<SegmentCell>(remaining)?;

        let key_start = self.cursor + header_len;
        let value_start = key_start + cell.key_len as usize;
        let value_end = value_start + cell.value_len as usize;
        if value_end > self.chunk.len() {
            return Err(SegmentError::Malformed(format!(
                "cell at offset {} in chunk {} overruns the chunk",
                self.cursor, self.chunks_read
            )));
        }

        self.key = key_start..value_start;
        self.value = value_start..value_end;
        self.cursor = value_end;
        self.valid = true;
        self.num_keys += 1;
        Ok(())
    }

    /// Verifies and decodes the next chunk frame into `self.chunk`.
    ///
    /// Returns `Ok(false)` after the last chunk, once the decoded totals
    /// have been reconciled with the footer.
    fn load_next_chunk(&mut self) -> Result<bool, SegmentError> {
        if self.next_chunk >= self.chunks_end {
            self.check_totals()?;
            return Ok(false);
        }

        let bytes = self.data.as_ref();
        let frame_start = self.next_chunk;
        let payload_start = frame_start + SEG_CHUNK_LEN_SIZE;
        if payload_start > self.chunks_end {
            return Err(SegmentError::Truncated(format!(
                "chunk length at offset {frame_start} is cut off"
            )));
        }
        let (payload_len, _) = encoding::decode_from_slice::<u32>(&bytes[frame_start..])?;

        let payload_end = payload_start + payload_len as usize;
        let frame_end = payload_end + SEG_CHUNK_CHECKSUM_SIZE;
        if frame_end > self.chunks_end {
            return Err(SegmentError::Truncated(format!(
                "chunk at offset {frame_start} claims {payload_len} bytes past the chunk region"
            )));
        }

        let payload = &bytes[payload_start..payload_end];
        let (stored_crc, _) = encoding::decode_from_slice::<u32>(&bytes[payload_end..])?;
        if crc32(payload) != stored_crc {
            return Err(SegmentError::ChecksumMismatch("chunk"));
        }
        if payload.is_empty() {
            return Err(SegmentError::Malformed(format!(
                "empty chunk at offset {frame_start}"
            )));
        }

        self.chunk = if self.compressed {
            snap::raw::Decoder::new().decompress_vec(payload)?
        } else {
            payload.to_vec()
        };
        self.cursor = 0;
        self.next_chunk = frame_end;
        self.chunks_read += 1;
        Ok(true)
    }

    fn check_totals(&self) -> Result<(), SegmentError> {
        if self.chunks_read != self.footer.chunk_count {
            return Err(SegmentError::Malformed(format!(
                "decoded {} chunks, footer declares {}",
                self.chunks_read, self.footer.chunk_count
            )));
        }
        if self.num_keys != self.footer.record_count {
            return Err(SegmentError::Malformed(format!(
                "decoded {} records, footer declares {}",
                self.num_keys, self.footer.record_count
            )));
        }
        Ok(())
    }
}
