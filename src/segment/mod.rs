//! Segment files: the immutable, key-sorted unit that compaction merges.
//!
//! A segment holds an ordered run of `(key, value)` records written once
//! by [`SegmentWriter`] and decoded lazily by [`ChunkIterator`]. Records
//! are grouped into **chunks** of roughly 4 KiB; each chunk is framed,
//! checksummed, and optionally snappy-compressed.
//!
//! # On-disk layout
//!
//! ```text
//! [HEADER: magic "SEG1" (4) | version u32 | flags u8 | header_crc u32]
//! [CHUNK:  payload_len u32 | payload | chunk_crc u32]
//! [CHUNK:  payload_len u32 | payload | chunk_crc u32]
//! ...
//! [FOOTER: record_count u64 | chunk_count u32 | footer_crc u32]
//! ```
//!
//! - **Header**: identifies the format; `flags` bit 0 marks compressed
//!   chunk payloads. The CRC covers the preceding header bytes.
//! - **Chunks**: the CRC covers the payload exactly as stored (after
//!   compression). A decompressed payload is a concatenation of cells:
//!
//!   ```text
//!   [key_len u32 | value_len u32][KEY_BYTES][VALUE_BYTES]
//!   ```
//!
//! - **Footer**: the total record and chunk counts. Readers compare them
//!   with what they actually decoded, so a segment that lost whole chunks
//!   is reported as malformed rather than read short.
//!
//! All integers are little-endian and encoded through [`crate::encoding`].
//!
//! # Guarantees
//!
//! - **Immutability:** a segment is never modified after `close()`.
//! - **Atomic publication:** writers stage into `<name>.seg.tmp` and
//!   rename on success, so a crash never exposes a half-written segment.
//! - **Integrity:** header, every chunk, and footer are CRC32-protected.

pub mod iterator;
pub mod writer;

#[cfg(test)]
mod tests;

pub use iterator::ChunkIterator;
pub use writer::SegmentWriter;

use std::io;

use crc32fast::Hasher as Crc32;
use thiserror::Error;

use crate::encoding::{self, Decode, Encode, EncodingError};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

pub(crate) const SEG_HDR_MAGIC: [u8; 4] = *b"SEG1";
pub(crate) const SEG_HDR_VERSION: u32 = 1;
/// magic (4) + version (4) + flags (1) + crc (4).
pub(crate) const SEG_HDR_SIZE: usize = 13;
/// record_count (8) + chunk_count (4) + crc (4).
pub(crate) const SEG_FOOTER_SIZE: usize = 16;
pub(crate) const SEG_CHUNK_LEN_SIZE: usize = 4;
pub(crate) const SEG_CHUNK_CHECKSUM_SIZE: usize = 4;
/// Uncompressed cell bytes after which the writer cuts a chunk.
pub(crate) const SEG_CHUNK_TARGET_SIZE: usize = 4096;
/// key_len (4) + value_len (4).
pub(crate) const SEG_CELL_HEADER_SIZE: usize = 8;

const SEG_FLAG_COMPRESSED: u8 = 0b0000_0001;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned while writing or decoding a segment.
#[derive(Debug, Error)]
pub enum SegmentError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Snappy compression or decompression failed.
    #[error("Compression error: {0}")]
    Compression(#[from] snap::Error),

    /// A stored CRC32 did not match the bytes it protects.
    #[error("Checksum mismatch in {0}")]
    ChecksumMismatch(&'static str),

    /// The buffer ended before a complete structure could be read.
    #[error("Truncated segment: {0}")]
    Truncated(String),

    /// The bytes are complete but do not describe a valid segment.
    #[error("Malformed segment: {0}")]
    Malformed(String),

    /// `set` was called with a key not strictly greater than the previous one.
    #[error("Key out of order: {next:?} does not sort after {previous:?}")]
    OutOfOrder {
        /// Last key accepted by the writer.
        previous: Vec<u8>,
        /// Key that was rejected.
        next: Vec<u8>,
    },
}

// ------------------------------------------------------------------------------------------------
// On-disk structures
// ------------------------------------------------------------------------------------------------

/// Fixed-size segment header (CRC excluded; see [`seal`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SegmentHeader {
    magic: [u8; 4],
    version: u32,
    flags: u8,
}

impl SegmentHeader {
    pub(crate) fn new(compressed: bool) -> Self {
        Self {
            magic: SEG_HDR_MAGIC,
            version: SEG_HDR_VERSION,
            flags: if compressed { SEG_FLAG_COMPRESSED } else { 0 },
        }
    }

    pub(crate) fn is_compressed(&self) -> bool {
        self.flags & SEG_FLAG_COMPRESSED != 0
    }

    /// Decodes and validates the header at the start of `buf`.
    pub(crate) fn read(buf: &[u8]) -> Result<Self, SegmentError> {
        if buf.len() < SEG_HDR_SIZE {
            return Err(SegmentError::Truncated(format!(
                "header needs {SEG_HDR_SIZE} bytes, have {}",
                buf.len()
            )));
        }
        let body = unseal(&buf[..SEG_HDR_SIZE], "header")?;
        let (header, _) = encoding::decode_from_slice::<Self>(body)?;

        if header.magic != SEG_HDR_MAGIC {
            return Err(SegmentError::Malformed(format!(
                "bad magic {:?}",
                header.magic
            )));
        }
        if header.version != SEG_HDR_VERSION {
            return Err(SegmentError::Malformed(format!(
                "unsupported version {}",
                header.version
            )));
        }
        if header.flags & !SEG_FLAG_COMPRESSED != 0 {
            return Err(SegmentError::Malformed(format!(
                "unknown header flags 0x{:02X}",
                header.flags
            )));
        }
        Ok(header)
    }
}

/// Segment footer (CRC excluded; see [`seal`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SegmentFooter {
    pub(crate) record_count: u64,
    pub(crate) chunk_count: u32,
}

impl SegmentFooter {
    /// Decodes and validates the footer occupying the last
    /// [`SEG_FOOTER_SIZE`] bytes of `buf`.
    pub(crate) fn read(buf: &[u8]) -> Result<Self, SegmentError> {
        if buf.len() < SEG_FOOTER_SIZE {
            return Err(SegmentError::Truncated(format!(
                "footer needs {SEG_FOOTER_SIZE} bytes, have {}",
                buf.len()
            )));
        }
        let body = unseal(&buf[buf.len() - SEG_FOOTER_SIZE..], "footer")?;
        let (footer, _) = encoding::decode_from_slice::<Self>(body)?;
        Ok(footer)
    }
}

/// Per-record header preceding the raw key and value bytes.
pub(crate) struct SegmentCell {
    pub(crate) key_len: u32,
    pub(crate) value_len: u32,
}

// ------------------------------------------------------------------------------------------------
// Encoding implementations
// ------------------------------------------------------------------------------------------------

impl Encode for SegmentHeader {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.magic.encode_to(buf)?;
        self.version.encode_to(buf)?;
        self.flags.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for SegmentHeader {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (magic, n) = <[u8; 4]>::decode_from(&buf[off..])?;
        off += n;
        let (version, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (flags, n) = u8::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                magic,
                version,
                flags,
            },
            off,
        ))
    }
}

impl Encode for SegmentFooter {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.record_count.encode_to(buf)?;
        self.chunk_count.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for SegmentFooter {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (record_count, a) = u64::decode_from(buf)?;
        let (chunk_count, b) = u32::decode_from(&buf[a..])?;
        Ok((
            Self {
                record_count,
                chunk_count,
            },
            a + b,
        ))
    }
}

impl Encode for SegmentCell {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.key_len.encode_to(buf)?;
        self.value_len.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for SegmentCell {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (key_len, a) = u32::decode_from(buf)?;
        let (value_len, b) = u32::decode_from(&buf[a..])?;
        Ok((Self { key_len, value_len }, a + b))
    }
}

// ------------------------------------------------------------------------------------------------
// Checksum helpers
// ------------------------------------------------------------------------------------------------

pub(crate) fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(data);
    hasher.finalize()
}

/// Encodes `value` and appends a little-endian CRC32 of the encoded bytes.
pub(crate) fn seal<T: Encode>(value: &T) -> Result<Vec<u8>, EncodingError> {
    let mut bytes = encoding::encode_to_vec(value)?;
    let checksum = crc32(&bytes);
    checksum.encode_to(&mut bytes)?;
    Ok(bytes)
}

/// Verifies the trailing CRC32 of a sealed structure and returns the body.
fn unseal<'a>(sealed: &'a [u8], what: &'static str) -> Result<&'a [u8], SegmentError> {
    let split = sealed.len() - SEG_CHUNK_CHECKSUM_SIZE;
    let (body, tail) = sealed.split_at(split);
    let (stored, _) = u32::decode_from(tail)?;
    if crc32(body) != stored {
        return Err(SegmentError::ChecksumMismatch(what));
    }
    Ok(body)
}
