//! Membership filters persisted next to each segment.
//!
//! Compaction discards the filters of its input segments together with
//! the segments themselves, so every merged output gets a freshly built
//! bloom filter over exactly the keys it contains. The read path loads
//! it with [`FilterReader`] to skip segments that cannot hold a key.
//!
//! # On-disk layout
//!
//! ```text
//! [magic "FLT1" (4)][key_count u64][bloom_len u32][BLOOM_BYTES][crc32 u32]
//! ```
//!
//! The CRC covers every preceding byte. Bloom bytes are the
//! `bloomfilter` crate's own serialization.

#[cfg(test)]
mod tests;

use std::{fs, io::Write, path::Path};

use bloomfilter::Bloom;
use thiserror::Error;

use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::segment::crc32;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

const FILTER_MAGIC: [u8; 4] = *b"FLT1";
const FILTER_CHECKSUM_SIZE: usize = 4;

/// False-positive rate used when the caller does not choose one.
pub const DEFAULT_FALSE_POSITIVE_RATE: f64 = 0.01;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors raised while building, persisting, or loading a filter.
#[derive(Debug, Error)]
pub enum FilterError {
    /// The bloom filter could not be sized or deserialized.
    #[error("bloom filter error: {0}")]
    Bloom(String),

    /// Writing or reading the filter file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding / decoding error.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// The stored CRC32 did not match the filter bytes.
    #[error("filter checksum mismatch")]
    ChecksumMismatch,

    /// The bytes do not start with the filter magic.
    #[error("not a filter file (magic {0:?})")]
    BadMagic([u8; 4]),
}

// ------------------------------------------------------------------------------------------------
// Builder
// ------------------------------------------------------------------------------------------------

/// Accumulates keys into a bloom filter sized for a known upper bound.
pub struct FilterBuilder {
    bloom: Bloom<[u8]>,
    key_count: u64,
}

impl FilterBuilder {
    /// Sizes the filter for `expected_keys` entries at `false_positive_rate`.
    ///
    /// Over-estimating `expected_keys` only costs space; the rate holds
    /// as long as no more keys than that are added.
    pub fn new(expected_keys: usize, false_positive_rate: f64) -> Result<Self, FilterError> {
        let bloom = Bloom::new_for_fp_rate(expected_keys.max(1), false_positive_rate)
            .map_err(|e| FilterError::Bloom(e.to_string()))?;
        Ok(Self {
            bloom,
            key_count: 0,
        })
    }

    /// Adds one key.
    pub fn add(&mut self, key: &[u8]) {
        self.bloom.set(key);
        self.key_count += 1;
    }

    /// Keys added so far.
    pub fn key_count(&self) -> u64 {
        self.key_count
    }

    /// Serializes the filter into its on-disk representation.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FilterError> {
        let mut buf = Vec::new();
        FILTER_MAGIC.encode_to(&mut buf)?;
        self.key_count.encode_to(&mut buf)?;
        self.bloom.as_slice().to_vec().encode_to(&mut buf)?;
        let checksum = crc32(&buf);
        checksum.encode_to(&mut buf)?;
        Ok(buf)
    }

    /// Writes the serialized filter to `out`, returning the byte count.
    pub fn write_to(&self, out: &mut impl Write) -> Result<usize, FilterError> {
        let bytes = self.to_bytes()?;
        out.write_all(&bytes)?;
        Ok(bytes.len())
    }
}

// ------------------------------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------------------------------

/// A persisted filter loaded back into memory.
pub struct FilterReader {
    bloom: Bloom<[u8]>,
    key_count: u64,
}

impl FilterReader {
    /// Reads and validates the filter file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FilterError> {
        Self::from_bytes(&fs::read(path)?)
    }

    /// Validates and decodes a serialized filter.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, FilterError> {
        if buf.len() < FILTER_CHECKSUM_SIZE {
            return Err(FilterError::Encoding(EncodingError::UnexpectedEof {
                needed: FILTER_CHECKSUM_SIZE,
                available: buf.len(),
            }));
        }
        let (body, tail) = buf.split_at(buf.len() - FILTER_CHECKSUM_SIZE);
        let (stored, _) = u32::decode_from(tail)?;
        if crc32(body) != stored {
            return Err(FilterError::ChecksumMismatch);
        }

        let mut off = 0;
        let (magic, n) = encoding::decode_from_slice::<[u8; 4]>(body)?;
        off += n;
        if magic != FILTER_MAGIC {
            return Err(FilterError::BadMagic(magic));
        }
        let (key_count, n) = u64::decode_from(&body[off..])?;
        off += n;
        let (bloom_bytes, _) = <Vec<u8>>::decode_from(&body[off..])?;

        let bloom =
            Bloom::from_slice(&bloom_bytes).map_err(|e| FilterError::Bloom(e.to_string()))?;
        Ok(Self { bloom, key_count })
    }

    /// Returns `false` only if `key` was definitely never added.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        self.bloom.check(key)
    }

    /// Number of keys the filter was built from.
    pub fn key_count(&self) -> u64 {
        self.key_count
    }
}
