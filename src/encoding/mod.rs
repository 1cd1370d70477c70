//! Deterministic binary encoding for segment and filter files.
//!
//! Every fixed-layout structure written by this crate (segment header,
//! cell headers, segment footer, filter header) goes through the
//! [`Encode`] and [`Decode`] traits defined here, so the byte layout is
//! owned by the crate and never shifts with a dependency upgrade.
//!
//! # Wire format
//!
//! | Rust type   | Encoding                                     |
//! |-------------|----------------------------------------------|
//! | `u8`        | 1 byte                                       |
//! | `u32`       | 4 bytes, little-endian                       |
//! | `u64`       | 8 bytes, little-endian                       |
//! | `[u8; N]`   | `N` raw bytes (no length prefix)             |
//! | `Vec<u8>`   | `[u32 len][bytes]`                           |
//!
//! Decoders return `(value, bytes_consumed)` so callers can walk a
//! buffer holding several encoded items back to back. No decoder
//! panics on short or hostile input; every failure is an
//! [`EncodingError`].


use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Safety limits
// ------------------------------------------------------------------------------------------------

/// Largest length prefix accepted when decoding a `Vec<u8>` (256 MiB).
pub const MAX_BYTE_LEN: u32 = 256 * 1024 * 1024;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors produced during encoding or decoding.
#[derive(Debug, Error)]
pub enum EncodingError {
    /// The buffer ran out of bytes before decoding completed.
    #[error("unexpected end of buffer (need {needed} bytes, have {available})")]
    UnexpectedEof {
        /// Bytes required to continue decoding.
        needed: usize,
        /// Bytes actually remaining.
        available: usize,
    },

    /// A length did not fit the wire format or exceeded [`MAX_BYTE_LEN`].
    #[error("length overflow: {0}")]
    LengthOverflow(String),
}

// ------------------------------------------------------------------------------------------------
// Core traits
// ------------------------------------------------------------------------------------------------

/// Serialize `self` by appending its bytes to a buffer.
pub trait Encode {
    /// Append the encoded representation of `self` to `buf`.
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError>;
}

/// Deserialize a value from the start of a byte slice.
pub trait Decode: Sized {
    /// Decode one value starting at `buf[0]`, returning it together with
    /// the number of bytes consumed.
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError>;
}

/// Encode a value into a freshly-allocated `Vec<u8>`.
pub fn encode_to_vec<T: Encode>(value: &T) -> Result<Vec<u8>, EncodingError> {
    let mut buf = Vec::new();
    value.encode_to(&mut buf)?;
    Ok(buf)
}

/// Decode a value from the beginning of `buf`.
pub fn decode_from_slice<T: Decode>(buf: &[u8]) -> Result<(T, usize), EncodingError> {
    T::decode_from(buf)
}

// ------------------------------------------------------------------------------------------------
// Internal helpers
// ------------------------------------------------------------------------------------------------

#[inline]
fn require(buf: &[u8], needed: usize) -> Result<(), EncodingError> {
    if buf.len() < needed {
        Err(EncodingError::UnexpectedEof {
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}

/// Converts a `usize` length to the `u32` used on the wire.
#[inline]
pub(crate) fn len_to_u32(len: usize) -> Result<u32, EncodingError> {
    u32::try_from(len)
        .map_err(|_| EncodingError::LengthOverflow(format!("length {len} exceeds u32::MAX")))
}

// ------------------------------------------------------------------------------------------------
// Integers
// ------------------------------------------------------------------------------------------------

impl Encode for u8 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.push(*self);
        Ok(())
    }
}

impl Decode for u8 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        require(buf, 1)?;
        Ok((buf[0], 1))
    }
}

macro_rules! impl_le_int {
    ($ty:ty, $width:expr) => {
        impl Encode for $ty {
            #[inline]
            fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
                buf.extend_from_slice(&self.to_le_bytes());
                Ok(())
            }
        }

        impl Decode for $ty {
            #[inline]
            fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
                require(buf, $width)?;
                let mut bytes = [0u8; $width];
                bytes.copy_from_slice(&buf[..$width]);
                Ok((<$ty>::from_le_bytes(bytes), $width))
            }
        }
    };
}

impl_le_int!(u32, 4);
impl_le_int!(u64, 8);

// ------------------------------------------------------------------------------------------------
// Byte arrays and vectors
// ------------------------------------------------------------------------------------------------

impl<const N: usize> Encode for [u8; N] {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.extend_from_slice(self);
        Ok(())
    }
}

impl<const N: usize> Decode for [u8; N] {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        require(buf, N)?;
        let mut arr = [0u8; N];
        arr.copy_from_slice(&buf[..N]);
        Ok((arr, N))
    }
}

impl Encode for Vec<u8> {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        len_to_u32(self.len())?.encode_to(buf)?;
        buf.extend_from_slice(self);
        Ok(())
    }
}

impl Decode for Vec<u8> {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (len, offset) = u32::decode_from(buf)?;
        if len > MAX_BYTE_LEN {
            return Err(EncodingError::LengthOverflow(format!(
                "byte vector length {len} exceeds MAX_BYTE_LEN ({MAX_BYTE_LEN})"
            )));
        }
        let len = len as usize;
        require(&buf[offset..], len)?;
        Ok((buf[offset..offset + len].to_vec(), offset + len))
    }
}
