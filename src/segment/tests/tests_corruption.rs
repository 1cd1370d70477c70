//! Segment corruption tests.
//!
//! Each test damages a valid segment in one specific region and checks
//! that decoding reports an error instead of yielding fewer records.
//!
//! ## On-disk layout reference
//! ```text
//! [HEADER 13B]
//! [CHUNK: len(4) | payload | crc(4)] × N
//! [FOOTER 16B]
//! ```

#[cfg(test)]
mod tests {
    use super::super::helpers::{build_segment, drain, sequential_records};
    use crate::segment::{
        ChunkIterator, SEG_CHUNK_LEN_SIZE, SEG_FOOTER_SIZE, SEG_HDR_SIZE, SegmentError,
        SegmentFooter, crc32, seal,
    };
    use tempfile::TempDir;

    fn valid_segment(compressed: bool) -> Vec<u8> {
        let tmp = TempDir::new().unwrap();
        build_segment(
            tmp.path(),
            "victim.seg",
            &sequential_records(500, 32),
            compressed,
        )
    }

    // ================================================================
    // 1. Header
    // ================================================================

    /// # Scenario
    /// Flip a byte inside the header.
    ///
    /// # Expected behavior
    /// Construction fails with a header checksum mismatch.
    #[test]
    fn corrupt_header_byte() {
        let mut bytes = valid_segment(false);
        bytes[5] ^= 0xFF;
        assert!(matches!(
            ChunkIterator::new(bytes),
            Err(SegmentError::ChecksumMismatch("header"))
        ));
    }

    /// # Scenario
    /// Replace the magic and recompute the header CRC so only the magic
    /// check can catch it.
    ///
    /// # Expected behavior
    /// Construction fails with `Malformed`.
    #[test]
    fn wrong_magic_with_valid_crc() {
        let mut bytes = valid_segment(false);
        bytes[..4].copy_from_slice(b"NOPE");
        let crc = crc32(&bytes[..SEG_HDR_SIZE - 4]);
        bytes[SEG_HDR_SIZE - 4..SEG_HDR_SIZE].copy_from_slice(&crc.to_le_bytes());

        match ChunkIterator::new(bytes) {
            Err(SegmentError::Malformed(msg)) => assert!(msg.contains("magic"), "{msg}"),
            Err(other) => panic!("expected Malformed, got {other:?}"),
            Ok(_) => panic!("expected Malformed, got Ok"),
        }
    }

    /// # Scenario
    /// Set an unknown header flag bit (with a valid CRC).
    ///
    /// # Expected behavior
    /// Construction fails with `Malformed`.
    #[test]
    fn unknown_header_flag() {
        let mut bytes = valid_segment(false);
        bytes[8] |= 0b1000_0000;
        let crc = crc32(&bytes[..SEG_HDR_SIZE - 4]);
        bytes[SEG_HDR_SIZE - 4..SEG_HDR_SIZE].copy_from_slice(&crc.to_le_bytes());
        assert!(matches!(
            ChunkIterator::new(bytes),
            Err(SegmentError::Malformed(_))
        ));
    }

    // ================================================================
    // 2. Chunks
    // ================================================================

    /// # Scenario
    /// Flip a byte inside the first chunk's payload.
    ///
    /// # Expected behavior
    /// The iterator opens (chunks are read lazily) but the first
    /// `advance()` reports a chunk checksum mismatch.
    #[test]
    fn corrupt_chunk_payload() {
        for compressed in [false, true] {
            let mut bytes = valid_segment(compressed);
            bytes[SEG_HDR_SIZE + SEG_CHUNK_LEN_SIZE + 3] ^= 0x55;

            let mut it = ChunkIterator::new(bytes).unwrap();
            assert!(matches!(
                it.advance(),
                Err(SegmentError::ChecksumMismatch("chunk"))
            ));
        }
    }

    /// # Scenario
    /// Inflate the first chunk's length prefix so it points past the
    /// chunk region.
    ///
    /// # Expected behavior
    /// `advance()` fails with `Truncated`.
    #[test]
    fn chunk_length_overruns_region() {
        let mut bytes = valid_segment(false);
        bytes[SEG_HDR_SIZE..SEG_HDR_SIZE + 4].copy_from_slice(&u32::MAX.to_le_bytes());

        let mut it = ChunkIterator::new(bytes).unwrap();
        assert!(matches!(it.advance(), Err(SegmentError::Truncated(_))));
    }

    // ================================================================
    // 3. Footer and truncation
    // ================================================================

    /// # Scenario
    /// Cut the file in half.
    ///
    /// # Expected behavior
    /// Construction fails: the last 16 bytes are no longer a footer.
    #[test]
    fn truncated_file() {
        let bytes = valid_segment(true);
        let half = bytes[..bytes.len() / 2].to_vec();
        assert!(ChunkIterator::new(half).is_err());
    }

    /// # Scenario
    /// A buffer shorter than header plus footer.
    ///
    /// # Expected behavior
    /// Construction fails with `Truncated`.
    #[test]
    fn tiny_buffer() {
        assert!(matches!(
            ChunkIterator::new(vec![0u8; 10]),
            Err(SegmentError::Truncated(_))
        ));
        assert!(matches!(
            ChunkIterator::new(Vec::new()),
            Err(SegmentError::Truncated(_))
        ));
    }

    /// # Scenario
    /// Re-seal the footer with a record count one higher than the data.
    ///
    /// # Expected behavior
    /// All records decode, then the final `advance()` fails with
    /// `Malformed` instead of silently returning `false`.
    #[test]
    fn footer_count_disagrees_with_data() {
        let mut bytes = valid_segment(false);
        let footer_at = bytes.len() - SEG_FOOTER_SIZE;
        let mut footer = SegmentFooter::read(&bytes).unwrap();
        footer.record_count += 1;
        bytes.truncate(footer_at);
        bytes.extend_from_slice(&seal(&footer).unwrap());

        let err = drain(ChunkIterator::new(bytes).unwrap()).unwrap_err();
        assert!(matches!(err, SegmentError::Malformed(_)), "{err:?}");
    }

    /// # Scenario
    /// Remove the last chunk frame entirely, leaving header, earlier
    /// chunks and the original footer.
    ///
    /// # Expected behavior
    /// Decoding reports `Malformed` once it runs out of chunks.
    #[test]
    fn missing_chunk_detected() {
        let bytes = valid_segment(false);
        let footer = SegmentFooter::read(&bytes).unwrap();
        assert!(footer.chunk_count > 1);

        // Walk the frames to find where the last one starts.
        let chunks_end = bytes.len() - SEG_FOOTER_SIZE;
        let mut off = SEG_HDR_SIZE;
        let mut last_start = off;
        while off < chunks_end {
            last_start = off;
            let len = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap()) as usize;
            off += SEG_CHUNK_LEN_SIZE + len + 4;
        }

        let mut damaged = bytes[..last_start].to_vec();
        damaged.extend_from_slice(&seal(&footer).unwrap());

        let err = drain(ChunkIterator::new(damaged).unwrap()).unwrap_err();
        assert!(matches!(err, SegmentError::Malformed(_)), "{err:?}");
    }
}
