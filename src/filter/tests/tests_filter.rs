//! Filter builder / reader tests: membership guarantees, persistence,
//! and rejection of damaged filter files.

#[cfg(test)]
mod tests {
    use crate::filter::{FilterBuilder, FilterError, FilterReader};
    use tempfile::TempDir;

    fn key(i: usize) -> Vec<u8> {
        format!("user:{i:08}").into_bytes()
    }

    /// # Scenario
    /// Add 5 000 keys, serialize, and load the filter back.
    ///
    /// # Expected behavior
    /// Every added key is reported as possibly present (no false
    /// negatives) and the key count survives the round trip.
    #[test]
    fn no_false_negatives() {
        let mut builder = FilterBuilder::new(5_000, 0.01).unwrap();
        for i in 0..5_000 {
            builder.add(&key(i));
        }
        assert_eq!(builder.key_count(), 5_000);

        let reader = FilterReader::from_bytes(&builder.to_bytes().unwrap()).unwrap();
        assert_eq!(reader.key_count(), 5_000);
        for i in 0..5_000 {
            assert!(reader.may_contain(&key(i)), "false negative for key {i}");
        }
    }

    /// # Scenario
    /// Probe 10 000 keys that were never added to a 1% filter.
    ///
    /// # Expected behavior
    /// The observed false-positive rate stays well under 5%.
    #[test]
    fn false_positive_rate_is_bounded() {
        let mut builder = FilterBuilder::new(2_000, 0.01).unwrap();
        for i in 0..2_000 {
            builder.add(&key(i));
        }
        let reader = FilterReader::from_bytes(&builder.to_bytes().unwrap()).unwrap();

        let hits = (1_000_000..1_010_000)
            .filter(|i| reader.may_contain(&key(*i)))
            .count();
        assert!(hits < 500, "{hits} false positives out of 10000");
    }

    /// # Scenario
    /// Size a filter for zero keys (an empty bucket output).
    ///
    /// # Expected behavior
    /// Building succeeds and the filter round-trips.
    #[test]
    fn zero_expected_keys() {
        let builder = FilterBuilder::new(0, 0.01).unwrap();
        let reader = FilterReader::from_bytes(&builder.to_bytes().unwrap()).unwrap();
        assert_eq!(reader.key_count(), 0);
    }

    /// # Scenario
    /// Persist a filter with `write_to` and reopen it from disk.
    ///
    /// # Expected behavior
    /// `write_to` reports the file size and `open` reads it back.
    #[test]
    fn write_and_open() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("one.flt");

        let mut builder = FilterBuilder::new(10, 0.01).unwrap();
        builder.add(b"alpha");
        builder.add(b"beta");
        let mut file = std::fs::File::create(&path).unwrap();
        let written = builder.write_to(&mut file).unwrap();
        drop(file);
        assert_eq!(written as u64, std::fs::metadata(&path).unwrap().len());

        let reader = FilterReader::open(&path).unwrap();
        assert!(reader.may_contain(b"alpha"));
        assert!(reader.may_contain(b"beta"));
        assert_eq!(reader.key_count(), 2);
    }

    /// # Scenario
    /// Flip one byte in the bloom bytes of a serialized filter.
    ///
    /// # Expected behavior
    /// Loading fails with `ChecksumMismatch`.
    #[test]
    fn corrupted_filter_rejected() {
        let mut builder = FilterBuilder::new(100, 0.01).unwrap();
        builder.add(b"k");
        let mut bytes = builder.to_bytes().unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x01;

        assert!(matches!(
            FilterReader::from_bytes(&bytes),
            Err(FilterError::ChecksumMismatch)
        ));
    }

    /// # Scenario
    /// A valid checksum over bytes with the wrong magic.
    ///
    /// # Expected behavior
    /// Loading fails with `BadMagic`.
    #[test]
    fn wrong_magic_rejected() {
        let builder = FilterBuilder::new(10, 0.01).unwrap();
        let mut bytes = builder.to_bytes().unwrap();
        bytes[..4].copy_from_slice(b"SEG1");
        let body_len = bytes.len() - 4;
        let crc = crate::segment::crc32(&bytes[..body_len]);
        bytes[body_len..].copy_from_slice(&crc.to_le_bytes());

        assert!(matches!(
            FilterReader::from_bytes(&bytes),
            Err(FilterError::BadMagic(m)) if &m == b"SEG1"
        ));
    }

    /// # Scenario
    /// Buffers too short to hold even a checksum.
    ///
    /// # Expected behavior
    /// Loading fails with an encoding error rather than panicking.
    #[test]
    fn short_buffer_rejected() {
        assert!(matches!(
            FilterReader::from_bytes(&[1, 2]),
            Err(FilterError::Encoding(_))
        ));
    }
}
