use std::path::Path;

use tracing_subscriber::EnvFilter;

use crate::segment::{ChunkIterator, SegmentError, SegmentWriter};

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Writes `records` to a segment at `dir/name` and returns its raw bytes.
pub fn build_segment(
    dir: &Path,
    name: &str,
    records: &[(Vec<u8>, Vec<u8>)],
    compressed: bool,
) -> Vec<u8> {
    init_tracing();
    let path = dir.join(name);
    let mut writer = SegmentWriter::create(&path, compressed, false).unwrap();
    for (k, v) in records {
        writer.set(k, v).unwrap();
    }
    writer.close().unwrap();
    std::fs::read(&path).unwrap()
}

/// `count` records `key-00000`, `key-00001`, … with `value_len`-byte values.
pub fn sequential_records(count: usize, value_len: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
    (0..count)
        .map(|i| {
            let key = format!("key-{i:05}").into_bytes();
            let value = vec![b'a' + (i % 26) as u8; value_len];
            (key, value)
        })
        .collect()
}

/// Drains an iterator into owned pairs, stopping at the first error.
pub fn drain(
    mut it: ChunkIterator<Vec<u8>>,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>, SegmentError> {
    let mut out = Vec::new();
    while it.advance()? {
        out.push((it.key().to_vec(), it.value().to_vec()));
    }
    Ok(out)
}
