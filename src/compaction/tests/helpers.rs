use std::{collections::BTreeMap, sync::Arc};

use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

use crate::filter::FilterBuilder;
use crate::fs::{FileSystem, FsOptions};
use crate::segment::ChunkIterator;

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times: only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn open_fs(dir: &TempDir) -> Arc<FileSystem> {
    init_tracing();
    Arc::new(FileSystem::new(dir.path(), FsOptions::default()).unwrap())
}

/// Publishes a segment holding `records` (keys in ascending order) and
/// returns its name.
pub fn write_segment<K, V>(fs: &FileSystem, records: &[(K, V)]) -> String
where
    K: AsRef<[u8]>,
    V: AsRef<[u8]>,
{
    let mut seg = fs.create_segment().unwrap();
    let mut filter = FilterBuilder::new(records.len(), 0.01).unwrap();
    for (k, v) in records {
        seg.set(k.as_ref(), v.as_ref()).unwrap();
        filter.add(k.as_ref());
    }
    seg.write_filter(&filter).unwrap();
    let name = seg.name().to_string();
    seg.close().unwrap();
    name
}

/// Reads every record of segment `name` as UTF-8 strings.
pub fn read_segment(fs: &FileSystem, name: &str) -> Vec<(String, String)> {
    let mut it = ChunkIterator::new(fs.read_segment(name).unwrap()).unwrap();
    let mut out = Vec::new();
    while it.advance().unwrap() {
        out.push((
            String::from_utf8(it.key().to_vec()).unwrap(),
            String::from_utf8(it.value().to_vec()).unwrap(),
        ));
    }
    out
}

/// Reads every record of segment `name` into a map.
pub fn read_map(fs: &FileSystem, name: &str) -> BTreeMap<String, String> {
    read_segment(fs, name).into_iter().collect()
}

/// Raw bytes of a segment written to a scratch directory, for feeding
/// in-memory [`ChunkIterator`]s.
pub fn segment_bytes(records: &[(&str, &str)]) -> Vec<u8> {
    let tmp = TempDir::new().unwrap();
    let fs = open_fs(&tmp);
    let name = write_segment(&fs, records);
    std::fs::read(fs.data_path(&name)).unwrap()
}

/// Truncates the data file of segment `name` to half its length.
pub fn truncate_segment(fs: &FileSystem, name: &str) {
    let path = fs.data_path(name);
    let len = std::fs::metadata(&path).unwrap().len();
    let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(len / 2).unwrap();
}
