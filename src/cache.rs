//! The binary-file cache: one [`BinaryFile`] handle per image path, grown
//! never shrunk except on an explicit clear. Grounded on backtrace-rs's
//! `symbolize/gimli.rs::Cache`, trimmed to
//! the single "cache by path, with an LRU eviction for sub-object mappings
//! if it ever gets large" shape backtrace-rs also uses, though this crate's
//! working set (one handle per loaded image) is small enough that no
//! eviction has been worth adding yet.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use crate::binary_file::BinaryFile;
use crate::frame::{RuntimeAddress, TranslatedFrame};

static CACHE: OnceLock<Mutex<HashMap<PathBuf, BinaryFile>>> = OnceLock::new();

fn cell() -> &'static Mutex<HashMap<PathBuf, BinaryFile>> {
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Destroys every cached binary-file handle.
pub fn clear() {
    cell().lock().unwrap().clear();
}

/// Runs `f` against the binary-file handle for `path`, creating one first if
/// this is the first reference to it.
pub fn with_binary_file<T>(path: &Path, in_memory: bool, relocation_offset: u64, f: impl FnOnce(&mut BinaryFile) -> T) -> T {
    let mut cache = cell().lock().unwrap();
    let handle = cache
        .entry(path.to_path_buf())
        .or_insert_with(|| BinaryFile::new(path.to_path_buf(), in_memory, relocation_offset));
    f(handle)
}

/// Convenience wrapper around [`with_binary_file`] for the translator's
/// `addr2String` step.
pub fn addr2string(
    path: &Path,
    in_memory: bool,
    relocation_offset: u64,
    runtime_address: RuntimeAddress,
    use_cache: bool,
    frame: &mut TranslatedFrame,
) -> bool {
    with_binary_file(path, in_memory, relocation_offset, |binary_file| {
        binary_file.addr2string(runtime_address, use_cache, frame)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_empties_the_cache() {
        with_binary_file(Path::new("/does/not/exist"), false, 0, |_| {});
        clear();
        assert_eq!(cell().lock().unwrap().len(), 0);
    }
}
