//! The runtime-image directory: an address-indexed list of every binary
//! image currently loaded into the process.
//!
//! Enumeration is OS-specific (`dlmapper::macho` / `dlmapper::elf`); this
//! module owns the process-wide cache, the sort-by-start invariant, and the
//! two public lookups the translator needs. Grounded on backtrace-rs's
//! `symbolize/gimli.rs::Cache`, which keeps the exact same
//! enumerate-once/cache-forever shape around its own `native_libraries()`.

use std::cell::OnceCell;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use crate::frame::RuntimeAddress;

#[cfg(target_os = "macos")]
mod macho;
#[cfg(target_os = "linux")]
mod elf;

/// One loaded binary image.
#[derive(Debug, Clone)]
pub struct Image {
    pub start: RuntimeAddress,
    pub end: RuntimeAddress,
    pub relocation_offset: u64,
    pub original_path: PathBuf,
    pub absolute_path: PathBuf,
    pub relative_path: PathBuf,
    pub is_self: bool,
    /// Writable+allocatable and TLS regions, computed lazily on first use
    /// (parses the binary file) and cached for the life of this record.
    regions: OnceCell<Vec<(RuntimeAddress, RuntimeAddress)>>,
}

impl Image {
    pub fn contains(&self, address: RuntimeAddress) -> bool {
        address >= self.start && address < self.end
    }

    /// Whether `address` falls inside one of this image's writable/
    /// allocatable or TLS regions — the `includeRegions` fallback so data
    /// and thread-local addresses also resolve to their owning image.
    fn contains_region(&self, address: RuntimeAddress) -> bool {
        self.regions()
            .iter()
            .any(|(start, end)| address >= *start && address < *end)
    }

    fn regions(&self) -> &[(RuntimeAddress, RuntimeAddress)] {
        self.regions.get_or_init(|| {
            crate::cache::with_binary_file(&self.absolute_path, false, self.relocation_offset, |binary_file| {
                let mut regions = binary_file.regions();
                regions.extend(binary_file.tls_regions());
                regions
            })
        })
    }
}

fn enumerate() -> Vec<Image> {
    cfg_if::cfg_if! {
        if #[cfg(target_os = "macos")] {
            macho::native_images()
        } else if #[cfg(target_os = "linux")] {
            elf::native_images()
        } else {
            Vec::new()
        }
    }
}

fn build(raw_path: &Path, start: u64, end: u64, relocation_offset: u64) -> Image {
    let is_self = std::env::current_exe()
        .map(|exe| paths_denote_same_file(&exe, raw_path))
        .unwrap_or(false);
    Image {
        start: RuntimeAddress(start),
        end: RuntimeAddress(end),
        relocation_offset,
        original_path: raw_path.to_path_buf(),
        absolute_path: crate::pathutil::absolute(raw_path),
        relative_path: crate::pathutil::relative(raw_path),
        is_self,
        regions: OnceCell::new(),
    }
}

fn paths_denote_same_file(a: &Path, b: &Path) -> bool {
    crate::pathutil::absolute(a) == crate::pathutil::absolute(b)
}

static IMAGES: OnceLock<Mutex<Option<Vec<Image>>>> = OnceLock::new();

fn cell() -> &'static Mutex<Option<Vec<Image>>> {
    IMAGES.get_or_init(|| Mutex::new(None))
}

/// Enumerates every loaded image, once. Idempotent: later calls are no-ops
/// until [`clear`] runs.
pub fn init() {
    let mut guard = cell().lock().unwrap();
    if guard.is_none() {
        let mut images = enumerate();
        images.sort_by_key(|image| image.start);
        *guard = Some(images);
    }
}

/// Destroys every image record. Only called explicitly, by
/// [`crate::config::clear_caches`].
pub fn clear() {
    *cell().lock().unwrap() = None;
}

/// Runs `f` over the current image list, initialising it first if needed.
pub fn with_images<T>(f: impl FnOnce(&[Image]) -> T) -> T {
    init();
    let guard = cell().lock().unwrap();
    f(guard.as_ref().expect("initialised above"))
}

/// Finds the image whose `[start, end)` contains `address`, via binary
/// search on the start-sorted list. When `include_regions` is set and the
/// primary-extent search misses, falls back to a linear scan of every
/// image's writable/allocatable and TLS regions, so data and thread-local
/// addresses still resolve to their owning image.
pub fn image_for_address(address: RuntimeAddress, include_regions: bool) -> Option<Image> {
    with_images(|images| {
        let primary = match images.binary_search_by_key(&address, |image| image.start) {
            Ok(idx) => Some(idx),
            Err(0) => None,
            Err(idx) => Some(idx - 1),
        }
        .map(|idx| &images[idx])
        .filter(|candidate| candidate.contains(address));

        if let Some(candidate) = primary {
            return Some(candidate.clone());
        }

        if include_regions {
            return images.iter().find(|image| image.contains_region(address)).cloned();
        }

        None
    })
}

/// Linear scan comparing `name` against each image's original, absolute,
/// and relative path forms.
pub fn image_for_file_name(name: &Path) -> Option<Image> {
    with_images(|images| {
        images
            .iter()
            .find(|image| {
                image.original_path == name
                    || image.absolute_path == name
                    || image.relative_path == name
            })
            .cloned()
    })
}

/// Converts a runtime address to the image-relative space used by function
/// and DWARF-row records.
pub fn relativize(image: &Image, address: RuntimeAddress) -> crate::frame::RelativeAddress {
    address.to_relative(image.relocation_offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_contains_checks_half_open_range() {
        let image = build(Path::new("/bin/ls"), 100, 200, 0);
        assert!(image.contains(RuntimeAddress(100)));
        assert!(image.contains(RuntimeAddress(199)));
        assert!(!image.contains(RuntimeAddress(200)));
        assert!(!image.contains(RuntimeAddress(99)));
    }

    #[test]
    fn lookup_returns_none_on_empty_directory() {
        clear();
        // On platforms without an enumerator this is legitimately empty;
        // on supported platforms the process itself is always mapped, so
        // a bogus high address still correctly misses.
        assert!(image_for_address(RuntimeAddress(u64::MAX), true).is_none());
        assert!(image_for_address(RuntimeAddress(u64::MAX), false).is_none());
    }

    #[test]
    fn region_inclusion_is_opt_in() {
        let mut image = build(Path::new("/bin/ls"), 100, 200, 0);
        image.regions = OnceCell::from(vec![(RuntimeAddress(500), RuntimeAddress(600))]);

        clear();
        *cell().lock().unwrap() = Some(vec![image]);

        assert!(image_for_address(RuntimeAddress(550), false).is_none());
        assert!(image_for_address(RuntimeAddress(550), true).is_some());
        assert!(image_for_address(RuntimeAddress(150), false).is_some());

        clear();
    }
}
