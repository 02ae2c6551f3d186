//! Thin public-facing façades layered on the DL-mapper and binary-file
//! subsystems: function-info lookup by name, loaded/TLS region dumps, and a
//! one-shot single-address symbol lookup. Mirrors
//! backtrace-rs's separation between the internal `Cache`/`Mapping`
//! machinery in `symbolize/gimli.rs` and the small public-facing
//! `resolve`/`Symbol` surface built on top of it.

use std::path::Path;

use crate::dlmapper;
use crate::frame::{RuntimeAddress, TranslatedFrame};

/// Looks up `name`, optionally narrowing the search to the image named
/// `image_name` first. Returns `(begin runtime address, length)`.
///
/// Tries the named image first on a hit; otherwise (or on a miss) falls
/// back to scanning every loaded image, stopping at the first hit.
pub fn function_info(name: &str, image_name: Option<&Path>) -> Option<(RuntimeAddress, u64)> {
    dlmapper::init();

    let result = crate::config::with_auto_clear(|| {
        if let Some(image_name) = image_name {
            if let Some(image) = dlmapper::image_for_file_name(image_name) {
                if let Some(hit) = crate::cache::with_binary_file(
                    &image.absolute_path,
                    false,
                    image.relocation_offset,
                    |binary_file| binary_file.function_info(name),
                ) {
                    return Some(hit);
                }
            }
        }

        dlmapper::with_images(|images| images.to_vec()).into_iter().find_map(|image| {
            crate::cache::with_binary_file(&image.absolute_path, false, image.relocation_offset, |binary_file| {
                binary_file.function_info(name)
            })
        })
    });

    result
}

/// One flattened region entry: `(begin, end, original name, relative name)`.
pub struct Region {
    pub begin: RuntimeAddress,
    pub end: RuntimeAddress,
    pub image_name: String,
    pub image_relative_name: String,
}

/// `regions_getLoadedRegions`: every loaded image's writable+
/// allocatable regions, flattened.
pub fn loaded_regions() -> Vec<Region> {
    dlmapper::init();
    crate::config::with_auto_clear(|| {
        dlmapper::with_images(|images| images.to_vec())
            .into_iter()
            .flat_map(|image| {
                let regions = crate::cache::with_binary_file(
                    &image.absolute_path,
                    false,
                    image.relocation_offset,
                    |binary_file| binary_file.regions(),
                );
                let original = image.original_path.to_string_lossy().into_owned();
                let relative = image.relative_path.to_string_lossy().into_owned();
                regions.into_iter().map(move |(begin, end)| Region {
                    begin,
                    end,
                    image_name: original.clone(),
                    image_relative_name: relative.clone(),
                })
            })
            .collect()
    })
}

/// `regions_getTLSRegions`: every loaded image's TLV descriptors.
pub fn tls_regions() -> Vec<Region> {
    dlmapper::init();
    crate::config::with_auto_clear(|| {
        dlmapper::with_images(|images| images.to_vec())
            .into_iter()
            .flat_map(|image| {
                let regions = crate::cache::with_binary_file(
                    &image.absolute_path,
                    false,
                    image.relocation_offset,
                    |binary_file| binary_file.tls_regions(),
                );
                let original = image.original_path.to_string_lossy().into_owned();
                let relative = image.relative_path.to_string_lossy().into_owned();
                regions.into_iter().map(move |(begin, end)| Region {
                    begin,
                    end,
                    image_name: original.clone(),
                    image_relative_name: relative.clone(),
                })
            })
            .collect()
    })
}

/// `symbols_getInfo`: a one-shot translation of a single address.
pub fn symbol_info(address: RuntimeAddress) -> Option<TranslatedFrame> {
    dlmapper::init();
    crate::config::with_auto_clear(|| {
        let image = dlmapper::image_for_address(address, true)?;
        let mut frame = TranslatedFrame {
            binary_file: Some(crate::frame::PathPair {
                short: Some(image.relative_path.clone()),
                long: Some(image.absolute_path.clone()),
            }),
            binary_file_is_self: image.is_self,
            ..Default::default()
        };
        let ok = crate::cache::addr2string(&image.absolute_path, false, image.relocation_offset, address, false, &mut frame);
        if ok {
            Some(frame)
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_info_returns_none_when_not_found() {
        assert!(function_info("__this_function_does_not_exist__", None).is_none());
    }

    #[test]
    fn symbol_info_of_unmapped_address_is_none() {
        assert!(symbol_info(RuntimeAddress(u64::MAX)).is_none());
    }
}
