//! The translator: turns a captured backtrace's raw addresses into
//! [`TranslatedFrame`]s. Per-frame independence
//! ("translation of frame i never depends on frame j") mirrors how
//! backtrace-rs's `Backtrace::resolve` walks its raw frames one at a time
//! through `symbolize::resolve`.

use crate::dlmapper;
use crate::frame::{Callstack, PathPair, RuntimeAddress, TranslatedFrame, TranslationStatus};

/// Name reported for an address no loaded image claims, or that an image
/// claims but has no symbol information for.
const UNKNOWN: &str = "<Unknown>";

/// Translates every address in `stack` into `stack.frames`, one frame per
/// address, and sets `stack.translation_status` to `Translated`. An address
/// that maps to no image, or that maps to one with no symbol at that
/// address, degrades to an `<Unknown>` frame rather than discarding the rest
/// of the stack — only an allocation failure (which in safe Rust surfaces as
/// a panic, not a return value) would warrant `Failed` here.
pub fn translate(stack: &mut Callstack) {
    dlmapper::init();

    let use_cache = !crate::config::auto_clear_caches();
    let frames = stack
        .addresses()
        .iter()
        .map(|&address| translate_one(address, use_cache, true, true))
        .collect();

    stack.frames = frames;
    stack.translation_status = TranslationStatus::Translated;

    crate::config::with_auto_clear(|| ())
}

/// "Binaries only" fast path: fills `binaryFile`/`binaryFileIsSelf`
/// without paying DWARF cost, used to fingerprint a stack cheaply. Region
/// inclusion is skipped here too: the region fallback has to parse every
/// loaded image's sections to find its regions, which is exactly the cost
/// this path exists to avoid, so a data/TLS address that misses the cheap
/// code-segment search stays unmapped rather than attributed to an image.
pub fn translate_binaries_only(stack: &Callstack) -> Vec<TranslatedFrame> {
    dlmapper::init();
    stack
        .addresses()
        .iter()
        .map(|&address| translate_one(address, true, false, false))
        .collect()
}

fn translate_one(address: RuntimeAddress, use_cache: bool, resolve_source_info: bool, include_regions: bool) -> TranslatedFrame {
    let Some(image) = dlmapper::image_for_address(address, include_regions) else {
        return TranslatedFrame {
            function: Some(unknown_name(use_cache)),
            ..Default::default()
        };
    };

    let mut frame = TranslatedFrame {
        binary_file: Some(PathPair {
            short: Some(image.relative_path.clone()),
            long: Some(image.absolute_path.clone()),
        }),
        binary_file_is_self: image.is_self,
        ..Default::default()
    };

    if !resolve_source_info {
        return frame;
    }

    let resolved = crate::cache::addr2string(
        &image.absolute_path,
        false,
        image.relocation_offset,
        address,
        use_cache,
        &mut frame,
    );

    if !resolved {
        frame.function = Some(unknown_name(use_cache));
    }

    frame
}

fn unknown_name(use_cache: bool) -> std::sync::Arc<str> {
    if use_cache {
        unknown_name_cached()
    } else {
        std::sync::Arc::from(UNKNOWN)
    }
}

fn unknown_name_cached() -> std::sync::Arc<str> {
    static CACHED: std::sync::OnceLock<std::sync::Arc<str>> = std::sync::OnceLock::new();
    CACHED.get_or_init(|| std::sync::Arc::from(UNKNOWN)).clone()
}
