//! Turns a captured backtrace into a human-readable call stack.
//!
//! `callstack` sits underneath crash reporters, exception wrappers, memory
//! debuggers, and telemetry collectors: it converts an array of raw
//! instruction-pointer addresses into frames carrying demangled function
//! names, source file paths, and line/column numbers, reading whatever mix
//! of Mach-O and ELF binaries (with or without a Mach-O dSYM companion) the
//! running process happens to be made of.
//!
//! # Usage
//!
//! ```no_run
//! let mut stack = callstack::capture();
//! callstack::translate(&mut stack);
//! println!("{}", callstack::to_string(&stack, "\n"));
//! ```
//!
//! # Platform support
//!
//! Mach-O (with fat archives, `ar` archives of object files, dSYM
//! companions) on macOS; ELF32/ELF64 on Linux. Translation does blocking
//! file I/O and is not async-signal-safe; capturing a backtrace is, to the
//! extent the platform's `backtrace(3)` is.

pub mod binary_file;
pub mod cache;
pub mod capture;
pub mod config;
pub mod demangle;
pub mod dlmapper;
pub mod dwarf;
pub mod elf;
pub mod error;
pub mod facade;
pub mod frame;
pub mod leb128;
pub mod macho;
pub mod objectfile;
pub mod pathutil;
pub mod translator;

pub use config::{clear_caches, DEFAULT_BACKTRACE_SIZE};
pub use error::{Error, Result};
pub use frame::{Callstack, Function, PathPair, RelativeAddress, RuntimeAddress, TranslatedFrame, TranslationStatus};

/// Captures the calling thread's backtrace. Safe to call from a signal
/// handler to the extent the platform's `backtrace(3)` is.
pub fn capture() -> Callstack {
    capture::capture()
}

/// Resolves every address in `stack` into a frame, honoring the
/// process-wide `rawNames`/`autoClearCaches` configuration.
pub fn translate(stack: &mut Callstack) {
    translator::translate(stack)
}

/// The "binaries only" fast path: fills in which image each address came
/// from without paying DWARF parsing cost.
pub fn translate_binaries_only(stack: &Callstack) -> Vec<TranslatedFrame> {
    translator::translate_binaries_only(stack)
}

/// Joins every frame's `toString()` representation with `separator`.
pub fn to_string(stack: &Callstack, separator: &str) -> String {
    stack
        .frames
        .iter()
        .map(frame_to_string)
        .collect::<Vec<_>>()
        .join(separator)
}

fn frame_to_string(frame: &TranslatedFrame) -> String {
    let mut out = String::new();

    match &frame.function {
        Some(name) => out.push_str(name),
        None => out.push_str("<unknown>"),
    }

    if let Some(source_file) = &frame.source_file {
        let path = source_file
            .long
            .as_ref()
            .or(source_file.short.as_ref())
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        out.push_str(" at ");
        out.push_str(&path);
        if let Some(line) = frame.source_line {
            out.push(':');
            out.push_str(&line.to_string());
            if let Some(column) = frame.source_line_column {
                out.push(':');
                out.push_str(&column.to_string());
            }
        }
        if frame.source_file_outdated {
            out.push_str(" (outdated)");
        }
    }

    out
}

/// Looks up a function by name via the function-info façade.
pub fn function_info(name: &str, image_name: Option<&std::path::Path>) -> Option<(RuntimeAddress, u64)> {
    facade::function_info(name, image_name)
}

/// Every loaded image's writable+allocatable regions, flattened.
pub fn loaded_regions() -> Vec<facade::Region> {
    facade::loaded_regions()
}

/// Every loaded image's thread-local-storage regions, flattened.
pub fn tls_regions() -> Vec<facade::Region> {
    facade::tls_regions()
}

/// A one-shot translation of a single address.
pub fn symbol_info(address: RuntimeAddress) -> Option<TranslatedFrame> {
    facade::symbol_info(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_then_translate_produces_a_status() {
        let mut stack = capture();
        translate(&mut stack);
        assert_ne!(stack.translation_status, TranslationStatus::None);
    }

    #[test]
    fn to_string_of_empty_stack_is_empty() {
        let stack = Callstack::new(Vec::new());
        assert_eq!(to_string(&stack, "\n"), "");
    }
}
