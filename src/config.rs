//! Process-wide configuration flags.
//!
//! A handful of booleans plus the backtrace capacity, all readable without
//! locks and settable atomically. Modeled on how backtrace-rs
//! keeps its globals (`lib.rs`'s `static mut` + `AtomicUsize`), moved to
//! safe `std::sync::atomic` types.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Default maximum number of frames captured per backtrace.
pub const DEFAULT_BACKTRACE_SIZE: usize = 128;

struct Config {
    backtrace_size: AtomicUsize,
    auto_clear_caches: AtomicBool,
    raw_names: AtomicBool,
    activate_swift_demangler: AtomicBool,
}

static CONFIG: Config = Config {
    backtrace_size: AtomicUsize::new(DEFAULT_BACKTRACE_SIZE),
    auto_clear_caches: AtomicBool::new(false),
    raw_names: AtomicBool::new(false),
    activate_swift_demangler: AtomicBool::new(true),
};

/// Maximum number of frames a single [`crate::frame::Callstack`] will hold.
pub fn backtrace_size() -> usize {
    CONFIG.backtrace_size.load(Ordering::Relaxed)
}

/// Sets the maximum number of frames captured per backtrace.
pub fn set_backtrace_size(size: usize) {
    CONFIG.backtrace_size.store(size, Ordering::Relaxed);
}

/// Whether caches are cleared at the end of every public API call.
pub fn auto_clear_caches() -> bool {
    CONFIG.auto_clear_caches.load(Ordering::Relaxed)
}

/// Sets whether caches are cleared at the end of every public API call.
pub fn set_auto_clear_caches(value: bool) {
    CONFIG.auto_clear_caches.store(value, Ordering::Relaxed);
}

/// Whether `function` strings should stay mangled instead of being demangled.
pub fn raw_names() -> bool {
    CONFIG.raw_names.load(Ordering::Relaxed)
}

/// Sets whether `function` strings should stay mangled.
pub fn set_raw_names(value: bool) {
    CONFIG.raw_names.store(value, Ordering::Relaxed);
}

/// Whether the dynamically-loaded Swift demangler may be used.
pub fn swift_demangler_active() -> bool {
    CONFIG.activate_swift_demangler.load(Ordering::Relaxed)
}

/// Gates the dynamically-loaded Swift demangler.
pub fn set_swift_demangler_active(value: bool) {
    CONFIG
        .activate_swift_demangler
        .store(value, Ordering::Relaxed);
}

/// Clears every process-wide cache: the DL-mapper's image list, every
/// binary-file's parsed state, and the object-file cache. Called
/// automatically at the end of a public API call when `auto_clear_caches`
/// is set, or explicitly via [`crate::clear_caches`].
pub fn clear_caches() {
    crate::dlmapper::clear();
    crate::cache::clear();
}

/// Runs `f`, then clears every cache afterwards if `auto_clear_caches` is set.
pub fn with_auto_clear<T>(f: impl FnOnce() -> T) -> T {
    let result = f();
    if auto_clear_caches() {
        clear_caches();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        assert_eq!(backtrace_size(), DEFAULT_BACKTRACE_SIZE);
        assert!(!auto_clear_caches());
        assert!(!raw_names());
        assert!(swift_demangler_active());
    }

    #[test]
    fn roundtrip() {
        set_backtrace_size(64);
        assert_eq!(backtrace_size(), 64);
        set_backtrace_size(DEFAULT_BACKTRACE_SIZE);

        set_raw_names(true);
        assert!(raw_names());
        set_raw_names(false);
    }
}
