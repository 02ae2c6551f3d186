//! Dynamic lookup of the Swift runtime's `swift_demangle` entry point.
//!
//! The Swift demangler lives in `libswiftCore`, which is already loaded into
//! any process that links Swift code, so there is nothing to `dlopen`: the
//! symbol is looked up against the running process image with `dlsym(
//! RTLD_DEFAULT, ...)`. This mirrors backtrace-rs's `dylib.rs`
//! `Dylib`/`Symbol<T>` pattern (lazily resolve once, cache the address in an
//! atomic, never re-resolve), simplified because we only ever need one
//! symbol rather than a whole library handle.
//!
//! Signature, confirmed against the original C library's
//! `demangler.h`/`swift/demangler.c`:
//! ```c
//! char *swift_demangle(const char *mangledName, size_t mangledNameLength,
//!                       char *outputBuffer, size_t *outputBufferSize,
//!                       uint32_t flags);
//! ```
//! The returned pointer (when non-null) was allocated with `malloc` by the
//! Swift runtime and must be freed with `libc::free`.

use std::ffi::CStr;
use std::os::raw::{c_char, c_uint};
use std::sync::atomic::{AtomicUsize, Ordering};

type SwiftDemangleFn =
    unsafe extern "C" fn(*const c_char, usize, *mut c_char, *mut usize, c_uint) -> *mut c_char;

/// 0 = not yet resolved, 1 = resolved and absent, otherwise the function
/// pointer's address. Resolution happens at most once per process, whether
/// it succeeds or fails — the symbol is never re-probed after the first
/// lookup.
static SWIFT_DEMANGLE: AtomicUsize = AtomicUsize::new(0);

const NOT_FOUND: usize = 1;

fn resolve() -> Option<SwiftDemangleFn> {
    match SWIFT_DEMANGLE.load(Ordering::Acquire) {
        0 => {}
        NOT_FOUND => return None,
        addr => return Some(unsafe { std::mem::transmute::<usize, SwiftDemangleFn>(addr) }),
    }

    let name = b"swift_demangle\0";
    let addr = unsafe { libc::dlsym(libc::RTLD_DEFAULT, name.as_ptr() as *const c_char) };

    let resolved = if addr.is_null() {
        NOT_FOUND
    } else {
        addr as usize
    };

    // Lose the race gracefully: whichever thread stores first wins, both
    // computed the same value (or both found nothing), so either outcome is
    // fine to read back.
    match SWIFT_DEMANGLE.compare_exchange(0, resolved, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) | Err(_) => {}
    }

    if resolved == NOT_FOUND {
        None
    } else {
        Some(unsafe { std::mem::transmute::<usize, SwiftDemangleFn>(resolved) })
    }
}

/// Demangles `mangled` using the runtime Swift demangler, if one is loaded
/// into this process. Returns `None` if the symbol can't be found or the
/// demangler declines (returns null).
pub fn demangle(mangled: &str) -> Option<String> {
    let demangle_fn = resolve()?;

    let result = unsafe {
        demangle_fn(
            mangled.as_ptr() as *const c_char,
            mangled.len(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            0,
        )
    };

    if result.is_null() {
        return None;
    }

    let owned = unsafe { CStr::from_ptr(result) }.to_string_lossy().into_owned();
    unsafe { libc::free(result as *mut libc::c_void) };
    Some(owned)
}

/// Returns whether the symbol has already been resolved, successfully or
/// not. Exposed only for tests so they can assert the cache is respected
/// without peeking at the atomic directly.
#[cfg(test)]
pub(crate) fn is_resolved() -> bool {
    SWIFT_DEMANGLE.load(Ordering::Acquire) != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_symbol_resolves_to_not_found_and_stays_cached() {
        // This process very likely has no libswiftCore loaded; either way,
        // a second call must not re-probe dlsym.
        let first = demangle("_$s4main3fooyyF");
        let was_resolved = is_resolved();
        assert!(was_resolved);
        let second = demangle("_$s4main3fooyyF");
        assert_eq!(first.is_some(), second.is_some());
    }
}
