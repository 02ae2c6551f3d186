//! Backtrace capture: the thin wrapper around the platform's `backtrace(3)`.
//! The exception/backtrace-capture wrapper that calls into this crate is out
//! of scope here; this module goes only as far as producing the raw address
//! array a [`Callstack`]
//! needs. Grounded on backtrace-rs's `backtrace/mod.rs::trace`, minus its
//! per-frame unwind-library abstraction: this crate only needs the flat
//! address array, not a frame-by-frame unwinder.

use std::os::raw::c_void;

use crate::frame::{Callstack, RuntimeAddress};

/// Captures the calling thread's backtrace, up to
/// [`crate::config::backtrace_size`] frames.
///
/// Safety/async-signal-safety note: this call is async-signal-safe
/// to the same extent the platform's `backtrace(3)` is (glibc's
/// implementation is documented as such outside of its very first call,
/// which may allocate to load `libgcc`); *translating* the resulting
/// addresses is not.
pub fn capture() -> Callstack {
    let capacity = crate::config::backtrace_size();
    let mut buffer: Vec<*mut c_void> = vec![std::ptr::null_mut(); capacity];

    let count = unsafe { libc::backtrace(buffer.as_mut_ptr(), capacity as libc::c_int) };
    let count = count.max(0) as usize;

    let addresses = buffer[..count]
        .iter()
        .map(|&ptr| RuntimeAddress(ptr as u64))
        .collect();

    Callstack::new(addresses)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_produces_at_least_one_frame() {
        let stack = capture();
        assert!(!stack.is_empty());
    }

    #[test]
    fn capture_respects_configured_size() {
        crate::config::set_backtrace_size(2);
        let stack = capture();
        crate::config::set_backtrace_size(crate::config::DEFAULT_BACKTRACE_SIZE);
        assert!(stack.len() <= 2);
    }
}
