//! The address newtypes and the public data model: functions, translated
//! frames, and the fixed-capacity callstack that ties a capture to its
//! resolved frames. Grounded on the `Backtrace`/`BacktraceFrame` pairing in
//! backtrace-rs's `capture.rs`, reshaped around a two-address-space
//! (runtime vs. image-relative) translated-frame model.

use std::path::PathBuf;
use std::sync::Arc;

/// An instruction-pointer value as captured from the stack: the address the
/// loader actually placed code at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuntimeAddress(pub u64);

/// An address relative to its image's load bias: `runtime - relocationOffset`
/// and, for Mach-O, further adjusted for a non-zero `__PAGEZERO` size.
/// Function and DWARF-row addresses are always recorded in this space so
/// they stay valid across reloads at a different base address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelativeAddress(pub u64);

impl RuntimeAddress {
    /// Converts to image-relative space given the image's load bias.
    pub fn to_relative(self, relocation_offset: u64) -> RelativeAddress {
        RelativeAddress(self.0.wrapping_sub(relocation_offset))
    }
}

impl RelativeAddress {
    /// Converts back to runtime space given the image's load bias.
    pub fn to_runtime(self, relocation_offset: u64) -> RuntimeAddress {
        RuntimeAddress(self.0.wrapping_add(relocation_offset))
    }
}

/// A function as recorded in a symbol table or a stab's `N_FUN` entry.
///
/// `length` of `0` means "unknown": the caller must derive an end address
/// from the next function's `start_address` in the same object file.
#[derive(Debug, Clone)]
pub struct Function {
    pub start_address: RelativeAddress,
    pub length: u64,
    pub linked_name: String,
    demangled_name: std::cell::OnceCell<Arc<str>>,
}

impl Function {
    pub fn new(start_address: RelativeAddress, length: u64, linked_name: String) -> Self {
        Function {
            start_address,
            length,
            linked_name,
            demangled_name: std::cell::OnceCell::new(),
        }
    }

    /// Returns whether `address` falls inside this function, given the
    /// address of the function that follows it in the same object file
    /// (used only when `length == 0`).
    pub fn contains(&self, address: RelativeAddress, next_start: Option<RelativeAddress>) -> bool {
        if address < self.start_address {
            return false;
        }
        if self.length != 0 {
            return address.0 < self.start_address.0 + self.length;
        }
        match next_start {
            Some(next) => address < next,
            None => true,
        }
    }

    /// Returns the cached demangled name, computing and caching it on first
    /// use. Honors [`crate::config::raw_names`] by returning the mangled
    /// name unchanged when set.
    pub fn demangled_name(&self) -> Arc<str> {
        if crate::config::raw_names() {
            return Arc::from(self.linked_name.as_str());
        }
        self.demangled_name
            .get_or_init(|| Arc::from(crate::demangle::demangle(&self.linked_name)))
            .clone()
    }
}

/// Whether a translation attempt produced frames, failed outright, or never
/// ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationStatus {
    None,
    Translated,
    Failed,
}

/// A `short`/`long` path pair: the recurring "short/long path" attribute
/// shape used for both image paths and source-file paths.
#[derive(Debug, Clone, Default)]
pub struct PathPair {
    pub short: Option<PathBuf>,
    pub long: Option<PathBuf>,
}

impl PathPair {
    pub fn from_path(path: &std::path::Path) -> Self {
        PathPair {
            short: Some(crate::pathutil::relative(path)),
            long: Some(crate::pathutil::absolute(path)),
        }
    }
}

/// One resolved stack frame.
///
/// All fields are optional: a frame for an address DL-mapper couldn't place
/// in any image carries no information at all; one that maps to an image
/// without debug info carries `binary_file` alone.
#[derive(Debug, Clone, Default)]
pub struct TranslatedFrame {
    pub binary_file: Option<PathPair>,
    pub function: Option<Arc<str>>,
    pub source_file: Option<PathPair>,
    pub source_line: Option<u32>,
    pub source_line_column: Option<u32>,
    pub source_file_outdated: bool,
    pub binary_file_is_self: bool,
}

impl TranslatedFrame {
    /// Formats `function + offset` for the case where only a function
    /// (no line info) is known.
    pub fn function_with_offset(name: &str, relative_offset: u64) -> String {
        format!("{name} + {relative_offset:#x}")
    }
}

/// A fixed-capacity captured backtrace, translated in place.
///
/// Capacity defaults to [`crate::config::DEFAULT_BACKTRACE_SIZE`] but is
/// configurable per [`crate::config::set_backtrace_size`]; this type stores
/// whatever capacity was configured at capture time rather than a
/// compile-time constant, since a `const` cap would force one value for an
/// entire program.
#[derive(Debug, Clone)]
pub struct Callstack {
    addresses: Vec<RuntimeAddress>,
    pub translation_status: TranslationStatus,
    pub frames: Vec<TranslatedFrame>,
}

impl Callstack {
    pub fn new(addresses: Vec<RuntimeAddress>) -> Self {
        Callstack {
            addresses,
            translation_status: TranslationStatus::None,
            frames: Vec::new(),
        }
    }

    pub fn addresses(&self) -> &[RuntimeAddress] {
        &self.addresses
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_runtime_roundtrip() {
        let runtime = RuntimeAddress(0x1000_2000);
        let relative = runtime.to_relative(0x1000_0000);
        assert_eq!(relative, RelativeAddress(0x2000));
        assert_eq!(relative.to_runtime(0x1000_0000), runtime);
    }

    #[test]
    fn function_contains_with_known_length() {
        let f = Function::new(RelativeAddress(100), 10, "foo".into());
        assert!(f.contains(RelativeAddress(100), None));
        assert!(f.contains(RelativeAddress(109), None));
        assert!(!f.contains(RelativeAddress(110), None));
        assert!(!f.contains(RelativeAddress(99), None));
    }

    #[test]
    fn function_contains_with_unknown_length_uses_next_start() {
        let f = Function::new(RelativeAddress(100), 0, "foo".into());
        assert!(f.contains(RelativeAddress(150), Some(RelativeAddress(200))));
        assert!(!f.contains(RelativeAddress(200), Some(RelativeAddress(200))));
        assert!(f.contains(RelativeAddress(1_000_000), None));
    }

    #[test]
    fn demangled_name_is_cached() {
        let f = Function::new(RelativeAddress(0), 0, "_ZN3foo3barE".into());
        let first = f.demangled_name();
        let second = f.demangled_name();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn callstack_starts_untranslated() {
        let stack = Callstack::new(vec![RuntimeAddress(1), RuntimeAddress(2)]);
        assert_eq!(stack.translation_status, TranslationStatus::None);
        assert_eq!(stack.len(), 2);
        assert!(stack.frames.is_empty());
    }
}
