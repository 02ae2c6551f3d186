//! Object-file-level resolution: a single compilation unit's functions and
//! DWARF line rows, answering `(address, enclosing function) → source info`.
//! The row lookup itself
//! (`upper_bound` on a descending-by-address list) mirrors how backtrace-rs
//! crate's `gimli.rs::resolve` walks `addr2line::Context::find_location`
//! results, just done directly against `dwarf::LineRow`s instead of through
//! `addr2line`, since we already materialise our own row records.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::dwarf::LineRow;
use crate::frame::{Function, RelativeAddress};

/// One compilation unit: a Mach-O `.o` found via stabs, a dSYM slice, or (for
/// ELF, which has no separate-compilation-unit concept) the whole image
/// treated as a single object file.
pub struct ObjectFile {
    pub source_directory: Option<String>,
    pub source_file: Option<String>,
    pub on_disk_path: PathBuf,
    pub recorded_mtime: Option<u64>,
    pub uuid: Option<[u8; 16]>,
    pub functions: Vec<Function>,
    pub line_rows: Vec<LineRow>,
    /// Function symbols read straight from this object file's own symbol
    /// table (pre-link addresses), used only to localize a query address
    /// before indexing into `line_rows`. Empty for a dSYM slice, which
    /// needs no such translation.
    pub local_functions: Vec<Function>,
    /// True for a dSYM slice: the query address is already object-file-local
    /// and needs no translation through a same-named function lookup.
    pub is_dsym_slice: bool,
}

/// What the resolver found for one address.
pub struct Resolution<'a> {
    pub function: &'a Function,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub source_file: Option<&'a crate::dwarf::SourceFile>,
}

impl ObjectFile {
    pub fn new(
        source_directory: Option<String>,
        source_file: Option<String>,
        on_disk_path: PathBuf,
        recorded_mtime: Option<u64>,
        mut functions: Vec<Function>,
        mut line_rows: Vec<LineRow>,
        local_functions: Vec<Function>,
        is_dsym_slice: bool,
    ) -> Self {
        functions.sort_by(|a, b| b.start_address.cmp(&a.start_address));
        line_rows.sort_by(|a, b| b.address.cmp(&a.address));
        ObjectFile {
            source_directory,
            source_file,
            on_disk_path,
            recorded_mtime,
            uuid: None,
            functions,
            line_rows,
            local_functions,
            is_dsym_slice,
        }
    }

    /// Whether this object file is still the one on disk: its mtime must
    /// match what the `N_OSO` entry recorded when the enclosing image was
    /// parsed.
    pub fn is_stale(&self) -> bool {
        let Some(recorded) = self.recorded_mtime else {
            return false;
        };
        let Ok(metadata) = std::fs::metadata(&self.on_disk_path) else {
            return true;
        };
        let Ok(modified) = metadata.modified() else {
            return true;
        };
        let Ok(duration) = modified.duration_since(SystemTime::UNIX_EPOCH) else {
            return true;
        };
        duration.as_secs() != recorded
    }

    /// Finds the function containing `address` (already converted, if
    /// needed, to this object file's own address space).
    pub fn function_containing(&self, address: RelativeAddress) -> Option<&Function> {
        let idx = self
            .functions
            .iter()
            .position(|f| f.start_address <= address)?;
        let function = &self.functions[idx];
        let next_start = if idx > 0 {
            Some(self.functions[idx - 1].start_address)
        } else {
            None
        };
        if function.contains(address, next_start) {
            Some(function)
        } else {
            None
        }
    }

    /// Resolves `address` (in the *enclosing image's* relative space) to its
    /// line-row information: find the enclosing function there, localize the
    /// address into this object file's own address space (a no-op for a
    /// dSYM slice, whose `line_rows` are already image-relative), then find
    /// the nearest line row at or before the localized address.
    pub fn resolve(&self, address: RelativeAddress) -> Option<Resolution<'_>> {
        let function = self.function_containing(address)?;

        let Some((local_function, local_address)) = self.localize(address, function) else {
            return Some(Resolution {
                function,
                line: None,
                column: None,
                source_file: None,
            });
        };

        let Some(row) = self.line_rows.iter().find(|row| row.address <= local_address) else {
            return Some(Resolution {
                function,
                line: None,
                column: None,
                source_file: None,
            });
        };

        let next_local_start = self
            .local_functions
            .iter()
            .filter(|f| f.start_address > local_function.start_address)
            .map(|f| f.start_address)
            .min();
        if !local_function.contains(row.address, next_local_start) {
            return Some(Resolution {
                function,
                line: None,
                column: None,
                source_file: None,
            });
        }

        Some(Resolution {
            function,
            line: row.line,
            column: row.column,
            source_file: row.file.as_ref(),
        })
    }

    /// Translates an image-relative query address into this object file's
    /// own local address space: finds the same-named function in
    /// `local_functions` (read from this object file's own, pre-link symbol
    /// table) and computes the offset from `enclosing_function`'s start in
    /// the *enclosing image*. Returns the local function alongside the
    /// localized address, since the caller needs both to bound the
    /// following line-row lookup.
    ///
    /// Not needed for a dSYM slice, whose addresses are already in the same
    /// space as the image that references it — returns the input unchanged.
    fn localize<'a>(
        &'a self,
        image_relative: RelativeAddress,
        enclosing_function: &'a Function,
    ) -> Option<(&'a Function, RelativeAddress)> {
        if self.is_dsym_slice {
            return Some((enclosing_function, image_relative));
        }
        let local_function = self
            .local_functions
            .iter()
            .find(|f| f.linked_name == enclosing_function.linked_name)?;
        let offset = image_relative.0.checked_sub(enclosing_function.start_address.0)?;
        Some((local_function, RelativeAddress(local_function.start_address.0 + offset)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Function;

    fn func(start: u64, length: u64, name: &str) -> Function {
        Function::new(RelativeAddress(start), length, name.to_owned())
    }

    fn row(address: u64, line: u32) -> LineRow {
        LineRow {
            address: RelativeAddress(address),
            line: Some(line),
            column: None,
            file: None,
            is_stmt: true,
            basic_block: false,
            end_sequence: false,
            prologue_end: false,
            epilogue_begin: false,
            isa: 0,
            discriminator: 0,
        }
    }

    #[test]
    fn function_containing_picks_enclosing_function() {
        let obj = ObjectFile::new(
            None,
            None,
            PathBuf::from("/obj/a.o"),
            None,
            vec![func(100, 50, "a"), func(200, 0, "b"), func(300, 0, "c")],
            Vec::new(),
            Vec::new(),
            false,
        );

        assert_eq!(
            obj.function_containing(RelativeAddress(120)).unwrap().linked_name,
            "a"
        );
        assert_eq!(
            obj.function_containing(RelativeAddress(250)).unwrap().linked_name,
            "b"
        );
        assert!(obj.function_containing(RelativeAddress(400)).is_some());
        assert!(obj.function_containing(RelativeAddress(50)).is_none());
    }

    #[test]
    fn stale_when_no_recorded_mtime_is_never_stale() {
        let obj = ObjectFile::new(None, None, PathBuf::from("/nonexistent"), None, Vec::new(), Vec::new(), Vec::new(), false);
        assert!(!obj.is_stale());
    }

    #[test]
    fn stale_when_file_missing_and_mtime_recorded() {
        let obj = ObjectFile::new(
            None,
            None,
            PathBuf::from("/definitely/not/here.o"),
            Some(1),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            false,
        );
        assert!(obj.is_stale());
    }

    /// Static-archive member: the enclosing image's stab-derived `functions`
    /// (final, linked addresses) differ from this object file's own
    /// `local_functions` (pre-link addresses), and `line_rows` are recorded
    /// in that local space. `resolve` must localize before indexing rows.
    #[test]
    fn resolve_localizes_before_looking_up_line_rows() {
        let obj = ObjectFile::new(
            None,
            Some("bar.c".to_owned()),
            PathBuf::from("/lib/libfoo.a(bar.o)"),
            None,
            vec![func(0x9000, 0x40, "bar")],
            vec![row(0x10, 7), row(0x18, 8)],
            vec![func(0x10, 0x40, "bar")],
            false,
        );

        // Image-relative 0x9018 is offset 0x18 into "bar"; localized against
        // the local function's start (0x10) that's local address 0x28,
        // which falls in the row at 0x18.
        let resolution = obj.resolve(RelativeAddress(0x9018)).unwrap();
        assert_eq!(resolution.function.linked_name, "bar");
        assert_eq!(resolution.line, Some(8));
    }

    #[test]
    fn resolve_without_a_matching_local_function_yields_function_only() {
        let obj = ObjectFile::new(
            None,
            None,
            PathBuf::from("/lib/libfoo.a(bar.o)"),
            None,
            vec![func(0x9000, 0x40, "bar")],
            vec![row(0x10, 7)],
            Vec::new(),
            false,
        );

        let resolution = obj.resolve(RelativeAddress(0x9010)).unwrap();
        assert_eq!(resolution.function.linked_name, "bar");
        assert!(resolution.line.is_none());
    }

    #[test]
    fn dsym_slice_resolves_without_localizing() {
        let obj = ObjectFile::new(
            None,
            None,
            PathBuf::from("/App.dSYM/Contents/Resources/DWARF/App"),
            None,
            vec![func(0x9000, 0x40, "baz")],
            vec![row(0x9010, 12)],
            Vec::new(),
            true,
        );

        let resolution = obj.resolve(RelativeAddress(0x9010)).unwrap();
        assert_eq!(resolution.line, Some(12));
    }
}
