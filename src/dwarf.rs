//! DWARF line-number program interpretation.
//!
//! The line-number opcode state machine (extended/standard/special opcodes,
//! per-version divergences, `.debug_str`/`.debug_line_str`/
//! `.debug_str_offsets` indirection) is exactly what `gimli::read::LineRows`
//! already executes; reproducing that state machine by hand would just be a
//! slower, less-tested copy of `gimli`'s. What this module owns is what
//! `gimli` does *not* do for us: turning each row into our own `LineRow`
//! record (with materialised, possibly-outdated source paths) and
//! keeping those rows sorted descendingly by address for `upper_bound`
//! lookups. Grounded on samply-symbols' `dwarf.rs::make_context`, which
//! drives the same `gimli::Dwarf::load` builder for the same reason.

use std::cell::OnceCell;
use std::path::{Path, PathBuf};

use gimli::{EndianSlice, RunTimeEndian};

use crate::frame::{PathPair, RelativeAddress};

pub type R = EndianSlice<'static, RunTimeEndian>;
pub type Dwarf = gimli::Dwarf<R>;

fn leak(bytes: Vec<u8>) -> &'static [u8] {
    Box::leak(bytes.into_boxed_slice())
}

/// Builds a `gimli::Dwarf` from the six named sections, leaking each
/// section's bytes to `'static`.
///
/// Leaking is deliberate: object-file records live in a process-wide cache
/// for as long as the caller keeps them (cleared only on an explicit
/// `clearCaches`), so there's no meaningfully shorter lifetime to tie this
/// buffer to. This sidesteps the
/// self-referential-struct problem backtrace-rs solves with an
/// `unsafe transmute` (its `mk!` macro) without needing any unsafe code
/// here.
pub fn build(mut get_section: impl FnMut(gimli::SectionId) -> Option<Vec<u8>>) -> Dwarf {
    gimli::Dwarf::load(|id| -> Result<R, std::convert::Infallible> {
        let bytes = get_section(id).unwrap_or_default();
        Ok(EndianSlice::new(leak(bytes), RunTimeEndian::Little))
    })
    .expect("Infallible section loader never fails")
}

/// Same as [`build`], but tags every loaded section as big-endian.
pub fn build_big_endian(mut get_section: impl FnMut(gimli::SectionId) -> Option<Vec<u8>>) -> Dwarf {
    gimli::Dwarf::load(|id| -> Result<R, std::convert::Infallible> {
        let bytes = get_section(id).unwrap_or_default();
        Ok(EndianSlice::new(leak(bytes), RunTimeEndian::Big))
    })
    .expect("Infallible section loader never fails")
}

/// A resolved compilation-unit-relative source file reference.
pub struct SourceFile {
    pub directory: Option<String>,
    pub file_name: String,
    pub recorded_mtime: Option<u64>,
    pub recorded_size: Option<u64>,
    resolved: OnceCell<PathPair>,
    outdated: OnceCell<bool>,
}

impl SourceFile {
    fn full_path(&self) -> PathBuf {
        match &self.directory {
            Some(dir) => Path::new(dir).join(&self.file_name),
            None => PathBuf::from(&self.file_name),
        }
    }

    /// The file's short/long path pair, computed and cached on first use.
    pub fn path(&self) -> &PathPair {
        self.resolved.get_or_init(|| PathPair::from_path(&self.full_path()))
    }

    /// Whether the on-disk file's mtime or size differs from what the
    /// compiler recorded, computed and cached on first use.
    pub fn is_outdated(&self) -> bool {
        *self.outdated.get_or_init(|| {
            let metadata = match std::fs::metadata(self.full_path()) {
                Ok(metadata) => metadata,
                // Can't tell either way; a missing source file isn't itself
                // treated as outdated, only a mismatched mtime/size is.
                Err(_) => return false,
            };

            if let Some(recorded_size) = self.recorded_size {
                if recorded_size != metadata.len() {
                    return true;
                }
            }

            if let Some(recorded_mtime) = self.recorded_mtime {
                if let Ok(modified) = metadata.modified() {
                    if let Ok(duration) = modified.duration_since(std::time::UNIX_EPOCH) {
                        return duration.as_secs() != recorded_mtime;
                    }
                }
            }

            false
        })
    }
}

/// One emitted DWARF line-number program row.
pub struct LineRow {
    pub address: RelativeAddress,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub file: Option<SourceFile>,
    pub is_stmt: bool,
    pub basic_block: bool,
    pub end_sequence: bool,
    pub prologue_end: bool,
    pub epilogue_begin: bool,
    pub isa: u64,
    pub discriminator: u64,
}

/// Runs every compilation unit's line-number program to completion and
/// returns the emitted rows sorted descendingly by address, matching the
/// order the object-file resolver's `upper_bound` lookup expects.
pub fn line_rows(dwarf: &Dwarf) -> crate::error::Result<Vec<LineRow>> {
    let mut rows = Vec::new();
    let mut units = dwarf.units();

    while let Some(header) = units.next().map_err(gimli_err)? {
        let unit = match dwarf.unit(header) {
            Ok(unit) => unit,
            Err(_) => continue,
        };
        let Some(program) = unit.line_program.clone() else {
            continue;
        };

        let comp_dir = unit
            .comp_dir
            .map(|dir| dwarf.attr_string(&unit, gimli::AttributeValue::String(dir)))
            .transpose()
            .ok()
            .flatten()
            .map(|s| s.to_string_lossy().into_owned());

        let mut rows_iter = program.rows();

        while let Some((line_header, row)) = rows_iter.next_row().map_err(gimli_err)? {
            let file = row
                .file(line_header)
                .and_then(|entry| source_file_for_entry(dwarf, &unit, line_header, entry, comp_dir.as_deref()));

            rows.push(LineRow {
                address: RelativeAddress(row.address()),
                line: row.line().map(|l| l.get() as u32),
                column: match row.column() {
                    gimli::ColumnType::LeftEdge => None,
                    gimli::ColumnType::Column(c) => Some(c.get() as u32),
                },
                file,
                is_stmt: row.is_stmt(),
                basic_block: row.basic_block(),
                end_sequence: row.end_sequence(),
                prologue_end: row.prologue_end(),
                epilogue_begin: row.epilogue_begin(),
                isa: row.isa(),
                discriminator: row.discriminator(),
            });
        }
    }

    rows.sort_by(|a, b| b.address.cmp(&a.address));
    Ok(rows)
}

fn source_file_for_entry(
    dwarf: &Dwarf,
    unit: &gimli::Unit<R>,
    header: &gimli::LineProgramHeader<R>,
    entry: &gimli::FileEntry<R>,
    comp_dir: Option<&str>,
) -> Option<SourceFile> {
    let file_name = dwarf
        .attr_string(unit, entry.path_name())
        .ok()?
        .to_string_lossy()
        .into_owned();

    let own_directory = entry
        .directory(header)
        .and_then(|dir| dwarf.attr_string(unit, dir).ok())
        .map(|s| s.to_string_lossy().into_owned());
    let directory = resolve_directory(own_directory, comp_dir);

    Some(SourceFile {
        directory,
        file_name,
        recorded_mtime: non_zero(entry.timestamp()),
        recorded_size: non_zero(entry.size()),
        resolved: OnceCell::new(),
        outdated: OnceCell::new(),
    })
}

/// Falls back to the compilation unit's `comp_dir` when a file entry carries
/// no directory of its own — the case a DWARF v5 entry whose directory index
/// resolves to an empty `DW_FORM_strx3`/`DW_FORM_line_strp` string lands in
/// just as much as a DWARF v2-4 entry with directory index 0.
fn resolve_directory(own_directory: Option<String>, comp_dir: Option<&str>) -> Option<String> {
    own_directory.or_else(|| comp_dir.map(str::to_owned))
}

fn non_zero(value: u64) -> Option<u64> {
    if value == 0 {
        None
    } else {
        Some(value)
    }
}

fn gimli_err(err: gimli::Error) -> crate::error::Error {
    crate::error::Error::DwarfContext(PathBuf::new(), err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_file_outdated_when_size_mismatches() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("callstack-dwarf-test-{}.txt", std::process::id()));
        std::fs::write(&path, b"hello world").unwrap();

        let file = SourceFile {
            directory: Some(dir.to_string_lossy().into_owned()),
            file_name: path.file_name().unwrap().to_string_lossy().into_owned(),
            recorded_mtime: None,
            recorded_size: Some(999),
            resolved: OnceCell::new(),
            outdated: OnceCell::new(),
        };
        assert!(file.is_outdated());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn source_file_not_outdated_when_unrecorded() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("callstack-dwarf-test2-{}.txt", std::process::id()));
        std::fs::write(&path, b"hello").unwrap();

        let file = SourceFile {
            directory: Some(dir.to_string_lossy().into_owned()),
            file_name: path.file_name().unwrap().to_string_lossy().into_owned(),
            recorded_mtime: None,
            recorded_size: None,
            resolved: OnceCell::new(),
            outdated: OnceCell::new(),
        };
        assert!(!file.is_outdated());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn empty_sections_yield_no_rows() {
        let dwarf = build(|_| None);
        let rows = line_rows(&dwarf).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn source_file_joins_directory_and_file_name_into_long_path() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("callstack-dwarf-test3-{}.txt", std::process::id()));
        std::fs::write(&path, b"x").unwrap();

        let file = SourceFile {
            directory: Some(dir.to_string_lossy().into_owned()),
            file_name: path.file_name().unwrap().to_string_lossy().into_owned(),
            recorded_mtime: None,
            recorded_size: None,
            resolved: OnceCell::new(),
            outdated: OnceCell::new(),
        };
        let resolved = file.path();
        assert!(resolved.long.as_ref().unwrap().ends_with(path.file_name().unwrap()));
        assert!(resolved.short.as_ref().unwrap().is_relative());

        std::fs::remove_file(&path).ok();
    }

    // A DWARF v5 file entry whose own directory index resolves through
    // `DW_FORM_strx3`/`DW_FORM_line_strp` indirection to nothing (no
    // directory attribute present) still needs a directory: this is the
    // fallback that makes a static-archive member's DWARF v5 line table
    // resolve to a usable source path.
    #[test]
    fn resolve_directory_falls_back_to_comp_dir_when_entry_has_none() {
        assert_eq!(resolve_directory(None, Some("/build/tree")), Some("/build/tree".to_owned()));
    }

    #[test]
    fn resolve_directory_prefers_its_own_directory_over_comp_dir() {
        assert_eq!(
            resolve_directory(Some("/src".to_owned()), Some("/build/tree")),
            Some("/src".to_owned())
        );
    }
}
