//! Stab-entry grouping: partitions a Mach-O symbol table into per-object-file
//! function lists using the classic `N_SO`/`N_OSO`/`N_BNSYM`/`N_ENSYM`/`N_FUN`
//! bracketing convention. None of the example crates needed to reconstruct
//! stabs (they all resolve addresses straight through DWARF); the structure
//! otherwise follows how backtrace-rs's `gimli.rs` keeps small, single-purpose
//! parsing state machines.

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::frame::{Function, RelativeAddress};

// Mach-O stab type codes (see <mach-o/stab.h>).
const N_SO: u8 = 0x64;
const N_OSO: u8 = 0x66;
const N_BNSYM: u8 = 0x2e;
const N_ENSYM: u8 = 0x4e;
const N_FUN: u8 = 0x24;

/// One raw nlist entry, endian- and width-normalised by the Mach-O parser
/// before being handed to this module.
pub struct StabEntry<'a> {
    pub n_type: u8,
    pub n_sect: u8,
    pub n_value: u64,
    pub name: &'a str,
    /// Whether this is an `N_STAB`-class entry at all (high bit of n_type);
    /// non-stab entries with a concrete `n_sect` become plain data symbols.
    pub is_stab: bool,
}

/// One `N_OSO`-referenced compilation unit, with the functions belonging to
/// it collected from the bracketed `N_FUN` runs that follow.
pub struct ObjectFileGroup {
    pub directory: Option<String>,
    pub source_file: Option<String>,
    pub on_disk_path: String,
    pub mtime: u64,
    pub functions: Vec<Function>,
}

/// The result of walking a full stab sequence: the per-object-file groups
/// plus any plain `N_SECT` symbols whose object file is unknown.
pub struct GroupedSymbols {
    pub object_files: Vec<ObjectFileGroup>,
    pub ungrouped: Vec<Function>,
}

struct PendingSo {
    directory: Option<String>,
    source_file: Option<String>,
}

/// Walks `entries` in file order and produces the grouped-by-object-file
/// symbol table.
pub fn group(entries: &[StabEntry<'_>]) -> Result<GroupedSymbols> {
    let mut object_files = Vec::new();
    let mut ungrouped = Vec::new();

    let mut pending_so: Option<PendingSo> = None;
    let mut current: Option<ObjectFileGroup> = None;
    let mut open_fun: Option<(String, RelativeAddress)> = None;
    let mut bracket_depth = 0u32;

    for entry in entries {
        if !entry.is_stab {
            if current.is_none() && bracket_depth == 0 {
                if entry.n_sect != 0 && !entry.name.is_empty() {
                    ungrouped.push(Function::new(RelativeAddress(entry.n_value), 0, entry.name.to_owned()));
                }
            }
            continue;
        }

        match entry.n_type {
            N_SO => {
                if entry.name.is_empty() {
                    // Closes the current object-file group.
                    if let Some(group) = current.take() {
                        object_files.push(group);
                    }
                    pending_so = None;
                } else {
                    match pending_so.take() {
                        None => {
                            pending_so = Some(PendingSo {
                                directory: Some(entry.name.to_owned()),
                                source_file: None,
                            });
                        }
                        Some(mut so) => {
                            so.source_file = Some(entry.name.to_owned());
                            pending_so = Some(so);
                        }
                    }
                }
            }
            N_OSO => {
                let so = pending_so.take();
                if let Some(group) = current.take() {
                    object_files.push(group);
                }
                current = Some(ObjectFileGroup {
                    directory: so.as_ref().and_then(|s| s.directory.clone()),
                    source_file: so.and_then(|s| s.source_file),
                    on_disk_path: entry.name.to_owned(),
                    mtime: entry.n_value,
                    functions: Vec::new(),
                });
            }
            N_BNSYM => {
                if bracket_depth != 0 {
                    return Err(Error::MalformedStabs(
                        PathBuf::new(),
                        "nested N_BNSYM without a matching N_ENSYM",
                    ));
                }
                bracket_depth += 1;
            }
            N_ENSYM => {
                if bracket_depth == 0 {
                    return Err(Error::MalformedStabs(
                        PathBuf::new(),
                        "N_ENSYM without a matching N_BNSYM",
                    ));
                }
                bracket_depth -= 1;
                open_fun = None;
            }
            N_FUN => {
                if bracket_depth == 0 {
                    continue;
                }
                if !entry.name.is_empty() {
                    open_fun = Some((entry.name.to_owned(), RelativeAddress(entry.n_value)));
                } else if let Some((name, start)) = open_fun.take() {
                    let function = Function::new(start, entry.n_value, name);
                    match current.as_mut() {
                        Some(group) => group.functions.push(function),
                        None => ungrouped.push(function),
                    }
                }
            }
            _ => {}
        }
    }

    if let Some(group) = current.take() {
        object_files.push(group);
    }

    Ok(GroupedSymbols { object_files, ungrouped })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stab<'a>(n_type: u8, n_value: u64, name: &'a str) -> StabEntry<'a> {
        StabEntry {
            n_type,
            n_sect: 1,
            n_value,
            name,
            is_stab: true,
        }
    }

    #[test]
    fn groups_a_single_compilation_unit() {
        let entries = vec![
            stab(N_SO, 0, "/src/"),
            stab(N_SO, 0, "main.c"),
            stab(N_OSO, 1_700_000_000, "/obj/main.o"),
            stab(N_BNSYM, 0x1000, ""),
            stab(N_FUN, 0x1000, "_main"),
            stab(N_FUN, 0x20, ""),
            stab(N_ENSYM, 0x1020, ""),
            stab(N_SO, 0, ""),
        ];

        let grouped = group(&entries).unwrap();
        assert_eq!(grouped.object_files.len(), 1);
        let group = &grouped.object_files[0];
        assert_eq!(group.on_disk_path, "/obj/main.o");
        assert_eq!(group.directory.as_deref(), Some("/src/"));
        assert_eq!(group.source_file.as_deref(), Some("main.c"));
        assert_eq!(group.functions.len(), 1);
        assert_eq!(group.functions[0].linked_name, "_main");
        assert_eq!(group.functions[0].length, 0x20);
    }

    #[test]
    fn unmatched_ensym_is_a_parse_error() {
        let entries = vec![stab(N_ENSYM, 0, "")];
        assert!(group(&entries).is_err());
    }

    #[test]
    fn plain_sect_symbols_with_no_open_group_are_ungrouped() {
        let mut entry = stab(0, 0x2000, "_data_thing");
        entry.is_stab = false;
        let entries = vec![entry];
        let grouped = group(&entries).unwrap();
        assert_eq!(grouped.ungrouped.len(), 1);
        assert!(grouped.object_files.is_empty());
    }
}
