//! The binary-file abstraction: a polymorphic handle over a Mach-O or ELF
//! image, lazily parsed once and then answering repeated address queries.
//! The `maybeParse`/idempotent-parse shape mirrors
//! backtrace-rs's `Mapping::new` + `Cache::mapping_for_lib` pairing in
//! `symbolize/gimli.rs`, which likewise parses a library exactly once and
//! caches the (possibly failed) result.

use std::path::{Path, PathBuf};

use crate::dwarf::{self, Dwarf};
use crate::error::Result;
use crate::frame::{Function, RelativeAddress, RuntimeAddress, TranslatedFrame};
use crate::objectfile::ObjectFile;

/// Format-specific parsed state, built once on first use.
enum Parsed {
    Elf {
        functions: Vec<Function>,
        regions: Vec<(RelativeAddress, RelativeAddress)>,
        tls_regions: Vec<(RelativeAddress, RelativeAddress)>,
        dwarf: Dwarf,
        line_rows: Vec<dwarf::LineRow>,
    },
    MachO {
        uuid: Option<[u8; 16]>,
        object_files: Vec<ObjectFile>,
        ungrouped_functions: Vec<Function>,
        dsym: Option<Box<BinaryFile>>,
    },
}

/// A single loaded image's binary-file handle.
pub struct BinaryFile {
    pub path: PathBuf,
    pub in_memory: bool,
    pub relocation_offset: u64,
    parsed: Option<Parsed>,
    parse_failed: bool,
}

impl BinaryFile {
    pub fn new(path: PathBuf, in_memory: bool, relocation_offset: u64) -> Self {
        BinaryFile {
            path,
            in_memory,
            relocation_offset,
            parsed: None,
            parse_failed: false,
        }
    }

    /// Idempotent lazy parse. Parse failures are sticky: once an image
    /// fails to parse, every later call returns `false` without retrying.
    pub fn maybe_parse(&mut self) -> bool {
        if self.parsed.is_some() {
            return true;
        }
        if self.parse_failed {
            return false;
        }

        match self.parse() {
            Ok(parsed) => {
                self.parsed = Some(parsed);
                true
            }
            Err(err) => {
                log::debug!("failed to parse {:?}: {err}", self.path);
                self.parse_failed = true;
                false
            }
        }
    }

    fn parse(&self) -> Result<Parsed> {
        let data = std::fs::read(&self.path).map_err(|e| crate::error::Error::Io(self.path.clone(), e))?;

        if is_macho(&data) {
            self.parse_macho(&data)
        } else {
            self.parse_elf(&data)
        }
    }

    fn parse_elf(&self, data: &[u8]) -> Result<Parsed> {
        let elf = crate::elf::ElfFile::parse(&self.path, data)?;
        let sections = elf.dwarf_sections(&self.path, data)?;
        let little_endian = crate::elf::ElfFile::is_little_endian(data).unwrap_or(true);

        let dwarf = build_dwarf_for_elf(&sections, little_endian);
        let line_rows = dwarf::line_rows(&dwarf)?;

        Ok(Parsed::Elf {
            functions: elf.functions,
            regions: elf.regions,
            tls_regions: elf.tls_regions,
            dwarf,
            line_rows,
        })
    }

    fn parse_macho(&self, data: &[u8]) -> Result<Parsed> {
        let slice = crate::macho::select_fat_member(&self.path, data)?;
        let macho = crate::macho::parse(&self.path, slice)?;

        let mut object_files = Vec::new();
        for group in macho.object_files {
            let (line_rows, local_functions) = load_object_file_debug_info(&group).unwrap_or_default();
            object_files.push(ObjectFile::new(
                group.directory,
                group.source_file,
                PathBuf::from(&group.on_disk_path),
                Some(group.mtime),
                group.functions,
                line_rows,
                local_functions,
                false,
            ));
        }

        let dsym = crate::macho::dsym::find(&self.path).and_then(|dsym_path| {
            let mut handle = BinaryFile::new(dsym_path, false, self.relocation_offset);
            if !handle.maybe_parse() {
                return None;
            }
            match &handle.parsed {
                Some(Parsed::MachO { uuid: dsym_uuid, .. }) if *dsym_uuid == macho.uuid && macho.uuid.is_some() => {
                    Some(Box::new(handle))
                }
                _ => None,
            }
        });

        Ok(Parsed::MachO {
            uuid: macho.uuid,
            object_files,
            ungrouped_functions: macho.ungrouped_functions,
            dsym,
        })
    }

    /// Fills in `function`/`sourceFile*`/`sourceLine`/`sourceLineColumn`/
    /// `sourceFileOutdated` for `runtime_address`, returning `false` if the
    /// image has no information at all for it. When only a function name is
    /// known, `function` becomes `"<name> + <offset>"`.
    pub fn addr2string(&mut self, runtime_address: RuntimeAddress, use_cache: bool, frame: &mut TranslatedFrame) -> bool {
        if !self.maybe_parse() {
            return false;
        }
        let relative = runtime_address.to_relative(self.relocation_offset);

        match self.parsed.as_ref().unwrap() {
            Parsed::Elf { functions, line_rows, .. } => {
                fill_from_flat(functions, line_rows, relative, use_cache, frame)
            }
            Parsed::MachO {
                object_files,
                ungrouped_functions,
                dsym,
                ..
            } => fill_from_object_files(object_files, ungrouped_functions, dsym.as_deref(), relative, use_cache, frame),
        }
    }

    /// Returns `(begin runtime address, length)` for the function named
    /// `name`, parsing the image first if needed.
    pub fn function_info(&mut self, name: &str) -> Option<(RuntimeAddress, u64)> {
        if !self.maybe_parse() {
            return None;
        }
        let relocation_offset = self.relocation_offset;
        let find = |functions: &[Function]| {
            functions
                .iter()
                .find(|f| f.linked_name == name)
                .map(|f| (f.start_address.to_runtime(relocation_offset), f.length))
        };
        match self.parsed.as_ref().unwrap() {
            Parsed::Elf { functions, .. } => find(functions),
            Parsed::MachO {
                object_files,
                ungrouped_functions,
                ..
            } => object_files
                .iter()
                .find_map(|obj| find(&obj.functions))
                .or_else(|| find(ungrouped_functions)),
        }
    }

    /// ELF's `PT_TLS` regions. Mach-O's `__DATA,__thread_vars` TLV
    /// descriptors aren't parsed yet, so this always returns empty there.
    pub fn tls_regions(&mut self) -> Vec<(RuntimeAddress, RuntimeAddress)> {
        if !self.maybe_parse() {
            return Vec::new();
        }
        match self.parsed.as_ref().unwrap() {
            Parsed::Elf { tls_regions, .. } => tls_regions
                .iter()
                .map(|(s, e)| (s.to_runtime(self.relocation_offset), e.to_runtime(self.relocation_offset)))
                .collect(),
            Parsed::MachO { .. } => Vec::new(),
        }
    }

    /// Writable+allocatable regions (ELF only; Mach-O reports none at this
    /// layer).
    pub fn regions(&mut self) -> Vec<(RuntimeAddress, RuntimeAddress)> {
        if !self.maybe_parse() {
            return Vec::new();
        }
        match self.parsed.as_ref().unwrap() {
            Parsed::Elf { regions, .. } => regions
                .iter()
                .map(|(s, e)| (s.to_runtime(self.relocation_offset), e.to_runtime(self.relocation_offset)))
                .collect(),
            Parsed::MachO { .. } => Vec::new(),
        }
    }
}

fn fill_from_flat(
    functions: &[Function],
    line_rows: &[dwarf::LineRow],
    relative: RelativeAddress,
    use_cache: bool,
    frame: &mut TranslatedFrame,
) -> bool {
    let Some(function) = functions.iter().find(|f| {
        let next_start = functions
            .iter()
            .filter(|other| other.start_address > f.start_address)
            .map(|other| other.start_address)
            .min();
        f.contains(relative, next_start)
    }) else {
        return false;
    };

    let name = function.demangled_name();
    let row = line_rows.iter().find(|row| row.address <= relative);

    apply_resolution(function, &name, row, relative, use_cache, frame);
    true
}

fn fill_from_object_files(
    object_files: &[ObjectFile],
    ungrouped: &[Function],
    dsym: Option<&BinaryFile>,
    relative: RelativeAddress,
    use_cache: bool,
    frame: &mut TranslatedFrame,
) -> bool {
    for object_file in object_files {
        let Some(function) = object_file.function_containing(relative) else {
            continue;
        };
        let name = function.demangled_name();

        if let Some(dsym) = dsym {
            if let Some(dsym_parsed) = dsym.parsed.as_ref() {
                if let Parsed::MachO { object_files: dsym_objs, .. } = dsym_parsed {
                    if let Some(resolution) = dsym_objs.iter().find_map(|o| o.resolve(relative)) {
                        apply_resolution(resolution.function, &name, None, relative, use_cache, frame);
                        frame.source_line = resolution.line;
                        frame.source_line_column = resolution.column;
                        if let Some(source_file) = resolution.source_file {
                            frame.source_file = Some(source_file.path().clone());
                            frame.source_file_outdated = source_file.is_outdated();
                        }
                        return true;
                    }
                }
            }
        }

        if let Some(resolution) = object_file.resolve(relative) {
            apply_resolution(resolution.function, &name, None, relative, use_cache, frame);
            frame.source_line = resolution.line;
            frame.source_line_column = resolution.column;
            if let Some(source_file) = resolution.source_file {
                frame.source_file = Some(source_file.path().clone());
                frame.source_file_outdated = source_file.is_outdated();
            }
        } else {
            frame.function = Some(fallback_name(&name, function, relative, use_cache));
        }
        return true;
    }

    if let Some(function) = ungrouped.iter().find(|f| f.contains(relative, None)) {
        let name = function.demangled_name();
        frame.function = Some(fallback_name(&name, function, relative, use_cache));
        return true;
    }

    false
}

fn apply_resolution(
    function: &Function,
    name: &std::sync::Arc<str>,
    row: Option<&dwarf::LineRow>,
    relative: RelativeAddress,
    use_cache: bool,
    frame: &mut TranslatedFrame,
) {
    match row {
        Some(row) if row.line.is_some() => {
            frame.function = Some(share_or_copy(name, use_cache));
            frame.source_line = row.line;
            frame.source_line_column = row.column;
            if let Some(file) = &row.file {
                frame.source_file = Some(file.path().clone());
                frame.source_file_outdated = file.is_outdated();
            }
        }
        _ => {
            frame.function = Some(fallback_name(name, function, relative, use_cache));
        }
    }
}

fn fallback_name(name: &std::sync::Arc<str>, function: &Function, relative: RelativeAddress, use_cache: bool) -> std::sync::Arc<str> {
    let offset = relative.0.saturating_sub(function.start_address.0);
    let formatted = TranslatedFrame::function_with_offset(name, offset);
    share_or_copy(&std::sync::Arc::from(formatted.as_str()), use_cache)
}

fn share_or_copy(name: &std::sync::Arc<str>, use_cache: bool) -> std::sync::Arc<str> {
    if use_cache {
        name.clone()
    } else {
        std::sync::Arc::from(name.as_ref())
    }
}

/// Loads the `.o`/archive-member bytes for one stab-grouped object file,
/// parses its own DWARF line program, and reads its own (pre-link) function
/// symbol table — needed to localize an image-relative query address into
/// this object file's address space before indexing its line rows. A
/// missing or unreadable member degrades to "no debug info for this unit"
/// rather than failing the whole image — stab entries routinely outlive the
/// archives they point at.
fn load_object_file_debug_info(group: &crate::macho::stabs::ObjectFileGroup) -> Option<(Vec<dwarf::LineRow>, Vec<Function>)> {
    let data = if let Some((archive_path, member)) = crate::macho::archive::split_archive_member_path(&group.on_disk_path) {
        crate::macho::archive::extract_member(Path::new(archive_path), &std::fs::read(archive_path).ok()?, member).ok()?
    } else {
        std::fs::read(&group.on_disk_path).ok()?
    };

    let slice = crate::macho::select_fat_member(Path::new(&group.on_disk_path), &data).ok()?;
    let parsed = crate::macho::parse(Path::new(&group.on_disk_path), slice).ok()?;
    let section_bytes = crate::macho::dwarf_section_bytes(&parsed.dwarf_sections);
    let dwarf = dwarf::build(move |id| match id {
        gimli::SectionId::DebugLine => section_bytes.debug_line.clone(),
        gimli::SectionId::DebugLineStr => section_bytes.debug_line_str.clone(),
        gimli::SectionId::DebugStr => section_bytes.debug_str.clone(),
        gimli::SectionId::DebugInfo => section_bytes.debug_info.clone(),
        gimli::SectionId::DebugAbbrev => section_bytes.debug_abbrev.clone(),
        gimli::SectionId::DebugStrOffsets => section_bytes.debug_str_offsets.clone(),
        _ => None,
    });
    let rows = dwarf::line_rows(&dwarf).ok()?;
    // A bare `.o` hasn't been linked, so its own symbol table holds no
    // N_OSO-bracketed groups: every local function symbol lands in
    // `ungrouped_functions`.
    Some((rows, parsed.ungrouped_functions))
}

fn is_macho(data: &[u8]) -> bool {
    let Some(magic) = data.get(0..4) else { return false };
    matches!(
        u32::from_be_bytes(magic.try_into().unwrap()),
        object::macho::MH_MAGIC
            | object::macho::MH_MAGIC_64
            | object::macho::MH_CIGAM
            | object::macho::MH_CIGAM_64
            | object::macho::FAT_MAGIC
            | object::macho::FAT_MAGIC_64
    )
}

fn build_dwarf_for_elf(sections: &crate::elf::DwarfSectionBytes, little_endian: bool) -> Dwarf {
    let mut take = |which: &mut Option<Vec<u8>>| which.take();
    let mut line = sections.debug_line.clone();
    let mut line_str = sections.debug_line_str.clone();
    let mut str_ = sections.debug_str.clone();
    let mut info = sections.debug_info.clone();
    let mut abbrev = sections.debug_abbrev.clone();
    let mut str_offsets = sections.debug_str_offsets.clone();

    let get_section = move |id: gimli::SectionId| -> Option<Vec<u8>> {
        match id {
            gimli::SectionId::DebugLine => take(&mut line),
            gimli::SectionId::DebugLineStr => take(&mut line_str),
            gimli::SectionId::DebugStr => take(&mut str_),
            gimli::SectionId::DebugInfo => take(&mut info),
            gimli::SectionId::DebugAbbrev => take(&mut abbrev),
            gimli::SectionId::DebugStrOffsets => take(&mut str_offsets),
            _ => None,
        }
    };

    if little_endian {
        dwarf::build(get_section)
    } else {
        dwarf::build_big_endian(get_section)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn func(start: u64, length: u64, name: &str) -> Function {
        Function::new(RelativeAddress(start), length, name.to_owned())
    }

    fn row(address: u64, line: u32) -> dwarf::LineRow {
        dwarf::LineRow {
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

    /// ELF64, little-endian, a function with line info: `foo` at
    /// image-relative `0x1000` of length `0x40`, queried at `0x1020`.
    #[test]
    fn elf_function_with_line_info_resolves_name_and_line() {
        let functions = vec![func(0x1000, 0x40, "foo")];
        let rows = vec![row(0x1020, 55)];
        let mut frame = TranslatedFrame::default();

        let found = fill_from_flat(&functions, &rows, RelativeAddress(0x1020), false, &mut frame);

        assert!(found);
        assert_eq!(frame.source_line, Some(55));
        assert!(frame.function.as_deref().unwrap().contains("foo"));
    }

    /// Mach-O with only a stripped symbol table: `bar` at image-relative
    /// `0x2000` of length 32, queried at `0x2010` (offset 16), no DWARF at
    /// all. Falls back to `"bar + <offset>"` with no source file.
    #[test]
    fn macho_stripped_binary_falls_back_to_name_plus_offset() {
        let object_file = ObjectFile::new(
            None,
            None,
            PathBuf::from("/bin/app"),
            None,
            vec![func(0x2000, 32, "bar")],
            Vec::new(),
            Vec::new(),
            false,
        );
        let mut frame = TranslatedFrame::default();

        let found = fill_from_object_files(&[object_file], &[], None, RelativeAddress(0x2010), false, &mut frame);

        assert!(found);
        assert!(frame.source_file.is_none());
        let name = frame.function.unwrap();
        assert!(name.contains("bar"));
        assert!(name.contains("0x10"));
    }

    /// A static-archive member (`libfoo.a(bar.o)`): the image's stab-derived
    /// function list carries the final linked address, but `bar.o`'s own
    /// line rows are in its own pre-link address space. `fill_from_object_files`
    /// must localize before the row lookup succeeds.
    #[test]
    fn static_archive_member_attributes_the_call_site_via_localize() {
        let object_file = ObjectFile::new(
            Some("/src".to_owned()),
            Some("bar.c".to_owned()),
            PathBuf::from("/lib/libfoo.a(bar.o)"),
            None,
            vec![func(0x9000, 0x40, "bar")],
            vec![row(0x20, 14)],
            vec![func(0x10, 0x40, "bar")],
            false,
        );
        let mut frame = TranslatedFrame::default();

        let found = fill_from_object_files(&[object_file], &[], None, RelativeAddress(0x9010), false, &mut frame);

        assert!(found);
        assert_eq!(frame.source_line, Some(14));
    }

    /// A Mach-O image with a matching sibling `.dSYM`: the dSYM's own DWARF
    /// (already fully relinked, so `is_dsym_slice` is set) takes priority
    /// over the image's own stab-grouped object files.
    #[test]
    fn dsym_slice_is_consulted_before_the_images_own_object_files() {
        let dsym_object = ObjectFile::new(
            None,
            None,
            PathBuf::from("/App.dSYM/Contents/Resources/DWARF/App"),
            None,
            vec![func(0x3000, 0x20, "baz")],
            vec![row(0x3010, 99)],
            Vec::new(),
            true,
        );
        let mut dsym_binary = BinaryFile::new(PathBuf::from("/App.dSYM/Contents/Resources/DWARF/App"), false, 0);
        dsym_binary.parsed = Some(Parsed::MachO {
            uuid: None,
            object_files: vec![dsym_object],
            ungrouped_functions: Vec::new(),
            dsym: None,
        });

        let main_object = ObjectFile::new(
            None,
            None,
            PathBuf::from("/App"),
            None,
            vec![func(0x3000, 0x20, "baz")],
            Vec::new(),
            Vec::new(),
            false,
        );
        let mut frame = TranslatedFrame::default();

        let found = fill_from_object_files(
            &[main_object],
            &[],
            Some(&dsym_binary),
            RelativeAddress(0x3010),
            false,
            &mut frame,
        );

        assert!(found);
        assert_eq!(frame.source_line, Some(99));
    }

    #[test]
    fn is_macho_recognizes_thin_and_fat_magics() {
        assert!(is_macho(&object::macho::MH_MAGIC_64.to_be_bytes()));
        assert!(is_macho(&object::macho::FAT_MAGIC.to_be_bytes()));
        assert!(!is_macho(&[0, 0, 0, 0]));
    }
}
