//! ELF binary parsing: symbol table, writable+allocatable regions, and the
//! six DWARF sections.
//!
//! 32/64-bit selection, endianness, `e_shnum`/`e_shstrndx` overflow escapes,
//! and section decompression are all handled by the `object` crate —
//! every real ELF-consuming crate in this codebase's lineage
//! (samply-symbols' `elf.rs`, backtrace-rs' gimli backend) reaches for it
//! rather than re-deriving `Elf32_Shdr` layouts by hand. Grounded on
//! samply-symbols' `elf.rs`.

use std::path::{Path, PathBuf};

use object::{Object, ObjectSection, ObjectSymbol, SectionFlags, SectionKind, SymbolKind};

use crate::error::{Error, Result};
use crate::frame::{Function, RelativeAddress};

/// A parsed ELF image: its function symbol table and writable+allocatable
/// regions, both already in the object-relative address space the
/// translator works in.
pub struct ElfFile {
    pub functions: Vec<Function>,
    pub regions: Vec<(RelativeAddress, RelativeAddress)>,
    pub tls_regions: Vec<(RelativeAddress, RelativeAddress)>,
}

impl ElfFile {
    pub fn parse(path: &Path, data: &[u8]) -> Result<Self> {
        let file = object::File::parse(data).map_err(|e| Error::ObjectParse(path.to_path_buf(), e))?;

        let mut functions = parse_symbols(&file);
        functions.sort_by(|a, b| b.start_address.cmp(&a.start_address));

        let regions = parse_regions(&file);
        let tls_regions = parse_tls_regions(&file);

        Ok(ElfFile {
            functions,
            regions,
            tls_regions,
        })
    }

    /// Pulls the six DWARF section payloads this image carries, decompressing
    /// as needed. Sections that are absent come back as `None`, which
    /// `dwarf::build` treats as empty.
    pub fn dwarf_sections(&self, path: &Path, data: &[u8]) -> Result<DwarfSectionBytes> {
        let file = object::File::parse(data).map_err(|e| Error::ObjectParse(path.to_path_buf(), e))?;
        Ok(DwarfSectionBytes {
            debug_line: section_bytes(&file, ".debug_line"),
            debug_line_str: section_bytes(&file, ".debug_line_str"),
            debug_str: section_bytes(&file, ".debug_str"),
            debug_info: section_bytes(&file, ".debug_info"),
            debug_abbrev: section_bytes(&file, ".debug_abbrev"),
            debug_str_offsets: section_bytes(&file, ".debug_str_offsets"),
        })
    }

    pub fn is_little_endian(data: &[u8]) -> Option<bool> {
        // e_ident[EI_DATA]: 1 = little, 2 = big.
        match data.get(5)? {
            1 => Some(true),
            2 => Some(false),
            _ => None,
        }
    }
}

pub struct DwarfSectionBytes {
    pub debug_line: Option<Vec<u8>>,
    pub debug_line_str: Option<Vec<u8>>,
    pub debug_str: Option<Vec<u8>>,
    pub debug_info: Option<Vec<u8>>,
    pub debug_abbrev: Option<Vec<u8>>,
    pub debug_str_offsets: Option<Vec<u8>>,
}

fn section_bytes(file: &object::File, name: &str) -> Option<Vec<u8>> {
    let section = file.section_by_name(name)?;
    section.uncompressed_data().ok().map(|cow| cow.into_owned())
}

fn parse_symbols(file: &object::File) -> Vec<Function> {
    // Prefer `.symtab`; `object` already falls back to the dynamic symbol
    // table (`.dynsym`/`.dynstr`) when a static one isn't present.
    let mut functions = Vec::new();
    for symbol in file.symbols() {
        if !matches!(symbol.kind(), SymbolKind::Text | SymbolKind::Data) {
            continue;
        }
        if symbol.address() == 0 {
            continue;
        }
        let Ok(name) = symbol.name() else { continue };
        if name.is_empty() {
            continue;
        }
        functions.push(Function::new(
            RelativeAddress(symbol.address()),
            symbol.size(),
            name.to_owned(),
        ));
    }
    functions
}

fn parse_regions(file: &object::File) -> Vec<(RelativeAddress, RelativeAddress)> {
    let mut regions = Vec::new();
    for section in file.sections() {
        if section.address() == 0 || section.size() == 0 {
            continue;
        }
        if let SectionFlags::Elf { sh_flags } = section.flags() {
            const SHF_WRITE: u64 = 0x1;
            const SHF_ALLOC: u64 = 0x2;
            if sh_flags & (SHF_WRITE | SHF_ALLOC) == (SHF_WRITE | SHF_ALLOC) {
                let start = section.address();
                regions.push((RelativeAddress(start), RelativeAddress(start + section.size())));
            }
        }
    }
    regions
}

fn parse_tls_regions(file: &object::File) -> Vec<(RelativeAddress, RelativeAddress)> {
    file.sections()
        .filter(|section| section.kind() == SectionKind::Tls || section.kind() == SectionKind::UninitializedTls)
        .filter(|section| section.size() > 0)
        .map(|section| {
            let start = section.address();
            (RelativeAddress(start), RelativeAddress(start + section.size()))
        })
        .collect()
}

/// Decompresses a `.gnu_debugdata` ("MiniDebugInfo") section, gated behind
/// the `minidebug` feature: it's XZ-compressed ELF data holding a
/// symbol-only copy of the binary, used when the real symbol table was
/// stripped to save space.
#[cfg(feature = "minidebug")]
pub fn decompress_minidebug(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    lzma_rs::xz_decompress(&mut std::io::Cursor::new(data), &mut out)
        .map_err(|_| Error::MalformedStabs(PathBuf::new(), "gnu_debugdata is not valid xz"))?;
    Ok(out)
}
