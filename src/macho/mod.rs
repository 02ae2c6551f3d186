//! Mach-O parsing: fat-archive slice selection, load-command walking,
//! `FUNCTION_STARTS` decoding, and handing the symbol table off to
//! [`stabs`] for object-file grouping.
//!
//! Segment/symtab/UUID extraction goes through `object::read::macho`'s
//! `MachHeader`/`Nlist` traits, the same ones backtrace-rs's
//! `symbolize/gimli.rs` uses for its own (lighter-weight) Mach-O walk —
//! they already normalise 32-vs-64-bit and endianness, so this module never
//! has to branch on word size itself.

pub mod archive;
pub mod dsym;
pub mod stabs;

use std::path::{Path, PathBuf};

use object::endian::BigEndian;
use object::macho::{FatHeader, MachHeader64, CPU_TYPE_ARM64, CPU_TYPE_X86_64};
use object::read::macho::{MachHeader, Nlist, Segment as _};
use object::{Endianness, NativeEndian};

use crate::error::{Error, Result};
use crate::frame::{Function, RelativeAddress};
use crate::leb128::read_uleb128;
use stabs::StabEntry;

type Mach = MachHeader64<NativeEndian>;

/// A parsed, thin (non-fat) Mach-O image.
pub struct MachOFile {
    pub uuid: Option<[u8; 16]>,
    pub pagezero_size: u64,
    pub text_vmaddr: u64,
    pub linkedit_vmaddr: u64,
    pub linkedit_fileoff: u64,
    pub object_files: Vec<stabs::ObjectFileGroup>,
    pub ungrouped_functions: Vec<Function>,
    pub function_starts: Vec<RelativeAddress>,
    pub dwarf_sections: std::collections::HashMap<String, Vec<u8>>,
}

/// Mach-O's DWARF section names live under a `__DWARF` segment and keep
/// their ELF-style dotted names (`__debug_line` maps to `.debug_line`).
pub fn dwarf_section_bytes(
    sections: &std::collections::HashMap<String, Vec<u8>>,
) -> crate::elf::DwarfSectionBytes {
    let get = |mach_name: &str| sections.get(mach_name).cloned();
    crate::elf::DwarfSectionBytes {
        debug_line: get("__debug_line"),
        debug_line_str: get("__debug_line_str"),
        debug_str: get("__debug_str"),
        debug_info: get("__debug_info"),
        debug_abbrev: get("__debug_abbrev"),
        debug_str_offsets: get("__debug_str_offs"),
    }
}

/// Selects the fat-archive member matching the running CPU, or returns the
/// input unchanged if it's already a thin Mach-O.
pub fn select_fat_member<'a>(path: &Path, data: &'a [u8]) -> Result<&'a [u8]> {
    let magic = match data.get(0..4) {
        Some(bytes) => u32::from_be_bytes(bytes.try_into().unwrap()),
        None => return Err(Error::EmptyFatArchive(path.to_path_buf())),
    };

    if magic != object::macho::FAT_MAGIC && magic != object::macho::FAT_MAGIC_64 {
        return Ok(data);
    }

    let header = FatHeader::parse(data).map_err(|e| Error::ObjectParse(path.to_path_buf(), e))?;
    let want_cputype = running_cputype();

    if magic == object::macho::FAT_MAGIC_64 {
        let arches = FatHeader::parse_arch64(data).map_err(|e| Error::ObjectParse(path.to_path_buf(), e))?;
        for arch in arches {
            if arch.cputype.get(BigEndian) == want_cputype {
                let offset = arch.offset.get(BigEndian) as usize;
                let size = arch.size.get(BigEndian) as usize;
                return data
                    .get(offset..offset + size)
                    .ok_or_else(|| Error::NoMatchingFatArchiveMember(path.to_path_buf()));
            }
        }
    } else {
        let arches = FatHeader::parse_arch32(data).map_err(|e| Error::ObjectParse(path.to_path_buf(), e))?;
        for arch in arches {
            if arch.cputype.get(BigEndian) == want_cputype {
                let offset = arch.offset.get(BigEndian) as usize;
                let size = arch.size.get(BigEndian) as usize;
                return data
                    .get(offset..offset + size)
                    .ok_or_else(|| Error::NoMatchingFatArchiveMember(path.to_path_buf()));
            }
        }
    }

    let _ = header;
    Err(Error::NoMatchingFatArchiveMember(path.to_path_buf()))
}

fn running_cputype() -> u32 {
    if cfg!(target_arch = "aarch64") {
        CPU_TYPE_ARM64
    } else {
        CPU_TYPE_X86_64
    }
}

/// Parses a thin Mach-O image's load commands: segments, symtab (grouped by
/// [`stabs`]), UUID, and function starts.
pub fn parse(path: &Path, data: &[u8]) -> Result<MachOFile> {
    let header = Mach::parse(data, 0).map_err(|e| Error::ObjectParse(path.to_path_buf(), e))?;
    let endian = header.endian().map_err(|e| Error::ObjectParse(path.to_path_buf(), e))?;

    let mut pagezero_size = 0u64;
    let mut text_vmaddr = 0u64;
    let mut linkedit_vmaddr = 0u64;
    let mut linkedit_fileoff = 0u64;
    let mut uuid = None;
    let mut symtab_cmd: Option<(u32, u32, u32, u32)> = None;
    let mut function_starts_range: Option<(u32, u32)> = None;
    let mut dwarf_sections: std::collections::HashMap<String, Vec<u8>> = std::collections::HashMap::new();

    let mut commands = header
        .load_commands(endian, data, 0)
        .map_err(|e| Error::ObjectParse(path.to_path_buf(), e))?;

    while let Some(command) = commands.next().map_err(|e| Error::ObjectParse(path.to_path_buf(), e))? {
        if let Some((segment, section_data)) = command
            .segment_64()
            .map_err(|e| Error::ObjectParse(path.to_path_buf(), e))?
        {
            let name = segment.name();
            if name == b"__PAGEZERO" {
                pagezero_size = segment.vmsize(endian);
            } else if name == b"__TEXT" {
                text_vmaddr = segment.vmaddr(endian);
            } else if name == b"__LINKEDIT" {
                linkedit_vmaddr = segment.vmaddr(endian);
                linkedit_fileoff = segment.fileoff(endian);
            } else if name == b"__DWARF" {
                if let Ok(sections) = segment.sections(endian, section_data) {
                    for section in sections {
                        let section_name = String::from_utf8_lossy(section.name()).into_owned();
                        if let Ok(bytes) = section.data(endian, data) {
                            dwarf_sections.insert(section_name, bytes.to_vec());
                        }
                    }
                }
            }
        } else if let Some(symtab) = command.symtab().map_err(|e| Error::ObjectParse(path.to_path_buf(), e))? {
            symtab_cmd = Some((
                symtab.symoff.get(endian),
                symtab.nsyms.get(endian),
                symtab.stroff.get(endian),
                symtab.strsize.get(endian),
            ));
        } else if let Some(id) = command.uuid().map_err(|e| Error::ObjectParse(path.to_path_buf(), e))? {
            uuid = Some(id.uuid);
        } else if command.cmd() == object::macho::LC_FUNCTION_STARTS {
            if let Ok(Some(cmd)) = command.linkedit_data() {
                function_starts_range = Some((cmd.dataoff.get(endian), cmd.datasize.get(endian)));
            }
        }
    }

    let grouped = match symtab_cmd {
        Some((symoff, nsyms, stroff, strsize)) => {
            parse_symtab(path, data, endian, symoff, nsyms, stroff, strsize)?
        }
        None => stabs::GroupedSymbols {
            object_files: Vec::new(),
            ungrouped: Vec::new(),
        },
    };

    let function_starts = match function_starts_range {
        Some((offset, size)) => decode_function_starts(data, offset as usize, size as usize, text_vmaddr),
        None => Vec::new(),
    };

    Ok(MachOFile {
        uuid,
        pagezero_size,
        text_vmaddr,
        linkedit_vmaddr,
        linkedit_fileoff,
        object_files: grouped.object_files,
        ungrouped_functions: grouped.ungrouped,
        function_starts,
        dwarf_sections,
    })
}

#[allow(clippy::too_many_arguments)]
fn parse_symtab(
    path: &Path,
    data: &[u8],
    endian: object::endian::Endianness,
    symoff: u32,
    nsyms: u32,
    stroff: u32,
    strsize: u32,
) -> Result<stabs::GroupedSymbols> {
    type NlistType = <Mach as MachHeader>::Nlist;

    let strtab = data
        .get(stroff as usize..(stroff + strsize) as usize)
        .ok_or_else(|| Error::MalformedStabs(path.to_path_buf(), "string table out of bounds"))?;

    let nlist_size = std::mem::size_of::<NlistType>();
    let mut entries = Vec::with_capacity(nsyms as usize);
    let mut owned_names: Vec<String> = Vec::with_capacity(nsyms as usize);

    for i in 0..nsyms as usize {
        let offset = symoff as usize + i * nlist_size;
        let bytes = data
            .get(offset..offset + nlist_size)
            .ok_or_else(|| Error::MalformedStabs(path.to_path_buf(), "nlist entry out of bounds"))?;
        let nlist = object::pod::from_bytes::<NlistType>(bytes)
            .map_err(|_| Error::MalformedStabs(path.to_path_buf(), "misaligned nlist entry"))?
            .0;

        let n_type = nlist.n_type();
        let is_stab = n_type & 0xe0 != 0;
        let name = read_c_string(strtab, nlist.n_strx(endian) as usize).unwrap_or_default();
        owned_names.push(name);

        entries.push((n_type, nlist.n_sect(), nlist.n_value(endian), is_stab));
    }

    let stab_entries: Vec<StabEntry> = entries
        .iter()
        .zip(owned_names.iter())
        .map(|(&(n_type, n_sect, n_value, is_stab), name)| StabEntry {
            n_type,
            n_sect,
            n_value,
            name,
            is_stab,
        })
        .collect();

    stabs::group(&stab_entries)
}

fn read_c_string(strtab: &[u8], offset: usize) -> Option<String> {
    let rest = strtab.get(offset..)?;
    let end = rest.iter().position(|&b| b == 0)?;
    Some(String::from_utf8_lossy(&rest[..end]).into_owned())
}

/// Decodes the `LC_FUNCTION_STARTS` ULEB128 delta stream into an ascending
/// list of image-relative function start addresses.
fn decode_function_starts(data: &[u8], offset: usize, size: usize, text_vmaddr: u64) -> Vec<RelativeAddress> {
    let Some(mut bytes) = data.get(offset..offset + size) else {
        return Vec::new();
    };

    let mut starts = Vec::new();
    let mut address = text_vmaddr;
    while !bytes.is_empty() {
        match read_uleb128(bytes) {
            Some((delta, rest)) => {
                if delta == 0 && rest.len() == bytes.len() {
                    break;
                }
                address = address.wrapping_add(delta);
                starts.push(RelativeAddress(address));
                bytes = rest;
            }
            None => break,
        }
    }
    starts
}

/// The `__LINKEDIT` offset shift applied when the Mach-O file is read from
/// memory (already mapped by the loader) rather than from disk.
pub fn linkedit_shift_for_in_memory_image(linkedit_vmaddr: u64, text_vmaddr: u64, linkedit_fileoff: u64) -> u64 {
    (linkedit_vmaddr - text_vmaddr).wrapping_sub(linkedit_fileoff)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_starts_decodes_delta_stream() {
        // Deltas 0x10, 0x20, 0x05 from a base of 0x1000.
        let bytes = [0x10, 0x20, 0x05];
        let starts = decode_function_starts(&bytes, 0, bytes.len(), 0x1000);
        assert_eq!(
            starts,
            vec![
                RelativeAddress(0x1010),
                RelativeAddress(0x1030),
                RelativeAddress(0x1035)
            ]
        );
    }

    #[test]
    fn select_fat_member_passes_through_thin_data() {
        let data = [0u8; 32];
        let result = select_fat_member(Path::new("thin"), &data).unwrap();
        assert_eq!(result.len(), 32);
    }
}
