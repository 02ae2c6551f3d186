//! macOS image enumeration via `_dyld_image_count`/`_dyld_get_image_header`.
//!
//! Walks each image's load commands once to find its `__TEXT` segment (the
//! image's stated extent before the dyld slide is applied) and the
//! `__PAGEZERO` segment (whose size is folded into the relocation offset so
//! file-relative addresses line up with runtime addresses). Grounded on
//! backtrace-rs's `symbolize/gimli.rs` macOS `native_library`/`segment` pair.

use std::ffi::CStr;
use std::path::PathBuf;

use super::{build, Image};

pub fn native_images() -> Vec<Image> {
    let mut images = Vec::new();
    unsafe {
        for i in 0..libc::_dyld_image_count() {
            if let Some(image) = native_image(i) {
                images.push(image);
            }
        }
    }
    images
}

struct Extent {
    text_vmaddr: u64,
    text_vmsize: u64,
    pagezero_size: u64,
}

unsafe fn native_image(index: u32) -> Option<Image> {
    let name = libc::_dyld_get_image_name(index);
    if name.is_null() {
        return None;
    }
    let path = PathBuf::from(CStr::from_ptr(name).to_string_lossy().into_owned());

    let header = libc::_dyld_get_image_header(index);
    if header.is_null() {
        return None;
    }

    let extent = match (*header).magic {
        libc::MH_MAGIC => extent_32(header as *const libc::mach_header),
        libc::MH_MAGIC_64 => extent_64(header as *const libc::mach_header_64),
        _ => return None,
    }?;

    #[allow(deprecated)]
    let slide = libc::_dyld_get_image_vmaddr_slide(index) as u64;

    let start = slide.wrapping_add(extent.text_vmaddr);
    let end = start.wrapping_add(extent.text_vmsize);
    // __PAGEZERO's size is folded into the address offset alongside the
    // dyld slide.
    let relocation_offset = slide.wrapping_add(extent.pagezero_size);

    Some(build(&path, start, end, relocation_offset))
}

unsafe fn extent_64(header: *const libc::mach_header_64) -> Option<Extent> {
    let mut text_vmaddr = None;
    let mut text_vmsize = 0u64;
    let mut pagezero_size = 0u64;

    let mut cursor = header.offset(1) as *const libc::load_command;
    for _ in 0..(*header).ncmds {
        if (*cursor).cmd == libc::LC_SEGMENT_64 {
            let seg = cursor as *const libc::segment_command_64;
            let seg_name = CStr::from_ptr((*seg).segname.as_ptr())
                .to_string_lossy()
                .into_owned();
            if seg_name == "__TEXT" {
                text_vmaddr = Some((*seg).vmaddr);
                text_vmsize = (*seg).vmsize;
            } else if seg_name == "__PAGEZERO" {
                pagezero_size = (*seg).vmsize;
            }
        }
        cursor = (cursor as usize + (*cursor).cmdsize as usize) as *const libc::load_command;
    }

    Some(Extent {
        text_vmaddr: text_vmaddr?,
        text_vmsize,
        pagezero_size,
    })
}

unsafe fn extent_32(header: *const libc::mach_header) -> Option<Extent> {
    let mut text_vmaddr = None;
    let mut text_vmsize = 0u64;
    let mut pagezero_size = 0u64;

    let mut cursor = header.offset(1) as *const libc::load_command;
    for _ in 0..(*header).ncmds {
        if (*cursor).cmd == libc::LC_SEGMENT {
            let seg = cursor as *const libc::segment_command;
            let seg_name = CStr::from_ptr((*seg).segname.as_ptr())
                .to_string_lossy()
                .into_owned();
            if seg_name == "__TEXT" {
                text_vmaddr = Some((*seg).vmaddr as u64);
                text_vmsize = (*seg).vmsize as u64;
            } else if seg_name == "__PAGEZERO" {
                pagezero_size = (*seg).vmsize as u64;
            }
        }
        cursor = (cursor as usize + (*cursor).cmdsize as usize) as *const libc::load_command;
    }

    Some(Extent {
        text_vmaddr: text_vmaddr?,
        text_vmsize,
        pagezero_size,
    })
}
