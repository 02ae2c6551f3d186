//! Linux image enumeration via `dl_iterate_phdr`.
//!
//! For each loaded object, `dl_iterate_phdr` hands us a base address and its
//! program-header array; the image's extent is the union of its `PT_LOAD`
//! segments. Grounded on backtrace-rs's `symbolize/gimli.rs` Linux
//! `native_libraries`/`callback` pair, which walks the same structure for
//! the same reason.

use std::ffi::{CStr, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use super::{build, Image};

pub fn native_images() -> Vec<Image> {
    let mut images = Vec::new();
    unsafe {
        libc::dl_iterate_phdr(Some(callback), &mut images as *mut _ as *mut libc::c_void);
    }
    images
}

unsafe extern "C" fn callback(
    info: *mut libc::dl_phdr_info,
    _size: libc::size_t,
    data: *mut libc::c_void,
) -> libc::c_int {
    let images = &mut *(data as *mut Vec<Image>);

    let path: PathBuf = if (*info).dlpi_name.is_null() || *(*info).dlpi_name == 0 {
        if images.is_empty() {
            std::env::current_exe().unwrap_or_else(|_| PathBuf::from("/proc/self/exe"))
        } else {
            return 0;
        }
    } else {
        let name = CStr::from_ptr((*info).dlpi_name);
        PathBuf::from(OsStr::from_bytes(name.to_bytes()))
    };

    let bias = (*info).dlpi_addr as u64;
    let phdrs = std::slice::from_raw_parts((*info).dlpi_phdr, (*info).dlpi_phnum as usize);

    let mut lowest = u64::MAX;
    let mut highest = 0u64;
    for phdr in phdrs {
        if phdr.p_type != libc::PT_LOAD {
            continue;
        }
        let start = phdr.p_vaddr;
        let end = start + phdr.p_memsz;
        lowest = lowest.min(start);
        highest = highest.max(end);
    }

    if highest > lowest {
        images.push(build(&path, bias + lowest, bias + highest, bias));
    }

    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerates_at_least_the_main_executable() {
        let images = native_images();
        assert!(!images.is_empty());
    }
}
