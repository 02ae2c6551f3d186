//! BSD `ar` archive parsing for the `archive(member.o)` paths `N_OSO`
//! entries point at. `object::read::archive` already implements the BSD
//! format including the `#1/<len>` extended-name convention, so this module
//! is a thin address-by-name wrapper rather than a from-scratch header
//! parser — the same delegation this crate makes for ELF/Mach-O/DWARF.

use std::path::Path;

use object::read::archive::ArchiveFile;

use crate::error::{Error, Result};

/// Extracts the bytes of `member_name` from the `ar` archive at `path`.
pub fn extract_member(path: &Path, archive_data: &[u8], member_name: &str) -> Result<Vec<u8>> {
    let archive = ArchiveFile::parse(archive_data).map_err(|e| Error::ObjectParse(path.to_path_buf(), e))?;

    for member in archive.members() {
        let member = member.map_err(|e| Error::ObjectParse(path.to_path_buf(), e))?;
        if member.name() == member_name.as_bytes() {
            let data = member
                .data(archive_data)
                .map_err(|e| Error::ObjectParse(path.to_path_buf(), e))?;
            return Ok(data.to_vec());
        }
    }

    Err(Error::NoSuchArchiveMember(path.to_path_buf(), member_name.to_owned()))
}

/// Splits the `archive(member.o)` synthetic path an `N_OSO` entry records
/// into its archive path and member name, or returns `None` if `path`
/// doesn't use that convention.
pub fn split_archive_member_path(path: &str) -> Option<(&str, &str)> {
    let open = path.find('(')?;
    if !path.ends_with(')') {
        return None;
    }
    let archive = &path[..open];
    let member = &path[open + 1..path.len() - 1];
    if archive.is_empty() || member.is_empty() {
        return None;
    }
    Some((archive, member))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_archive_member_syntax() {
        assert_eq!(
            split_archive_member_path("/build/libfoo.a(main.o)"),
            Some(("/build/libfoo.a", "main.o"))
        );
        assert_eq!(split_archive_member_path("/build/plain.o"), None);
    }
}
