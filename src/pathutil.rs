//! Path helpers: "weakly canonical" absolute paths and process-relative paths.
//!
//! Both helpers always return a newly owned [`PathBuf`]; an absolute path
//! resolves symlinks where it can
//! but keeps non-existent trailing components as literal text, and a
//! relative path is relative to the process's current working directory.

use std::path::{Path, PathBuf};

/// Returns a weakly-canonical absolute version of `path`.
///
/// "Weakly canonical" means: resolve symlinks and `.`/`..` components for
/// the longest existing prefix of `path`, then append whatever suffix
/// doesn't exist on disk unchanged. This mirrors what `std::fs::canonicalize`
/// cannot do on its own, since it fails outright for paths with missing
/// components (a very common case for DWARF-recorded compiler paths on a
/// machine that doesn't have the build tree anymore).
pub fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        if let Ok(canonical) = path.canonicalize() {
            return canonical;
        }
    }

    let cwd = std::env::current_dir().unwrap_or_default();
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    };

    // Walk the longest existing ancestor and canonicalize just that part,
    // then reattach the non-existent suffix untouched.
    let mut existing_len = 0;
    for ancestor in joined.ancestors() {
        if ancestor.exists() {
            existing_len = ancestor.as_os_str().len();
            break;
        }
    }

    if existing_len == 0 {
        return joined;
    }

    let existing: PathBuf = joined
        .ancestors()
        .find(|a| a.as_os_str().len() == existing_len)
        .unwrap()
        .to_path_buf();

    match existing.canonicalize() {
        Ok(canonical_prefix) => {
            let suffix = joined.strip_prefix(&existing).unwrap_or(Path::new(""));
            canonical_prefix.join(suffix)
        }
        Err(_) => joined,
    }
}

/// Returns `path` relative to the process's current working directory, if
/// possible; otherwise returns `path` unchanged (as an owned buffer).
pub fn relative(path: &Path) -> PathBuf {
    let cwd = match std::env::current_dir() {
        Ok(cwd) => cwd,
        Err(_) => return path.to_path_buf(),
    };
    let abs = absolute(path);
    match abs.strip_prefix(&cwd) {
        Ok(stripped) => stripped.to_path_buf(),
        Err(_) => path.to_path_buf(),
    }
}
