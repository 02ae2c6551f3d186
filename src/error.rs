//! The error type used throughout this crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while mapping, parsing, or translating.
///
/// Most of these are surfaced only to callers that want to understand *why*
/// a frame came back uninformative; per the error-handling design, a single
/// malformed image or unreadable file does not fail an entire backtrace
/// translation. See [`crate::translator::Translator::translate`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("failed to read {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("{0:?} could not be parsed as an object file: {1}")]
    ObjectParse(PathBuf, #[source] object::read::Error),

    #[error("fat archive at {0:?} is empty")]
    EmptyFatArchive(PathBuf),

    #[error("fat archive at {0:?} has no member matching the running architecture")]
    NoMatchingFatArchiveMember(PathBuf),

    #[error("ar archive at {0:?} has no member named {1:?}")]
    NoSuchArchiveMember(PathBuf, String),

    #[error("stab entries in {0:?} are malformed: {1}")]
    MalformedStabs(PathBuf, &'static str),

    #[error("could not create a DWARF context for {0:?}: {1}")]
    DwarfContext(PathBuf, #[source] gimli::Error),

    #[error("{0:?} has no debug information")]
    NoDebugInfo(PathBuf),

    #[error("no disambiguator was supplied for the universal binary at {0:?}")]
    NoDisambiguatorForFatArchive(PathBuf),
}

pub type Result<T> = std::result::Result<T, Error>;
