//! Run-level errors and per-member failure values.
//!
//! [`ExtractionError`] is fatal: it means the outer package could not be
//! parsed at all and no extraction took place.  Everything that goes wrong
//! *inside* the package is a [`MemberFailure`] value that the extractor turns
//! into a manifest record before moving on.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::guard::{CycleError, PathError};
use crate::io_stream::{is_exhaustion, StreamError};
use crate::manifest::ErrorKind;
use crate::sniff::FormatKind;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Not an ar archive (missing !<arch> magic)")]
    NotAnArchive,
    #[error("Unsupported debian-binary version: {found:?}")]
    UnsupportedVersion { found: String },
    #[error("Package ends before member {expected}")]
    MissingMember { expected: &'static str },
    #[error("Member #{position} should be {expected}, found {found:?}")]
    MemberOrderViolation { position: usize, expected: &'static str, found: String },
    #[error("Malformed outer archive: {0}")]
    Malformed(String),
    #[error("Cannot prepare output directory {path}: {source}")]
    OutputDir { path: PathBuf, #[source] source: io::Error },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Manifest serialization error: {0}")]
    Manifest(#[from] serde_json::Error),
}

/// Why one member (or the rest of one task) was not extracted.
#[derive(Error, Debug)]
pub enum MemberFailure {
    #[error("no decoder for {0} in this build")]
    Unsupported(FormatKind),
    #[error("{0}")]
    Corrupted(String),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("nesting depth {depth} exceeds limit {limit}")]
    DepthExceeded { depth: u32, limit: u32 },
    #[error(transparent)]
    Cycle(#[from] CycleError),
    #[error("{0}")]
    Exhausted(io::Error),
    #[error("IO error: {0}")]
    Io(io::Error),
}

impl MemberFailure {
    /// Classify an I/O error raised while writing output.
    pub fn from_write(err: io::Error) -> Self {
        if is_exhaustion(&err) { MemberFailure::Exhausted(err) } else { MemberFailure::Io(err) }
    }

    /// Classify an I/O error raised while reading a member stream.  Failing
    /// to read archive bytes means the archive is damaged.
    pub fn from_read(err: io::Error) -> Self {
        MemberFailure::Corrupted(err.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            MemberFailure::Unsupported(_)         => ErrorKind::UnsupportedFormat,
            MemberFailure::Corrupted(_)           => ErrorKind::Corrupted,
            MemberFailure::Path(e) if e.is_security_violation() => ErrorKind::PathTraversal,
            MemberFailure::Path(PathError::InvalidName { .. })  => ErrorKind::Corrupted,
            MemberFailure::Path(_)                => ErrorKind::Io,
            MemberFailure::DepthExceeded { .. }   => ErrorKind::DepthExceeded,
            MemberFailure::Cycle(_)               => ErrorKind::SelfReferential,
            MemberFailure::Exhausted(_)           => ErrorKind::ResourceExhausted,
            MemberFailure::Io(_)                  => ErrorKind::Io,
        }
    }

    /// Failures after which the task's input stream can no longer be
    /// trusted to be positioned at the next member.
    pub fn ends_task(&self) -> bool {
        matches!(self, MemberFailure::Corrupted(_) | MemberFailure::Exhausted(_))
    }
}

impl From<StreamError> for MemberFailure {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Read(e)  => MemberFailure::from_read(e),
            StreamError::Write(e) => MemberFailure::from_write(e),
        }
    }
}
