//! Outer `.deb` layer validation.
//!
//! A Debian package is an `ar` archive whose first three members are, in
//! this exact order, `debian-binary`, `control.tar[.*]` and `data.tar[.*]`.
//! `dpkg-deb` relies on that order; a package that permutes it is reported
//! as [`ExtractionError::MemberOrderViolation`] instead of being treated as
//! ordinary corruption.
//!
//! Only the first three headers (and the few bytes of `debian-binary`) are
//! inspected here.  The payload members are left for the extractor.

use std::io::{self, Cursor, Read};

use crate::error::ExtractionError;
use crate::member::{for_each_member, ArchiveMember, Flow, IterationEnd};
use crate::sniff::FormatKind;

pub const AR_MAGIC: &[u8; 8] = b"!<arch>\n";
pub const DEBIAN_BINARY: &str = "debian-binary";
pub const CONTROL_PREFIX: &str = "control.tar";
pub const DATA_PREFIX: &str = "data.tar";

/// Upper bound on the `debian-binary` payload we are willing to read.
const VERSION_MAX_LEN: u64 = 64;

/// What [`parse_outer`] learned about a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OuterArchive {
    /// Trimmed content of `debian-binary`, e.g. `"2.0"`.
    pub version: String,
    /// `debian-binary`, control and data members, in that order.
    pub members: Vec<ArchiveMember>,
}

impl OuterArchive {
    pub fn control(&self) -> &ArchiveMember { &self.members[1] }
    pub fn data(&self) -> &ArchiveMember { &self.members[2] }
}

/// Validate the outer `ar` container of a package.
pub fn parse_outer<R: Read>(mut reader: R) -> Result<OuterArchive, ExtractionError> {
    let mut magic = [0u8; 8];
    match reader.read_exact(&mut magic) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(ExtractionError::NotAnArchive),
        Err(e) => return Err(e.into()),
    }
    if &magic != AR_MAGIC {
        return Err(ExtractionError::NotAnArchive);
    }

    let expected: [&'static str; 3] = [DEBIAN_BINARY, CONTROL_PREFIX, DATA_PREFIX];
    let mut members = Vec::with_capacity(3);
    let mut version = None;
    let mut failure: Option<ExtractionError> = None;

    let replay = Cursor::new(magic).chain(reader);
    let walked = for_each_member(FormatKind::Ar, replay, |member, body| {
        let position = members.len();
        let verdict = if position == 0 {
            check_version(member, body).map(|v| version = Some(v))
        } else {
            check_name(position, expected[position], &member.name)
        };
        if let Err(e) = verdict {
            failure = Some(e);
            return Flow::Stop;
        }
        members.push(member.clone());
        if members.len() == expected.len() { Flow::Stop } else { Flow::Continue }
    });

    if let Some(e) = failure {
        return Err(e);
    }
    match walked {
        Ok(IterationEnd::Stopped(_)) | Ok(IterationEnd::Exhausted(_)) => {}
        Err(e) => return Err(ExtractionError::Malformed(e.to_string())),
    }
    if members.len() < expected.len() {
        return Err(ExtractionError::MissingMember { expected: expected[members.len()] });
    }
    let version = version.ok_or(ExtractionError::MissingMember { expected: DEBIAN_BINARY })?;
    Ok(OuterArchive { version, members })
}

fn check_name(position: usize, prefix: &'static str, found: &str) -> Result<(), ExtractionError> {
    if found.starts_with(prefix) {
        Ok(())
    } else {
        Err(ExtractionError::MemberOrderViolation {
            position: position + 1,
            expected: prefix,
            found:    found.to_owned(),
        })
    }
}

fn check_version(member: &ArchiveMember, body: &mut dyn Read) -> Result<String, ExtractionError> {
    if member.name != DEBIAN_BINARY {
        return Err(ExtractionError::MemberOrderViolation {
            position: 1,
            expected: DEBIAN_BINARY,
            found:    member.name.clone(),
        });
    }
    let mut raw = Vec::new();
    body.take(VERSION_MAX_LEN).read_to_end(&mut raw)?;
    let text = String::from_utf8_lossy(&raw);
    let trimmed = text.trim();
    if is_supported_version(trimmed) {
        Ok(trimmed.to_owned())
    } else {
        Err(ExtractionError::UnsupportedVersion { found: trimmed.to_owned() })
    }
}

/// `2.0`, `2.1`, `2.0.1`: dotted numeric, major version 2.
pub fn is_supported_version(text: &str) -> bool {
    let Some(rest) = text.strip_prefix("2.") else {
        return false;
    };
    rest.split('.').all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
}
