//! Container member iteration for `ar` and `tar`.
//!
//! [`for_each_member`] drives either parser over a forward-only stream and
//! hands each member to a visitor together with a reader bounded to that
//! member's data.  Whatever the visitor leaves unread is skipped by the
//! underlying parser before the next header.

use std::io::{self, Read};
use std::sync::atomic::Ordering;

use serde::{Deserialize, Serialize};

use crate::io_stream::CountingReader;
use crate::sniff::FormatKind;

// ── ArchiveMember ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberKind {
    Regular,
    Directory,
    Symlink,
    Hardlink,
    /// Devices, FIFOs and anything else that is not plain data.
    Special,
}

/// One entry of an `ar` or `tar` container.  `name` is untrusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveMember {
    pub name:       String,
    pub size:       u64,
    pub kind:       MemberKind,
    /// Offset of the member's data within the container stream.
    pub raw_offset: u64,
}

/// Visitor verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// How iteration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationEnd {
    /// End of archive reached; carries the member count.
    Exhausted(usize),
    /// The visitor asked to stop after this many members.
    Stopped(usize),
}

// ── Iteration ────────────────────────────────────────────────────────────────

/// Visit every member of a container.
///
/// `Err` means a header could not be parsed: the container is damaged and
/// nothing after that point can be located.
pub fn for_each_member<R, F>(format: FormatKind, reader: R, visit: F) -> io::Result<IterationEnd>
where
    R: Read,
    F: FnMut(&ArchiveMember, &mut dyn Read) -> Flow,
{
    match format {
        FormatKind::Ar  => ar_members(reader, visit),
        FormatKind::Tar => tar_members(reader, visit),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{other} is not a container"),
        )),
    }
}

fn ar_members<R, F>(reader: R, mut visit: F) -> io::Result<IterationEnd>
where
    R: Read,
    F: FnMut(&ArchiveMember, &mut dyn Read) -> Flow,
{
    let (counting, position) = CountingReader::new(reader);
    let mut archive = ar::Archive::new(counting);
    let mut count = 0usize;
    while let Some(entry) = archive.next_entry() {
        let mut entry = entry?;
        let member = ArchiveMember {
            name:       ar_name(entry.header().identifier()),
            size:       entry.header().size(),
            kind:       MemberKind::Regular,
            raw_offset: position.load(Ordering::Relaxed),
        };
        count += 1;
        if visit(&member, &mut entry) == Flow::Stop {
            return Ok(IterationEnd::Stopped(count));
        }
    }
    Ok(IterationEnd::Exhausted(count))
}

/// GNU ar terminates short names with `/`; the common format pads with spaces.
pub fn ar_name(identifier: &[u8]) -> String {
    String::from_utf8_lossy(identifier)
        .trim_end_matches(' ')
        .trim_end_matches('/')
        .to_owned()
}

fn tar_members<R, F>(reader: R, mut visit: F) -> io::Result<IterationEnd>
where
    R: Read,
    F: FnMut(&ArchiveMember, &mut dyn Read) -> Flow,
{
    let mut archive = tar::Archive::new(reader);
    let mut count = 0usize;
    for entry in archive.entries()? {
        let mut entry = entry?;
        let kind = match entry.header().entry_type() {
            tar::EntryType::Regular | tar::EntryType::Continuous | tar::EntryType::GNUSparse => {
                MemberKind::Regular
            }
            tar::EntryType::Directory => MemberKind::Directory,
            tar::EntryType::Symlink   => MemberKind::Symlink,
            tar::EntryType::Link      => MemberKind::Hardlink,
            // Metadata records carry no member of their own.
            tar::EntryType::XGlobalHeader
            | tar::EntryType::XHeader
            | tar::EntryType::GNULongName
            | tar::EntryType::GNULongLink => continue,
            _ => MemberKind::Special,
        };
        let member = ArchiveMember {
            name:       String::from_utf8_lossy(&entry.path_bytes()).into_owned(),
            size:       entry.size(),
            kind,
            raw_offset: entry.raw_file_position(),
        };
        count += 1;
        if visit(&member, &mut entry) == Flow::Stop {
            return Ok(IterationEnd::Stopped(count));
        }
    }
    Ok(IterationEnd::Exhausted(count))
}
