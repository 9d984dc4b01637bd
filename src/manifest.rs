//! The JSON inventory of a run.
//!
//! Workers never touch the shared [`ManifestBuilder`] while doing I/O.  Each
//! task collects its records in a private [`Fragment`] (so its entries stay
//! in source-archive order) and commits the whole fragment under a short
//! lock when the task ends.  Records are append-only: nothing committed is
//! ever edited or removed.

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::member::MemberKind;
use crate::sniff::FormatKind;

// ── Records ──────────────────────────────────────────────────────────────────

/// Manifest `kind` of a recorded error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    UnsupportedFormat,
    Corrupted,
    PathTraversal,
    DepthExceeded,
    SelfReferential,
    ResourceExhausted,
    Io,
}

impl ErrorKind {
    /// Deliberately hostile input, logged apart from accidental damage.
    pub fn is_security(self) -> bool {
        matches!(self, ErrorKind::PathTraversal)
    }
}

/// A leaf file written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// `/`-separated, relative to the output directory.
    pub path:         String,
    pub size:         u64,
    /// `blake3:<hex>` of the bytes written.
    pub hash:         String,
    /// Names of the archives the file was reached through, outermost first.
    pub lineage:      Vec<String>,
    /// Hex BLAKE3 fingerprints matching `lineage` one-to-one.
    pub fingerprints: Vec<String>,
    /// Set when the member's own name was already taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collision_suffix: Option<u32>,
}

/// A member that was abandoned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestError {
    /// Raw member name as found in its container.
    pub member:  String,
    pub kind:    ErrorKind,
    pub detail:  String,
    #[serde(default)]
    pub lineage: Vec<String>,
}

/// A link or special file that was recorded but not materialised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedMember {
    pub member:  String,
    pub kind:    MemberKind,
    pub lineage: Vec<String>,
}

/// A fully expanded archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Output directory it expanded into, relative like entry paths
    /// (empty for the package itself).
    pub path:        String,
    pub format:      FormatKind,
    pub fingerprint: String,
    pub depth:       u32,
    pub members:     usize,
    pub lineage:     Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub files_extracted:   usize,
    pub errors:            usize,
    /// Skipped members plus renamed collisions.
    pub warnings:          usize,
    pub elapsed_ms:        u64,
    pub bytes_written:     u64,
    pub tasks_executed:    usize,
    pub max_depth_reached: u32,
    pub cancelled:         bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub input_file:            PathBuf,
    pub output_dir:            PathBuf,
    pub depth_limit:           u32,
    pub debian_binary_version: Option<String>,
    pub generated_at:          DateTime<Utc>,
    pub entries:               Vec<ManifestEntry>,
    pub errors:                Vec<ManifestError>,
    #[serde(default)]
    pub skipped:               Vec<SkippedMember>,
    #[serde(default)]
    pub containers:            Vec<ContainerRecord>,
    pub summary:               Summary,
}

impl Manifest {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn write_to<W: Write>(&self, writer: W) -> Result<(), serde_json::Error> {
        serde_json::to_writer_pretty(writer, self)
    }

    pub fn errors_of(&self, kind: ErrorKind) -> impl Iterator<Item = &ManifestError> {
        self.errors.iter().filter(move |e| e.kind == kind)
    }
}

// ── Builder ──────────────────────────────────────────────────────────────────

/// Records produced by one task, in the order they were produced.
#[derive(Debug, Default)]
pub struct Fragment {
    pub entries:    Vec<ManifestEntry>,
    pub errors:     Vec<ManifestError>,
    pub skipped:    Vec<SkippedMember>,
    pub containers: Vec<ContainerRecord>,
    pub depth:      u32,
}

#[derive(Debug, Default)]
struct Records {
    entries:        Vec<ManifestEntry>,
    errors:         Vec<ManifestError>,
    skipped:        Vec<SkippedMember>,
    containers:     Vec<ContainerRecord>,
    tasks_executed: usize,
    max_depth:      u32,
}

/// Run-level facts the builder does not collect itself.
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub input_file:            PathBuf,
    pub output_dir:            PathBuf,
    pub depth_limit:           u32,
    pub debian_binary_version: Option<String>,
    pub elapsed:               Duration,
    pub bytes_written:         u64,
    pub cancelled:             bool,
}

/// Append-only sink shared by every worker.
#[derive(Debug, Default)]
pub struct ManifestBuilder {
    records: Mutex<Records>,
}

impl ManifestBuilder {
    pub fn new() -> Self { Self::default() }

    /// Append one finished task's records.
    pub fn commit(&self, fragment: Fragment) {
        let mut records = self.lock();
        records.entries.extend(fragment.entries);
        records.errors.extend(fragment.errors);
        records.skipped.extend(fragment.skipped);
        records.containers.extend(fragment.containers);
        records.tasks_executed += 1;
        records.max_depth = records.max_depth.max(fragment.depth);
    }

    pub fn finalize(self, info: RunInfo) -> Manifest {
        let records = self.records.into_inner().unwrap_or_else(PoisonError::into_inner);
        let renamed = records.entries.iter().filter(|e| e.collision_suffix.is_some()).count();
        let summary = Summary {
            files_extracted:   records.entries.len(),
            errors:            records.errors.len(),
            warnings:          records.skipped.len() + renamed,
            elapsed_ms:        u64::try_from(info.elapsed.as_millis()).unwrap_or(u64::MAX),
            bytes_written:     info.bytes_written,
            tasks_executed:    records.tasks_executed,
            max_depth_reached: records.max_depth,
            cancelled:         info.cancelled,
        };
        Manifest {
            input_file:            info.input_file,
            output_dir:            info.output_dir,
            depth_limit:           info.depth_limit,
            debian_binary_version: info.debian_binary_version,
            generated_at:          Utc::now(),
            entries:               records.entries,
            errors:                records.errors,
            skipped:               records.skipped,
            containers:            records.containers,
            summary,
        }
    }

    // Records are whole even after a panic elsewhere; poison is ignored.
    fn lock(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
