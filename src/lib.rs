//! Zero-trust recursive extractor for Debian packages.
//!
//! A `.deb` is unpacked layer by layer (ar → tar → gzip/xz/zstd/bzip2/lzma →
//! tar → …) to any depth, with every output path confined beneath the
//! output directory and every nested archive checked against the depth
//! limit and its own ancestry.  The result is a [`Manifest`] that lists
//! every file written and every member that was refused, and why.

pub mod sniff;
pub mod codec;
pub mod io_stream;
pub mod guard;
pub mod member;
pub mod outer;
pub mod error;
pub mod manifest;
pub mod event;
pub mod task;
pub mod pool;
pub mod extract;
pub mod engine;

pub use sniff::{sniff, FormatKind};
pub use codec::{decode, get_codec, Codec, Decoded};
pub use guard::{AncestorSet, ArchiveFingerprint, CycleError, PathError, PathGuard, ResolvedPath};
pub use member::{ArchiveMember, MemberKind};
pub use outer::{parse_outer, OuterArchive};
pub use error::{ExtractionError, MemberFailure};
pub use manifest::{ErrorKind, Manifest, ManifestBuilder, ManifestEntry, ManifestError};
pub use event::{Event, EventSink, TracingSink};
pub use task::ExtractionTask;
pub use pool::{CancelToken, WorkerPool};
pub use extract::RecursiveExtractor;
pub use engine::{extract, Engine, ExtractOptions};
