//! Safety checks applied before any byte is written or any task is spawned.

pub mod cycle;
pub mod path;

pub use cycle::{AncestorSet, ArchiveFingerprint, CycleError};
pub use path::{PathError, PathGuard, ResolvedPath};
