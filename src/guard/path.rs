//! Output path confinement.
//!
//! Every member name inside an archive is attacker-controlled.  A name is
//! turned into an output path in two phases:
//!
//! 1. **Lexical** ([`sanitize`]): separators are normalised to `/`; absolute
//!    forms (`/etc`, `C:\`, `\\server\share`) and any `..` component are
//!    rejected outright.  Nothing is "fixed": a hostile name is refused, never
//!    rewritten into something that looks benign.
//! 2. **On disk** ([`PathGuard::resolve`]): the surviving segments are joined
//!    onto the confinement root one at a time.  After every join whose target
//!    already exists, the canonical form is re-checked against the canonical
//!    root, so a symlink planted anywhere along the way cannot redirect the
//!    write outside it.  This is the user-space rendition of
//!    `openat2(RESOLVE_BENEATH)`.
//!
//! # Collisions
//! Nested archives unpacking into one tree collide routinely.  An occupied
//! file name gets a numeric suffix (`file.txt` → `file (1).txt`) instead of
//! being overwritten or failing the extraction.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Upper bound on `name (n).ext` attempts for one candidate.
pub const MAX_COLLISION_SUFFIX: u32 = 10_000;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum PathError {
    #[error("Absolute path rejected: {candidate}")]
    Absolute { candidate: String },
    #[error("Parent-directory traversal rejected: {candidate}")]
    Traversal { candidate: String },
    /// A path that already exists on disk resolves outside the root.
    #[error("Path escapes confinement root: {candidate} -> {resolved}")]
    Escape { candidate: String, resolved: PathBuf },
    #[error("Invalid member name: {candidate:?}")]
    InvalidName { candidate: String },
    #[error("Existing non-directory blocks the path: {path}")]
    NotADirectory { path: PathBuf },
    #[error("No free name for {candidate} after {MAX_COLLISION_SUFFIX} attempts")]
    Collisions { candidate: String },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl PathError {
    /// Deliberately hostile names, as opposed to accidental damage.
    pub fn is_security_violation(&self) -> bool {
        matches!(
            self,
            PathError::Absolute { .. } | PathError::Traversal { .. } | PathError::Escape { .. }
        )
    }
}

// ── ResolvedPath ─────────────────────────────────────────────────────────────

/// A confined output location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Always a descendant of the root it was resolved against.
    pub absolute_path:    PathBuf,
    /// Set when the original name was taken and a suffix was appended.
    pub collision_suffix: Option<u32>,
}

// ── Lexical phase ────────────────────────────────────────────────────────────

/// Split an untrusted name into safe relative segments.
///
/// `./` and empty segments are dropped, so `./usr//bin/` yields
/// `["usr", "bin"]` and a bare `./` yields no segments at all.
pub fn sanitize(candidate: &str) -> Result<Vec<String>, PathError> {
    if candidate.contains('\0') {
        return Err(PathError::InvalidName { candidate: candidate.to_owned() });
    }
    let normalized = candidate.replace('\\', "/");
    if normalized.starts_with('/') || has_drive_prefix(&normalized) {
        return Err(PathError::Absolute { candidate: candidate.to_owned() });
    }

    let mut segments = Vec::new();
    for segment in normalized.split('/') {
        match segment {
            "" | "." => continue,
            ".."     => return Err(PathError::Traversal { candidate: candidate.to_owned() }),
            s        => segments.push(s.to_owned()),
        }
    }
    Ok(segments)
}

/// `C:`, `c:foo`: drive-relative forms count as absolute.
fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

// ── PathGuard ────────────────────────────────────────────────────────────────

/// Resolver bound to one confinement root.
#[derive(Debug, Clone)]
pub struct PathGuard {
    root:           PathBuf,
    canonical_root: PathBuf,
}

impl PathGuard {
    /// The root must already exist.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, PathError> {
        let root = root.as_ref().to_path_buf();
        let canonical_root = fs::canonicalize(&root)?;
        Ok(Self { root, canonical_root })
    }

    pub fn root(&self) -> &Path { &self.root }

    /// Resolve a file name to a free, confined output path.
    pub fn resolve(&self, candidate: &str) -> Result<ResolvedPath, PathError> {
        let segments = sanitize(candidate)?;
        let Some((leaf, parents)) = segments.split_last() else {
            return Err(PathError::InvalidName { candidate: candidate.to_owned() });
        };
        let parent = self.walk(candidate, parents)?;
        self.claim_leaf(candidate, &parent, leaf, false)
    }

    /// Resolve a directory name.  An existing directory is reused (merging
    /// trees is expected); an existing file forces a suffixed name.  No
    /// segments at all resolves to the root itself.
    pub fn resolve_dir(&self, candidate: &str) -> Result<ResolvedPath, PathError> {
        let segments = sanitize(candidate)?;
        let Some((leaf, parents)) = segments.split_last() else {
            return Ok(ResolvedPath { absolute_path: self.root.clone(), collision_suffix: None });
        };
        let parent = self.walk(candidate, parents)?;
        self.claim_leaf(candidate, &parent, leaf, true)
    }

    /// Join `segments` onto the root one at a time, re-validating every
    /// segment that exists on disk.
    fn walk(&self, candidate: &str, segments: &[String]) -> Result<PathBuf, PathError> {
        let mut current = self.root.clone();
        let mut on_disk = true;
        for segment in segments {
            current.push(segment);
            if !on_disk {
                continue;
            }
            match fs::symlink_metadata(&current) {
                Ok(_) => {
                    let canonical = self.confined(candidate, &current)?;
                    if !canonical.is_dir() {
                        return Err(PathError::NotADirectory { path: current });
                    }
                }
                // Nothing below a missing segment can exist either; those
                // directories will be created fresh by the extractor.
                Err(e) if e.kind() == io::ErrorKind::NotFound => on_disk = false,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(current)
    }

    /// Canonicalise an existing path and verify it stays under the root.
    fn confined(&self, candidate: &str, path: &Path) -> Result<PathBuf, PathError> {
        let canonical = match fs::canonicalize(path) {
            Ok(c) => c,
            // A dangling symlink: its target is unknowable, so refuse it.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(PathError::Escape {
                    candidate: candidate.to_owned(),
                    resolved:  path.to_path_buf(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        if !canonical.starts_with(&self.canonical_root) {
            return Err(PathError::Escape { candidate: candidate.to_owned(), resolved: canonical });
        }
        Ok(canonical)
    }

    fn claim_leaf(
        &self,
        candidate: &str,
        parent:    &Path,
        leaf:      &str,
        want_dir:  bool,
    ) -> Result<ResolvedPath, PathError> {
        for n in 0..=MAX_COLLISION_SUFFIX {
            let name = if n == 0 { leaf.to_owned() } else { suffixed(leaf, n) };
            let path = parent.join(&name);
            let suffix = (n > 0).then_some(n);
            match fs::symlink_metadata(&path) {
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Ok(ResolvedPath { absolute_path: path, collision_suffix: suffix });
                }
                Err(e) => return Err(e.into()),
                Ok(_) => {
                    let canonical = self.confined(candidate, &path)?;
                    if want_dir && canonical.is_dir() {
                        return Ok(ResolvedPath { absolute_path: path, collision_suffix: suffix });
                    }
                }
            }
        }
        Err(PathError::Collisions { candidate: candidate.to_owned() })
    }
}

/// Convenience wrapper: resolve a file name against `root` in one call.
pub fn resolve(candidate: &str, confinement_root: &Path) -> Result<ResolvedPath, PathError> {
    PathGuard::new(confinement_root)?.resolve(candidate)
}

/// `file.txt` → `file (n).txt`; `README` → `README (n)`; `.profile` → `.profile (n)`.
pub fn suffixed(name: &str, n: u32) -> String {
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{} ({n}){}", &name[..dot], &name[dot..]),
        _                    => format!("{name} ({n})"),
    }
}
