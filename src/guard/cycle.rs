//! Self-reference detection for nested archives.
//!
//! An archive that contains itself (directly, or through a chain of
//! containers) would recurse until the depth cap.  Each task carries the
//! fingerprints of the archives on its own lineage; a child whose content
//! hash matches one of them is refused.
//!
//! The set is per-branch and copied on descent.  Two byte-identical sibling
//! archives are *not* a cycle and both get extracted: only ancestry counts.

use std::fmt;

use serde::{Serialize, Serializer};
use thiserror::Error;

/// BLAKE3 digest of an archive's raw (pre-decompression) bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArchiveFingerprint(pub [u8; 32]);

impl ArchiveFingerprint {
    pub fn of(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).into())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; 32]> for ArchiveFingerprint {
    fn from(digest: [u8; 32]) -> Self { Self(digest) }
}

impl fmt::Display for ArchiveFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blake3:{}", self.to_hex())
    }
}

impl fmt::Debug for ArchiveFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArchiveFingerprint({})", &self.to_hex()[..16])
    }
}

impl Serialize for ArchiveFingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CycleError {
    #[error("Archive {fingerprint} is its own ancestor")]
    SelfReferential { fingerprint: ArchiveFingerprint },
}

/// Fingerprints of every archive between the root and the current task,
/// inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AncestorSet {
    fingerprints: Vec<ArchiveFingerprint>,
}

impl AncestorSet {
    pub fn new() -> Self { Self::default() }

    pub fn contains(&self, fingerprint: &ArchiveFingerprint) -> bool {
        self.fingerprints.contains(fingerprint)
    }

    pub fn len(&self) -> usize { self.fingerprints.len() }

    pub fn is_empty(&self) -> bool { self.fingerprints.is_empty() }

    /// Copy for a child branch with `fingerprint` appended.
    pub fn branch(&self, fingerprint: ArchiveFingerprint) -> Self {
        let mut fingerprints = Vec::with_capacity(self.fingerprints.len() + 1);
        fingerprints.extend_from_slice(&self.fingerprints);
        fingerprints.push(fingerprint);
        Self { fingerprints }
    }
}

impl FromIterator<ArchiveFingerprint> for AncestorSet {
    fn from_iter<I: IntoIterator<Item = ArchiveFingerprint>>(iter: I) -> Self {
        Self { fingerprints: iter.into_iter().collect() }
    }
}

/// Check that `fingerprint` may be expanded beneath `ancestors`.
pub fn enter(fingerprint: ArchiveFingerprint, ancestors: &AncestorSet) -> Result<(), CycleError> {
    if ancestors.contains(&fingerprint) {
        return Err(CycleError::SelfReferential { fingerprint });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ancestor_match_is_refused() {
        let root = ArchiveFingerprint::of(b"root");
        let mid = ArchiveFingerprint::of(b"mid");
        let root_set = AncestorSet::new().branch(root);
        enter(mid, &root_set).unwrap();
        let branch = root_set.branch(mid);
        assert_eq!(branch.len(), 2);
        assert_eq!(enter(root, &branch), Err(CycleError::SelfReferential { fingerprint: root }));
        assert!(enter(mid, &branch).is_err());
    }

    #[test]
    fn siblings_do_not_share_state() {
        let root = AncestorSet::new().branch(ArchiveFingerprint::of(b"root"));
        let twin = ArchiveFingerprint::of(b"same bytes");
        enter(twin, &root).unwrap();
        let left = root.branch(twin);
        enter(twin, &root).unwrap();
        let right = root.branch(twin);
        assert_eq!(left, right);
        assert_eq!(root.len(), 1);
    }

    #[test]
    fn display_is_prefixed_hex() {
        let fp = ArchiveFingerprint::of(b"");
        let shown = fp.to_string();
        assert!(shown.starts_with("blake3:af1349b9"));
        assert_eq!(shown.len(), "blake3:".len() + 64);
        assert_eq!(serde_json::to_string(&fp).unwrap(), format!("\"{shown}\""));
    }
}
