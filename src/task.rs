//! Units of work handed to the pool.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use crate::guard::{AncestorSet, ArchiveFingerprint};
use crate::io_stream::Spooled;

/// Where a task's bytes come from.
#[derive(Debug)]
pub enum TaskSource {
    /// The package on disk.
    File(PathBuf),
    /// A nested archive copied out of its parent.  Deleted on drop.
    Spool(Spooled),
}

impl TaskSource {
    pub fn open(&self) -> io::Result<File> {
        File::open(self.path())
    }

    pub fn path(&self) -> &Path {
        match self {
            TaskSource::File(path)     => path.as_path(),
            TaskSource::Spool(spooled) => &spooled.path,
        }
    }
}

/// One archive on the provenance chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineageLink {
    pub name:        String,
    pub fingerprint: ArchiveFingerprint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRole {
    /// The outer `.deb`: expands straight into the output root and skips
    /// its `debian-binary` member.
    Package,
    Nested,
}

#[derive(Debug)]
pub struct ExtractionTask {
    pub source:     TaskSource,
    /// Directory the archive was found in; nothing this task writes may
    /// resolve outside it.
    pub output_dir: PathBuf,
    pub depth:      u32,
    /// Outermost first, ending with this task's own archive.
    pub lineage:    Vec<LineageLink>,
    /// Fingerprints of `lineage`; copied and extended per child, never shared.
    pub ancestors:  AncestorSet,
    /// File name the archive had in its parent.
    pub path_hint:  String,
    pub role:       TaskRole,
}

impl ExtractionTask {
    /// Root task for a package.
    pub fn package(
        path:        PathBuf,
        output_dir:  PathBuf,
        label:       &str,
        fingerprint: ArchiveFingerprint,
    ) -> Self {
        Self {
            source:    TaskSource::File(path),
            output_dir,
            depth:     0,
            lineage:   vec![LineageLink { name: label.to_owned(), fingerprint }],
            ancestors: AncestorSet::new().branch(fingerprint),
            path_hint: label.to_owned(),
            role:      TaskRole::Package,
        }
    }

    /// Child task for an archive found inside this one.
    pub fn child(
        &self,
        source:      TaskSource,
        output_dir:  PathBuf,
        name:        &str,
        fingerprint: ArchiveFingerprint,
    ) -> Self {
        let mut lineage = Vec::with_capacity(self.lineage.len() + 1);
        lineage.extend_from_slice(&self.lineage);
        lineage.push(LineageLink { name: name.to_owned(), fingerprint });
        Self {
            source,
            output_dir,
            depth:     self.depth + 1,
            lineage,
            ancestors: self.ancestors.branch(fingerprint),
            path_hint: name.to_owned(),
            role:      TaskRole::Nested,
        }
    }

    pub fn ancestors(&self) -> &AncestorSet {
        &self.ancestors
    }

    pub fn fingerprint(&self) -> Option<ArchiveFingerprint> {
        self.lineage.last().map(|link| link.fingerprint)
    }

    pub fn lineage_names(&self) -> Vec<String> {
        self.lineage.iter().map(|link| link.name.clone()).collect()
    }

    pub fn lineage_fingerprints(&self) -> Vec<String> {
        self.lineage.iter().map(|link| link.fingerprint.to_hex()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_extends_lineage() {
        let root_fp = ArchiveFingerprint::of(b"deb");
        let root = ExtractionTask::package("pkg.deb".into(), "out".into(), "debian-binary", root_fp);
        let child_fp = ArchiveFingerprint::of(b"data");
        let child = root.child(TaskSource::File("x".into()), "out".into(), "data.tar.xz", child_fp);
        assert_eq!(child.depth, 1);
        assert_eq!(child.role, TaskRole::Nested);
        assert_eq!(child.lineage_names(), ["debian-binary", "data.tar.xz"]);
        assert!(child.ancestors().contains(&root_fp));
        assert!(child.ancestors().contains(&child_fp));
        assert_eq!(child.ancestors().len(), 2);
        assert_eq!(root.ancestors().len(), 1);
        assert_eq!(root.lineage.len(), 1);
        assert_eq!(child.fingerprint(), Some(child_fp));
    }
}
