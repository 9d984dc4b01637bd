//! The recursive extraction core.
//!
//! Every [`ExtractionTask`] walks the same state machine:
//!
//! ```text
//! Sniffing ──► Decoding ──► Iterating ──► per-member dispatch ──► Draining
//!    │             │            │                                   │
//!    └─────────────┴────────────┴──────► Abandoned           Completed
//! ```
//!
//! * **Sniffing**: the first [`PEEK_WINDOW`] bytes of the source decide the
//!   format; the prefix is replayed in front of the rest of the stream.
//! * **Decoding**: a compressed source is wrapped in its streaming decoder
//!   and the decoded prefix is sniffed again.  A container is iterated, a
//!   further compression layer becomes a child task, anything else is
//!   written as a single file.
//! * **Iterating**: each member is checked by [`PathGuard`] first.  A
//!   regular member whose own bytes sniff as an archive is spooled,
//!   fingerprinted, checked against the depth limit and the branch's
//!   ancestors, and submitted as a child task.  Everything else is streamed
//!   to disk through a BLAKE3 tee.
//!
//! A failing member becomes a manifest error and iteration moves on.  Only
//! failures that leave the stream unusable (corruption, truncation, an
//! exhausted budget) abandon the rest of the task.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Cursor, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::codec::{archive_stem, decode, decoded_name, rejects_window, Decoded};
use crate::error::MemberFailure;
use crate::event::{Event, EventSink};
use crate::guard::cycle;
use crate::guard::path::sanitize;
use crate::guard::{ArchiveFingerprint, PathError, PathGuard, ResolvedPath};
use crate::io_stream::{copy_stream, spool, Budget, BudgetedWriter, HashingWriter, COPY_BUFFER_SIZE};
use crate::manifest::{
    ContainerRecord, Fragment, Manifest, ManifestBuilder, ManifestEntry, ManifestError, RunInfo,
    SkippedMember,
};
use crate::member::{for_each_member, ArchiveMember, Flow, MemberKind};
use crate::outer::DEBIAN_BINARY;
use crate::pool::{CancelToken, PoolStats, Spawner, Submitted, WorkerPool};
use crate::sniff::{peek, sniff, FormatKind, PEEK_WINDOW};
use crate::task::{ExtractionTask, TaskRole, TaskSource};

/// Attempts at claiming a fresh output file when a concurrent task takes the
/// name first.
const CREATE_RETRIES: u32 = 8;

/// Settings the extractor needs from the run configuration.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Root every manifest path is relative to.
    pub output_root:     PathBuf,
    pub depth_limit:     u32,
    /// Where nested archives are spooled.
    pub spool_dir:       PathBuf,
    pub max_total_bytes: Option<u64>,
    /// Cap on bytes held in spool files at any one time.
    pub max_spool_bytes: Option<u64>,
}

pub struct RecursiveExtractor {
    config:   ExtractorConfig,
    /// Canonical form of `config.output_root`; guards hand back canonical paths.
    root:     PathBuf,
    budget:   Budget,
    spool:    Arc<Budget>,
    manifest: ManifestBuilder,
    events:   Arc<dyn EventSink>,
    cancel:   CancelToken,
}

impl RecursiveExtractor {
    pub fn new(config: ExtractorConfig, events: Arc<dyn EventSink>, cancel: CancelToken) -> Self {
        Self {
            root: fs::canonicalize(&config.output_root).unwrap_or_else(|_| config.output_root.clone()),
            budget: Budget::new(config.max_total_bytes),
            spool: Arc::new(Budget::new(config.max_spool_bytes)),
            manifest: ManifestBuilder::new(),
            config,
            events,
            cancel,
        }
    }

    pub fn config(&self) -> &ExtractorConfig { &self.config }

    pub fn bytes_written(&self) -> u64 { self.budget.used() }

    /// Drain `root` and every task it produces on `pool`.
    pub fn run(&self, root: ExtractionTask, pool: &WorkerPool) -> PoolStats {
        self.events.emit(Event::TaskEnqueued { path_hint: root.path_hint.clone(), depth: root.depth });
        pool.run(root, |task, spawner| self.process(task, spawner))
    }

    /// Execute one task and commit its records.
    pub fn process(&self, task: ExtractionTask, spawner: &Spawner<'_, ExtractionTask>) {
        let mut run = TaskRun::new(self, &task);
        run.execute(spawner);
        self.events.emit(Event::TaskFinished {
            path_hint: task.path_hint.clone(),
            depth:     task.depth,
            members:   run.members,
            abandoned: run.abandoned,
        });
        self.manifest.commit(run.fragment);
    }

    pub fn into_manifest(self, mut info: RunInfo) -> Manifest {
        info.bytes_written = self.budget.used();
        info.cancelled |= self.cancel.is_cancelled();
        self.manifest.finalize(info)
    }

    /// Manifest form of an output path: relative to the output root, `/`-separated.
    fn relative(&self, path: &Path) -> String {
        let relative = path
            .strip_prefix(&self.root)
            .or_else(|_| path.strip_prefix(&self.config.output_root))
            .unwrap_or(path);
        relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/")
    }
}

// ── Per-task state ───────────────────────────────────────────────────────────

struct TaskRun<'x> {
    extractor: &'x RecursiveExtractor,
    task:      &'x ExtractionTask,
    fragment:  Fragment,
    format:    FormatKind,
    members:   usize,
    abandoned: bool,
    cancelled: bool,
}

impl<'x> TaskRun<'x> {
    fn new(extractor: &'x RecursiveExtractor, task: &'x ExtractionTask) -> Self {
        Self {
            extractor,
            task,
            fragment: Fragment { depth: task.depth, ..Fragment::default() },
            format: FormatKind::Unknown,
            members: 0,
            abandoned: false,
            cancelled: false,
        }
    }

    fn emit(&self, event: Event) {
        self.extractor.events.emit(event);
    }

    /// Record `failure` against `member`.
    fn fail(&mut self, member: &str, failure: MemberFailure) {
        let kind = failure.kind();
        let detail = failure.to_string();
        if failure.ends_task() {
            self.abandoned = true;
        }
        self.emit(Event::ErrorRecorded { member: member.to_owned(), kind, detail: detail.clone() });
        self.fragment.errors.push(ManifestError {
            member: member.to_owned(),
            kind,
            detail,
            lineage: self.task.lineage_names(),
        });
    }

    // ── Sniffing / Decoding ──────────────────────────────────────────────────

    fn execute(&mut self, spawner: &Spawner<'_, ExtractionTask>) {
        let hint = self.task.path_hint.clone();
        let file = match self.task.source.open() {
            Ok(file) => file,
            Err(e) => return self.fail(&hint, MemberFailure::Io(e)),
        };
        let mut reader = BufReader::with_capacity(COPY_BUFFER_SIZE, file);
        let prefix = match peek(&mut reader, PEEK_WINDOW) {
            Ok(prefix) => prefix,
            Err(e) => return self.fail(&hint, MemberFailure::from_read(e)),
        };
        self.format = sniff(&prefix);
        self.emit(Event::TaskStarted { path_hint: hint.clone(), depth: self.task.depth, format: self.format });
        let input = Cursor::new(prefix).chain(reader);

        if self.format.is_container() {
            return self.expand(self.format, input, spawner);
        }
        if !self.format.is_compressed() {
            return self.fail(&hint, MemberFailure::Unsupported(self.format));
        }

        let mut decoded = match decode(self.format, input) {
            Ok(Decoded::Stream(stream)) => stream,
            Ok(Decoded::Unsupported { kind, .. }) => return self.fail(&hint, MemberFailure::Unsupported(kind)),
            Err(e) => return self.fail(&hint, MemberFailure::from_read(e)),
        };
        let inner_prefix = match peek(&mut decoded, PEEK_WINDOW) {
            Ok(prefix) => prefix,
            // The LZMA signature is weak; a stream that does not decode was
            // most likely never LZMA at all.
            Err(e) if self.format == FormatKind::Lzma => {
                tracing::debug!(path_hint = %hint, error = %e, "not lzma after all; keeping raw bytes");
                if let Err(failure) = self.raw_leaf() {
                    self.fail(&hint, failure);
                }
                return;
            }
            Err(e) => return self.fail(&hint, MemberFailure::from_read(e)),
        };
        let inner = classify(&inner_prefix);
        let mut stream = Cursor::new(inner_prefix).chain(decoded);

        if inner.is_container() {
            return self.expand(inner, stream, spawner);
        }
        let name = decoded_name(&hint).to_owned();
        let outcome = PathGuard::new(&self.task.output_dir).map_err(MemberFailure::from).and_then(|guard| {
            if inner.is_compressed() {
                self.nested(&guard, &name, &mut stream, None, spawner)
            } else {
                self.write_leaf(&guard, &name, &mut stream, None)
            }
        });
        if let Err(failure) = outcome {
            self.fail(&hint, failure);
        }
    }

    /// Write the task's source verbatim under its own name.
    fn raw_leaf(&mut self) -> Result<(), MemberFailure> {
        let guard = PathGuard::new(&self.task.output_dir)?;
        let mut file = self.task.source.open().map_err(MemberFailure::Io)?;
        let name = self.task.path_hint.clone();
        self.write_leaf(&guard, &name, &mut file, None)
    }

    // ── Iterating ────────────────────────────────────────────────────────────

    fn expand<R: Read>(&mut self, format: FormatKind, stream: R, spawner: &Spawner<'_, ExtractionTask>) {
        let hint = self.task.path_hint.clone();
        let dir = match self.working_dir() {
            Ok(dir) => dir,
            Err(failure) => return self.fail(&hint, failure),
        };
        let guard = match PathGuard::new(&dir) {
            Ok(guard) => guard,
            Err(e) => return self.fail(&hint, e.into()),
        };

        let walked = for_each_member(format, stream, |member, body| {
            if spawner.is_cancelled() {
                self.cancelled = true;
                return Flow::Stop;
            }
            self.members += 1;
            if self.task.role == TaskRole::Package && self.members == 1 && member.name == DEBIAN_BINARY {
                return Flow::Continue;
            }
            self.emit(Event::MemberStarted { member: member.name.clone(), size: member.size });
            if let Err(failure) = self.member(&guard, member, body, spawner) {
                self.fail(&member.name, failure);
            }
            if self.abandoned || self.cancelled { Flow::Stop } else { Flow::Continue }
        });

        if let Err(e) = walked {
            self.fail(&hint, MemberFailure::Corrupted(format!("damaged {format} stream: {e}")));
        }
        if !self.abandoned && !self.cancelled {
            let record = ContainerRecord {
                path:        self.extractor.relative(&dir),
                format:      self.format,
                fingerprint: self.task.fingerprint().map(|fp| fp.to_hex()).unwrap_or_default(),
                depth:       self.task.depth,
                members:     self.members,
                lineage:     self.task.lineage_names(),
            };
            self.fragment.containers.push(record);
        }
    }

    /// Directory this task's members land in.
    fn working_dir(&self) -> Result<PathBuf, MemberFailure> {
        if self.task.role == TaskRole::Package {
            return Ok(self.task.output_dir.clone());
        }
        let guard = PathGuard::new(&self.task.output_dir)?;
        let resolved = guard.resolve_dir(archive_stem(&self.task.path_hint))?;
        fs::create_dir_all(&resolved.absolute_path).map_err(MemberFailure::from_write)?;
        Ok(resolved.absolute_path)
    }

    fn member(
        &mut self,
        guard:   &PathGuard,
        member:  &ArchiveMember,
        body:    &mut dyn Read,
        spawner: &Spawner<'_, ExtractionTask>,
    ) -> Result<(), MemberFailure> {
        let segments = sanitize(&member.name)?;
        match member.kind {
            MemberKind::Directory => {
                if !segments.is_empty() {
                    let resolved = guard.resolve_dir(&member.name)?;
                    fs::create_dir_all(&resolved.absolute_path).map_err(MemberFailure::from_write)?;
                }
                Ok(())
            }
            MemberKind::Symlink | MemberKind::Hardlink | MemberKind::Special => {
                tracing::debug!(member = %member.name, kind = ?member.kind, "not materialised");
                self.fragment.skipped.push(SkippedMember {
                    member:  member.name.clone(),
                    kind:    member.kind,
                    lineage: self.task.lineage_names(),
                });
                Ok(())
            }
            MemberKind::Regular => {
                let mut body = body;
                let prefix = peek(&mut body, PEEK_WINDOW).map_err(MemberFailure::from_read)?;
                let kind = classify(&prefix);
                let mut stream = Cursor::new(prefix).chain(body);
                if kind.is_archive() {
                    self.nested(guard, &member.name, &mut stream, Some(member.size), spawner)
                } else {
                    self.write_leaf(guard, &member.name, &mut stream, Some(member.size))
                }
            }
        }
    }

    // ── Per-member dispatch ──────────────────────────────────────────────────

    /// Spool a nested archive and submit it as a child task.
    fn nested(
        &mut self,
        guard:    &PathGuard,
        name:     &str,
        stream:   &mut dyn Read,
        declared: Option<u64>,
        spawner:  &Spawner<'_, ExtractionTask>,
    ) -> Result<(), MemberFailure> {
        let depth = self.task.depth + 1;
        let limit = self.extractor.config.depth_limit;
        if depth > limit {
            return Err(MemberFailure::DepthExceeded { depth, limit });
        }

        let segments = sanitize(name)?;
        let Some((leaf, parents)) = segments.split_last() else {
            return Err(PathError::InvalidName { candidate: name.to_owned() }.into());
        };
        let parent_dir = guard.resolve_dir(&parents.join("/"))?.absolute_path;
        fs::create_dir_all(&parent_dir).map_err(MemberFailure::from_write)?;

        let spooled = spool(stream, &self.extractor.config.spool_dir, &self.extractor.spool)?;
        if let Some(expected) = declared {
            if spooled.len != expected {
                return Err(truncated(expected, spooled.len));
            }
        }
        let fingerprint = ArchiveFingerprint::from(spooled.fingerprint);
        cycle::enter(fingerprint, self.task.ancestors())?;

        let bytes = spooled.len;
        let child = self.task.child(TaskSource::Spool(spooled), parent_dir, leaf, fingerprint);
        tracing::debug!(member = %name, depth, bytes, %fingerprint, "nested archive");
        self.emit(Event::TaskEnqueued { path_hint: child.path_hint.clone(), depth });
        if spawner.submit(child) == Submitted::Dropped {
            self.cancelled = true;
        }
        Ok(())
    }

    /// Stream a leaf file to a fresh confined path and record it.
    fn write_leaf(
        &mut self,
        guard:    &PathGuard,
        name:     &str,
        stream:   &mut dyn Read,
        declared: Option<u64>,
    ) -> Result<(), MemberFailure> {
        let (file, resolved) = claim(guard, name)?;
        let path = resolved.absolute_path;
        let budget = &self.extractor.budget;

        let mut writer = HashingWriter::new(BudgetedWriter::new(
            BufWriter::with_capacity(COPY_BUFFER_SIZE, file),
            budget,
        ));
        let copied = copy_stream(stream, &mut writer);
        let written = writer.bytes_written();
        let finished = copied.map_err(MemberFailure::from).and_then(|_| {
            let (budgeted, digest, size) = writer.finish().map_err(MemberFailure::from_write)?;
            budgeted
                .into_inner()
                .into_inner()
                .map_err(|e| MemberFailure::from_write(e.into_error()))?;
            Ok((digest, size))
        });

        let outcome = finished.and_then(|(digest, size)| match declared {
            Some(expected) if expected != size => Err(truncated(expected, size)),
            _ => Ok((digest, size)),
        });
        let (digest, size) = match outcome {
            Ok(done) => done,
            Err(failure) => {
                discard(&path);
                budget.release(written);
                return Err(failure);
            }
        };

        let entry = ManifestEntry {
            path:             self.extractor.relative(&path),
            size,
            hash:             format!("blake3:{}", hex::encode(digest)),
            lineage:          self.task.lineage_names(),
            fingerprints:     self.task.lineage_fingerprints(),
            collision_suffix: resolved.collision_suffix,
        };
        self.emit(Event::MemberCompleted { path: entry.path.clone(), size });
        self.fragment.entries.push(entry);
        Ok(())
    }
}

/// Resolve `name` and create it exclusively, re-resolving if a concurrent
/// task claims the same name in between.
fn claim(guard: &PathGuard, name: &str) -> Result<(File, ResolvedPath), MemberFailure> {
    let mut attempt = 0;
    loop {
        let resolved = guard.resolve(name)?;
        assert!(
            resolved.absolute_path.starts_with(guard.root()),
            "resolved path {} escaped {}",
            resolved.absolute_path.display(),
            guard.root().display(),
        );
        if let Some(parent) = resolved.absolute_path.parent() {
            fs::create_dir_all(parent).map_err(MemberFailure::from_write)?;
        }
        match OpenOptions::new().write(true).create_new(true).open(&resolved.absolute_path) {
            Ok(file) => return Ok((file, resolved)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && attempt < CREATE_RETRIES => attempt += 1,
            Err(e) => return Err(MemberFailure::from_write(e)),
        }
    }
}

/// Sniff a window, demoting an LZMA match whose first bytes do not decode.
/// The LZMA signature is weak enough that plain data passes it.
fn classify(window: &[u8]) -> FormatKind {
    match sniff(window) {
        FormatKind::Lzma if rejects_window(FormatKind::Lzma, window) => FormatKind::Unknown,
        kind => kind,
    }
}

fn truncated(expected: u64, got: u64) -> MemberFailure {
    MemberFailure::Corrupted(format!("member truncated: expected {expected} bytes, got {got}"))
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "could not remove partial output");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{CollectingSink, NullSink};
    use crate::manifest::ErrorKind;
    use std::io::Write;

    fn tar_of(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    struct Fixture {
        _dir:  tempfile::TempDir,
        out:   PathBuf,
        input: PathBuf,
    }

    fn fixture(name: &str, bytes: &[u8]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();
        let input = dir.path().join(name);
        fs::write(&input, bytes).unwrap();
        Fixture { _dir: dir, out, input }
    }

    fn extractor(fx: &Fixture, depth_limit: u32, events: Arc<dyn EventSink>) -> RecursiveExtractor {
        let config = ExtractorConfig {
            output_root:     fx.out.clone(),
            depth_limit,
            spool_dir:       std::env::temp_dir(),
            max_total_bytes: None,
            max_spool_bytes: None,
        };
        RecursiveExtractor::new(config, events, CancelToken::new())
    }

    fn nested_task(fx: &Fixture, name: &str, ancestors: &[ArchiveFingerprint]) -> ExtractionTask {
        let own = ArchiveFingerprint::of(&fs::read(&fx.input).unwrap());
        let mut lineage: Vec<_> = ancestors
            .iter()
            .enumerate()
            .map(|(i, fp)| crate::task::LineageLink { name: format!("ancestor{i}"), fingerprint: *fp })
            .collect();
        lineage.push(crate::task::LineageLink { name: name.to_owned(), fingerprint: own });
        ExtractionTask {
            source:     TaskSource::File(fx.input.clone()),
            output_dir: fx.out.clone(),
            depth:      lineage.len() as u32 - 1,
            ancestors:  lineage.iter().map(|link| link.fingerprint).collect(),
            lineage,
            path_hint:  name.to_owned(),
            role:       TaskRole::Nested,
        }
    }

    fn info() -> RunInfo {
        RunInfo {
            input_file:            "x".into(),
            output_dir:            "out".into(),
            depth_limit:           16,
            debian_binary_version: None,
            elapsed:               std::time::Duration::ZERO,
            bytes_written:         0,
            cancelled:             false,
        }
    }

    fn run(fx: &Fixture, task: ExtractionTask, depth_limit: u32) -> Manifest {
        let ex = extractor(fx, depth_limit, Arc::new(NullSink));
        ex.run(task, &WorkerPool::new(2, 4, CancelToken::new()));
        ex.into_manifest(info())
    }

    #[test]
    fn tar_gz_expands_into_stem_directory() {
        let fx = fixture("bundle.tar.gz", &gzip(&tar_of(&[("a.txt", b"A"), ("sub/b.txt", b"BB")])));
        let task = nested_task(&fx, "bundle.tar.gz", &[]);
        let manifest = run(&fx, task, 16);
        assert!(manifest.errors.is_empty(), "{:?}", manifest.errors);
        let paths: Vec<_> = manifest.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, ["bundle/a.txt", "bundle/sub/b.txt"]);
        assert_eq!(fs::read(fx.out.join("bundle/sub/b.txt")).unwrap(), b"BB");
        assert_eq!(manifest.entries[1].hash, format!("blake3:{}", blake3::hash(b"BB").to_hex()));
        assert_eq!(manifest.containers.len(), 1);
        assert_eq!(manifest.containers[0].format, FormatKind::Gzip);
        assert_eq!(manifest.summary.bytes_written, 3);
    }

    #[test]
    fn nested_archive_becomes_child_task() {
        let inner = gzip(&tar_of(&[("deep.txt", b"deep")]));
        let outer = tar_of(&[("lib/inner.tar.gz", &inner), ("top.txt", b"top")]);
        let fx = fixture("outer.tar", &outer);
        let manifest = run(&fx, nested_task(&fx, "outer.tar", &[]), 16);
        assert!(manifest.errors.is_empty(), "{:?}", manifest.errors);
        let deep = manifest.entries.iter().find(|e| e.path.ends_with("deep.txt")).unwrap();
        assert_eq!(deep.path, "outer/lib/inner/deep.txt");
        assert_eq!(deep.lineage, ["outer.tar", "inner.tar.gz"]);
        assert_eq!(deep.fingerprints[1], blake3::hash(&inner).to_hex().to_string());
        assert_eq!(manifest.entries.len(), 2);
        assert_eq!(manifest.summary.max_depth_reached, 1);
    }

    #[test]
    fn ancestor_fingerprint_is_a_cycle() {
        let inner = gzip(&tar_of(&[("never.txt", b"x")]));
        let outer = tar_of(&[("loop.tar.gz", &inner), ("sibling.txt", b"ok")]);
        let fx = fixture("outer.tar", &outer);
        let task = nested_task(&fx, "outer.tar", &[ArchiveFingerprint::of(&inner)]);
        let manifest = run(&fx, task, 16);
        let cycles: Vec<_> = manifest.errors_of(ErrorKind::SelfReferential).collect();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].member, "loop.tar.gz");
        assert_eq!(manifest.entries.len(), 1);
        assert_eq!(manifest.entries[0].path, "outer/sibling.txt");
    }

    #[test]
    fn identical_siblings_both_extract() {
        let inner = gzip(&tar_of(&[("same.txt", b"same")]));
        let outer = tar_of(&[("a/twin.tar.gz", &inner), ("b/twin.tar.gz", &inner)]);
        let fx = fixture("outer.tar", &outer);
        let manifest = run(&fx, nested_task(&fx, "outer.tar", &[]), 16);
        assert!(manifest.errors.is_empty(), "{:?}", manifest.errors);
        let mut paths: Vec<_> = manifest.entries.iter().map(|e| e.path.clone()).collect();
        paths.sort();
        assert_eq!(paths, ["outer/a/twin/same.txt", "outer/b/twin/same.txt"]);
    }

    #[test]
    fn depth_limit_refuses_child() {
        let inner = gzip(&tar_of(&[("too-deep.txt", b"x")]));
        let outer = tar_of(&[("inner.tar.gz", &inner)]);
        let fx = fixture("outer.tar", &outer);
        // The task itself sits at depth 0; its child would be depth 1.
        let manifest = run(&fx, nested_task(&fx, "outer.tar", &[]), 0);
        let errors: Vec<_> = manifest.errors_of(ErrorKind::DepthExceeded).collect();
        assert_eq!(errors.len(), 1);
        assert!(manifest.entries.is_empty());
        assert_eq!(manifest.summary.tasks_executed, 1);
    }

    #[test]
    fn compressed_single_file_decodes_beside_itself() {
        let fx = fixture("notes.txt.gz", &gzip(b"plain text notes"));
        let manifest = run(&fx, nested_task(&fx, "notes.txt.gz", &[]), 16);
        assert!(manifest.errors.is_empty(), "{:?}", manifest.errors);
        assert_eq!(manifest.entries[0].path, "notes.txt");
        assert_eq!(fs::read(fx.out.join("notes.txt")).unwrap(), b"plain text notes");
    }

    #[test]
    fn hostile_names_are_recorded_and_siblings_continue() {
        let mut builder = tar::Builder::new(Vec::new());
        let members: [(&str, &[u8]); 3] = [("../../escape.txt", b"evil"), ("/etc/passwd", b"evil"), ("fine.txt", b"ok")];
        for (name, data) in members {
            let mut header = tar::Header::new_gnu();
            header.as_old_mut().name[..name.len()].copy_from_slice(name.as_bytes());
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append(&header, data).unwrap();
        }
        let fx = fixture("evil.tar", &builder.into_inner().unwrap());
        let sink = Arc::new(CollectingSink::new());
        let ex = extractor(&fx, 16, sink.clone());
        ex.run(nested_task(&fx, "evil.tar", &[]), &WorkerPool::new(1, 1, CancelToken::new()));
        let manifest = ex.into_manifest(info());

        assert_eq!(manifest.errors_of(ErrorKind::PathTraversal).count(), 2);
        assert_eq!(manifest.entries.len(), 1);
        assert!(!fx.out.parent().unwrap().join("escape.txt").exists());
        let recorded = sink
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::ErrorRecorded { kind: ErrorKind::PathTraversal, .. }))
            .count();
        assert_eq!(recorded, 2);
    }

    #[test]
    fn links_are_skipped_not_written() {
        let mut builder = tar::Builder::new(Vec::new());
        let mut link = tar::Header::new_gnu();
        link.set_entry_type(tar::EntryType::Symlink);
        link.set_size(0);
        builder.append_link(&mut link, "passwd", "/etc/passwd").unwrap();
        let fx = fixture("links.tar", &builder.into_inner().unwrap());
        let manifest = run(&fx, nested_task(&fx, "links.tar", &[]), 16);
        assert_eq!(manifest.skipped.len(), 1);
        assert_eq!(manifest.skipped[0].kind, MemberKind::Symlink);
        assert_eq!(manifest.summary.warnings, 1);
        assert!(fs::symlink_metadata(fx.out.join("links/passwd")).is_err());
    }

    #[test]
    fn name_collisions_get_suffixes() {
        let fx = fixture("dup.tar", &tar_of(&[("file.txt", b"one"), ("file.txt", b"two")]));
        let manifest = run(&fx, nested_task(&fx, "dup.tar", &[]), 16);
        let paths: Vec<_> = manifest.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, ["dup/file.txt", "dup/file (1).txt"]);
        assert_eq!(manifest.entries[1].collision_suffix, Some(1));
        assert_eq!(fs::read(fx.out.join("dup/file (1).txt")).unwrap(), b"two");
    }

    #[test]
    fn not_really_lzma_is_kept_verbatim() {
        // 0x5D props, 64 KiB dictionary, unknown size: sniffs as LZMA, but
        // the stream ends before the range coder is even initialised.
        let mut bytes = vec![0x5D, 0x00, 0x00, 0x01, 0x00];
        bytes.extend_from_slice(&[0xFF; 8]);
        bytes.push(0xFF);
        assert_eq!(sniff(&bytes), FormatKind::Lzma);
        let fx = fixture("blob.bin", &bytes);
        let manifest = run(&fx, nested_task(&fx, "blob.bin", &[]), 16);
        assert!(manifest.errors.is_empty(), "{:?}", manifest.errors);
        assert_eq!(manifest.entries[0].path, "blob.bin");
        assert_eq!(fs::read(fx.out.join("blob.bin")).unwrap(), bytes);
    }

    #[test]
    fn lzma_lookalike_at_depth_limit_is_written() {
        let mut blob = vec![0x5D, 0x00, 0x00, 0x01, 0x00];
        blob.extend_from_slice(&[0xFF; 8]);
        blob.extend_from_slice(b"plain text that merely starts like an lzma header");
        assert_eq!(sniff(&blob), FormatKind::Lzma);
        assert_eq!(classify(&blob), FormatKind::Unknown);

        let fx = fixture("outer.tar", &tar_of(&[("share/blob.bin", &blob), ("share/ok.txt", b"ok")]));
        // depth 0 with limit 0: any real nested archive would be refused.
        let manifest = run(&fx, nested_task(&fx, "outer.tar", &[]), 0);
        assert!(manifest.errors.is_empty(), "{:?}", manifest.errors);
        let paths: Vec<_> = manifest.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, ["outer/share/blob.bin", "outer/share/ok.txt"]);
        assert_eq!(fs::read(fx.out.join("outer/share/blob.bin")).unwrap(), blob);
    }

    #[test]
    fn real_lzma_at_depth_limit_is_refused() {
        let mut lzma = Vec::new();
        lzma_rs::lzma_compress(&mut io::Cursor::new(b"genuinely compressed"), &mut lzma).unwrap();
        assert_eq!(classify(&lzma), FormatKind::Lzma);
        let fx = fixture("outer.tar", &tar_of(&[("notes.lzma", &lzma)]));
        let manifest = run(&fx, nested_task(&fx, "outer.tar", &[]), 0);
        assert_eq!(manifest.errors_of(ErrorKind::DepthExceeded).count(), 1);
        assert!(manifest.entries.is_empty());
    }

    #[test]
    fn oversized_spool_is_resource_exhaustion() {
        let inner = gzip(&vec![0u8; 256 * 1024]);
        let outer = tar_of(&[("big.gz", &inner), ("after.txt", b"never reached")]);
        let fx = fixture("outer.tar", &outer);
        let config = ExtractorConfig {
            output_root:     fx.out.clone(),
            depth_limit:     16,
            spool_dir:       fx.out.parent().unwrap().to_path_buf(),
            max_total_bytes: None,
            max_spool_bytes: Some(64),
        };
        let ex = RecursiveExtractor::new(config, Arc::new(NullSink), CancelToken::new());
        ex.run(nested_task(&fx, "outer.tar", &[]), &WorkerPool::new(1, 1, CancelToken::new()));
        assert_eq!(ex.spool.used(), 0);
        let manifest = ex.into_manifest(info());

        let exhausted: Vec<_> = manifest.errors_of(ErrorKind::ResourceExhausted).collect();
        assert_eq!(exhausted.len(), 1);
        assert_eq!(exhausted[0].member, "big.gz");
        assert!(manifest.entries.is_empty());
        assert_eq!(manifest.summary.tasks_executed, 1);
    }

    #[test]
    fn relative_paths_use_forward_slashes() {
        let fx = fixture("x", b"");
        let ex = extractor(&fx, 16, Arc::new(NullSink));
        assert_eq!(ex.relative(&fx.out.join("usr").join("bin").join("tool")), "usr/bin/tool");
        assert_eq!(ex.relative(&fx.out), "");
    }
}
