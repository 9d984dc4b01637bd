//! High-level extraction API.
//!
//! ```no_run
//! use debx::engine::{Engine, ExtractOptions};
//!
//! let options = ExtractOptions::default()
//!     .output_dir("out")
//!     .depth_limit(8)
//!     .jobs(4);
//! let manifest = Engine::new(options).run("hello_2.10-3_amd64.deb")?;
//! println!("{} files, {} errors", manifest.summary.files_extracted, manifest.summary.errors);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::error::ExtractionError;
use crate::event::{EventSink, TracingSink};
use crate::extract::{ExtractorConfig, RecursiveExtractor};
use crate::guard::ArchiveFingerprint;
use crate::io_stream::COPY_BUFFER_SIZE;
use crate::manifest::{Manifest, RunInfo};
use crate::outer::{parse_outer, DEBIAN_BINARY};
use crate::pool::{CancelToken, WorkerPool};
use crate::task::ExtractionTask;

pub const DEFAULT_DEPTH_LIMIT: u32 = 16;
pub const DEFAULT_OUTPUT_DIR: &str = "extracted";
/// Queue slots per worker when no capacity is configured.
pub const QUEUE_SLOTS_PER_WORKER: usize = 4;

// ── ExtractOptions ───────────────────────────────────────────────────────────

/// Configuration for [`Engine::run`].
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Created if absent; every write stays beneath it.
    pub output_dir:      PathBuf,
    pub depth_limit:     u32,
    /// Concurrent extraction tasks.
    pub jobs:            usize,
    /// Task queue slots; `None` means `4 × jobs`.
    pub queue_capacity:  Option<usize>,
    /// Cap on bytes written across the whole run.
    pub max_total_bytes: Option<u64>,
    /// Cap on bytes held in spool files at once; `None` follows
    /// `max_total_bytes`.
    pub max_spool_bytes: Option<u64>,
    /// Where nested archives are spooled; `None` means the system temp dir.
    pub spool_dir:       Option<PathBuf>,
    /// Lineage name of the package itself.
    pub package_label:   String,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            output_dir:      PathBuf::from(DEFAULT_OUTPUT_DIR),
            depth_limit:     DEFAULT_DEPTH_LIMIT,
            jobs:            default_jobs(),
            queue_capacity:  None,
            max_total_bytes: None,
            max_spool_bytes: None,
            spool_dir:       None,
            package_label:   DEBIAN_BINARY.to_owned(),
        }
    }
}

impl ExtractOptions {
    pub fn output_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn depth_limit(mut self, limit: u32) -> Self {
        self.depth_limit = limit;
        self
    }

    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity.max(1));
        self
    }

    pub fn max_total_bytes(mut self, limit: u64) -> Self {
        self.max_total_bytes = Some(limit);
        self
    }

    pub fn max_spool_bytes(mut self, limit: u64) -> Self {
        self.max_spool_bytes = Some(limit);
        self
    }

    /// Spool allowance actually enforced.
    pub fn effective_spool_limit(&self) -> Option<u64> {
        self.max_spool_bytes.or(self.max_total_bytes)
    }

    pub fn spool_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.spool_dir = Some(dir.into());
        self
    }

    pub fn package_label<S: Into<String>>(mut self, label: S) -> Self {
        self.package_label = label.into();
        self
    }

    pub fn effective_queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(self.jobs.max(1) * QUEUE_SLOTS_PER_WORKER)
    }
}

fn default_jobs() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

// ── Engine ───────────────────────────────────────────────────────────────────

pub struct Engine {
    options: ExtractOptions,
    events:  Arc<dyn EventSink>,
    cancel:  CancelToken,
}

impl Engine {
    pub fn new(options: ExtractOptions) -> Self {
        Self { options, events: Arc::new(TracingSink), cancel: CancelToken::new() }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn options(&self) -> &ExtractOptions { &self.options }

    /// Token that stops the run between members when cancelled.
    pub fn cancel_token(&self) -> CancelToken { self.cancel.clone() }

    /// Extract `input` and return its manifest.
    ///
    /// `Err` is reserved for packages whose outer layer cannot be parsed;
    /// every problem inside the package ends up in the manifest instead.
    pub fn run<P: AsRef<Path>>(&self, input: P) -> Result<Manifest, ExtractionError> {
        let started = Instant::now();
        let input = input.as_ref();
        let opts = &self.options;

        let outer = parse_outer(BufReader::new(File::open(input)?))?;
        tracing::info!(
            input = %input.display(),
            version = %outer.version,
            control = %outer.control().name,
            data = %outer.data().name,
            "package accepted"
        );

        fs::create_dir_all(&opts.output_dir)
            .map_err(|source| ExtractionError::OutputDir { path: opts.output_dir.clone(), source })?;
        let spool_dir = opts.spool_dir.clone().unwrap_or_else(std::env::temp_dir);
        fs::create_dir_all(&spool_dir)
            .map_err(|source| ExtractionError::OutputDir { path: spool_dir.clone(), source })?;

        let fingerprint = fingerprint_file(input)?;
        let extractor = RecursiveExtractor::new(
            ExtractorConfig {
                output_root:     opts.output_dir.clone(),
                depth_limit:     opts.depth_limit,
                spool_dir,
                max_total_bytes: opts.max_total_bytes,
                max_spool_bytes: opts.effective_spool_limit(),
            },
            Arc::clone(&self.events),
            self.cancel.clone(),
        );
        let pool = WorkerPool::new(opts.jobs, opts.effective_queue_capacity(), self.cancel.clone());
        let root = ExtractionTask::package(
            input.to_path_buf(),
            opts.output_dir.clone(),
            &opts.package_label,
            fingerprint,
        );

        let stats = extractor.run(root, &pool);
        tracing::debug!(executed = stats.executed, inline = stats.inline, dropped = stats.dropped, "pool drained");

        let manifest = extractor.into_manifest(RunInfo {
            input_file:            input.to_path_buf(),
            output_dir:            opts.output_dir.clone(),
            depth_limit:           opts.depth_limit,
            debian_binary_version: Some(outer.version),
            elapsed:               started.elapsed(),
            bytes_written:         0,
            cancelled:             false,
        });
        tracing::info!(
            files = manifest.summary.files_extracted,
            errors = manifest.summary.errors,
            warnings = manifest.summary.warnings,
            elapsed_ms = manifest.summary.elapsed_ms,
            "extraction finished"
        );
        Ok(manifest)
    }
}

/// Extract `input` with `options` and the default tracing sink.
pub fn extract<P: AsRef<Path>>(input: P, options: ExtractOptions) -> Result<Manifest, ExtractionError> {
    Engine::new(options).run(input)
}

/// BLAKE3 over a whole file, streamed.
fn fingerprint_file(path: &Path) -> io::Result<ArchiveFingerprint> {
    let mut reader = BufReader::with_capacity(COPY_BUFFER_SIZE, File::open(path)?);
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(ArchiveFingerprint(hasher.finalize().into()))
}
