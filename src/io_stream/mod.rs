//! Streaming I/O plumbing shared by the extractor.
//!
//! # Hashing while streaming
//! [`HashingWriter`] tees every byte written through a BLAKE3 hasher, so a
//! leaf file's digest is known the moment its last byte hits disk without a
//! second read.  [`spool`] uses the same writer to fingerprint a nested
//! archive while copying it to a temporary file.
//!
//! # Budget
//! [`Budget`] is a process-wide byte allowance shared by every worker.
//! [`BudgetedWriter`] reserves bytes before forwarding them and fails with
//! [`BUDGET_EXHAUSTED`] as soon as a write would overrun the allowance.
//! Spool files draw from their own budget and hold their bytes as a
//! [`Charge`] that is returned when the spool file is deleted.
//!
//! # Offsets
//! [`CountingReader`] publishes how many bytes have been pulled through it to
//! a shared counter, which lets a parser that owns the reader (the `ar`
//! crate) still report member data offsets.

use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tempfile::{NamedTempFile, TempPath};
use thiserror::Error;

/// Copy buffer size for member streams.
pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Marker message carried by the `io::Error` a [`BudgetedWriter`] returns.
pub const BUDGET_EXHAUSTED: &str = "total extraction size budget exhausted";

// ── Hashing ──────────────────────────────────────────────────────────────────

/// Writer that hashes every byte it forwards.
pub struct HashingWriter<W: Write> {
    inner:   W,
    hasher:  blake3::Hasher,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, hasher: blake3::Hasher::new(), written: 0 }
    }

    pub fn bytes_written(&self) -> u64 { self.written }

    /// Flush and return `(inner, digest, bytes_written)`.
    pub fn finish(mut self) -> io::Result<(W, [u8; 32], u64)> {
        self.inner.flush()?;
        let digest: [u8; 32] = self.hasher.finalize().into();
        Ok((self.inner, digest, self.written))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

// ── Budget ───────────────────────────────────────────────────────────────────

/// Shared allowance of output bytes.  `None` limit means unlimited.
#[derive(Debug)]
pub struct Budget {
    limit: Option<u64>,
    used:  AtomicU64,
}

impl Budget {
    pub fn new(limit: Option<u64>) -> Self {
        Self { limit, used: AtomicU64::new(0) }
    }

    pub fn used(&self) -> u64 { self.used.load(Ordering::Relaxed) }

    /// Reserve `n` bytes; on failure nothing is reserved.
    pub fn reserve(&self, n: u64) -> bool {
        let Some(limit) = self.limit else {
            self.used.fetch_add(n, Ordering::Relaxed);
            return true;
        };
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(n).filter(|&total| total <= limit)
            })
            .is_ok()
    }

    /// Give back bytes reserved for output that was later discarded.
    pub fn release(&self, n: u64) {
        // Never fails: the closure always returns `Some`.
        let _ = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| Some(used.saturating_sub(n)));
    }
}

/// Bytes held against a shared [`Budget`] until dropped.
#[derive(Debug)]
pub struct Charge {
    budget: Arc<Budget>,
    bytes:  u64,
}

impl Charge {
    pub fn bytes(&self) -> u64 { self.bytes }
}

impl Drop for Charge {
    fn drop(&mut self) {
        self.budget.release(self.bytes);
    }
}

/// Writer that draws every byte from a shared [`Budget`].
pub struct BudgetedWriter<'b, W: Write> {
    inner:  W,
    budget: &'b Budget,
}

impl<'b, W: Write> BudgetedWriter<'b, W> {
    pub fn new(inner: W, budget: &'b Budget) -> Self {
        Self { inner, budget }
    }

    pub fn into_inner(self) -> W { self.inner }
}

impl<W: Write> Write for BudgetedWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.budget.reserve(buf.len() as u64) {
            return Err(budget_exhausted());
        }
        match self.inner.write(buf) {
            Ok(n) => {
                self.budget.release((buf.len() - n) as u64);
                Ok(n)
            }
            Err(e) => {
                self.budget.release(buf.len() as u64);
                Err(e)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

pub fn budget_exhausted() -> io::Error {
    io::Error::new(io::ErrorKind::Other, BUDGET_EXHAUSTED)
}

/// Out-of-space conditions: an exhausted budget or a full disk.
pub fn is_exhaustion(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::StorageFull
        || err.get_ref().map_or(false, |inner| inner.to_string() == BUDGET_EXHAUSTED)
}

// ── Counting ─────────────────────────────────────────────────────────────────

/// Reader that publishes its position to a shared counter.
pub struct CountingReader<R> {
    inner: R,
    pos:   Arc<AtomicU64>,
}

impl<R: Read> CountingReader<R> {
    pub fn new(inner: R) -> (Self, Arc<AtomicU64>) {
        let pos = Arc::new(AtomicU64::new(0));
        (Self { inner, pos: Arc::clone(&pos) }, pos)
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.pos.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

/// Which side of a copy failed.  A read failure means the source archive is
/// damaged; a write failure is an output-side problem.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("read failed: {0}")]
    Read(io::Error),
    #[error("write failed: {0}")]
    Write(io::Error),
}

impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Read(e) | StreamError::Write(e) => e,
        }
    }
}

/// `io::copy` with a fixed-size buffer that returns the byte count and
/// reports which side failed.
pub fn copy_stream<R: Read + ?Sized, W: Write + ?Sized>(
    reader: &mut R,
    writer: &mut W,
) -> Result<u64, StreamError> {
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0)  => return Ok(total),
            Ok(n)  => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(StreamError::Read(e)),
        };
        writer.write_all(&buf[..n]).map_err(StreamError::Write)?;
        total += n as u64;
    }
}

// ── Spooling ─────────────────────────────────────────────────────────────────

/// A nested archive copied out of its parent stream.
///
/// The file is deleted on drop, and only then are its bytes returned to the
/// spool budget.
#[derive(Debug)]
pub struct Spooled {
    pub path:        TempPath,
    pub fingerprint: [u8; 32],
    pub len:         u64,
    charge:          Charge,
}

impl Spooled {
    pub fn charge(&self) -> &Charge { &self.charge }
}

/// Copy `reader` into a fresh temporary file under `dir`, hashing as it goes.
///
/// Every byte is reserved from `budget` before it reaches the file, so an
/// overrun stops the copy with [`BUDGET_EXHAUSTED`] and at most the
/// allowance ever lands on disk.  On failure the partial file is removed and
/// its bytes released.
pub fn spool<R: Read + ?Sized>(
    reader: &mut R,
    dir:    &Path,
    budget: &Arc<Budget>,
) -> Result<Spooled, StreamError> {
    let file = NamedTempFile::new_in(dir).map_err(StreamError::Write)?;
    let (file, path) = file.into_parts();
    let mut writer = HashingWriter::new(BudgetedWriter::new(
        io::BufWriter::with_capacity(COPY_BUFFER_SIZE, file),
        budget,
    ));
    let copied = copy_stream(reader, &mut writer);
    let reserved = writer.bytes_written();
    let finished = copied.and_then(|_| {
        let (budgeted, fingerprint, len) = writer.finish().map_err(StreamError::Write)?;
        budgeted
            .into_inner()
            .into_inner()
            .map_err(|e| StreamError::Write(e.into_error()))?;
        Ok((fingerprint, len))
    });
    match finished {
        Ok((fingerprint, len)) => {
            let charge = Charge { budget: Arc::clone(budget), bytes: len };
            Ok(Spooled { path, fingerprint, len, charge })
        }
        Err(e) => {
            drop(path);
            budget.release(reserved);
            Err(e)
        }
    }
}
