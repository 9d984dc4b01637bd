//! Bounded worker pool for extraction tasks.
//!
//! # Queue
//! A fixed number of scoped OS threads drain one bounded
//! `crossbeam-channel` queue.  A running task may [`Spawner::submit`] child
//! tasks; when the queue is full the submitting worker blocks, which is the
//! backpressure that keeps a very wide archive from fanning out without
//! bound.
//!
//! # Termination
//! `pending` counts tasks that are queued or running.  It is incremented
//! before a child is pushed and decremented after a task returns (or
//! unwinds), so it only reaches zero once nothing can produce more work.
//! The worker that brings it to zero closes the `done` channel, which wakes
//! every idle worker.
//!
//! # Deadlock avoidance
//! If every worker is blocked pushing into a full queue, nobody is left to
//! pop.  A blocked worker re-checks this every [`BACKPRESSURE_POLL`]; when
//! it finds itself among `workers` blocked pushers it runs the child inline
//! instead.  Inline nesting is bounded by the extractor's depth limit.
//!
//! # Cancellation
//! [`CancelToken`] is coarse: tasks already running finish their current
//! member, queued tasks are popped and dropped unrun, and new submissions
//! are refused.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, SendTimeoutError, Sender};

/// How long a blocked push waits before re-checking for a stall.
pub const BACKPRESSURE_POLL: Duration = Duration::from_millis(25);

// ── CancelToken ──────────────────────────────────────────────────────────────

/// Shared stop flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self { Self::default() }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ── Shared state ─────────────────────────────────────────────────────────────

struct Shared {
    workers:  usize,
    pending:  AtomicUsize,
    blocked:  AtomicUsize,
    inline:   AtomicUsize,
    executed: AtomicUsize,
    dropped:  AtomicUsize,
    cancel:   CancelToken,
    done:     Mutex<Option<Sender<()>>>,
}

impl Shared {
    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            if let Ok(mut done) = self.done.lock() {
                done.take();
            }
        }
    }
}

/// Decrements `pending` even if the task panics, so surviving workers
/// still terminate.
struct InFlight<'a>(&'a Shared);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.finish_one();
    }
}

// ── Spawner ──────────────────────────────────────────────────────────────────

/// How a submitted task was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    Queued,
    /// The queue stayed full with every worker blocked; the task already ran.
    Inline,
    /// Cancelled before it could be queued.
    Dropped,
}

type Work<'w, T> = dyn Fn(T, &Spawner<'_, T>) + Sync + 'w;

/// Handle a running task uses to submit children.
pub struct Spawner<'s, T> {
    tx:     &'s Sender<T>,
    shared: &'s Shared,
    work:   &'s Work<'s, T>,
}

impl<T> Spawner<'_, T> {
    pub fn submit(&self, task: T) -> Submitted {
        if self.shared.cancel.is_cancelled() {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            return Submitted::Dropped;
        }
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        self.shared.blocked.fetch_add(1, Ordering::AcqRel);
        let mut task = task;
        loop {
            match self.tx.send_timeout(task, BACKPRESSURE_POLL) {
                Ok(()) => {
                    self.shared.blocked.fetch_sub(1, Ordering::AcqRel);
                    return Submitted::Queued;
                }
                Err(SendTimeoutError::Timeout(t)) | Err(SendTimeoutError::Disconnected(t)) => task = t,
            }
            if self.shared.cancel.is_cancelled() {
                self.shared.blocked.fetch_sub(1, Ordering::AcqRel);
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                self.shared.finish_one();
                return Submitted::Dropped;
            }
            if self.shared.blocked.load(Ordering::Acquire) >= self.shared.workers {
                self.shared.blocked.fetch_sub(1, Ordering::AcqRel);
                tracing::debug!(workers = self.shared.workers, "queue stalled; running child inline");
                self.shared.inline.fetch_add(1, Ordering::Relaxed);
                self.execute(task);
                return Submitted::Inline;
            }
        }
    }

    /// Run one task whose `pending` slot is already accounted for.
    fn execute(&self, task: T) {
        let _slot = InFlight(self.shared);
        self.shared.executed.fetch_add(1, Ordering::Relaxed);
        (self.work)(task, self);
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }
}

// ── WorkerPool ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub executed: usize,
    pub inline:   usize,
    pub dropped:  usize,
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers:        usize,
    queue_capacity: usize,
    cancel:         CancelToken,
}

impl WorkerPool {
    pub fn new(workers: usize, queue_capacity: usize, cancel: CancelToken) -> Self {
        Self { workers: workers.max(1), queue_capacity: queue_capacity.max(1), cancel }
    }

    pub fn workers(&self) -> usize { self.workers }

    /// Drain `initial` and everything it transitively submits.
    pub fn run<T, F>(&self, initial: T, work: F) -> PoolStats
    where
        T: Send,
        F: Fn(T, &Spawner<'_, T>) + Sync,
    {
        let (tx, rx) = bounded::<T>(self.queue_capacity);
        let (done_tx, done_rx) = bounded::<()>(0);
        let shared = Shared {
            workers:  self.workers,
            pending:  AtomicUsize::new(1),
            blocked:  AtomicUsize::new(0),
            inline:   AtomicUsize::new(0),
            executed: AtomicUsize::new(0),
            dropped:  AtomicUsize::new(0),
            cancel:   self.cancel.clone(),
            done:     Mutex::new(Some(done_tx)),
        };
        if tx.send(initial).is_err() {
            return PoolStats::default();
        }

        let work: &Work<'_, T> = &work;
        thread::scope(|scope| {
            for _ in 0..self.workers {
                let rx = rx.clone();
                let done_rx = done_rx.clone();
                let spawner = Spawner { tx: &tx, shared: &shared, work };
                scope.spawn(move || worker_loop(&spawner, &rx, &done_rx));
            }
        });

        PoolStats {
            executed: shared.executed.load(Ordering::Relaxed),
            inline:   shared.inline.load(Ordering::Relaxed),
            dropped:  shared.dropped.load(Ordering::Relaxed),
        }
    }
}

fn worker_loop<T>(spawner: &Spawner<'_, T>, rx: &Receiver<T>, done: &Receiver<()>) {
    loop {
        select! {
            recv(rx) -> task => {
                let Ok(task) = task else { return };
                if spawner.shared.cancel.is_cancelled() {
                    spawner.shared.dropped.fetch_add(1, Ordering::Relaxed);
                    spawner.shared.finish_one();
                    continue;
                }
                spawner.execute(task);
            }
            recv(done) -> _ => return,
        }
    }
}
