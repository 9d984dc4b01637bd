//! Progress events for whatever front-end is watching a run.
//!
//! The engine never renders anything itself.  It reports through an
//! [`EventSink`]; [`TracingSink`] turns events into `tracing` records and is
//! what the CLI uses.

use std::sync::Mutex;

use crate::manifest::ErrorKind;
use crate::sniff::FormatKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    TaskEnqueued    { path_hint: String, depth: u32 },
    TaskStarted     { path_hint: String, depth: u32, format: FormatKind },
    TaskFinished    { path_hint: String, depth: u32, members: usize, abandoned: bool },
    MemberStarted   { member: String, size: u64 },
    MemberCompleted { path: String, size: u64 },
    ErrorRecorded   { member: String, kind: ErrorKind, detail: String },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Discards everything.
pub struct NullSink;
impl EventSink for NullSink {
    fn emit(&self, _event: Event) {}
}

/// Renders events as `tracing` records.
pub struct TracingSink;
impl EventSink for TracingSink {
    fn emit(&self, event: Event) {
        match event {
            Event::TaskEnqueued { path_hint, depth } => {
                tracing::debug!(%path_hint, depth, "task enqueued");
            }
            Event::TaskStarted { path_hint, depth, format } => {
                tracing::info!(%path_hint, depth, %format, "expanding");
            }
            Event::TaskFinished { path_hint, depth, members, abandoned } => {
                tracing::debug!(%path_hint, depth, members, abandoned, "task finished");
            }
            Event::MemberStarted { member, size } => {
                tracing::trace!(%member, size, "member");
            }
            Event::MemberCompleted { path, size } => {
                tracing::debug!(%path, size, "written");
            }
            Event::ErrorRecorded { member, kind, detail } if kind.is_security() => {
                tracing::warn!(security = true, %member, ?kind, %detail, "rejected hostile member");
            }
            Event::ErrorRecorded { member, kind: ErrorKind::Corrupted, detail } => {
                tracing::warn!(corrupt = true, %member, %detail, "corrupted member");
            }
            Event::ErrorRecorded { member, kind, detail } => {
                tracing::warn!(%member, ?kind, %detail, "member skipped");
            }
        }
    }
}

/// Keeps every event in memory.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<Event>>,
}

impl CollectingSink {
    pub fn new() -> Self { Self::default() }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
