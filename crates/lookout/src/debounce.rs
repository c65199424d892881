//! Per-path coalescing of classified events.
//!
//! Deadlines are computed against caller-supplied instants so the logic is
//! deterministic under test; the dispatcher reads the clock once per turn
//! and services expiry through its select loop.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::event::EventKind;

#[derive(Debug, Clone, Copy)]
struct Pending {
    kind: EventKind,
    deadline: Instant,
}

/// Collapses bursts of same-kind events per path into one emission per
/// window.
///
/// - First event for a path arms a deadline `delay` in the future.
/// - A same-kind repeat re-arms the deadline (the burst keeps coalescing).
/// - An opposite-kind event flushes the pending entry immediately, so an
///   `update` observed before a `remove` is always emitted before it.
///
/// With a zero delay the deadline is `now`, which the dispatcher only
/// services at the next turn boundary: everything seen within one turn for
/// the same `(path, kind)` still collapses to a single emission.
#[derive(Debug)]
pub(crate) struct Debouncer {
    delay: Duration,
    pending: HashMap<PathBuf, Pending>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: HashMap::new(),
        }
    }

    /// Records a classified event. Returns the entry that must flush
    /// immediately, if the new event is of the opposite kind.
    pub fn push(
        &mut self,
        path: PathBuf,
        kind: EventKind,
        now: Instant,
    ) -> Option<(EventKind, PathBuf)> {
        let pending = Pending {
            kind,
            deadline: now + self.delay,
        };
        match self.pending.insert(path.clone(), pending) {
            Some(previous) if previous.kind != kind => Some((previous.kind, path)),
            _ => None,
        }
    }

    /// Deadline of the earliest pending entry.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|pending| pending.deadline).min()
    }

    /// Removes and returns entries whose window elapsed, earliest deadline
    /// first (ties broken by path for determinism).
    pub fn flush_due(&mut self, now: Instant) -> Vec<(EventKind, PathBuf)> {
        let mut due: Vec<(Instant, PathBuf)> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(path, pending)| (pending.deadline, path.clone()))
            .collect();
        due.sort();

        due.into_iter()
            .map(|(_, path)| {
                let pending = self
                    .pending
                    .remove(&path)
                    .expect("due entry present in pending map");
                (pending.kind, path)
            })
            .collect()
    }

    /// Cancels every pending entry without flushing it.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
