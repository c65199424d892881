//! Cross-root deduplication of emissions.
//!
//! When several roots overlap (one target an ancestor of another), the same
//! change reaches the composer once per root. Admission tokens keyed by
//! `(path, kind)` live for roughly the longest root delay, so the duplicate
//! arriving through the other root inside that window is dropped while a
//! genuine later change (which the debouncer spaces at least one window
//! apart) passes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::event::EventKind;

/// An emission candidate leaving a root's debouncer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Candidate {
    /// Index of the root the emission came through.
    pub root: usize,
    pub kind: EventKind,
    pub path: PathBuf,
    /// Whether the path is currently a directory, sampled at flush time.
    pub is_dir: bool,
}

#[derive(Debug)]
pub(crate) struct Composer {
    window: Duration,
    recent: HashMap<(PathBuf, EventKind), Instant>,
}

impl Composer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            recent: HashMap::new(),
        }
    }

    /// Admits one turn's worth of flushed emissions, in order.
    ///
    /// Drops exact `(path, kind)` duplicates still inside the window, then
    /// drops directory updates that are a strict prefix of an admitted child
    /// path in the same window (platforms that report a new file together
    /// with its parent directory).
    pub fn admit_batch(&mut self, batch: Vec<Candidate>, now: Instant) -> Vec<Candidate> {
        self.recent
            .retain(|_, admitted_at| now <= *admitted_at + self.window);

        let mut kept: Vec<Candidate> = Vec::with_capacity(batch.len());
        for candidate in batch {
            let key = (candidate.path.clone(), candidate.kind);
            if self.recent.contains_key(&key) {
                continue;
            }
            self.recent.insert(key, now);
            kept.push(candidate);
        }

        let recent = &self.recent;
        kept.retain(|candidate| {
            if !candidate.is_dir || candidate.kind != EventKind::Update {
                return true;
            }
            !recent.iter().any(|((path, _), _)| {
                path != &candidate.path && path.starts_with(&candidate.path)
            })
        });
        kept
    }

    pub fn clear(&mut self) {
        self.recent.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(100);

    fn candidate(root: usize, kind: EventKind, path: &str, is_dir: bool) -> Candidate {
        Candidate {
            root,
            kind,
            path: PathBuf::from(path),
            is_dir,
        }
    }

    #[test]
    fn duplicate_paths_in_one_turn_collapse_to_the_first_root() {
        let mut composer = Composer::new(WINDOW);
        let now = Instant::now();

        let admitted = composer.admit_batch(
            vec![
                candidate(0, EventKind::Update, "/d/a/f", false),
                candidate(1, EventKind::Update, "/d/a/f", false),
            ],
            now,
        );

        assert_eq!(admitted.len(), 1);
        assert_eq!(admitted[0].root, 0);
    }

    #[test]
    fn duplicates_across_turns_are_dropped_within_the_window() {
        let mut composer = Composer::new(WINDOW);
        let t0 = Instant::now();

        let first = composer.admit_batch(vec![candidate(0, EventKind::Update, "/f", false)], t0);
        assert_eq!(first.len(), 1);

        let inside =
            composer.admit_batch(vec![candidate(1, EventKind::Update, "/f", false)], t0 + WINDOW);
        assert!(inside.is_empty());

        let outside = composer.admit_batch(
            vec![candidate(1, EventKind::Update, "/f", false)],
            t0 + WINDOW + Duration::from_millis(1),
        );
        assert_eq!(outside.len(), 1);
    }

    #[test]
    fn kinds_are_deduplicated_independently() {
        let mut composer = Composer::new(WINDOW);
        let now = Instant::now();

        let admitted = composer.admit_batch(
            vec![
                candidate(0, EventKind::Update, "/f", false),
                candidate(0, EventKind::Remove, "/f", false),
            ],
            now,
        );
        assert_eq!(admitted.len(), 2);
    }

    #[test]
    fn parent_directory_update_is_suppressed_by_a_child_in_the_same_batch() {
        let mut composer = Composer::new(WINDOW);
        let now = Instant::now();

        // Order within the batch does not matter.
        let admitted = composer.admit_batch(
            vec![
                candidate(0, EventKind::Update, "/d", true),
                candidate(0, EventKind::Update, "/d/new.txt", false),
            ],
            now,
        );
        assert_eq!(
            admitted,
            vec![candidate(0, EventKind::Update, "/d/new.txt", false)]
        );
    }

    #[test]
    fn parent_directory_update_is_suppressed_by_a_recent_child_turn() {
        let mut composer = Composer::new(WINDOW);
        let now = Instant::now();

        composer.admit_batch(vec![candidate(0, EventKind::Update, "/d/new.txt", false)], now);

        let admitted = composer.admit_batch(
            vec![candidate(0, EventKind::Update, "/d", true)],
            now + WINDOW / 2,
        );
        assert!(admitted.is_empty());

        // Once the child token ages out, the directory reports normally.
        let admitted = composer.admit_batch(
            vec![candidate(0, EventKind::Update, "/d", true)],
            now + WINDOW * 2,
        );
        assert_eq!(admitted.len(), 1);
    }

    #[test]
    fn directory_removals_are_never_prefix_suppressed() {
        let mut composer = Composer::new(WINDOW);
        let now = Instant::now();

        let admitted = composer.admit_batch(
            vec![
                candidate(0, EventKind::Remove, "/d/f", false),
                // `is_dir` is false for removals, but guard the kind too.
                candidate(0, EventKind::Remove, "/d", false),
            ],
            now,
        );
        assert_eq!(admitted.len(), 2);
    }

    #[test]
    fn sibling_directories_do_not_suppress_each_other() {
        let mut composer = Composer::new(WINDOW);
        let now = Instant::now();

        let admitted = composer.admit_batch(
            vec![
                candidate(0, EventKind::Update, "/d/aa/f", false),
                candidate(0, EventKind::Update, "/d/a", true),
            ],
            now,
        );
        // "/d/aa/f" is not under "/d/a"; both survive.
        assert_eq!(admitted.len(), 2);
    }

    #[test]
    fn clear_forgets_admission_tokens() {
        let mut composer = Composer::new(WINDOW);
        let now = Instant::now();

        composer.admit_batch(vec![candidate(0, EventKind::Update, "/f", false)], now);
        composer.clear();

        let admitted =
            composer.admit_batch(vec![candidate(0, EventKind::Update, "/f", false)], now);
        assert_eq!(admitted.len(), 1);
    }
}
