//! Filter protocol: accept, reject, or skip an entire subtree.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::{panic_message, WatchError};

/// Verdict returned by a path filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    /// Report the path.
    Accept,
    /// Drop the path. Children of a rejected directory stay eligible for
    /// both enlistment and reporting.
    Reject,
    /// Drop the path and everything under it. This is the only verdict the
    /// recursive-emulation layer honors in addition to the emission path:
    /// a skipped directory is never enlisted and nothing beneath it ever
    /// surfaces.
    SkipSubtree,
}

type Predicate = dyn Fn(&Path) -> FilterVerdict + Send + Sync;

/// User-supplied path filter, normalized from its polymorphic input forms.
///
/// A pattern is just a predicate that tests a match; the full predicate form
/// gets the whole verdict vocabulary, including [`FilterVerdict::SkipSubtree`].
/// Filters are evaluated against absolute paths, after classification and
/// before debouncing.
#[derive(Clone, Default)]
pub enum PathFilter {
    #[default]
    AcceptAll,
    /// Accepts paths matching the set; everything else is rejected.
    Pattern(GlobSet),
    Predicate(Arc<Predicate>),
}

impl PathFilter {
    /// Builds a single-glob pattern filter. Invalid patterns fail fast.
    pub fn glob(pattern: &str) -> Result<Self, WatchError> {
        let glob = Glob::new(pattern).map_err(|err| {
            WatchError::InvalidArgument(format!("invalid filter pattern {pattern:?}: {err}"))
        })?;
        let mut builder = GlobSetBuilder::new();
        builder.add(glob);
        let set = builder.build().map_err(|err| {
            WatchError::InvalidArgument(format!("invalid filter pattern {pattern:?}: {err}"))
        })?;
        Ok(Self::Pattern(set))
    }

    pub fn pattern(set: GlobSet) -> Self {
        Self::Pattern(set)
    }

    pub fn predicate(f: impl Fn(&Path) -> FilterVerdict + Send + Sync + 'static) -> Self {
        Self::Predicate(Arc::new(f))
    }

    /// Evaluates the filter against `path`.
    ///
    /// Predicates are user code and therefore untrusted at the panic
    /// boundary: a panic is caught and returned as its rendered payload so
    /// the caller can surface it without unwinding through the dispatcher.
    pub(crate) fn verdict(&self, path: &Path) -> Result<FilterVerdict, String> {
        match self {
            PathFilter::AcceptAll => Ok(FilterVerdict::Accept),
            PathFilter::Pattern(set) => Ok(if set.is_match(path) {
                FilterVerdict::Accept
            } else {
                FilterVerdict::Reject
            }),
            PathFilter::Predicate(predicate) => {
                std::panic::catch_unwind(AssertUnwindSafe(|| predicate(path)))
                    .map_err(|payload| panic_message(payload.as_ref()))
            }
        }
    }
}

impl fmt::Debug for PathFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathFilter::AcceptAll => f.write_str("AcceptAll"),
            PathFilter::Pattern(set) => f.debug_tuple("Pattern").field(&set.len()).finish(),
            PathFilter::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}
