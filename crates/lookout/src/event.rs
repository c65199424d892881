use std::fmt;

use crate::error::WatchError;

/// Logical kind of a reported change.
///
/// Creation and modification both surface as `Update`; distinguishing them is
/// deliberately out of scope. `Remove` means the path no longer existed when
/// the notification was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Update,
    Remove,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Update => "update",
            EventKind::Remove => "remove",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The path view handed to subscribers, in the root's configured encoding.
///
/// `Text` carries UTF-8 (or base64/hex) renderings; `Bytes` carries the raw
/// host path bytes. Conversion happens at the emission boundary; the pipeline
/// itself always works on [`std::path::PathBuf`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventPath {
    Text(String),
    Bytes(Vec<u8>),
}

impl EventPath {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            EventPath::Text(text) => Some(text),
            EventPath::Bytes(_) => None,
        }
    }
}

impl fmt::Display for EventPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventPath::Text(text) => f.write_str(text),
            EventPath::Bytes(bytes) => write!(f, "{}", String::from_utf8_lossy(bytes)),
        }
    }
}

/// A change emitted by a watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub path: EventPath,
}

/// Everything a watcher reports over its event stream.
#[derive(Debug)]
pub enum WatcherEvent {
    /// Initial enumeration finished on every root.
    Ready,
    /// A debounced, deduplicated change.
    Change(Event),
    /// A non-fatal (or, for [`WatchError::TargetMissing`] and
    /// [`WatchError::DriverLost`], watcher-closing) failure.
    Error(WatchError),
    /// Terminal. Delivered exactly once, even when `close` is called twice.
    Close,
}
