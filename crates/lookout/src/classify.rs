//! Maps raw driver notifications onto the update/remove vocabulary.

use std::path::PathBuf;

use crate::driver::RawEvent;
use crate::event::EventKind;
use crate::fs::{FileSystem, PathKind};

/// A classified notification: logical kind plus the absolute path it names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Classified {
    pub kind: EventKind,
    pub path: PathBuf,
    /// Whether the path currently is a directory. Always `false` for
    /// removals (the entry is gone). Feeds recursive emulation and the
    /// composer's parent-directory suppression.
    pub is_dir: bool,
}

/// Classification is an existence check, not an interpretation of the raw
/// platform kind: a path that still exists is an `update`, a missing one is
/// a `remove`. Rename hints get no source/destination correlation; each side
/// classifies independently by its own existence.
pub(crate) fn classify(raw: &RawEvent, fs: &dyn FileSystem) -> Classified {
    let path = raw.path();
    match fs.kind(&path) {
        Some(PathKind::Dir) => Classified {
            kind: EventKind::Update,
            path,
            is_dir: true,
        },
        Some(PathKind::File) => Classified {
            kind: EventKind::Update,
            path,
            is_dir: false,
        },
        None => Classified {
            kind: EventKind::Remove,
            path,
            is_dir: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::RawKind;
    use crate::fs::MemoryFs;
    use std::ffi::OsString;

    fn raw(dir: &str, name: Option<&str>, kind: RawKind) -> RawEvent {
        RawEvent {
            dir: PathBuf::from(dir),
            name: name.map(OsString::from),
            kind,
        }
    }

    #[test]
    fn existing_file_classifies_as_update() {
        let fs = MemoryFs::new();
        fs.add_file("/d/f.txt");

        let classified = classify(&raw("/d", Some("f.txt"), RawKind::Change), &fs);
        assert_eq!(classified.kind, EventKind::Update);
        assert_eq!(classified.path, PathBuf::from("/d/f.txt"));
        assert!(!classified.is_dir);
    }

    #[test]
    fn existing_directory_classifies_as_update_dir() {
        let fs = MemoryFs::new();
        fs.add_dir("/d/sub");

        let classified = classify(&raw("/d", Some("sub"), RawKind::Rename), &fs);
        assert_eq!(classified.kind, EventKind::Update);
        assert!(classified.is_dir);
    }

    #[test]
    fn missing_path_classifies_as_remove_regardless_of_raw_kind() {
        let fs = MemoryFs::new();
        fs.add_dir("/d");

        for kind in [RawKind::Rename, RawKind::Change] {
            let classified = classify(&raw("/d", Some("gone"), kind), &fs);
            assert_eq!(classified.kind, EventKind::Remove);
            assert!(!classified.is_dir);
        }
    }

    #[test]
    fn nameless_events_refer_to_the_directory_itself() {
        let fs = MemoryFs::new();
        fs.add_dir("/d");

        let classified = classify(&raw("/d", None, RawKind::Change), &fs);
        assert_eq!(classified.path, PathBuf::from("/d"));
        assert_eq!(classified.kind, EventKind::Update);
        assert!(classified.is_dir);
    }
}
