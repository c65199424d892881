//! File-system metadata facility.
//!
//! The watcher core never touches `std::fs` directly; the classifier and the
//! recursive-emulation layer ask this trait instead. That keeps the pipeline
//! deterministic under test (see [`MemoryFs`]) and pins down the symlink
//! policy in one place: `kind` uses `symlink_metadata` semantics, so a target
//! replaced by a symbolic link classifies by the link itself.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Kind of a file-system entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    File,
    Dir,
}

/// Metadata queries the watcher core needs.
///
/// The trait is intentionally small so it can be implemented for the local
/// file system and for in-memory trees in tests.
pub trait FileSystem: Send + Sync {
    /// Returns the entry kind without following the final symlink component,
    /// or `None` if the path does not exist.
    fn kind(&self, path: &Path) -> Option<PathKind>;

    /// Lists directory entries as absolute paths.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    fn exists(&self, path: &Path) -> bool {
        self.kind(path).is_some()
    }

    fn is_dir(&self, path: &Path) -> bool {
        matches!(self.kind(path), Some(PathKind::Dir))
    }
}

/// Local OS file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl FileSystem for LocalFs {
    fn kind(&self, path: &Path) -> Option<PathKind> {
        let meta = std::fs::symlink_metadata(path).ok()?;
        if meta.is_dir() {
            Some(PathKind::Dir)
        } else {
            Some(PathKind::File)
        }
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(path)? {
            out.push(entry?.path());
        }
        Ok(out)
    }
}

/// In-memory file system for deterministic tests.
///
/// Tests mutate the tree through a clone while the watcher holds its own
/// handle; both see the same entries. Listings come back sorted so
/// enumeration order never depends on hash state.
#[derive(Debug, Clone, Default)]
pub struct MemoryFs {
    entries: Arc<Mutex<BTreeMap<PathBuf, PathKind>>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a directory, creating missing ancestors.
    pub fn add_dir(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let mut entries = self.entries.lock().unwrap();
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            entries.insert(ancestor.to_path_buf(), PathKind::Dir);
        }
    }

    /// Inserts a file, creating missing ancestor directories.
    pub fn add_file(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        if let Some(parent) = path.parent() {
            self.add_dir(parent.to_path_buf());
        }
        self.entries.lock().unwrap().insert(path, PathKind::File);
    }

    /// Removes a path and everything under it.
    pub fn remove(&self, path: &Path) {
        self.entries
            .lock()
            .unwrap()
            .retain(|entry, _| !entry.starts_with(path));
    }
}

impl FileSystem for MemoryFs {
    fn kind(&self, path: &Path) -> Option<PathKind> {
        self.entries.lock().unwrap().get(path).copied()
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let entries = self.entries.lock().unwrap();
        match entries.get(path) {
            Some(PathKind::Dir) => {}
            Some(PathKind::File) => {
                return Err(io::Error::new(
                    io::ErrorKind::NotADirectory,
                    format!("not a directory: {}", path.display()),
                ));
            }
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no such directory: {}", path.display()),
                ));
            }
        }
        Ok(entries
            .keys()
            .filter(|entry| entry.parent() == Some(path))
            .cloned()
            .collect())
    }
}
