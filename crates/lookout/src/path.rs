//! Path resolution and the byte/text boundary.
//!
//! The pipeline keeps one canonical form (absolute `PathBuf`s, compared as
//! host bytes) and converts to the configured view only when an event leaves
//! the watcher. Resolution is purely lexical: `.` and `..` segments collapse
//! without touching the file system, and symlinks are never followed.

use std::path::{Component, Path, PathBuf};

use base64::{engine::general_purpose, Engine as _};

use crate::error::WatchError;
use crate::event::EventPath;

/// Textual form of paths handed to callbacks and event subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PathEncoding {
    /// Platform display form (lossy for non-UTF-8 paths).
    #[default]
    Utf8,
    /// Raw host path bytes.
    Bytes,
    /// Base64 rendering of the host path bytes.
    Base64,
    /// Hex rendering of the host path bytes.
    Hex,
}

impl PathEncoding {
    /// Parses the textual encoding names accepted by watch options.
    ///
    /// Unknown names fail fast so a typo never silently falls back to UTF-8.
    pub fn from_name(name: &str) -> Result<Self, WatchError> {
        match name {
            "utf8" | "utf-8" => Ok(Self::Utf8),
            "buffer" => Ok(Self::Bytes),
            "base64" => Ok(Self::Base64),
            "hex" => Ok(Self::Hex),
            other => Err(WatchError::InvalidArgument(format!(
                "unknown path encoding {other:?}"
            ))),
        }
    }

    pub(crate) fn encode(self, path: &Path) -> EventPath {
        match self {
            PathEncoding::Utf8 => EventPath::Text(path.display().to_string()),
            PathEncoding::Bytes => EventPath::Bytes(path_bytes(path)),
            PathEncoding::Base64 => {
                EventPath::Text(general_purpose::STANDARD.encode(path_bytes(path)))
            }
            PathEncoding::Hex => EventPath::Text(hex::encode(path_bytes(path))),
        }
    }
}

/// Canonical byte form of a path in the host path encoding.
pub(crate) fn path_bytes(path: &Path) -> Vec<u8> {
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStrExt;
        path.as_os_str().as_bytes().to_vec()
    }
    #[cfg(not(unix))]
    {
        path.to_string_lossy().into_owned().into_bytes()
    }
}

/// Decodes byte-encoded target input using the host path encoding.
pub(crate) fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    #[cfg(unix)]
    {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;
        PathBuf::from(OsStr::from_bytes(bytes))
    }
    #[cfg(not(unix))]
    {
        PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
    }
}

/// Anchors relative paths at the current directory and collapses dot
/// segments lexically.
pub(crate) fn absolutize(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    normalize(&joined)
}

fn normalize(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                // `/..` is `/`.
                Some(Component::RootDir) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }
    parts.iter().map(|c| c.as_os_str()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    #[test]
    fn encoding_names_parse() {
        assert_eq!(PathEncoding::from_name("utf8").unwrap(), PathEncoding::Utf8);
        assert_eq!(
            PathEncoding::from_name("buffer").unwrap(),
            PathEncoding::Bytes
        );
        assert_eq!(
            PathEncoding::from_name("base64").unwrap(),
            PathEncoding::Base64
        );
        assert_eq!(PathEncoding::from_name("hex").unwrap(), PathEncoding::Hex);
    }

    #[test]
    fn unknown_encoding_name_fails_fast() {
        let err = PathEncoding::from_name("latin1").unwrap_err();
        assert!(matches!(err, WatchError::InvalidArgument(_)));
        assert!(err.to_string().contains("latin1"));
    }

    #[test]
    fn encode_produces_each_view() {
        let path = Path::new("/tmp/a.txt");

        assert_eq!(
            PathEncoding::Utf8.encode(path),
            EventPath::Text("/tmp/a.txt".to_string())
        );
        assert_eq!(
            PathEncoding::Bytes.encode(path),
            EventPath::Bytes(b"/tmp/a.txt".to_vec())
        );
        assert_eq!(
            PathEncoding::Hex.encode(path),
            EventPath::Text(hex::encode(b"/tmp/a.txt"))
        );
        assert_eq!(
            PathEncoding::Base64.encode(path),
            EventPath::Text(general_purpose::STANDARD.encode(b"/tmp/a.txt"))
        );
    }

    #[test]
    fn byte_targets_round_trip_through_the_host_encoding() {
        let path = Path::new("/tmp/some dir/f");
        assert_eq!(path_from_bytes(&path_bytes(path)), path);
    }

    #[test]
    fn absolutize_collapses_dot_segments() {
        assert_eq!(
            absolutize(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
        assert_eq!(absolutize(Path::new("/..")), PathBuf::from("/"));
    }

    #[test]
    fn absolutize_anchors_relative_paths() {
        let resolved = absolutize(Path::new("some/rel"));
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("some/rel"));
    }
}
