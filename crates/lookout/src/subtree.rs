//! Recursive emulation over per-directory, non-recursive drivers.
//!
//! One manager per root. It owns every driver subscription the root holds
//! and keeps the watched set in step with the tree: directories are enlisted
//! when they appear (and on start), and a removed directory retires its whole
//! subtree. Retirement is safe against late raw events; the dispatcher drops
//! anything arriving for a directory that is no longer in the watched set.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::driver::{Driver, SubscriptionId};
use crate::error::WatchError;
use crate::filter::{FilterVerdict, PathFilter};
use crate::fs::FileSystem;

#[derive(Debug, Default)]
pub(crate) struct SubtreeManager {
    watched: BTreeMap<PathBuf, SubscriptionId>,
}

impl SubtreeManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_watched(&self, dir: &Path) -> bool {
        self.watched.contains_key(dir)
    }

    /// Watched directories, sorted.
    pub fn dirs(&self) -> impl Iterator<Item = &PathBuf> {
        self.watched.keys()
    }

    /// Enlists `dir` and, when `recurse` is set, every extant directory
    /// beneath it. The filter is evaluated on each directory; a
    /// skip-subtree verdict prunes enlistment there. Failures are collected
    /// rather than aborting the walk, so one unreadable directory costs only
    /// its own subtree.
    pub fn enlist<D: Driver + ?Sized>(
        &mut self,
        driver: &mut D,
        fs: &dyn FileSystem,
        filter: &PathFilter,
        dir: &Path,
        recurse: bool,
    ) -> Vec<WatchError> {
        let mut errors = Vec::new();
        self.enlist_inner(driver, fs, filter, dir, recurse, &mut errors);
        errors
    }

    fn enlist_inner<D: Driver + ?Sized>(
        &mut self,
        driver: &mut D,
        fs: &dyn FileSystem,
        filter: &PathFilter,
        dir: &Path,
        recurse: bool,
        errors: &mut Vec<WatchError>,
    ) {
        match filter.verdict(dir) {
            Err(message) => {
                errors.push(WatchError::FilterPanic(message));
                return;
            }
            Ok(FilterVerdict::SkipSubtree) => return,
            // A rejected directory is still watched: its children stay
            // eligible for reporting.
            Ok(_) => {}
        }

        if !self.watched.contains_key(dir) {
            match driver.subscribe(dir) {
                Ok(id) => {
                    tracing::debug!(
                        target = "lookout.subtree",
                        dir = %dir.display(),
                        "enlisted directory"
                    );
                    self.watched.insert(dir.to_path_buf(), id);
                }
                Err(source) => {
                    errors.push(WatchError::Subscription {
                        path: dir.to_path_buf(),
                        source,
                    });
                    return;
                }
            }
        }

        if !recurse {
            return;
        }
        match fs.read_dir(dir) {
            Ok(entries) => {
                for entry in entries {
                    if fs.is_dir(&entry) {
                        self.enlist_inner(driver, fs, filter, &entry, true, errors);
                    }
                }
            }
            Err(source) => errors.push(WatchError::Subscription {
                path: dir.to_path_buf(),
                source,
            }),
        }
    }

    /// Retires `dir` and every watched directory beneath it.
    pub fn retire<D: Driver + ?Sized>(&mut self, driver: &mut D, dir: &Path) {
        let doomed: Vec<PathBuf> = self
            .watched
            .keys()
            .filter(|watched| watched.starts_with(dir))
            .cloned()
            .collect();
        for path in doomed {
            if let Some(id) = self.watched.remove(&path) {
                tracing::debug!(
                    target = "lookout.subtree",
                    dir = %path.display(),
                    "retired directory"
                );
                driver.unsubscribe(id);
            }
        }
    }

    pub fn retire_all<D: Driver + ?Sized>(&mut self, driver: &mut D) {
        for (_, id) in std::mem::take(&mut self.watched) {
            driver.unsubscribe(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ManualDriver;
    use crate::fs::MemoryFs;

    fn tree() -> MemoryFs {
        let fs = MemoryFs::new();
        fs.add_file("/root/a/f.txt");
        fs.add_file("/root/a/deep/g.txt");
        fs.add_dir("/root/b");
        fs.add_dir("/root/ignored/sub");
        fs
    }

    #[test]
    fn enlist_walks_the_whole_tree() {
        let fs = tree();
        let mut driver = ManualDriver::new();
        let mut manager = SubtreeManager::new();

        let errors = manager.enlist(
            &mut driver,
            &fs,
            &PathFilter::AcceptAll,
            Path::new("/root"),
            true,
        );
        assert!(errors.is_empty());

        let dirs: Vec<&PathBuf> = manager.dirs().collect();
        assert_eq!(
            dirs,
            vec![
                &PathBuf::from("/root"),
                &PathBuf::from("/root/a"),
                &PathBuf::from("/root/a/deep"),
                &PathBuf::from("/root/b"),
                &PathBuf::from("/root/ignored"),
                &PathBuf::from("/root/ignored/sub"),
            ]
        );
    }

    #[test]
    fn skip_subtree_prunes_enlistment() {
        let fs = tree();
        let mut driver = ManualDriver::new();
        let mut manager = SubtreeManager::new();

        let filter = PathFilter::predicate(|path: &Path| {
            if path.ends_with("ignored") {
                FilterVerdict::SkipSubtree
            } else {
                FilterVerdict::Accept
            }
        });
        let errors = manager.enlist(&mut driver, &fs, &filter, Path::new("/root"), true);
        assert!(errors.is_empty());

        assert!(!manager.is_watched(Path::new("/root/ignored")));
        assert!(!manager.is_watched(Path::new("/root/ignored/sub")));
        assert!(manager.is_watched(Path::new("/root/a/deep")));
    }

    #[test]
    fn rejected_directories_are_still_enlisted() {
        let fs = tree();
        let mut driver = ManualDriver::new();
        let mut manager = SubtreeManager::new();

        let filter = PathFilter::predicate(|_: &Path| FilterVerdict::Reject);
        manager.enlist(&mut driver, &fs, &filter, Path::new("/root"), true);

        assert!(manager.is_watched(Path::new("/root/a")));
        assert!(manager.is_watched(Path::new("/root/a/deep")));
    }

    #[test]
    fn subscription_failures_cost_only_their_subtree() {
        let fs = tree();
        let mut driver = ManualDriver::new();
        driver.handle().deny("/root/a");
        let mut manager = SubtreeManager::new();

        let errors = manager.enlist(
            &mut driver,
            &fs,
            &PathFilter::AcceptAll,
            Path::new("/root"),
            true,
        );

        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], WatchError::Subscription { .. }));
        assert!(!manager.is_watched(Path::new("/root/a")));
        assert!(!manager.is_watched(Path::new("/root/a/deep")));
        assert!(manager.is_watched(Path::new("/root/b")));
    }

    #[test]
    fn retire_releases_the_subtree_and_nothing_else() {
        let fs = tree();
        let mut driver = ManualDriver::new();
        let handle = driver.handle();
        let mut manager = SubtreeManager::new();
        manager.enlist(
            &mut driver,
            &fs,
            &PathFilter::AcceptAll,
            Path::new("/root"),
            true,
        );

        manager.retire(&mut driver, Path::new("/root/a"));

        assert!(!manager.is_watched(Path::new("/root/a")));
        assert!(!manager.is_watched(Path::new("/root/a/deep")));
        assert!(manager.is_watched(Path::new("/root")));
        assert!(manager.is_watched(Path::new("/root/b")));

        let mut released = handle.unsubscribe_calls();
        released.sort();
        assert_eq!(
            released,
            vec![PathBuf::from("/root/a"), PathBuf::from("/root/a/deep")]
        );
    }

    #[test]
    fn enlist_is_idempotent_for_already_watched_directories() {
        let fs = tree();
        let mut driver = ManualDriver::new();
        let handle = driver.handle();
        let mut manager = SubtreeManager::new();

        manager.enlist(
            &mut driver,
            &fs,
            &PathFilter::AcceptAll,
            Path::new("/root/b"),
            true,
        );
        manager.enlist(
            &mut driver,
            &fs,
            &PathFilter::AcceptAll,
            Path::new("/root/b"),
            true,
        );

        assert_eq!(handle.subscribe_calls(), vec![PathBuf::from("/root/b")]);
    }

    #[test]
    fn retire_all_empties_the_watched_set() {
        let fs = tree();
        let mut driver = ManualDriver::new();
        let handle = driver.handle();
        let mut manager = SubtreeManager::new();
        manager.enlist(
            &mut driver,
            &fs,
            &PathFilter::AcceptAll,
            Path::new("/root"),
            true,
        );

        manager.retire_all(&mut driver);

        assert_eq!(manager.dirs().count(), 0);
        assert!(handle.subscribed_dirs().is_empty());
    }
}
