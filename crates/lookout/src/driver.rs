//! Platform driver seam.
//!
//! # Ownership / layering
//!
//! The driver is the only piece of the crate that talks to an operating
//! system change-notification primitive. Everything above it consumes the
//! stable [`RawEvent`] model, so swapping backends (or injecting the
//! deterministic [`ManualDriver`] in tests) never touches the pipeline.
//!
//! - The OS backend (currently notify-based) lives behind the
//!   `driver-notify` feature. If another backend is added, keep it here and
//!   feature-gate it the same way so embedders don't take on extra
//!   OS-specific dependencies.
//! - Recursion capability is a property of the backend, reported through
//!   [`Driver::native_recursive`]. Backends without it are wrapped by the
//!   recursive-emulation layer; they never emulate recursion themselves.
//!
//! # Event delivery
//!
//! OS watchers are push-based internally (a background thread invokes a
//! callback when the kernel reports a change). Drivers expose those pushes as
//! a `crossbeam_channel` stream returned by [`Driver::receiver`], so the
//! dispatcher can integrate them into its own select loop without forcing an
//! async runtime on embedders. Asynchronous driver errors are delivered on
//! the same stream (see [`DriverMessage`]).
//!
//! A driver never classifies update vs. remove; that requires a file-system
//! query and belongs to the classifier.
//!
//! # Testing
//!
//! Avoid tests that rely on real OS watcher timing; they are flaky on CI and
//! across platforms. Prefer [`ManualDriver`] and drive the pipeline with
//! injected events.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crossbeam_channel as channel;

/// Raw platform hint accompanying a notification.
///
/// Opaque to the pipeline: classification is an existence check, and rename
/// sides are never correlated. The hint is kept for logging and for backends
/// that want to preserve it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKind {
    /// The platform suggested a name change (create, remove, rename).
    Rename,
    /// The platform suggested a content or metadata change.
    Change,
}

/// An unclassified notification from the platform primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// The watched directory the notification was observed on.
    pub dir: PathBuf,
    /// The entry the notification names, relative to `dir`, when the
    /// platform provides one. May contain nested components on natively
    /// recursive platforms. Absent means the event refers to `dir` itself.
    pub name: Option<OsString>,
    pub kind: RawKind,
}

impl RawEvent {
    /// Absolute path the event refers to.
    pub fn path(&self) -> PathBuf {
        match &self.name {
            Some(name) => self.dir.join(name),
            None => self.dir.clone(),
        }
    }
}

/// Message type delivered by a [`Driver`].
///
/// Backends may surface errors asynchronously; these arrive as `Err` values
/// on the same stream.
pub type DriverMessage = io::Result<RawEvent>;

/// Identifies one directory subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Change-notification primitive over a single directory at a time.
///
/// `subscribe` fails when the directory does not exist or is inaccessible.
/// After `unsubscribe`, late events for the directory may still be in
/// flight; the pipeline drops them.
pub trait Driver: Send {
    /// Whether one subscription observes all descendants of its directory.
    fn native_recursive(&self) -> bool;

    /// Begins observing `dir`.
    fn subscribe(&mut self, dir: &Path) -> io::Result<SubscriptionId>;

    /// Stops a subscription. Unknown ids are ignored.
    fn unsubscribe(&mut self, id: SubscriptionId);

    /// Stream of raw notifications.
    fn receiver(&self) -> &channel::Receiver<DriverMessage>;
}

impl<D: ?Sized + Driver> Driver for Box<D> {
    fn native_recursive(&self) -> bool {
        self.as_ref().native_recursive()
    }

    fn subscribe(&mut self, dir: &Path) -> io::Result<SubscriptionId> {
        self.as_mut().subscribe(dir)
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        self.as_mut().unsubscribe(id)
    }

    fn receiver(&self) -> &channel::Receiver<DriverMessage> {
        self.as_ref().receiver()
    }
}

const MANUAL_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct ManualState {
    next_id: u64,
    active: BTreeMap<u64, PathBuf>,
    subscribe_calls: Vec<PathBuf>,
    unsubscribe_calls: Vec<PathBuf>,
    denied: Vec<PathBuf>,
}

/// Deterministic driver for tests.
///
/// No OS integration: callers inject events through [`ManualDriverHandle`],
/// which stays usable after the driver has been moved into a watcher.
/// Delivery uses a bounded in-memory queue; injection is non-blocking and
/// returns `io::ErrorKind::WouldBlock` when the queue is full.
#[derive(Debug)]
pub struct ManualDriver {
    tx: channel::Sender<DriverMessage>,
    rx: channel::Receiver<DriverMessage>,
    recursive: bool,
    state: Arc<Mutex<ManualState>>,
}

/// Cloneable handle for injecting events into a [`ManualDriver`] and
/// inspecting its subscription bookkeeping.
#[derive(Debug, Clone)]
pub struct ManualDriverHandle {
    tx: channel::Sender<DriverMessage>,
    state: Arc<Mutex<ManualState>>,
}

impl ManualDriver {
    /// A driver without native recursion (the emulation path).
    pub fn new() -> Self {
        Self::with_recursion(false)
    }

    /// A driver reporting native recursion.
    pub fn recursive() -> Self {
        Self::with_recursion(true)
    }

    fn with_recursion(recursive: bool) -> Self {
        let (tx, rx) = channel::bounded(MANUAL_QUEUE_CAPACITY);
        Self {
            tx,
            rx,
            recursive,
            state: Arc::new(Mutex::new(ManualState::default())),
        }
    }

    pub fn handle(&self) -> ManualDriverHandle {
        ManualDriverHandle {
            tx: self.tx.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for ManualDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualDriverHandle {
    /// Injects a synthetic raw event.
    pub fn push(&self, event: RawEvent) -> io::Result<()> {
        self.send(Ok(event))
    }

    /// Injects an asynchronous driver error.
    pub fn push_error(&self, error: io::Error) -> io::Result<()> {
        self.send(Err(error))
    }

    fn send(&self, message: DriverMessage) -> io::Result<()> {
        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(channel::TrySendError::Full(_)) => Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "driver queue is full",
            )),
            Err(channel::TrySendError::Disconnected(_)) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "driver receiver dropped",
            )),
        }
    }

    /// Makes future `subscribe` calls for `dir` fail with `PermissionDenied`.
    pub fn deny(&self, dir: impl Into<PathBuf>) {
        self.state.lock().unwrap().denied.push(dir.into());
    }

    /// Currently subscribed directories (sorted for determinism).
    pub fn subscribed_dirs(&self) -> Vec<PathBuf> {
        let state = self.state.lock().unwrap();
        let mut dirs: Vec<PathBuf> = state.active.values().cloned().collect();
        dirs.sort();
        dirs.dedup();
        dirs
    }

    /// Directories passed to `subscribe` (in call order).
    pub fn subscribe_calls(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().subscribe_calls.clone()
    }

    /// Directories whose subscriptions were released (in call order).
    pub fn unsubscribe_calls(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().unsubscribe_calls.clone()
    }
}

impl Driver for ManualDriver {
    fn native_recursive(&self) -> bool {
        self.recursive
    }

    fn subscribe(&mut self, dir: &Path) -> io::Result<SubscriptionId> {
        let mut state = self.state.lock().unwrap();
        state.subscribe_calls.push(dir.to_path_buf());
        if state.denied.iter().any(|denied| denied == dir) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("subscription denied: {}", dir.display()),
            ));
        }
        state.next_id += 1;
        let id = state.next_id;
        state.active.insert(id, dir.to_path_buf());
        Ok(SubscriptionId(id))
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        let mut state = self.state.lock().unwrap();
        if let Some(dir) = state.active.remove(&id.0) {
            state.unsubscribe_calls.push(dir);
        }
    }

    fn receiver(&self) -> &channel::Receiver<DriverMessage> {
        &self.rx
    }
}

#[cfg(feature = "driver-notify")]
mod notify_impl {
    use super::*;

    use std::collections::HashMap;

    use notify::{RecursiveMode, Watcher as _};

    const NOTIFY_QUEUE_CAPACITY: usize = 4096;

    fn notify_error_to_io(err: notify::Error) -> io::Error {
        io::Error::other(err)
    }

    fn raw_kind(kind: &notify::EventKind) -> RawKind {
        use notify::event::ModifyKind;
        match kind {
            notify::EventKind::Create(_)
            | notify::EventKind::Remove(_)
            | notify::EventKind::Modify(ModifyKind::Name(_)) => RawKind::Rename,
            _ => RawKind::Change,
        }
    }

    fn split_path(path: PathBuf, kind: RawKind) -> RawEvent {
        match (path.parent(), path.file_name()) {
            (Some(dir), Some(name)) => RawEvent {
                dir: dir.to_path_buf(),
                name: Some(name.to_os_string()),
                kind,
            },
            _ => RawEvent {
                dir: path,
                name: None,
                kind,
            },
        }
    }

    /// OS-backed driver over `notify::RecommendedWatcher`.
    ///
    /// notify emulates recursion itself on platforms whose kernel primitive
    /// is per-directory, so this driver reports native recursion and the
    /// emulation layer stays out of the way.
    pub struct NotifyDriver {
        watcher: notify::RecommendedWatcher,
        rx: channel::Receiver<DriverMessage>,
        next_id: u64,
        dirs: HashMap<SubscriptionId, PathBuf>,
    }

    impl NotifyDriver {
        pub fn new() -> io::Result<Self> {
            let (tx, rx) = channel::bounded(NOTIFY_QUEUE_CAPACITY);
            let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
                match res {
                    Ok(event) => {
                        let kind = raw_kind(&event.kind);
                        for path in event.paths {
                            // A full queue means the consumer fell behind an
                            // event storm; dropping here is the bounded-memory
                            // trade-off, and classification self-corrects on
                            // the next notification for the path.
                            let _ = tx.try_send(Ok(split_path(path, kind)));
                        }
                    }
                    Err(err) => {
                        let _ = tx.try_send(Err(notify_error_to_io(err)));
                    }
                }
            })
            .map_err(notify_error_to_io)?;

            Ok(Self {
                watcher,
                rx,
                next_id: 0,
                dirs: HashMap::new(),
            })
        }
    }

    impl Driver for NotifyDriver {
        fn native_recursive(&self) -> bool {
            true
        }

        fn subscribe(&mut self, dir: &Path) -> io::Result<SubscriptionId> {
            self.watcher
                .watch(dir, RecursiveMode::Recursive)
                .map_err(notify_error_to_io)?;
            self.next_id += 1;
            let id = SubscriptionId(self.next_id);
            self.dirs.insert(id, dir.to_path_buf());
            Ok(id)
        }

        fn unsubscribe(&mut self, id: SubscriptionId) {
            if let Some(dir) = self.dirs.remove(&id) {
                if let Err(err) = self.watcher.unwatch(&dir) {
                    tracing::debug!(
                        target = "lookout.driver",
                        dir = %dir.display(),
                        error = %err,
                        "failed to release native watch"
                    );
                }
            }
        }

        fn receiver(&self) -> &channel::Receiver<DriverMessage> {
            &self.rx
        }
    }
}

#[cfg(feature = "driver-notify")]
pub use notify_impl::NotifyDriver;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_events_compose_their_path() {
        let with_name = RawEvent {
            dir: PathBuf::from("/watched"),
            name: Some(OsString::from("f.txt")),
            kind: RawKind::Change,
        };
        assert_eq!(with_name.path(), PathBuf::from("/watched/f.txt"));

        let bare = RawEvent {
            dir: PathBuf::from("/watched"),
            name: None,
            kind: RawKind::Rename,
        };
        assert_eq!(bare.path(), PathBuf::from("/watched"));
    }

    #[test]
    fn manual_driver_delivers_injected_events() {
        let driver = ManualDriver::new();
        let handle = driver.handle();

        let event = RawEvent {
            dir: PathBuf::from("/d"),
            name: Some(OsString::from("x")),
            kind: RawKind::Change,
        };
        handle.push(event.clone()).unwrap();

        let received = driver.receiver().try_recv().unwrap().unwrap();
        assert_eq!(received, event);
    }

    #[test]
    fn manual_driver_records_subscriptions() {
        let mut driver = ManualDriver::new();
        let handle = driver.handle();

        let a = driver.subscribe(Path::new("/d/a")).unwrap();
        let _b = driver.subscribe(Path::new("/d/b")).unwrap();
        assert_eq!(
            handle.subscribed_dirs(),
            vec![PathBuf::from("/d/a"), PathBuf::from("/d/b")]
        );

        driver.unsubscribe(a);
        assert_eq!(handle.subscribed_dirs(), vec![PathBuf::from("/d/b")]);
        assert_eq!(handle.unsubscribe_calls(), vec![PathBuf::from("/d/a")]);
    }

    #[test]
    fn manual_driver_denies_configured_directories() {
        let mut driver = ManualDriver::new();
        driver.handle().deny("/d/secret");

        let err = driver.subscribe(Path::new("/d/secret")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        assert!(driver.handle().subscribed_dirs().is_empty());
    }

    #[test]
    fn manual_driver_reports_overflow_as_would_block() {
        let driver = ManualDriver::new();
        let handle = driver.handle();
        let event = RawEvent {
            dir: PathBuf::from("/d"),
            name: None,
            kind: RawKind::Change,
        };

        for _ in 0..MANUAL_QUEUE_CAPACITY {
            handle.push(event.clone()).unwrap();
        }
        let err = handle.push(event).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }
}
