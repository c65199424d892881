//! Watcher facade: lifecycle, dispatcher loop, and the public surface.
//!
//! One dispatcher thread per watcher plays the role of the serial event
//! dispatcher: every user-visible callback (`ready`, `change`, `error`,
//! `close`, filter predicates, `watched_paths` callbacks) runs on it, never
//! concurrently. The driver may use OS threads internally, but its events
//! arrive through a channel consumed only here. Debounce timers are
//! deadlines serviced by a `channel::after` tick in the select loop.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel as channel;

use crate::classify::classify;
use crate::compose::{Candidate, Composer};
use crate::debounce::Debouncer;
use crate::driver::{Driver, DriverMessage, RawEvent};
use crate::error::{panic_message, WatchError};
use crate::event::{Event, EventKind, EventPath, WatcherEvent};
use crate::filter::{FilterVerdict, PathFilter};
use crate::fs::{FileSystem, LocalFs, PathKind};
use crate::path::{absolutize, path_from_bytes, PathEncoding};
use crate::subtree::SubtreeManager;

const DEFAULT_DELAY: Duration = Duration::from_millis(200);
const IDLE_TICK: Duration = Duration::from_secs(3600);

/// A watch target: a path, or raw host path bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchTarget {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl WatchTarget {
    fn into_path(self) -> PathBuf {
        match self {
            WatchTarget::Path(path) => path,
            WatchTarget::Bytes(bytes) => path_from_bytes(&bytes),
        }
    }
}

impl From<PathBuf> for WatchTarget {
    fn from(value: PathBuf) -> Self {
        WatchTarget::Path(value)
    }
}

impl From<&Path> for WatchTarget {
    fn from(value: &Path) -> Self {
        WatchTarget::Path(value.to_path_buf())
    }
}

impl From<&str> for WatchTarget {
    fn from(value: &str) -> Self {
        WatchTarget::Path(PathBuf::from(value))
    }
}

impl From<String> for WatchTarget {
    fn from(value: String) -> Self {
        WatchTarget::Path(PathBuf::from(value))
    }
}

impl From<Vec<u8>> for WatchTarget {
    fn from(value: Vec<u8>) -> Self {
        WatchTarget::Bytes(value)
    }
}

/// Configuration for a watch.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Watch subdirectories of directory targets.
    pub recursive: bool,
    /// Debounce window. Zero still coalesces within a dispatch turn.
    pub delay: Duration,
    /// Form of the paths handed to subscribers.
    pub encoding: PathEncoding,
    pub filter: PathFilter,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            recursive: false,
            delay: DEFAULT_DELAY,
            encoding: PathEncoding::Utf8,
            filter: PathFilter::AcceptAll,
        }
    }
}

impl WatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options carrying only a named encoding, for callers configured by
    /// string. Unknown names fail fast.
    pub fn encoding_named(name: &str) -> Result<Self, WatchError> {
        Ok(Self {
            encoding: PathEncoding::from_name(name)?,
            ..Self::default()
        })
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn encoding(mut self, encoding: PathEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn filter(mut self, filter: PathFilter) -> Self {
        self.filter = filter;
        self
    }
}

type ChangeCallback = Box<dyn FnMut(EventKind, &EventPath) + Send>;
type ReadyCallback = Box<dyn FnMut() + Send>;
type ErrorCallback = Box<dyn FnMut(&WatchError) + Send>;
type CloseCallback = Box<dyn FnMut() + Send>;
type PathsCallback = Box<dyn FnOnce(Vec<PathBuf>) + Send>;

/// Watches one or more paths.
///
/// This is the convenience form of [`WatcherBuilder`] covering the common
/// case: a platform driver, the local file system, and event consumption
/// through [`Watcher::events`].
pub fn watch<T>(
    targets: impl IntoIterator<Item = T>,
    options: WatchOptions,
) -> Result<Watcher, WatchError>
where
    T: Into<WatchTarget>,
{
    Watcher::builder().targets(targets).options(options).start()
}

/// Like [`watch`], with a change callback invoked on the dispatcher thread
/// for every emitted event.
pub fn watch_with<T>(
    targets: impl IntoIterator<Item = T>,
    options: WatchOptions,
    callback: impl FnMut(EventKind, &EventPath) + Send + 'static,
) -> Result<Watcher, WatchError>
where
    T: Into<WatchTarget>,
{
    Watcher::builder()
        .targets(targets)
        .options(options)
        .on_change(callback)
        .start()
}

/// Builder for a [`Watcher`], for callers that inject a driver or file
/// system, or register per-event callbacks in addition to the event stream.
pub struct WatcherBuilder {
    targets: Vec<WatchTarget>,
    options: WatchOptions,
    driver: Option<Box<dyn Driver + Send>>,
    fs: Option<Arc<dyn FileSystem>>,
    on_change: Option<ChangeCallback>,
    on_ready: Option<ReadyCallback>,
    on_error: Option<ErrorCallback>,
    on_close: Option<CloseCallback>,
}

impl WatcherBuilder {
    fn new() -> Self {
        Self {
            targets: Vec::new(),
            options: WatchOptions::default(),
            driver: None,
            fs: None,
            on_change: None,
            on_ready: None,
            on_error: None,
            on_close: None,
        }
    }

    pub fn target(mut self, target: impl Into<WatchTarget>) -> Self {
        self.targets.push(target.into());
        self
    }

    pub fn targets<T: Into<WatchTarget>>(mut self, targets: impl IntoIterator<Item = T>) -> Self {
        self.targets.extend(targets.into_iter().map(Into::into));
        self
    }

    pub fn options(mut self, options: WatchOptions) -> Self {
        self.options = options;
        self
    }

    /// Overrides the platform driver (e.g. with a
    /// [`crate::ManualDriver`] in tests).
    pub fn driver(mut self, driver: impl Driver + Send + 'static) -> Self {
        self.driver = Some(Box::new(driver));
        self
    }

    /// Overrides the file-system metadata facility.
    pub fn file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = Some(fs);
        self
    }

    pub fn on_change(mut self, callback: impl FnMut(EventKind, &EventPath) + Send + 'static) -> Self {
        self.on_change = Some(Box::new(callback));
        self
    }

    pub fn on_ready(mut self, callback: impl FnMut() + Send + 'static) -> Self {
        self.on_ready = Some(Box::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl FnMut(&WatchError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    pub fn on_close(mut self, callback: impl FnMut() + Send + 'static) -> Self {
        self.on_close = Some(Box::new(callback));
        self
    }

    /// Validates the configuration and starts the dispatcher.
    ///
    /// Only argument problems surface here; a missing target is reported as
    /// an `error` event followed by close, since the file system can change
    /// between validation and enumeration anyway.
    pub fn start(self) -> Result<Watcher, WatchError> {
        if self.targets.is_empty() {
            return Err(WatchError::InvalidArgument(
                "no watch targets supplied".to_string(),
            ));
        }

        let driver: Box<dyn Driver + Send> = match self.driver {
            Some(driver) => driver,
            None => Box::new(default_driver()?),
        };
        let fs = self.fs.unwrap_or_else(|| Arc::new(LocalFs));

        let (events_tx, events_rx) = channel::unbounded();
        let (control_tx, control_rx) = channel::unbounded();
        let closed = Arc::new(AtomicBool::new(false));

        let roots = self
            .targets
            .into_iter()
            .map(|target| Root::new(absolutize(&target.into_path()), &self.options))
            .collect();

        let dispatcher = Dispatcher {
            driver,
            fs,
            roots,
            composer: Composer::new(self.options.delay),
            router: EventRouter {
                events_tx,
                on_change: self.on_change,
                on_ready: self.on_ready,
                on_error: self.on_error,
                on_close: self.on_close,
            },
            control_rx,
            closed: Arc::clone(&closed),
        };
        let thread = thread::spawn(move || dispatcher.run());

        Ok(Watcher {
            control_tx,
            events_rx,
            closed,
            thread: Some(thread),
        })
    }
}

#[cfg(feature = "driver-notify")]
fn default_driver() -> Result<crate::driver::NotifyDriver, WatchError> {
    crate::driver::NotifyDriver::new().map_err(WatchError::Driver)
}

#[cfg(not(feature = "driver-notify"))]
fn default_driver() -> Result<crate::driver::ManualDriver, WatchError> {
    Err(WatchError::InvalidArgument(
        "no platform driver available; enable the `driver-notify` feature or supply one"
            .to_string(),
    ))
}

enum Control {
    Close,
    WatchedPaths(PathsCallback),
}

/// Handle to a running watch.
///
/// Events are consumed from [`Watcher::events`]; dropping the handle closes
/// the watch and joins the dispatcher.
pub struct Watcher {
    control_tx: channel::Sender<Control>,
    events_rx: channel::Receiver<WatcherEvent>,
    closed: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl Watcher {
    pub fn builder() -> WatcherBuilder {
        WatcherBuilder::new()
    }

    /// The watcher's event stream. Events queue here even while nobody is
    /// receiving, so a consumer attached after `ready` still observes it.
    pub fn events(&self) -> &channel::Receiver<WatcherEvent> {
        &self.events_rx
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Tears down every watch and cancels pending debounce timers.
    ///
    /// Synchronous: once this returns no further `change` fires, even if the
    /// driver delivers late raw events. Idempotent; the `close` event is
    /// delivered exactly once.
    pub fn close(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.control_tx.send(Control::Close);
        if thread.join().is_err() {
            tracing::debug!(
                target = "lookout.watcher",
                "dispatcher panicked during shutdown (best effort join)"
            );
        }
        self.closed.store(true, Ordering::Release);
    }

    /// Invokes `callback` with the union of every root's watched set,
    /// deduplicated. Safe to call before `ready` (the callback is deferred
    /// until initial enumeration completes) and after close (the callback
    /// receives an empty set). Runs on the dispatcher thread.
    pub fn watched_paths(&self, callback: impl FnOnce(Vec<PathBuf>) + Send + 'static) {
        if self.is_closed() {
            callback(Vec::new());
            return;
        }
        if let Err(err) = self
            .control_tx
            .send(Control::WatchedPaths(Box::new(callback)))
        {
            let Control::WatchedPaths(callback) = err.into_inner() else {
                return;
            };
            callback(Vec::new());
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.close();
    }
}

struct Root {
    /// Resolved absolute target.
    target: PathBuf,
    /// The directory actually observed: the target itself, or its parent
    /// when the target is a file.
    watch_base: PathBuf,
    /// Set when the target is a file; emissions are scoped to it.
    file_name: Option<OsString>,
    recursive: bool,
    filter: PathFilter,
    encoding: PathEncoding,
    debouncer: Debouncer,
    /// Present when the driver lacks native recursion.
    subtree: Option<SubtreeManager>,
    /// Present when the driver has native recursion.
    base_subscription: Option<crate::driver::SubscriptionId>,
}

impl Root {
    fn new(target: PathBuf, options: &WatchOptions) -> Self {
        Self {
            watch_base: target.clone(),
            target,
            file_name: None,
            recursive: options.recursive,
            filter: options.filter.clone(),
            encoding: options.encoding,
            debouncer: Debouncer::new(options.delay),
            subtree: None,
            base_subscription: None,
        }
    }

    /// Whether an emission for `path` belongs to this root.
    fn in_scope(&self, path: &Path) -> bool {
        if self.file_name.is_some() {
            return path == self.target;
        }
        if !path.starts_with(&self.target) {
            return false;
        }
        if self.recursive {
            return true;
        }
        path == self.target || path.parent() == Some(self.target.as_path())
    }

    /// Filter verdict for `path`, honoring skip-subtree anywhere on the
    /// chain between the target and the path. Reject on an ancestor does not
    /// suppress children; only the path's own verdict decides emission.
    fn emission_verdict(&self, path: &Path) -> Result<FilterVerdict, String> {
        if matches!(self.filter, PathFilter::AcceptAll) {
            return Ok(FilterVerdict::Accept);
        }
        let chain: Vec<&Path> = path
            .ancestors()
            .take_while(|ancestor| ancestor.starts_with(&self.target))
            .collect();
        for ancestor in chain.iter().rev() {
            let verdict = self.filter.verdict(ancestor)?;
            if verdict == FilterVerdict::SkipSubtree {
                return Ok(FilterVerdict::SkipSubtree);
            }
            if *ancestor == path {
                return Ok(verdict);
            }
        }
        Ok(FilterVerdict::Accept)
    }
}

/// One emission leaving a root's debouncer, before composition.
struct Emission {
    root: usize,
    kind: EventKind,
    path: PathBuf,
}

/// Single emit path for everything a watcher reports (the event stream plus
/// the optional per-kind callbacks).
struct EventRouter {
    events_tx: channel::Sender<WatcherEvent>,
    on_change: Option<ChangeCallback>,
    on_ready: Option<ReadyCallback>,
    on_error: Option<ErrorCallback>,
    on_close: Option<CloseCallback>,
}

impl EventRouter {
    fn emit(&mut self, event: WatcherEvent) {
        let panicked = match &event {
            WatcherEvent::Ready => self.on_ready.as_mut().and_then(|cb| catch_callback(|| cb())),
            WatcherEvent::Change(change) => self
                .on_change
                .as_mut()
                .and_then(|cb| catch_callback(|| cb(change.kind, &change.path))),
            WatcherEvent::Error(error) => self
                .on_error
                .as_mut()
                .and_then(|cb| catch_callback(|| cb(error))),
            WatcherEvent::Close => self.on_close.as_mut().and_then(|cb| catch_callback(|| cb())),
        };
        let _ = self.events_tx.send(event);

        if let Some(message) = panicked {
            // A panicking handler must not take the watcher down. Report on
            // the stream only; re-dispatching through the error callback
            // could recurse.
            tracing::warn!(
                target = "lookout.watcher",
                panic = %message,
                "event callback panicked"
            );
            let _ = self
                .events_tx
                .send(WatcherEvent::Error(WatchError::CallbackPanic(message)));
        }
    }
}

fn catch_callback(f: impl FnOnce()) -> Option<String> {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => None,
        Err(payload) => Some(panic_message(payload.as_ref())),
    }
}

struct Dispatcher {
    driver: Box<dyn Driver + Send>,
    fs: Arc<dyn FileSystem>,
    roots: Vec<Root>,
    composer: Composer,
    router: EventRouter,
    control_rx: channel::Receiver<Control>,
    closed: Arc<AtomicBool>,
}

impl Dispatcher {
    fn run(mut self) {
        if self.initialize() {
            self.router.emit(WatcherEvent::Ready);
            self.dispatch_loop();
        }
        self.finish();
    }

    /// Resolves and enumerates every root. Returns `false` when the watcher
    /// must close instead of becoming ready (missing target).
    fn initialize(&mut self) -> bool {
        let native = self.driver.native_recursive();
        let Self {
            roots,
            driver,
            fs,
            router,
            ..
        } = self;

        for root in roots.iter_mut() {
            match fs.kind(&root.target) {
                None => {
                    router.emit(WatcherEvent::Error(WatchError::TargetMissing {
                        path: root.target.clone(),
                    }));
                    return false;
                }
                Some(PathKind::File) => {
                    root.file_name = root.target.file_name().map(|name| name.to_os_string());
                    root.watch_base = root
                        .target
                        .parent()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| root.target.clone());
                }
                Some(PathKind::Dir) => {
                    root.watch_base = root.target.clone();
                }
            }

            if native {
                match driver.subscribe(&root.watch_base) {
                    Ok(id) => root.base_subscription = Some(id),
                    Err(source) => {
                        router.emit(WatcherEvent::Error(WatchError::Subscription {
                            path: root.watch_base.clone(),
                            source,
                        }));
                    }
                }
            } else {
                let mut subtree = SubtreeManager::new();
                let errors = if root.file_name.is_some() {
                    // File targets observe their parent only; the filter
                    // applies to the file, not the directory holding it.
                    subtree.enlist(driver, fs.as_ref(), &PathFilter::AcceptAll, &root.watch_base, false)
                } else {
                    subtree.enlist(
                        driver,
                        fs.as_ref(),
                        &root.filter,
                        &root.watch_base,
                        root.recursive,
                    )
                };
                for error in errors {
                    router.emit(WatcherEvent::Error(error));
                }
                root.subtree = Some(subtree);
            }
        }
        true
    }

    fn dispatch_loop(&mut self) {
        let control_rx = self.control_rx.clone();
        let driver_rx = self.driver.receiver().clone();

        loop {
            let now = Instant::now();
            let deadline = self.next_deadline().unwrap_or(now + IDLE_TICK);
            let tick = channel::after(deadline.saturating_duration_since(now));

            channel::select! {
                recv(control_rx) -> message => match message {
                    Ok(Control::Close) | Err(_) => break,
                    Ok(Control::WatchedPaths(callback)) => {
                        let paths = self.watched_union();
                        if let Some(message) = catch_callback(move || callback(paths)) {
                            self.router.emit(WatcherEvent::Error(
                                WatchError::CallbackPanic(message),
                            ));
                        }
                    }
                },
                recv(driver_rx) -> message => {
                    let Ok(first) = message else {
                        self.router.emit(WatcherEvent::Error(WatchError::DriverLost));
                        break;
                    };
                    let now = Instant::now();
                    let mut turn = Vec::new();
                    self.handle_driver_message(first, now, &mut turn);
                    // Drain whatever else already arrived so zero-delay
                    // coalescing sees the whole burst as one turn.
                    while let Ok(message) = driver_rx.try_recv() {
                        self.handle_driver_message(message, now, &mut turn);
                    }
                    self.flush_turn(now, turn);
                },
                recv(tick) -> _ => {
                    self.flush_turn(Instant::now(), Vec::new());
                },
            }
        }
    }

    fn handle_driver_message(
        &mut self,
        message: DriverMessage,
        now: Instant,
        turn: &mut Vec<Emission>,
    ) {
        match message {
            Err(error) => {
                self.router
                    .emit(WatcherEvent::Error(WatchError::Driver(error)));
            }
            Ok(raw) => {
                let Self {
                    roots,
                    driver,
                    fs,
                    router,
                    ..
                } = self;
                for (index, root) in roots.iter_mut().enumerate() {
                    process_root_event(index, root, driver, fs.as_ref(), router, &raw, now, turn);
                }
            }
        }
    }

    /// Flushes due debounce entries into the turn's emissions and routes the
    /// whole batch through the composer.
    fn flush_turn(&mut self, now: Instant, mut turn: Vec<Emission>) {
        for (index, root) in self.roots.iter_mut().enumerate() {
            for (kind, path) in root.debouncer.flush_due(now) {
                turn.push(Emission {
                    root: index,
                    kind,
                    path,
                });
            }
        }
        if turn.is_empty() {
            return;
        }

        let candidates: Vec<Candidate> = turn
            .into_iter()
            .map(|emission| Candidate {
                root: emission.root,
                kind: emission.kind,
                is_dir: self.fs.is_dir(&emission.path),
                path: emission.path,
            })
            .collect();

        for candidate in self.composer.admit_batch(candidates, now) {
            let encoding = self.roots[candidate.root].encoding;
            self.router.emit(WatcherEvent::Change(Event {
                kind: candidate.kind,
                path: encoding.encode(&candidate.path),
            }));
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.roots
            .iter()
            .filter_map(|root| root.debouncer.next_deadline())
            .min()
    }

    fn watched_union(&self) -> Vec<PathBuf> {
        let mut union = BTreeSet::new();
        for root in &self.roots {
            match &root.subtree {
                Some(subtree) => union.extend(subtree.dirs().cloned()),
                None => {
                    if root.base_subscription.is_some() {
                        union.insert(root.watch_base.clone());
                    }
                }
            }
        }
        union.into_iter().collect()
    }

    /// Tears everything down and reports `close`. Pending debounce timers
    /// are cancelled, not flushed.
    fn finish(&mut self) {
        let Self { roots, driver, .. } = self;
        for root in roots.iter_mut() {
            root.debouncer.clear();
            if let Some(subtree) = root.subtree.as_mut() {
                subtree.retire_all(driver);
            }
            if let Some(id) = root.base_subscription.take() {
                driver.unsubscribe(id);
            }
        }
        self.composer.clear();
        self.closed.store(true, Ordering::Release);
        self.router.emit(WatcherEvent::Close);
    }
}

#[allow(clippy::too_many_arguments)]
fn process_root_event(
    index: usize,
    root: &mut Root,
    driver: &mut Box<dyn Driver + Send>,
    fs: &dyn FileSystem,
    router: &mut EventRouter,
    raw: &RawEvent,
    now: Instant,
    turn: &mut Vec<Emission>,
) {
    // Route: emulated roots accept only events from their own watched
    // directories (which also drops late events for retired subtrees);
    // native roots accept anything under their base.
    if let Some(subtree) = &root.subtree {
        if !subtree.is_watched(&raw.dir) {
            return;
        }
    } else if !raw.path().starts_with(&root.watch_base) {
        return;
    }

    let classified = classify(raw, fs);

    // Recursive emulation reacts to directory creations and removals before
    // any emission-side filtering; only skip-subtree gates enlistment.
    if let Some(subtree) = root.subtree.as_mut() {
        match classified.kind {
            EventKind::Update if classified.is_dir => {
                if root.recursive
                    && root.file_name.is_none()
                    && !subtree.is_watched(&classified.path)
                {
                    for error in subtree.enlist(driver, fs, &root.filter, &classified.path, true) {
                        router.emit(WatcherEvent::Error(error));
                    }
                }
            }
            EventKind::Remove => {
                if subtree.is_watched(&classified.path) {
                    subtree.retire(driver, &classified.path);
                }
            }
            _ => {}
        }
    }

    if !root.in_scope(&classified.path) {
        return;
    }

    match root.emission_verdict(&classified.path) {
        Err(message) => {
            router.emit(WatcherEvent::Error(WatchError::FilterPanic(message)));
            return;
        }
        Ok(FilterVerdict::Accept) => {}
        Ok(_) => return,
    }

    if let Some((kind, path)) = root.debouncer.push(classified.path, classified.kind, now) {
        turn.push(Emission {
            root: index,
            kind,
            path,
        });
    }
}
