//! Cross-platform file-system watching.
//!
//! `lookout` turns the very different change-notification facilities of the
//! supported platforms (recursive on some, per-directory on others;
//! coalesced vs. duplicated events; directory- vs. file-granularity) into
//! one consistent stream of per-path `update` and `remove` events.
//!
//! # Ownership / layering
//!
//! - [`Driver`] is the only seam touching an OS primitive. The notify-based
//!   backend lives behind the `driver-notify` feature (on by default);
//!   [`ManualDriver`] is a deterministic injection driver for tests.
//! - Drivers that lack native recursion are wrapped by a recursive-emulation
//!   layer that enlists new subdirectories as they appear and retires
//!   watchers as subtrees vanish.
//! - Classification is an existence check against the [`FileSystem`]
//!   facility: a path that still exists is an `update`, a missing one a
//!   `remove`. Creation and modification are deliberately not distinguished.
//! - A per-path debouncer collapses bursts; a composer deduplicates events
//!   reaching the watcher through overlapping roots.
//!
//! # Event delivery
//!
//! A watcher owns one dispatcher thread; every user-visible callback runs on
//! it, never concurrently. Events are also delivered over a
//! `crossbeam_channel` stream ([`Watcher::events`]) so consumers can
//! integrate watching into their own loops without a particular async
//! runtime.
//!
//! Watchers are allowed to coalesce; consumers should treat events as hints
//! and consult the file system for authoritative state.
//!
//! # Testing
//!
//! Avoid tests that rely on real OS watcher timing. Prefer the injected
//! [`ManualDriver`] together with [`MemoryFs`] and drive the pipeline
//! deterministically.
//!
//! ```no_run
//! use lookout::{watch_with, WatchOptions};
//!
//! let options = WatchOptions::new().recursive(true);
//! let _watcher = watch_with(["./src"], options, |kind, path| {
//!     println!("{kind}: {path}");
//! })?;
//! # Ok::<(), lookout::WatchError>(())
//! ```

mod classify;
mod compose;
mod debounce;
mod driver;
mod error;
mod event;
mod filter;
mod fs;
mod path;
mod subtree;
mod watcher;

pub use driver::{Driver, DriverMessage, ManualDriver, ManualDriverHandle, RawEvent, RawKind, SubscriptionId};
#[cfg(feature = "driver-notify")]
pub use driver::NotifyDriver;
pub use error::{WatchError, WatchResult};
pub use event::{Event, EventKind, EventPath, WatcherEvent};
pub use filter::{FilterVerdict, PathFilter};
pub use fs::{FileSystem, LocalFs, MemoryFs, PathKind};
pub use path::PathEncoding;
pub use watcher::{watch, watch_with, WatchOptions, WatchTarget, Watcher, WatcherBuilder};
