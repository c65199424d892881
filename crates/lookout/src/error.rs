use std::any::Any;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type WatchResult<T> = Result<T, WatchError>;

/// Errors surfaced by a watcher.
///
/// `InvalidArgument` is the only variant returned synchronously from
/// [`crate::watch`]; everything else is delivered as a
/// [`crate::WatcherEvent::Error`] on the event stream.
#[derive(Error, Debug)]
pub enum WatchError {
    /// Malformed options or targets. Raised synchronously, never as an event.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A supplied watch target was missing at start. The watcher closes.
    #[error("watch target {} does not exist", .path.display())]
    TargetMissing { path: PathBuf },

    /// Failed to enlist a directory. The watcher keeps running.
    #[error("failed to subscribe to {}: {source}", .path.display())]
    Subscription {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Transient error reported on the driver's event stream.
    #[error("platform driver error: {0}")]
    Driver(#[from] io::Error),

    /// The driver's event stream disconnected. The watcher closes.
    #[error("platform driver disconnected")]
    DriverLost,

    /// A user filter predicate panicked. The offending event is dropped.
    #[error("filter predicate panicked: {0}")]
    FilterPanic(String),

    /// A user event callback panicked. The watcher keeps running.
    #[error("event callback panicked: {0}")]
    CallbackPanic(String),
}

const NON_STRING_PANIC_PAYLOAD: &str = "<non-string panic payload>";

/// Renders a `catch_unwind` payload for error reporting.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    NON_STRING_PANIC_PAYLOAD.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_missing_message_names_the_path() {
        let err = WatchError::TargetMissing {
            path: PathBuf::from("/tmp/gone"),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("/tmp/gone"));
        assert!(rendered.contains("does not exist"));
    }

    #[test]
    fn panic_payloads_render_for_both_string_shapes() {
        let boxed: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(boxed.as_ref()), "static message");

        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(boxed.as_ref()), "owned message");

        let boxed: Box<dyn Any + Send> = Box::new(17u32);
        assert_eq!(panic_message(boxed.as_ref()), NON_STRING_PANIC_PAYLOAD);
    }
}
