//! Traits at the OS seam and their native implementations.
//!
//! The recorder and player only talk to the operating system through these
//! traits, so the same engine runs against the global rdev hook in production and
//! against the doubles in [`crate::testing`] in tests.

use crate::{InputAction, RecorderError, SynthesisError, WindowError};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

mod rdev_backend;
mod window;

pub use rdev_backend::{RdevInputSink, RdevInputSource};
pub use window::{pick_window, NativeWindowActivator};

/// Identifies one installed capture listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Called synchronously, on the hook's thread, at the moment an occurrence is observed
pub type CaptureCallback = Box<dyn Fn(InputAction) + Send + Sync + 'static>;

/// A source of global keyboard/mouse occurrences
pub trait InputSource: Send + Sync {
    /// Route every observed occurrence to `callback` until uninstalled
    fn install(&self, callback: CaptureCallback) -> Result<ListenerId, RecorderError>;

    /// Detach the listener. Unknown or already removed ids are ignored.
    fn uninstall(&self, id: ListenerId);
}

/// Synthesizes input events at the OS level
pub trait InputSink: Send + Sync {
    fn dispatch(&self, action: &InputAction) -> Result<(), SynthesisError>;
}

/// Finds and focuses top-level windows by title
pub trait WindowActivator: Send + Sync {
    /// Bring the best match for `title` to the foreground
    fn activate(&self, title: &str) -> Result<(), WindowError>;

    /// Titles of visible top-level windows, for choosing a playback target
    fn list_titles(&self) -> Result<Vec<String>, WindowError>;
}

/// Monotonic time source used to timestamp captured occurrences
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// The set of OS collaborators an engine runs against
#[derive(Clone)]
pub struct PlatformBackend {
    pub source: Arc<dyn InputSource>,
    pub sink: Arc<dyn InputSink>,
    pub windows: Arc<dyn WindowActivator>,
    pub clock: Arc<dyn Clock>,
}

impl PlatformBackend {
    /// Global rdev hook, rdev synthesis, and the platform's window API
    pub fn native() -> Self {
        Self {
            source: Arc::new(RdevInputSource::new()),
            sink: Arc::new(RdevInputSink::new()),
            windows: Arc::new(NativeWindowActivator::new()),
            clock: Arc::new(SystemClock),
        }
    }
}

impl fmt::Debug for PlatformBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformBackend").finish_non_exhaustive()
    }
}
