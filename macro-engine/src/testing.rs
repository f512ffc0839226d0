//! In-process stand-ins for the OS seam.
//!
//! Used by this crate's tests, by the integration tests, and by `macro-tool
//! play --dry-run`, which replays into [`LoggingInputSink`] and
//! [`LoggingWindowActivator`] instead of the OS.

use crate::platform::{
    CaptureCallback, Clock, InputSink, InputSource, ListenerId, WindowActivator,
};
use crate::{InputAction, RecorderError, SynthesisError, WindowError};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::info;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Installed {
    id: ListenerId,
    callback: CaptureCallback,
}

/// An input source driven by hand through [`ManualInputSource::emit`]
#[derive(Default)]
pub struct ManualInputSource {
    listener: Mutex<Option<Installed>>,
    next_id: AtomicU64,
    fail_install: Mutex<Option<String>>,
}

impl ManualInputSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A source whose `install` always fails with `reason`
    pub fn failing(reason: impl Into<String>) -> Arc<Self> {
        let source = Self::default();
        *lock(&source.fail_install) = Some(reason.into());
        Arc::new(source)
    }

    /// Deliver one occurrence; false when no listener is installed
    pub fn emit(&self, action: InputAction) -> bool {
        match lock(&self.listener).as_ref() {
            Some(installed) => {
                (installed.callback)(action);
                true
            }
            None => false,
        }
    }

    pub fn is_installed(&self) -> bool {
        lock(&self.listener).is_some()
    }
}

impl InputSource for ManualInputSource {
    fn install(&self, callback: CaptureCallback) -> Result<ListenerId, RecorderError> {
        if let Some(reason) = lock(&self.fail_install).clone() {
            return Err(RecorderError::HookInstallFailed(reason));
        }
        let mut slot = lock(&self.listener);
        if slot.is_some() {
            return Err(RecorderError::HookInstallFailed(
                "a listener is already installed".to_string(),
            ));
        }
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        *slot = Some(Installed { id, callback });
        Ok(id)
    }

    fn uninstall(&self, id: ListenerId) {
        let mut slot = lock(&self.listener);
        if slot.as_ref().is_some_and(|installed| installed.id == id) {
            *slot = None;
        }
    }
}

/// How a [`RecordingInputSink`] answers dispatches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkBehavior {
    #[default]
    Accept,
    /// Reject the dispatch with this zero-based index, accept the rest
    RejectNth(usize),
    /// Refuse everything with `PermissionDenied`
    Deny,
}

/// Records every accepted action, optionally notifying a channel as it goes
pub struct RecordingInputSink {
    actions: Arc<Mutex<Vec<InputAction>>>,
    attempts: AtomicUsize,
    behavior: SinkBehavior,
    notify: Option<mpsc::UnboundedSender<InputAction>>,
}

impl RecordingInputSink {
    pub fn new() -> Arc<Self> {
        Self::with_behavior(SinkBehavior::Accept)
    }

    pub fn with_behavior(behavior: SinkBehavior) -> Arc<Self> {
        Arc::new(Self {
            actions: Arc::new(Mutex::new(Vec::new())),
            attempts: AtomicUsize::new(0),
            behavior,
            notify: None,
        })
    }

    /// A sink that also sends each accepted action to the returned receiver
    pub fn with_notifications() -> (Arc<Self>, mpsc::UnboundedReceiver<InputAction>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Arc::new(Self {
            actions: Arc::new(Mutex::new(Vec::new())),
            attempts: AtomicUsize::new(0),
            behavior: SinkBehavior::Accept,
            notify: Some(tx),
        });
        (sink, rx)
    }

    pub fn actions(&self) -> Vec<InputAction> {
        lock(&self.actions).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.actions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispatches seen, accepted or not
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Acquire)
    }
}

impl InputSink for RecordingInputSink {
    fn dispatch(&self, action: &InputAction) -> Result<(), SynthesisError> {
        let index = self.attempts.fetch_add(1, Ordering::AcqRel);
        match self.behavior {
            SinkBehavior::Deny => {
                return Err(SynthesisError::PermissionDenied(
                    "input synthesis disabled".to_string(),
                ))
            }
            SinkBehavior::RejectNth(n) if n == index => {
                return Err(SynthesisError::Rejected(format!("dispatch {} refused", index)))
            }
            _ => {}
        }
        lock(&self.actions).push(*action);
        if let Some(notify) = &self.notify {
            let _ = notify.send(*action);
        }
        Ok(())
    }
}

/// Logs actions instead of synthesizing them
#[derive(Debug, Default)]
pub struct LoggingInputSink {
    dispatched: AtomicUsize,
}

impl LoggingInputSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::Relaxed)
    }
}

impl InputSink for LoggingInputSink {
    fn dispatch(&self, action: &InputAction) -> Result<(), SynthesisError> {
        let n = self.dispatched.fetch_add(1, Ordering::Relaxed) + 1;
        info!(n, ?action, "dry run");
        Ok(())
    }
}

/// Reports window activation instead of touching the desktop
#[derive(Debug, Default)]
pub struct LoggingWindowActivator;

impl LoggingWindowActivator {
    pub fn new() -> Self {
        Self
    }
}

impl WindowActivator for LoggingWindowActivator {
    fn activate(&self, title: &str) -> Result<(), WindowError> {
        info!(title, "dry run: would activate window");
        Ok(())
    }

    fn list_titles(&self) -> Result<Vec<String>, WindowError> {
        Ok(Vec::new())
    }
}

/// A fixed list of windows; activation succeeds for any title it can match
#[derive(Debug, Default)]
pub struct StaticWindowActivator {
    titles: Vec<String>,
    activated: Mutex<Vec<String>>,
}

impl StaticWindowActivator {
    pub fn new<I, S>(titles: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            titles: titles.into_iter().map(Into::into).collect(),
            activated: Mutex::new(Vec::new()),
        })
    }

    /// Titles passed to successful `activate` calls, in order
    pub fn activated(&self) -> Vec<String> {
        lock(&self.activated).clone()
    }
}

impl WindowActivator for StaticWindowActivator {
    fn activate(&self, title: &str) -> Result<(), WindowError> {
        let chosen = crate::platform::pick_window(&self.titles, title)
            .ok_or_else(|| WindowError::NotFound(title.to_string()))?;
        lock(&self.activated).push(chosen.to_string());
        Ok(())
    }

    fn list_titles(&self) -> Result<Vec<String>, WindowError> {
        Ok(self.titles.clone())
    }
}

/// A clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    elapsed_ms: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            base: Instant::now(),
            elapsed_ms: AtomicU64::new(0),
        })
    }

    pub fn advance(&self, ms: u64) {
        self.elapsed_ms.fetch_add(ms, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + Duration::from_millis(self.elapsed_ms.load(Ordering::Acquire))
    }
}
