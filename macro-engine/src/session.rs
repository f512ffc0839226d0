//! Single-session enforcement and terminal notifications.
//!
//! The OS input hook and the injection channel are one shared resource, so an
//! engine allows exactly one capture or playback session at a time. Each session
//! reports its end exactly once through a [`Completion`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing::debug;

const IDLE: u8 = 0;
const RECORDING: u8 = 1;
const PLAYBACK: u8 = 2;

/// What an active session is doing with the input channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    Recording,
    Playback,
}

impl SessionKind {
    fn as_u8(self) -> u8 {
        match self {
            SessionKind::Recording => RECORDING,
            SessionKind::Playback => PLAYBACK,
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            RECORDING => Some(SessionKind::Recording),
            PLAYBACK => Some(SessionKind::Playback),
            _ => None,
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKind::Recording => f.write_str("recording"),
            SessionKind::Playback => f.write_str("playback"),
        }
    }
}

/// Atomic flag owned by the engine; at most one permit exists at a time
#[derive(Debug, Default)]
pub struct SessionGuard {
    active: AtomicU8,
}

impl SessionGuard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim the input channel, or report which kind of session holds it
    pub fn try_acquire(self: &Arc<Self>, kind: SessionKind) -> Result<SessionPermit, SessionKind> {
        match self
            .active
            .compare_exchange(IDLE, kind.as_u8(), Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                debug!(%kind, "Session permit acquired");
                Ok(SessionPermit {
                    guard: Arc::clone(self),
                    kind,
                })
            }
            Err(current) => Err(SessionKind::from_u8(current).unwrap_or(kind)),
        }
    }

    /// The kind of the active session, if any
    pub fn active(&self) -> Option<SessionKind> {
        SessionKind::from_u8(self.active.load(Ordering::Acquire))
    }

    pub fn is_idle(&self) -> bool {
        self.active().is_none()
    }
}

/// Proof of ownership of the input channel; released on drop
#[derive(Debug)]
pub struct SessionPermit {
    guard: Arc<SessionGuard>,
    kind: SessionKind,
}

impl SessionPermit {
    pub fn kind(&self) -> SessionKind {
        self.kind
    }
}

impl Drop for SessionPermit {
    fn drop(&mut self) {
        self.guard.active.store(IDLE, Ordering::Release);
        debug!(kind = %self.kind, "Session permit released");
    }
}

/// Errors that can stand in for a result when a worker dies without reporting
pub trait WorkerFailure {
    fn worker_lost() -> Self;
}

/// The single terminal message of a session.
///
/// Await it from async code, poll it with [`Completion::try_take`] from a UI loop,
/// or block on it with [`Completion::wait`] from a thread that is allowed to block.
#[derive(Debug)]
pub struct Completion<T, E> {
    rx: oneshot::Receiver<Result<T, E>>,
    taken: bool,
}

// No structural pinning: the receiver is polled through a plain `&mut`.
impl<T, E> Unpin for Completion<T, E> {}

pub(crate) struct CompletionSender<T, E> {
    tx: oneshot::Sender<Result<T, E>>,
}

pub(crate) fn completion<T, E>() -> (CompletionSender<T, E>, Completion<T, E>) {
    let (tx, rx) = oneshot::channel();
    (CompletionSender { tx }, Completion { rx, taken: false })
}

impl<T, E> CompletionSender<T, E> {
    pub(crate) fn send(self, outcome: Result<T, E>) {
        if self.tx.send(outcome).is_err() {
            debug!("Completion receiver dropped before the session finished");
        }
    }
}

impl<T, E: WorkerFailure> Completion<T, E> {
    /// Non-blocking check; `None` while the session is still running or after the
    /// outcome has already been taken
    pub fn try_take(&mut self) -> Option<Result<T, E>> {
        if self.taken {
            return None;
        }
        let outcome = match self.rx.try_recv() {
            Ok(outcome) => outcome,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Closed) => Err(E::worker_lost()),
        };
        self.taken = true;
        Some(outcome)
    }

    /// Block the current thread until the session ends.
    ///
    /// Panics when called from inside an async runtime, like
    /// `oneshot::Receiver::blocking_recv`.
    pub fn wait(self) -> Result<T, E> {
        self.rx.blocking_recv().unwrap_or_else(|_| Err(E::worker_lost()))
    }
}

impl<T, E: WorkerFailure> Future for Completion<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx).poll(cx).map(|received| {
            this.taken = true;
            received.unwrap_or_else(|_| Err(E::worker_lost()))
        })
    }
}
