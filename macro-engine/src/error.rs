use crate::session::{SessionKind, WorkerFailure};
use thiserror::Error;

/// Error types for macro recording
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecorderError {
    /// The global input listener could not be installed
    #[error("Failed to install input hook: {0}")]
    HookInstallFailed(String),

    /// Captured events arrived faster than they could be queued
    #[error("Capture buffer overflowed after {captured} events (capacity {capacity})")]
    CaptureBufferOverflow { captured: usize, capacity: usize },

    /// Another capture or playback session owns the input channel
    #[error("Cannot start recording: a {0} session is already active")]
    ConflictingSessionActive(SessionKind),

    /// The background finalize worker could not be started, or vanished
    #[error("Recorder worker unavailable: {0}")]
    WorkerUnavailable(String),
}

impl WorkerFailure for RecorderError {
    fn worker_lost() -> Self {
        RecorderError::WorkerUnavailable("recorder worker exited without reporting".to_string())
    }
}

/// Error types for macro playback
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlayerError {
    /// The macro or the playback configuration was rejected before playback
    #[error("Playback validation failed: {0}")]
    ValidationFailed(String),

    /// The target window could not be brought to the foreground (non-fatal)
    #[error("Could not activate window '{title}': {reason}")]
    WindowActivationFailed { title: String, reason: String },

    /// The OS refused input synthesis altogether
    #[error("Input synthesis permission denied: {0}")]
    SynthesisPermissionDenied(String),

    /// Another capture or playback session owns the input channel
    #[error("Cannot start playback: a {0} session is already active")]
    ConflictingSessionActive(SessionKind),

    /// The playback worker could not be started, or vanished
    #[error("Player worker unavailable: {0}")]
    WorkerUnavailable(String),
}

impl PlayerError {
    /// Whether this error is reported as a warning rather than a failure
    pub fn is_warning(&self) -> bool {
        matches!(self, PlayerError::WindowActivationFailed { .. })
    }
}

impl WorkerFailure for PlayerError {
    fn worker_lost() -> Self {
        PlayerError::WorkerUnavailable("player worker exited without reporting".to_string())
    }
}

/// Error raised by an input sink for one synthetic event
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SynthesisError {
    /// This event was refused; later events may still go through
    #[error("Input event rejected: {0}")]
    Rejected(String),

    /// The process is not allowed to synthesize input at all
    #[error("Input synthesis not permitted: {0}")]
    PermissionDenied(String),
}

/// Error locating or focusing a window
#[derive(Debug, Error)]
pub enum WindowError {
    /// No visible window matches the requested title
    #[error("No window titled '{0}'")]
    NotFound(String),

    /// The platform window API or helper command failed
    #[error("Window API error: {0}")]
    Platform(String),

    /// Window targeting is not available on this platform
    #[error("Window targeting is not supported on this platform")]
    Unsupported,

    /// I/O error running a helper command
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error decoding a persisted macro
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Malformed JSON, or an event with an unknown `kind`
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Written by a newer engine
    #[error("Unsupported macro format version {found} (this engine reads up to {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
}

/// Error types for the macro store
#[derive(Debug, Error)]
pub enum StoreError {
    /// No macro is stored under the name
    #[error("Macro not found: {0}")]
    NotFound(String),

    /// The name is empty or cannot be mapped to storage
    #[error("Invalid macro name: {0:?}")]
    InvalidName(String),

    /// The stored document could not be decoded
    #[error("Failed to decode macro '{name}': {source}")]
    Decode {
        name: String,
        #[source]
        source: DecodeError,
    },

    /// The document at the name's path belongs to a different macro
    #[error("Macro '{name}' collides with stored macro '{existing}'")]
    NameConflict { name: String, existing: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error building an edited macro
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EditError {
    /// The index range is empty or reaches past the last event
    #[error("Event range {start}..{end} is invalid for a macro of {len} events")]
    InvalidRange { start: usize, end: usize, len: usize },

    /// Speed factors must be finite and positive
    #[error("Invalid speed factor {0}")]
    InvalidSpeed(f64),
}

/// Result type for recorder operations
pub type Result<T> = std::result::Result<T, RecorderError>;
