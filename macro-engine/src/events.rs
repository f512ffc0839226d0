use crate::error::DecodeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Newest on-disk format this engine writes and reads
pub const FORMAT_VERSION: u32 = 1;

/// Name given to macros that have not been saved under a user-chosen name yet
pub const UNNAMED_MACRO: &str = "untitled";

/// Represents a key as a virtual-key style code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyCode(pub u32);

impl KeyCode {
    /// Marks a platform code that has no entry in the key table
    pub const RAW_FLAG: u32 = 0x8000_0000;

    /// Wrap a platform code the key table cannot name
    pub fn raw(code: u32) -> Self {
        Self(code | Self::RAW_FLAG)
    }

    /// The platform code, if this key was captured without a table entry
    pub fn raw_code(self) -> Option<u32> {
        (self.0 & Self::RAW_FLAG != 0).then_some(self.0 & !Self::RAW_FLAG)
    }

    /// Key code for an ASCII letter or digit
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'a'..='z' | 'A'..='Z' => Some(Self(c.to_ascii_uppercase() as u32)),
            '0'..='9' => Some(Self(c as u32)),
            _ => None,
        }
    }
}

/// Represents the type of mouse button
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Other(u8),
}

/// The kind of an input occurrence, without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    KeyDown,
    KeyUp,
    MouseMove,
    MouseButtonDown,
    MouseButtonUp,
    MouseWheel,
}

/// One keyboard or mouse occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum InputAction {
    KeyDown { key: KeyCode },
    KeyUp { key: KeyCode },
    /// Absolute screen coordinates
    MouseMove { x: i32, y: i32 },
    MouseButtonDown { button: MouseButton },
    MouseButtonUp { button: MouseButton },
    MouseWheel { delta_x: i32, delta_y: i32 },
}

impl InputAction {
    pub fn kind(&self) -> EventKind {
        match self {
            InputAction::KeyDown { .. } => EventKind::KeyDown,
            InputAction::KeyUp { .. } => EventKind::KeyUp,
            InputAction::MouseMove { .. } => EventKind::MouseMove,
            InputAction::MouseButtonDown { .. } => EventKind::MouseButtonDown,
            InputAction::MouseButtonUp { .. } => EventKind::MouseButtonUp,
            InputAction::MouseWheel { .. } => EventKind::MouseWheel,
        }
    }
}

/// Represents a recorded event with its delay from the previous one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedEvent {
    /// Milliseconds since the previous event (or since recording start for the first)
    pub offset_ms: u64,

    /// The occurrence itself
    #[serde(flatten)]
    pub action: InputAction,
}

impl TimedEvent {
    pub fn new(action: InputAction, offset_ms: u64) -> Self {
        Self { offset_ms, action }
    }

    pub fn kind(&self) -> EventKind {
        self.action.kind()
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.offset_ms)
    }
}

/// A named, immutable sequence of timed events.
///
/// Edits never mutate a macro in place: [`Macro::with_events`] and
/// [`Macro::renamed`] build the replacement that gets saved under the same name.
#[derive(Debug, Clone, PartialEq)]
pub struct Macro {
    name: String,
    created_at: DateTime<Utc>,
    events: Vec<TimedEvent>,
}

impl Macro {
    /// Create a macro stamped with the current time
    pub fn new(name: impl Into<String>, events: Vec<TimedEvent>) -> Self {
        Self::from_parts(name, Utc::now(), events)
    }

    pub fn from_parts(
        name: impl Into<String>,
        created_at: DateTime<Utc>,
        events: Vec<TimedEvent>,
    ) -> Self {
        Self {
            name: name.into(),
            created_at,
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn events(&self) -> &[TimedEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Sum of all offsets: recording start to the last event
    pub fn total_duration(&self) -> Duration {
        Duration::from_millis(self.events.iter().map(|e| e.offset_ms).sum())
    }

    /// Time from recording start to the event at `index`
    pub fn elapsed_at(&self, index: usize) -> Option<Duration> {
        if index >= self.events.len() {
            return None;
        }
        let ms = self.events[..=index].iter().map(|e| e.offset_ms).sum();
        Some(Duration::from_millis(ms))
    }

    /// Replacement macro with the same name and creation time
    pub fn with_events(&self, events: Vec<TimedEvent>) -> Self {
        Self::from_parts(self.name.clone(), self.created_at, events)
    }

    /// Replacement macro under a different name
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self::from_parts(name, self.created_at, self.events.clone())
    }

    /// Serialize the macro to its versioned JSON document
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&MacroDocumentRef::from(self))
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(&MacroDocumentRef::from(self))
    }

    /// Deserialize a macro, rejecting unknown event kinds and newer format versions
    pub fn from_json(json: &str) -> Result<Self, DecodeError> {
        Self::from_json_bytes(json.as_bytes())
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let header: DocumentHeader = serde_json::from_slice(bytes)?;
        if header.format_version > FORMAT_VERSION {
            return Err(DecodeError::UnsupportedVersion {
                found: header.format_version,
                supported: FORMAT_VERSION,
            });
        }
        let doc: MacroDocument = serde_json::from_slice(bytes)?;
        Ok(Self::from_parts(doc.name, doc.created_at, doc.events))
    }
}

#[derive(Deserialize)]
struct DocumentHeader {
    format_version: u32,
}

#[derive(Serialize)]
struct MacroDocumentRef<'a> {
    format_version: u32,
    name: &'a str,
    created_at: DateTime<Utc>,
    events: &'a [TimedEvent],
}

impl<'a> From<&'a Macro> for MacroDocumentRef<'a> {
    fn from(m: &'a Macro) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            name: &m.name,
            created_at: m.created_at,
            events: &m.events,
        }
    }
}

#[derive(Deserialize)]
struct MacroDocument {
    name: String,
    created_at: DateTime<Utc>,
    events: Vec<TimedEvent>,
}
