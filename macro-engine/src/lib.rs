//! Macro recording and playback engine
//!
//! This crate records global keyboard and mouse input as a [`Macro`]: an ordered
//! list of events, each carrying the delay since the previous one. A [`Player`]
//! replays a macro as synthetic input, optionally looping, varying its speed,
//! and bringing a target window to the foreground first.
//! Macros are saved as versioned JSON documents through a [`MacroStore`].

pub mod edit;
pub mod engine;
pub mod error;
pub mod events;
pub mod platform;
pub mod player;
pub mod recorder;
pub mod session;
pub mod store;
pub mod testing;
pub mod timing;

pub use edit::{change_speed, drop_events, trim_unreleased_keys};
pub use engine::MacroEngine;
pub use error::*;
pub use events::*;
pub use platform::PlatformBackend;
pub use player::{PlaybackConfig, PlaybackReport, Player, PlayerState};
pub use recorder::{Recorder, RecorderConfig};
pub use session::{Completion, SessionGuard, SessionKind, SessionPermit};
pub use store::{FileMacroStore, MacroStore, MemoryMacroStore};
pub use timing::JitterRange;

#[cfg(test)]
mod tests;
