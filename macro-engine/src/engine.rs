use crate::platform::{PlatformBackend, WindowActivator};
use crate::{Player, Recorder, RecorderConfig, SessionGuard, SessionKind, WindowError};
use std::sync::Arc;

/// A recorder and a player sharing one input channel.
///
/// The engine owns the [`SessionGuard`], so at most one of its components holds
/// the OS input hook or the injection channel at any moment.
pub struct MacroEngine {
    recorder: Recorder,
    player: Player,
    windows: Arc<dyn WindowActivator>,
    guard: Arc<SessionGuard>,
}

impl MacroEngine {
    /// Engine wired to the native platform backend
    pub fn new() -> Self {
        Self::with_backend(PlatformBackend::native(), RecorderConfig::default())
    }

    pub fn with_backend(backend: PlatformBackend, recorder_config: RecorderConfig) -> Self {
        let guard = SessionGuard::new();
        let recorder = Recorder::new(
            backend.source,
            backend.clock,
            Arc::clone(&guard),
            recorder_config,
        );
        let player = Player::new(backend.sink, Arc::clone(&backend.windows), Arc::clone(&guard));
        Self {
            recorder,
            player,
            windows: backend.windows,
            guard,
        }
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn player(&self) -> &Player {
        &self.player
    }

    /// The kind of session currently holding the input channel
    pub fn active_session(&self) -> Option<SessionKind> {
        self.guard.active()
    }

    /// Titles of the windows playback could target
    pub fn window_titles(&self) -> Result<Vec<String>, WindowError> {
        self.windows.list_titles()
    }

    /// Stop whatever is running
    pub fn stop_all(&self) {
        self.recorder.stop();
        self.player.stop();
    }
}

impl Default for MacroEngine {
    fn default() -> Self {
        Self::new()
    }
}
