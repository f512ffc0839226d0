use crate::platform::{InputSink, WindowActivator};
use crate::session::{completion, Completion, SessionGuard, SessionKind};
use crate::timing::{DelayPolicy, JitterRange};
use crate::{Macro, PlayerError, SynthesisError};
use std::{
    fmt,
    sync::atomic::{AtomicU8, Ordering},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Configuration for one playback session
#[derive(Debug, Clone, Default)]
pub struct PlaybackConfig {
    /// Window to bring to the foreground before the first event is dispatched
    pub target_window_title: Option<String>,

    /// Restart from the first event until stopped
    pub loop_playback: bool,

    /// Scale every delay by a random factor drawn from `jitter`
    pub vary_speed: bool,

    /// Bounds of the speed factor, only used with `vary_speed`
    pub jitter: JitterRange,

    /// Seed for reproducible jitter
    pub jitter_seed: Option<u64>,
}

impl PlaybackConfig {
    pub fn validate(&self) -> Result<(), PlayerError> {
        if let Some(title) = &self.target_window_title {
            if title.trim().is_empty() {
                return Err(PlayerError::ValidationFailed(
                    "target window title is blank".to_string(),
                ));
            }
        }
        if self.vary_speed {
            self.jitter.validate().map_err(PlayerError::ValidationFailed)?;
        }
        Ok(())
    }
}

/// Lifecycle of a player's current (or last) session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Activating,
    Playing,
    Cancelling,
    Finished,
}

impl PlayerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PlayerState::Activating,
            2 => PlayerState::Playing,
            3 => PlayerState::Cancelling,
            4 => PlayerState::Finished,
            _ => PlayerState::Idle,
        }
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Outcome of a playback session that was not aborted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackReport {
    /// Events the sink accepted
    pub dispatched: usize,
    /// Events the OS rejected individually
    pub skipped: usize,
    /// Passes started over the sequence
    pub passes: usize,
    /// Whether playback ended because of `stop`
    pub cancelled: bool,
    /// Non-fatal problems, such as a target window that could not be activated
    pub warnings: Vec<PlayerError>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct SharedState(AtomicU8);

impl SharedState {
    fn get(&self) -> PlayerState {
        PlayerState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: PlayerState) {
        self.0.store(state as u8, Ordering::Release);
    }

    fn advance(&self, from: PlayerState, to: PlayerState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Replays a [`Macro`] as synthetic input on a dedicated worker thread
pub struct Player {
    sink: Arc<dyn InputSink>,
    windows: Arc<dyn WindowActivator>,
    guard: Arc<SessionGuard>,
    state: Arc<SharedState>,
    cancel: Mutex<Option<watch::Sender<bool>>>,
}

impl Player {
    pub fn new(
        sink: Arc<dyn InputSink>,
        windows: Arc<dyn WindowActivator>,
        guard: Arc<SessionGuard>,
    ) -> Self {
        Self {
            sink,
            windows,
            guard,
            state: Arc::new(SharedState::default()),
            cancel: Mutex::new(None),
        }
    }

    pub fn state(&self) -> PlayerState {
        self.state.get()
    }

    /// Validate and start playback.
    ///
    /// Returns as soon as the worker is running; the report (or the error that
    /// ended playback) arrives through the returned [`Completion`].
    #[instrument(skip(self, macro_, config), fields(name = macro_.name(), events = macro_.len()))]
    pub fn start(
        &self,
        macro_: Arc<Macro>,
        config: PlaybackConfig,
    ) -> Result<Completion<PlaybackReport, PlayerError>, PlayerError> {
        if macro_.is_empty() {
            return Err(PlayerError::ValidationFailed(format!(
                "macro '{}' has no events",
                macro_.name()
            )));
        }
        config.validate()?;

        let permit = self
            .guard
            .try_acquire(SessionKind::Playback)
            .map_err(PlayerError::ConflictingSessionActive)?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| PlayerError::WorkerUnavailable(e.to_string()))?;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut cancel = lock(&self.cancel);
        self.state.set(PlayerState::Activating);

        let (done_tx, done) = completion();
        let session = PlaybackSession {
            sink: Arc::clone(&self.sink),
            windows: Arc::clone(&self.windows),
            state: Arc::clone(&self.state),
            cancel: cancel_rx,
            macro_,
            config,
        };
        let state = Arc::clone(&self.state);

        let spawned = thread::Builder::new()
            .name("macro-player".to_string())
            .spawn(move || {
                let outcome = runtime.block_on(session.run());
                // Finish before releasing the guard so a new start never sees
                // its state overwritten by this worker
                state.set(PlayerState::Finished);
                drop(permit);
                match &outcome {
                    Ok(report) => info!(
                        dispatched = report.dispatched,
                        skipped = report.skipped,
                        passes = report.passes,
                        cancelled = report.cancelled,
                        "Macro playback finished"
                    ),
                    Err(e) => error!("Macro playback aborted: {}", e),
                }
                done_tx.send(outcome);
            });

        if let Err(e) = spawned {
            self.state.set(PlayerState::Idle);
            return Err(PlayerError::WorkerUnavailable(e.to_string()));
        }

        *cancel = Some(cancel_tx);
        info!("Macro playback started");
        Ok(done)
    }

    /// Request cancellation. Never waits for the worker; calling it again, or
    /// with nothing playing, does nothing.
    #[instrument(skip(self))]
    pub fn stop(&self) {
        let cancel = lock(&self.cancel);
        let Some(tx) = cancel.as_ref() else {
            return;
        };
        if *tx.borrow() {
            return;
        }
        tx.send_replace(true);
        if self.state.advance(PlayerState::Playing, PlayerState::Cancelling)
            || self.state.advance(PlayerState::Activating, PlayerState::Cancelling)
        {
            info!("Macro playback cancelling");
        } else {
            debug!(state = %self.state.get(), "Stop requested after playback ended");
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}

struct PlaybackSession {
    sink: Arc<dyn InputSink>,
    windows: Arc<dyn WindowActivator>,
    state: Arc<SharedState>,
    cancel: watch::Receiver<bool>,
    macro_: Arc<Macro>,
    config: PlaybackConfig,
}

impl PlaybackSession {
    async fn run(mut self) -> Result<PlaybackReport, PlayerError> {
        let mut report = PlaybackReport::default();

        if let Some(title) = self.config.target_window_title.clone() {
            if let Err(e) = self.windows.activate(&title) {
                warn!(%title, "Could not activate target window: {}", e);
                report.warnings.push(PlayerError::WindowActivationFailed {
                    title,
                    reason: e.to_string(),
                });
            }
        }
        self.state.advance(PlayerState::Activating, PlayerState::Playing);

        let mut delays = if self.config.vary_speed {
            DelayPolicy::jittered(self.config.jitter, self.config.jitter_seed)
        } else {
            DelayPolicy::exact()
        };

        let macro_ = Arc::clone(&self.macro_);
        let mut last_dispatch = Instant::now();

        'passes: loop {
            report.passes += 1;
            debug!(pass = report.passes, "Starting playback pass");

            for event in macro_.events() {
                let deadline = last_dispatch + delays.delay(event.offset_ms);
                if self.wait_until(deadline).await {
                    report.cancelled = true;
                    break 'passes;
                }

                match self.sink.dispatch(&event.action) {
                    Ok(()) => report.dispatched += 1,
                    Err(SynthesisError::Rejected(reason)) => {
                        warn!(action = ?event.action, %reason, "Skipping rejected event");
                        report.skipped += 1;
                    }
                    Err(SynthesisError::PermissionDenied(reason)) => {
                        return Err(PlayerError::SynthesisPermissionDenied(reason));
                    }
                }
                last_dispatch = Instant::now();
            }

            if self.cancel_requested() {
                report.cancelled = true;
                break;
            }
            if !self.config.loop_playback {
                break;
            }
        }

        Ok(report)
    }

    fn cancel_requested(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Sleep until `deadline`; true if cancellation won the race
    async fn wait_until(&mut self, deadline: Instant) -> bool {
        if self.cancel_requested() {
            return true;
        }
        tokio::select! {
            biased;
            // A dropped sender means the player is gone: stop as well
            _ = self.cancel.wait_for(|cancelled| *cancelled) => true,
            _ = tokio::time::sleep_until(deadline) => false,
        }
    }
}
