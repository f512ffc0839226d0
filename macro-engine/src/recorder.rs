use crate::platform::{CaptureCallback, Clock, InputSource, ListenerId};
use crate::session::{
    completion, Completion, CompletionSender, SessionGuard, SessionKind, SessionPermit,
};
use crate::{InputAction, Macro, RecorderError, Result, TimedEvent, UNNAMED_MACRO};
use chrono::Utc;
use std::{
    sync::atomic::{AtomicBool, Ordering},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::Instant,
};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::Stream;
use tracing::{debug, error, info, instrument, warn};

/// Configuration for the macro recorder
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Capacity of the bounded queue between the input hook and the finalize worker.
    /// Filling it fails the session with `CaptureBufferOverflow`.
    pub queue_capacity: usize,

    /// Whether to keep mouse move events
    pub record_mouse_moves: bool,

    /// Buffer size of the live event broadcast
    pub live_buffer: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 4096,
            record_mouse_moves: true,
            live_buffer: 256,
        }
    }
}

type Captured = (InputAction, Instant);
type SharedPermit = Arc<Mutex<Option<SessionPermit>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Producer half of the capture queue, owned by the hook callback.
///
/// Never blocks: once the queue is full the sender is dropped, which ends the
/// finalize worker's drain and marks the session as overflowed.
pub(crate) struct CaptureQueue {
    tx: Mutex<Option<mpsc::Sender<Captured>>>,
    overflowed: Arc<AtomicBool>,
}

impl CaptureQueue {
    pub(crate) fn bounded(capacity: usize) -> (Self, mpsc::Receiver<Captured>, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let overflowed = Arc::new(AtomicBool::new(false));
        let queue = Self {
            tx: Mutex::new(Some(tx)),
            overflowed: Arc::clone(&overflowed),
        };
        (queue, rx, overflowed)
    }

    pub(crate) fn push(&self, action: InputAction, at: Instant) {
        let mut slot = lock(&self.tx);
        let Some(tx) = slot.as_ref() else {
            return;
        };
        match tx.try_send((action, at)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.overflowed.store(true, Ordering::Release);
                slot.take();
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                slot.take();
            }
        }
    }
}

/// Drain the capture queue into timed events until every sender is gone.
///
/// Offsets are deltas: each event is measured from the previous captured
/// occurrence, the first one from `started_at`. Filtered occurrences still move
/// the reference point forward.
pub(crate) fn drain_capture(
    mut rx: mpsc::Receiver<Captured>,
    overflowed: &AtomicBool,
    capacity: usize,
    started_at: Instant,
    record_mouse_moves: bool,
    live_tx: &broadcast::Sender<TimedEvent>,
) -> Result<Vec<TimedEvent>> {
    let mut events = Vec::new();
    let mut captured = 0usize;
    let mut previous = started_at;
    let mut pending_ms = 0u64;

    while let Some((action, at)) = rx.blocking_recv() {
        captured += 1;
        let delta = at.saturating_duration_since(previous).as_millis() as u64;
        previous = previous.max(at);

        if !record_mouse_moves && matches!(action, InputAction::MouseMove { .. }) {
            pending_ms = pending_ms.saturating_add(delta);
            continue;
        }

        let event = TimedEvent::new(action, pending_ms.saturating_add(delta));
        pending_ms = 0;
        // No subscribers is fine
        let _ = live_tx.send(event);
        events.push(event);
    }

    if overflowed.load(Ordering::Acquire) {
        return Err(RecorderError::CaptureBufferOverflow {
            captured,
            capacity: capacity.max(1),
        });
    }
    Ok(events)
}

struct ActiveRecording {
    listener: ListenerId,
    permit: SharedPermit,
}

/// Captures global input into a [`Macro`].
///
/// `start` hands back a [`Completion`] that resolves once the session is over:
/// with the finished macro after [`Recorder::stop`], or with an error if the
/// session failed on its own.
pub struct Recorder {
    source: Arc<dyn InputSource>,
    clock: Arc<dyn Clock>,
    guard: Arc<SessionGuard>,
    config: RecorderConfig,
    active: Mutex<Option<ActiveRecording>>,
    live_tx: broadcast::Sender<TimedEvent>,
}

impl Recorder {
    pub fn new(
        source: Arc<dyn InputSource>,
        clock: Arc<dyn Clock>,
        guard: Arc<SessionGuard>,
        config: RecorderConfig,
    ) -> Self {
        let (live_tx, _) = broadcast::channel(config.live_buffer.max(1));
        Self {
            source,
            clock,
            guard,
            config,
            active: Mutex::new(None),
            live_tx,
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Whether this recorder's session still holds the input channel
    pub fn is_recording(&self) -> bool {
        lock(&self.active)
            .as_ref()
            .is_some_and(|active| lock(&active.permit).is_some())
    }

    /// Get a stream of events as they are captured
    pub fn event_stream(&self) -> impl Stream<Item = TimedEvent> {
        let mut rx = self.live_tx.subscribe();
        Box::pin(async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Live event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Start recording
    #[instrument(skip(self))]
    pub fn start(&self) -> Result<Completion<Macro, RecorderError>> {
        let mut active = lock(&self.active);

        let permit = self
            .guard
            .try_acquire(SessionKind::Recording)
            .map_err(RecorderError::ConflictingSessionActive)?;

        // A session that failed on its own has already detached; forget it
        if let Some(stale) = active.take() {
            self.source.uninstall(stale.listener);
        }

        let capacity = self.config.queue_capacity.max(1);
        let (queue, rx, overflowed) = CaptureQueue::bounded(capacity);
        let clock = Arc::clone(&self.clock);
        let callback: CaptureCallback = Box::new(move |action| queue.push(action, clock.now()));

        let started_at = self.clock.now();
        let created_at = Utc::now();
        let listener = self.source.install(callback)?;
        let permit: SharedPermit = Arc::new(Mutex::new(Some(permit)));

        let (done_tx, done) = completion();
        let worker = CaptureWorker {
            source: Arc::clone(&self.source),
            listener,
            permit: Arc::clone(&permit),
            overflowed,
            capacity,
            started_at,
            record_mouse_moves: self.config.record_mouse_moves,
            live_tx: self.live_tx.clone(),
        };

        let spawned = thread::Builder::new()
            .name("macro-recorder".to_string())
            .spawn(move || worker.run(rx, created_at, done_tx));
        if let Err(e) = spawned {
            error!("Failed to spawn recorder worker: {}", e);
            self.source.uninstall(listener);
            return Err(RecorderError::WorkerUnavailable(e.to_string()));
        }

        *active = Some(ActiveRecording { listener, permit });
        info!(%listener, "Macro recording started");
        Ok(done)
    }

    /// Stop recording. Safe to call at any time and from any thread; the finished
    /// macro arrives through the completion returned by `start`.
    #[instrument(skip(self))]
    pub fn stop(&self) {
        let Some(active) = lock(&self.active).take() else {
            debug!("Recorder already stopped");
            return;
        };
        self.source.uninstall(active.listener);
        lock(&active.permit).take();
        info!(listener = %active.listener, "Macro recording stopped");
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.stop();
    }
}

struct CaptureWorker {
    source: Arc<dyn InputSource>,
    listener: ListenerId,
    permit: SharedPermit,
    overflowed: Arc<AtomicBool>,
    capacity: usize,
    started_at: Instant,
    record_mouse_moves: bool,
    live_tx: broadcast::Sender<TimedEvent>,
}

impl CaptureWorker {
    fn run(
        self,
        rx: mpsc::Receiver<Captured>,
        created_at: chrono::DateTime<Utc>,
        done: CompletionSender<Macro, RecorderError>,
    ) {
        let outcome = drain_capture(
            rx,
            &self.overflowed,
            self.capacity,
            self.started_at,
            self.record_mouse_moves,
            &self.live_tx,
        );

        // On overflow the controller has not called stop: detach here
        self.source.uninstall(self.listener);
        lock(&self.permit).take();

        match outcome {
            Ok(events) => {
                info!(events = events.len(), "Macro recording finalized");
                done.send(Ok(Macro::from_parts(UNNAMED_MACRO, created_at, events)));
            }
            Err(e) => {
                warn!("Macro recording failed: {}", e);
                done.send(Err(e));
            }
        }
    }
}
