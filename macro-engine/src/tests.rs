use super::*;
use crate::recorder::{drain_capture, CaptureQueue};
use crate::testing::{
    LoggingWindowActivator, ManualClock, ManualInputSource, RecordingInputSink, SinkBehavior,
    StaticWindowActivator,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::StreamExt;

fn key(c: char) -> KeyCode {
    KeyCode::from_char(c).expect("ascii letter")
}

fn sample_events() -> Vec<TimedEvent> {
    vec![
        TimedEvent::new(InputAction::KeyDown { key: key('a') }, 0),
        TimedEvent::new(InputAction::KeyUp { key: key('a') }, 50),
        TimedEvent::new(InputAction::MouseMove { x: 10, y: 20 }, 70),
    ]
}

/// Alternating key down/up events with the given offsets
fn macro_with_offsets(offsets: &[u64]) -> Arc<Macro> {
    let events = offsets
        .iter()
        .enumerate()
        .map(|(i, offset)| {
            let action = if i % 2 == 0 {
                InputAction::KeyDown { key: key('x') }
            } else {
                InputAction::KeyUp { key: key('x') }
            };
            TimedEvent::new(action, *offset)
        })
        .collect();
    Arc::new(Macro::new("test", events))
}

struct Rig {
    source: Arc<ManualInputSource>,
    clock: Arc<ManualClock>,
    sink: Arc<RecordingInputSink>,
    windows: Arc<StaticWindowActivator>,
    guard: Arc<SessionGuard>,
    recorder: Recorder,
    player: Player,
}

fn rig_with(sink: Arc<RecordingInputSink>, config: RecorderConfig) -> Rig {
    let source = ManualInputSource::new();
    let clock = ManualClock::new();
    let windows = StaticWindowActivator::new(["Notepad", "Inbox - Mail"]);
    let guard = SessionGuard::new();
    let recorder = Recorder::new(source.clone(), clock.clone(), guard.clone(), config);
    let player = Player::new(sink.clone(), windows.clone(), guard.clone());
    Rig {
        source,
        clock,
        sink,
        windows,
        guard,
        recorder,
        player,
    }
}

fn rig() -> Rig {
    rig_with(RecordingInputSink::new(), RecorderConfig::default())
}

async fn next_dispatch(rx: &mut mpsc::UnboundedReceiver<InputAction>) -> InputAction {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("dispatch within 5s")
        .expect("sink alive")
}

#[test]
fn test_macro_json_round_trip() {
    let original = Macro::new("login", sample_events());
    let json = original.to_json().unwrap();
    let decoded = Macro::from_json(&json).unwrap();
    assert_eq!(decoded, original);
}

#[test]
fn test_event_document_shape() {
    let m = Macro::new("shape", sample_events());
    let value: serde_json::Value = serde_json::from_str(&m.to_json().unwrap()).unwrap();

    assert_eq!(value["format_version"], FORMAT_VERSION);
    assert_eq!(value["name"], "shape");
    assert_eq!(value["events"][0]["kind"], "KeyDown");
    assert_eq!(value["events"][0]["key"], 0x41);
    assert_eq!(value["events"][1]["offset_ms"], 50);
    assert_eq!(value["events"][2]["kind"], "MouseMove");
    assert_eq!(value["events"][2]["x"], 10);
    assert_eq!(value["events"][2]["y"], 20);
}

#[test]
fn test_unknown_event_kind_is_rejected() {
    let json = r#"{
        "format_version": 1,
        "name": "bad",
        "created_at": "2024-05-01T10:00:00Z",
        "events": [
            {"offset_ms": 0, "kind": "KeyDown", "key": 65},
            {"offset_ms": 10, "kind": "Teleport", "x": 1, "y": 2}
        ]
    }"#;
    assert!(matches!(Macro::from_json(json), Err(DecodeError::Json(_))));
}

#[test]
fn test_newer_format_version_is_rejected() {
    let json = r#"{
        "format_version": 2,
        "name": "future",
        "created_at": "2024-05-01T10:00:00Z",
        "events": [{"offset_ms": 0, "kind": "Hover"}]
    }"#;
    match Macro::from_json(json) {
        Err(DecodeError::UnsupportedVersion { found, supported }) => {
            assert_eq!(found, 2);
            assert_eq!(supported, FORMAT_VERSION);
        }
        other => panic!("expected UnsupportedVersion, got {:?}", other),
    }
}

#[test]
fn test_total_duration_and_elapsed_at() {
    let m = Macro::new("timing", sample_events());
    assert_eq!(m.total_duration(), Duration::from_millis(120));
    assert_eq!(m.elapsed_at(0), Some(Duration::ZERO));
    assert_eq!(m.elapsed_at(1), Some(Duration::from_millis(50)));
    assert_eq!(m.elapsed_at(2), Some(Duration::from_millis(120)));
    assert_eq!(m.elapsed_at(3), None);
}

#[test]
fn test_edits_build_replacements() {
    let m = Macro::new("edit", sample_events());
    let trimmed = m.with_events(sample_events()[..1].to_vec());
    assert_eq!(trimmed.name(), "edit");
    assert_eq!(trimmed.created_at(), m.created_at());
    assert_eq!(trimmed.len(), 1);
    assert_eq!(m.len(), 3);

    let renamed = m.renamed("copy");
    assert_eq!(renamed.name(), "copy");
    assert_eq!(renamed.events(), m.events());
}

#[test]
fn test_raw_key_codes() {
    let raw = KeyCode::raw(0x1234);
    assert_eq!(raw.raw_code(), Some(0x1234));
    assert_eq!(key('q').raw_code(), None);
    assert_eq!(KeyCode::from_char('7'), Some(KeyCode(0x37)));
    assert_eq!(KeyCode::from_char('%'), None);
}

#[test]
fn test_session_guard_allows_one_permit() {
    let guard = SessionGuard::new();
    assert!(guard.is_idle());

    let permit = guard.try_acquire(SessionKind::Recording).unwrap();
    assert_eq!(permit.kind(), SessionKind::Recording);
    assert_eq!(guard.active(), Some(SessionKind::Recording));
    assert_eq!(
        guard.try_acquire(SessionKind::Playback).unwrap_err(),
        SessionKind::Recording
    );

    drop(permit);
    assert!(guard.is_idle());
    assert!(guard.try_acquire(SessionKind::Playback).is_ok());
}

#[test]
fn test_capture_queue_overflow_fails_the_session() {
    let (queue, rx, overflowed) = CaptureQueue::bounded(2);
    let at = Instant::now();
    for _ in 0..3 {
        queue.push(InputAction::KeyDown { key: key('z') }, at);
    }
    // Overflow drops the sender; later pushes are ignored
    queue.push(InputAction::KeyUp { key: key('z') }, at);

    let (live_tx, _) = broadcast::channel(4);
    let outcome = drain_capture(rx, &overflowed, 2, at, true, &live_tx);
    assert_eq!(
        outcome,
        Err(RecorderError::CaptureBufferOverflow {
            captured: 2,
            capacity: 2
        })
    );
}

#[tokio::test]
async fn test_recorder_computes_offsets_from_capture_time() {
    let rig = rig();
    let done = rig.recorder.start().unwrap();
    assert!(rig.recorder.is_recording());

    assert!(rig.source.emit(InputAction::KeyDown { key: key('a') }));
    rig.clock.advance(50);
    assert!(rig.source.emit(InputAction::KeyUp { key: key('a') }));
    rig.clock.advance(70);
    assert!(rig.source.emit(InputAction::MouseMove { x: 10, y: 20 }));

    rig.recorder.stop();
    assert!(!rig.source.is_installed());
    assert!(rig.guard.is_idle());

    let recorded = done.await.unwrap();
    let offsets: Vec<u64> = recorded.events().iter().map(|e| e.offset_ms).collect();
    assert_eq!(offsets, vec![0, 50, 70]);
    assert_eq!(recorded.events(), &sample_events()[..]);
    assert_eq!(recorded.name(), UNNAMED_MACRO);
}

#[tokio::test]
async fn test_recording_nothing_gives_an_empty_macro() {
    let rig = rig();
    let done = rig.recorder.start().unwrap();
    rig.recorder.stop();
    let recorded = done.await.unwrap();
    assert!(recorded.is_empty());
}

#[tokio::test]
async fn test_recorder_can_skip_mouse_moves() {
    let config = RecorderConfig {
        record_mouse_moves: false,
        ..RecorderConfig::default()
    };
    let rig = rig_with(RecordingInputSink::new(), config);
    let done = rig.recorder.start().unwrap();

    rig.clock.advance(10);
    rig.source.emit(InputAction::KeyDown { key: key('b') });
    rig.clock.advance(30);
    rig.source.emit(InputAction::MouseMove { x: 1, y: 1 });
    rig.clock.advance(20);
    rig.source.emit(InputAction::KeyUp { key: key('b') });
    rig.recorder.stop();

    let recorded = done.await.unwrap();
    assert_eq!(
        recorded.events(),
        &[
            TimedEvent::new(InputAction::KeyDown { key: key('b') }, 10),
            TimedEvent::new(InputAction::KeyUp { key: key('b') }, 50),
        ]
    );
}

#[tokio::test]
async fn test_recorder_stop_is_idempotent() {
    let rig = rig();
    rig.recorder.stop();

    let done = rig.recorder.start().unwrap();
    rig.source.emit(InputAction::KeyDown { key: key('c') });
    rig.recorder.stop();
    rig.recorder.stop();

    let recorded = done.await.unwrap();
    assert_eq!(recorded.len(), 1);
    assert!(rig.guard.is_idle());
}

#[tokio::test]
async fn test_recorder_reports_queue_overflow() {
    let config = RecorderConfig {
        queue_capacity: 1,
        ..RecorderConfig::default()
    };
    let rig = rig_with(RecordingInputSink::new(), config);
    let done = rig.recorder.start().unwrap();

    // The worker uninstalls the listener once it sees the overflow
    let started = Instant::now();
    while rig.source.emit(InputAction::MouseMove { x: 5, y: 5 }) {
        if started.elapsed() > Duration::from_secs(5) {
            break;
        }
    }

    match done.await {
        Err(RecorderError::CaptureBufferOverflow { capacity, .. }) => assert_eq!(capacity, 1),
        other => panic!("expected overflow, got {:?}", other),
    }
    assert!(!rig.source.is_installed());
    assert!(rig.guard.is_idle());
    assert!(!rig.recorder.is_recording());

    // A new session can start after the failed one
    let done = rig.recorder.start().unwrap();
    rig.recorder.stop();
    assert!(done.await.unwrap().is_empty());
}

#[tokio::test]
async fn test_recorder_hook_failure_releases_the_guard() {
    let guard = SessionGuard::new();
    let recorder = Recorder::new(
        ManualInputSource::failing("accessibility access denied"),
        ManualClock::new(),
        guard.clone(),
        RecorderConfig::default(),
    );
    match recorder.start() {
        Err(RecorderError::HookInstallFailed(reason)) => {
            assert!(reason.contains("accessibility"))
        }
        other => panic!("expected HookInstallFailed, got {:?}", other.err()),
    }
    assert!(guard.is_idle());
}

#[tokio::test]
async fn test_live_event_stream_follows_capture() {
    let rig = rig();
    let mut stream = rig.recorder.event_stream();
    let done = rig.recorder.start().unwrap();

    rig.source.emit(InputAction::KeyDown { key: key('s') });
    rig.clock.advance(15);
    rig.source.emit(InputAction::KeyUp { key: key('s') });

    let first = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .unwrap()
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.kind(), EventKind::KeyDown);
    assert_eq!(second.offset_ms, 15);

    rig.recorder.stop();
    assert_eq!(done.await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_recording_blocks_playback_and_a_second_recording() {
    let rig = rig();
    let done = rig.recorder.start().unwrap();

    let err = rig
        .player
        .start(macro_with_offsets(&[0, 10]), PlaybackConfig::default())
        .unwrap_err();
    assert_eq!(
        err,
        PlayerError::ConflictingSessionActive(SessionKind::Recording)
    );
    assert_eq!(
        rig.recorder.start().unwrap_err(),
        RecorderError::ConflictingSessionActive(SessionKind::Recording)
    );

    // The running session is unaffected
    assert!(rig.source.is_installed());
    assert!(rig.source.emit(InputAction::KeyDown { key: key('k') }));
    rig.recorder.stop();
    assert_eq!(done.await.unwrap().len(), 1);
    assert!(rig.sink.is_empty());
}

#[tokio::test]
async fn test_playback_blocks_recording() {
    let rig = rig();
    let done = rig
        .player
        .start(macro_with_offsets(&[0, 5_000]), PlaybackConfig::default())
        .unwrap();

    assert_eq!(
        rig.recorder.start().unwrap_err(),
        RecorderError::ConflictingSessionActive(SessionKind::Playback)
    );
    assert!(!rig.source.is_installed());

    rig.player.stop();
    let report = done.await.unwrap();
    assert!(report.cancelled);
    assert!(rig.guard.is_idle());
}

#[tokio::test]
async fn test_empty_macro_fails_validation() {
    let rig = rig();
    let empty = Arc::new(Macro::new("empty", Vec::new()));
    match rig.player.start(empty, PlaybackConfig::default()) {
        Err(PlayerError::ValidationFailed(_)) => {}
        other => panic!("expected ValidationFailed, got {:?}", other.err()),
    }
    assert_eq!(rig.sink.attempts(), 0);
    assert_eq!(rig.player.state(), PlayerState::Idle);
    assert!(rig.guard.is_idle());
}

#[tokio::test]
async fn test_invalid_config_fails_validation() {
    let rig = rig();
    let blank_title = PlaybackConfig {
        target_window_title: Some("   ".to_string()),
        ..PlaybackConfig::default()
    };
    assert!(matches!(
        rig.player.start(macro_with_offsets(&[0]), blank_title),
        Err(PlayerError::ValidationFailed(_))
    ));

    let bad_jitter = PlaybackConfig {
        vary_speed: true,
        jitter: JitterRange::new(1.2, 0.8),
        ..PlaybackConfig::default()
    };
    assert!(matches!(
        rig.player.start(macro_with_offsets(&[0]), bad_jitter),
        Err(PlayerError::ValidationFailed(_))
    ));
    assert!(rig.guard.is_idle());
}

#[tokio::test]
async fn test_playback_dispatches_every_event_in_order() {
    let (sink, mut rx) = RecordingInputSink::with_notifications();
    let rig = rig_with(sink, RecorderConfig::default());
    let recorded = Arc::new(Macro::new("abc", sample_events()));

    let done = rig
        .player
        .start(Arc::clone(&recorded), PlaybackConfig::default())
        .unwrap();

    next_dispatch(&mut rx).await;
    let first_at = Instant::now();
    next_dispatch(&mut rx).await;
    let second_at = Instant::now();
    next_dispatch(&mut rx).await;
    let third_at = Instant::now();

    let report = done.await.unwrap();
    assert_eq!(report.dispatched, 3);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.passes, 1);
    assert!(!report.cancelled);
    assert!(report.warnings.is_empty());

    let expected: Vec<InputAction> = recorded.events().iter().map(|e| e.action).collect();
    assert_eq!(rig.sink.actions(), expected);

    let gap_one = second_at - first_at;
    let gap_two = third_at - second_at;
    assert!(gap_one >= Duration::from_millis(40), "gap {:?}", gap_one);
    assert!(gap_two >= Duration::from_millis(60), "gap {:?}", gap_two);
    assert!(gap_one + gap_two < Duration::from_secs(2));

    assert_eq!(rig.player.state(), PlayerState::Finished);
    assert!(rig.guard.is_idle());
}

#[tokio::test]
async fn test_jittered_playback_keeps_order() {
    let rig = rig();
    let recorded = macro_with_offsets(&[0, 5, 5, 5, 5, 5]);
    let config = PlaybackConfig {
        vary_speed: true,
        jitter_seed: Some(3),
        ..PlaybackConfig::default()
    };
    let report = rig
        .player
        .start(Arc::clone(&recorded), config)
        .unwrap()
        .await
        .unwrap();

    assert_eq!(report.dispatched, 6);
    let expected: Vec<InputAction> = recorded.events().iter().map(|e| e.action).collect();
    assert_eq!(rig.sink.actions(), expected);
}

#[tokio::test]
async fn test_cancelling_dispatches_a_strict_prefix() {
    let (sink, mut rx) = RecordingInputSink::with_notifications();
    let rig = rig_with(sink, RecorderConfig::default());
    let recorded = macro_with_offsets(&[30; 10]);

    let done = rig
        .player
        .start(Arc::clone(&recorded), PlaybackConfig::default())
        .unwrap();
    for _ in 0..3 {
        next_dispatch(&mut rx).await;
    }
    rig.player.stop();
    rig.player.stop();

    let report = done.await.unwrap();
    assert!(report.cancelled);
    assert!(report.dispatched >= 3);
    assert!(report.dispatched < recorded.len());

    let dispatched = rig.sink.actions();
    let expected: Vec<InputAction> = recorded.events()[..dispatched.len()]
        .iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(dispatched, expected);
    assert!(rig.guard.is_idle());
    assert_eq!(rig.player.state(), PlayerState::Finished);
}

#[tokio::test]
async fn test_loop_stopped_at_boundary_dispatches_one_pass() {
    let (sink, mut rx) = RecordingInputSink::with_notifications();
    let rig = rig_with(sink, RecorderConfig::default());
    let config = PlaybackConfig {
        loop_playback: true,
        ..PlaybackConfig::default()
    };

    let done = rig
        .player
        .start(macro_with_offsets(&[200, 10]), config)
        .unwrap();
    next_dispatch(&mut rx).await;
    next_dispatch(&mut rx).await;
    rig.player.stop();

    let report = done.await.unwrap();
    assert!(report.cancelled);
    assert_eq!(report.dispatched, 2);
    assert_eq!(rig.sink.len(), 2);
}

#[tokio::test]
async fn test_looping_restarts_the_sequence() {
    let (sink, mut rx) = RecordingInputSink::with_notifications();
    let rig = rig_with(sink, RecorderConfig::default());
    let config = PlaybackConfig {
        loop_playback: true,
        ..PlaybackConfig::default()
    };

    let done = rig.player.start(macro_with_offsets(&[5, 5]), config).unwrap();
    for _ in 0..5 {
        next_dispatch(&mut rx).await;
    }
    rig.player.stop();

    let report = done.await.unwrap();
    assert!(report.passes >= 3);
    assert!(report.dispatched >= 5);
    let actions = rig.sink.actions();
    assert_eq!(actions[0], actions[2]);
    assert_eq!(actions[1], actions[3]);
}

#[tokio::test]
async fn test_target_window_is_activated_first() {
    let rig = rig();
    let config = PlaybackConfig {
        target_window_title: Some("notepad".to_string()),
        ..PlaybackConfig::default()
    };
    let report = rig
        .player
        .start(macro_with_offsets(&[0, 1]), config)
        .unwrap()
        .await
        .unwrap();

    assert_eq!(rig.windows.activated(), vec!["Notepad".to_string()]);
    assert!(report.warnings.is_empty());
    assert_eq!(report.dispatched, 2);
}

#[tokio::test]
async fn test_missing_window_is_a_warning() {
    let rig = rig();
    let config = PlaybackConfig {
        target_window_title: Some("Calculator".to_string()),
        ..PlaybackConfig::default()
    };
    let report = rig
        .player
        .start(macro_with_offsets(&[0, 1]), config)
        .unwrap()
        .await
        .unwrap();

    assert_eq!(report.dispatched, 2);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].is_warning());
    match &report.warnings[0] {
        PlayerError::WindowActivationFailed { title, .. } => assert_eq!(title, "Calculator"),
        other => panic!("unexpected warning {:?}", other),
    }
}

#[tokio::test]
async fn test_restart_right_after_playback_keeps_the_new_state() {
    let (sink, mut rx) = RecordingInputSink::with_notifications();
    let rig = rig_with(sink, RecorderConfig::default());
    let short = macro_with_offsets(&[0]);
    let long = macro_with_offsets(&[0, 5_000]);

    for _ in 0..20 {
        let first = rig
            .player
            .start(Arc::clone(&short), PlaybackConfig::default())
            .unwrap();
        // Take over the moment the guard is released
        let second = loop {
            match rig.player.start(Arc::clone(&long), PlaybackConfig::default()) {
                Ok(done) => break done,
                Err(PlayerError::ConflictingSessionActive(_)) => std::thread::yield_now(),
                Err(e) => panic!("unexpected start failure {:?}", e),
            }
        };
        assert_eq!(first.await.unwrap().dispatched, 1);
        next_dispatch(&mut rx).await;
        next_dispatch(&mut rx).await;

        assert_eq!(rig.player.state(), PlayerState::Playing);
        assert_eq!(rig.guard.active(), Some(SessionKind::Playback));

        rig.player.stop();
        assert!(second.await.unwrap().cancelled);
        assert_eq!(rig.player.state(), PlayerState::Finished);
    }
    assert!(rig.guard.is_idle());
}

#[tokio::test]
async fn test_logging_window_activator_accepts_any_title() {
    let sink = RecordingInputSink::new();
    let player = Player::new(
        sink.clone(),
        Arc::new(LoggingWindowActivator::new()),
        SessionGuard::new(),
    );
    let config = PlaybackConfig {
        target_window_title: Some("Calculator".to_string()),
        ..PlaybackConfig::default()
    };
    let report = player
        .start(macro_with_offsets(&[0, 1]), config)
        .unwrap()
        .await
        .unwrap();

    assert!(report.warnings.is_empty());
    assert_eq!(report.dispatched, 2);
    assert_eq!(sink.len(), 2);
}

#[tokio::test]
async fn test_rejected_event_is_skipped() {
    let rig = rig_with(
        RecordingInputSink::with_behavior(SinkBehavior::RejectNth(1)),
        RecorderConfig::default(),
    );
    let recorded = macro_with_offsets(&[0, 1, 1]);
    let report = rig
        .player
        .start(Arc::clone(&recorded), PlaybackConfig::default())
        .unwrap()
        .await
        .unwrap();

    assert_eq!(report.dispatched, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(
        rig.sink.actions(),
        vec![recorded.events()[0].action, recorded.events()[2].action]
    );
}

#[tokio::test]
async fn test_permission_denied_aborts_playback() {
    let rig = rig_with(
        RecordingInputSink::with_behavior(SinkBehavior::Deny),
        RecorderConfig::default(),
    );
    let outcome = rig
        .player
        .start(macro_with_offsets(&[0, 1, 1]), PlaybackConfig::default())
        .unwrap()
        .await;

    assert!(matches!(
        outcome,
        Err(PlayerError::SynthesisPermissionDenied(_))
    ));
    assert_eq!(rig.sink.attempts(), 1);
    assert!(rig.guard.is_idle());
}

#[tokio::test]
async fn test_completion_can_be_polled() {
    let rig = rig();
    let mut done = rig
        .player
        .start(macro_with_offsets(&[0, 5_000]), PlaybackConfig::default())
        .unwrap();
    assert!(done.try_take().is_none());

    rig.player.stop();
    let started = Instant::now();
    let outcome = loop {
        if let Some(outcome) = done.try_take() {
            break outcome;
        }
        assert!(started.elapsed() < Duration::from_secs(5));
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    assert!(outcome.unwrap().cancelled);
    assert!(done.try_take().is_none());
}

#[test]
fn test_completion_wait_blocks_until_finished() {
    let rig = rig();
    let report = rig
        .player
        .start(macro_with_offsets(&[0, 10]), PlaybackConfig::default())
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(report.dispatched, 2);
}
