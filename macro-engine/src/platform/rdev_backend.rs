use super::{CaptureCallback, InputSink, InputSource, ListenerId};
use crate::{InputAction, KeyCode, MouseButton, RecorderError, SynthesisError};
use rdev::{Button, EventType, Key};
use std::{
    sync::atomic::{AtomicU32, AtomicU64, Ordering},
    sync::{mpsc, Arc, Mutex, OnceLock, PoisonError},
    thread,
    time::Duration,
};
use tracing::{debug, error, info, warn};

/// How long `install` waits for the hook thread to fail before trusting it
const HOOK_STARTUP_GRACE: Duration = Duration::from_millis(150);

/// Consecutive rejections, with no success in between, that mean synthesis is not permitted
const MAX_CONSECUTIVE_REJECTIONS: u32 = 5;

struct Listener {
    id: ListenerId,
    callback: CaptureCallback,
}

#[derive(Default)]
struct HookShared {
    listener: Mutex<Option<Listener>>,
    failure: Mutex<Option<String>>,
    next_id: AtomicU64,
}

impl HookShared {
    fn deliver(&self, event_type: &EventType) {
        let Some(action) = translate_event(event_type) else {
            return;
        };
        let listener = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(listener) = listener.as_ref() {
            (listener.callback)(action);
        }
    }

    fn failure(&self) -> Option<String> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_failure(&self, reason: String) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason);
    }
}

/// `rdev::listen` never returns while it works and cannot be torn down, so a
/// single hook thread lives for the rest of the process and listeners are
/// attached to and detached from it.
fn global_hook() -> &'static Arc<HookShared> {
    static HOOK: OnceLock<Arc<HookShared>> = OnceLock::new();
    HOOK.get_or_init(start_hook_thread)
}

fn start_hook_thread() -> Arc<HookShared> {
    let shared = Arc::new(HookShared::default());
    let (failed_tx, failed_rx) = mpsc::channel::<String>();
    let thread_shared = Arc::clone(&shared);

    let spawned = thread::Builder::new()
        .name("macro-input-hook".to_string())
        .spawn(move || {
            let callback_shared = Arc::clone(&thread_shared);
            let listened = rdev::listen(move |event| callback_shared.deliver(&event.event_type));
            let reason = match listened {
                Err(e) => format!("{:?}", e),
                Ok(()) => "input listener exited".to_string(),
            };
            error!(%reason, "Global input listener stopped");
            thread_shared.set_failure(reason.clone());
            let _ = failed_tx.send(reason);
        });

    match spawned {
        Err(e) => shared.set_failure(format!("failed to spawn hook thread: {}", e)),
        Ok(_) => match failed_rx.recv_timeout(HOOK_STARTUP_GRACE) {
            Ok(reason) => debug!(%reason, "Input hook failed during startup"),
            Err(_) => info!("Global input hook running"),
        },
    }
    shared
}

/// Captures global input through a process-wide rdev hook
#[derive(Debug, Default)]
pub struct RdevInputSource;

impl RdevInputSource {
    pub fn new() -> Self {
        Self
    }
}

impl InputSource for RdevInputSource {
    fn install(&self, callback: CaptureCallback) -> Result<ListenerId, RecorderError> {
        let hook = global_hook();
        if let Some(reason) = hook.failure() {
            return Err(RecorderError::HookInstallFailed(reason));
        }

        let mut slot = hook.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = slot.as_ref() {
            return Err(RecorderError::HookInstallFailed(format!(
                "{} is still attached to the input hook",
                existing.id
            )));
        }
        let id = ListenerId(hook.next_id.fetch_add(1, Ordering::Relaxed));
        *slot = Some(Listener { id, callback });
        debug!(%id, "Capture listener installed");
        Ok(id)
    }

    fn uninstall(&self, id: ListenerId) {
        let mut slot = global_hook()
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|listener| listener.id == id) {
            // Dropping the callback drops whatever it captured (the capture queue sender)
            *slot = None;
            debug!(%id, "Capture listener removed");
        }
    }
}

/// Synthesizes input with `rdev::simulate`
#[derive(Debug, Default)]
pub struct RdevInputSink {
    consecutive_rejections: AtomicU32,
}

impl RdevInputSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InputSink for RdevInputSink {
    fn dispatch(&self, action: &InputAction) -> Result<(), SynthesisError> {
        let event_type = to_event_type(action);
        match rdev::simulate(&event_type) {
            Ok(()) => {
                self.consecutive_rejections.store(0, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                let rejections = self.consecutive_rejections.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(?action, rejections, "rdev refused to simulate event: {:?}", e);
                if rejections >= MAX_CONSECUTIVE_REJECTIONS {
                    Err(SynthesisError::PermissionDenied(format!(
                        "{} consecutive events refused by the OS",
                        rejections
                    )))
                } else {
                    Err(SynthesisError::Rejected(format!("{:?}", e)))
                }
            }
        }
    }
}

fn translate_event(event_type: &EventType) -> Option<InputAction> {
    let action = match *event_type {
        EventType::KeyPress(key) => InputAction::KeyDown {
            key: key_to_code(key),
        },
        EventType::KeyRelease(key) => InputAction::KeyUp {
            key: key_to_code(key),
        },
        EventType::ButtonPress(button) => InputAction::MouseButtonDown {
            button: from_rdev_button(button),
        },
        EventType::ButtonRelease(button) => InputAction::MouseButtonUp {
            button: from_rdev_button(button),
        },
        EventType::MouseMove { x, y } => InputAction::MouseMove {
            x: x.round() as i32,
            y: y.round() as i32,
        },
        EventType::Wheel { delta_x, delta_y } => {
            if delta_x == 0 && delta_y == 0 {
                return None;
            }
            InputAction::MouseWheel {
                delta_x: clamp_delta(delta_x),
                delta_y: clamp_delta(delta_y),
            }
        }
    };
    Some(action)
}

fn to_event_type(action: &InputAction) -> EventType {
    match *action {
        InputAction::KeyDown { key } => EventType::KeyPress(code_to_key(key)),
        InputAction::KeyUp { key } => EventType::KeyRelease(code_to_key(key)),
        InputAction::MouseMove { x, y } => EventType::MouseMove {
            x: f64::from(x),
            y: f64::from(y),
        },
        InputAction::MouseButtonDown { button } => EventType::ButtonPress(to_rdev_button(button)),
        InputAction::MouseButtonUp { button } => EventType::ButtonRelease(to_rdev_button(button)),
        InputAction::MouseWheel { delta_x, delta_y } => EventType::Wheel {
            delta_x: i64::from(delta_x),
            delta_y: i64::from(delta_y),
        },
    }
}

fn clamp_delta(delta: i64) -> i32 {
    delta.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

fn from_rdev_button(button: Button) -> MouseButton {
    match button {
        Button::Left => MouseButton::Left,
        Button::Right => MouseButton::Right,
        Button::Middle => MouseButton::Middle,
        Button::Unknown(code) => MouseButton::Other(code),
    }
}

fn to_rdev_button(button: MouseButton) -> Button {
    match button {
        MouseButton::Left => Button::Left,
        MouseButton::Right => Button::Right,
        MouseButton::Middle => Button::Middle,
        MouseButton::Other(code) => Button::Unknown(code),
    }
}

macro_rules! key_table {
    ($($key:ident => $code:literal),* $(,)?) => {
        /// Convert an rdev key to a virtual-key style code
        fn key_to_code(key: Key) -> KeyCode {
            match key {
                $(Key::$key => KeyCode($code),)*
                Key::Unknown(raw) => KeyCode::raw(raw),
                #[allow(unreachable_patterns)]
                other => {
                    debug!(?other, "Key has no table entry");
                    KeyCode::raw(0)
                }
            }
        }

        /// Convert a stored code back to the rdev key it was captured from
        fn code_to_key(code: KeyCode) -> Key {
            if let Some(raw) = code.raw_code() {
                return Key::Unknown(raw);
            }
            match code.0 {
                $($code => Key::$key,)*
                unknown => Key::Unknown(unknown),
            }
        }
    };
}

// Windows virtual-key codes where one exists; keypad enter and Fn get codes above 0xFF.
key_table! {
    KeyA => 0x41, KeyB => 0x42, KeyC => 0x43, KeyD => 0x44, KeyE => 0x45,
    KeyF => 0x46, KeyG => 0x47, KeyH => 0x48, KeyI => 0x49, KeyJ => 0x4A,
    KeyK => 0x4B, KeyL => 0x4C, KeyM => 0x4D, KeyN => 0x4E, KeyO => 0x4F,
    KeyP => 0x50, KeyQ => 0x51, KeyR => 0x52, KeyS => 0x53, KeyT => 0x54,
    KeyU => 0x55, KeyV => 0x56, KeyW => 0x57, KeyX => 0x58, KeyY => 0x59,
    KeyZ => 0x5A,
    Num0 => 0x30, Num1 => 0x31, Num2 => 0x32, Num3 => 0x33, Num4 => 0x34,
    Num5 => 0x35, Num6 => 0x36, Num7 => 0x37, Num8 => 0x38, Num9 => 0x39,
    Escape => 0x1B,
    Backspace => 0x08,
    Tab => 0x09,
    Return => 0x0D,
    Space => 0x20,
    CapsLock => 0x14,
    Pause => 0x13,
    LeftArrow => 0x25,
    UpArrow => 0x26,
    RightArrow => 0x27,
    DownArrow => 0x28,
    PrintScreen => 0x2C,
    Insert => 0x2D,
    Delete => 0x2E,
    Home => 0x24,
    End => 0x23,
    PageUp => 0x21,
    PageDown => 0x22,
    F1 => 0x70, F2 => 0x71, F3 => 0x72, F4 => 0x73, F5 => 0x74, F6 => 0x75,
    F7 => 0x76, F8 => 0x77, F9 => 0x78, F10 => 0x79, F11 => 0x7A, F12 => 0x7B,
    NumLock => 0x90,
    ScrollLock => 0x91,
    ShiftLeft => 0xA0,
    ShiftRight => 0xA1,
    ControlLeft => 0xA2,
    ControlRight => 0xA3,
    Alt => 0xA4,
    AltGr => 0xA5,
    MetaLeft => 0x5B,
    MetaRight => 0x5C,
    Kp0 => 0x60, Kp1 => 0x61, Kp2 => 0x62, Kp3 => 0x63, Kp4 => 0x64,
    Kp5 => 0x65, Kp6 => 0x66, Kp7 => 0x67, Kp8 => 0x68, Kp9 => 0x69,
    KpMultiply => 0x6A,
    KpPlus => 0x6B,
    KpMinus => 0x6D,
    KpDelete => 0x6E,
    KpDivide => 0x6F,
    SemiColon => 0xBA,
    Equal => 0xBB,
    Comma => 0xBC,
    Minus => 0xBD,
    Dot => 0xBE,
    Slash => 0xBF,
    BackQuote => 0xC0,
    LeftBracket => 0xDB,
    BackSlash => 0xDC,
    RightBracket => 0xDD,
    Quote => 0xDE,
    IntlBackslash => 0xE2,
    KpReturn => 0x10D,
    Function => 0x1FF,
}
