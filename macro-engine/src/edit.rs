//! Edits that build a replacement macro.
//!
//! Removing events folds their offsets into the next kept event, so every
//! remaining event still happens at the same time after recording start.

use crate::timing::scale_offset;
use crate::{EditError, InputAction, KeyCode, Macro, TimedEvent};
use std::collections::HashSet;
use std::ops::Range;

fn retain_timed(events: &[TimedEvent], keep: impl Fn(usize) -> bool) -> Vec<TimedEvent> {
    let mut kept = Vec::with_capacity(events.len());
    let mut carried = 0u64;
    for (index, event) in events.iter().enumerate() {
        let offset = carried.saturating_add(event.offset_ms);
        if keep(index) {
            kept.push(TimedEvent::new(event.action, offset));
            carried = 0;
        } else {
            carried = offset;
        }
    }
    kept
}

/// Remove the events at `range`
pub fn drop_events(macro_: &Macro, range: Range<usize>) -> Result<Macro, EditError> {
    if range.is_empty() || range.end > macro_.len() {
        return Err(EditError::InvalidRange {
            start: range.start,
            end: range.end,
            len: macro_.len(),
        });
    }
    Ok(macro_.with_events(retain_timed(macro_.events(), |i| !range.contains(&i))))
}

/// Replay faster (`speed > 1`) or slower (`speed < 1`).
/// Zero offsets stay zero; positive ones never drop below 1 ms.
pub fn change_speed(macro_: &Macro, speed: f64) -> Result<Macro, EditError> {
    if !speed.is_finite() || speed <= 0.0 {
        return Err(EditError::InvalidSpeed(speed));
    }
    let events = macro_
        .events()
        .iter()
        .map(|e| TimedEvent::new(e.action, scale_offset(e.offset_ms, 1.0 / speed)))
        .collect();
    Ok(macro_.with_events(events))
}

/// Indices of key presses never followed by a release of the same key
fn unreleased_presses(events: &[TimedEvent]) -> HashSet<usize> {
    let mut released: HashSet<KeyCode> = HashSet::new();
    let mut unreleased = HashSet::new();
    for (index, event) in events.iter().enumerate().rev() {
        match event.action {
            InputAction::KeyUp { key } => {
                released.insert(key);
            }
            InputAction::KeyDown { key } if !released.contains(&key) => {
                unreleased.insert(index);
            }
            _ => {}
        }
    }
    unreleased
}

/// Drop key presses that are never released.
///
/// Stopping a recording from the keyboard (Ctrl+C in a terminal) leaves the
/// presses of the stop chord in the capture while the releases arrive after the
/// hook is gone; replaying them would send the chord and leave the modifier held.
pub fn trim_unreleased_keys(macro_: &Macro) -> Macro {
    let unreleased = unreleased_presses(macro_.events());
    if unreleased.is_empty() {
        return macro_.clone();
    }
    macro_.with_events(retain_timed(macro_.events(), |i| !unreleased.contains(&i)))
}
