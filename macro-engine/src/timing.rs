use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounds of the per-event speed factor used when playback varies its speed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JitterRange {
    pub min: f64,
    pub max: f64,
}

impl Default for JitterRange {
    fn default() -> Self {
        Self {
            min: 0.85,
            max: 1.15,
        }
    }
}

impl JitterRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Check that the range is finite, positive and brackets 1.0
    pub fn validate(&self) -> Result<(), String> {
        if !self.min.is_finite() || !self.max.is_finite() {
            return Err(format!(
                "jitter range must be finite, got [{}, {}]",
                self.min, self.max
            ));
        }
        if self.min <= 0.0 || self.min > 1.0 || self.max < 1.0 {
            return Err(format!(
                "jitter range must satisfy 0 < min <= 1 <= max, got [{}, {}]",
                self.min, self.max
            ));
        }
        Ok(())
    }
}

/// Scale one recorded offset by `factor`.
///
/// Zero stays zero; any positive offset stays at least one millisecond so the
/// gap between two events never collapses.
pub fn scale_offset(offset_ms: u64, factor: f64) -> u64 {
    if offset_ms == 0 {
        return 0;
    }
    let scaled = (offset_ms as f64 * factor).round();
    if scaled < 1.0 {
        1
    } else if scaled >= u64::MAX as f64 {
        u64::MAX
    } else {
        scaled as u64
    }
}

/// Turns recorded offsets into the delays the player actually waits
#[derive(Debug)]
pub enum DelayPolicy {
    /// Replay with the recorded timing
    Exact,
    /// Draw a fresh factor for every event
    Jittered { range: JitterRange, rng: StdRng },
}

impl DelayPolicy {
    pub fn exact() -> Self {
        DelayPolicy::Exact
    }

    /// Jittered delays; `seed` makes the factor sequence reproducible
    pub fn jittered(range: JitterRange, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        DelayPolicy::Jittered { range, rng }
    }

    pub fn delay_ms(&mut self, offset_ms: u64) -> u64 {
        match self {
            DelayPolicy::Exact => offset_ms,
            DelayPolicy::Jittered { range, rng } => {
                let factor = if range.min < range.max {
                    rng.gen_range(range.min..=range.max)
                } else {
                    range.min
                };
                scale_offset(offset_ms, factor)
            }
        }
    }

    pub fn delay(&mut self, offset_ms: u64) -> Duration {
        Duration::from_millis(self.delay_ms(offset_ms))
    }
}
