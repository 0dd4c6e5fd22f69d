//! Injectable randomness.
//!
//! Every probabilistic decision in the planner and send pipeline draws
//! through [`Dice`], so tests swap in a scripted sequence and the whole
//! engine becomes deterministic.

use rand::Rng;

pub trait Dice: Send + Sync {
    /// Uniform draw in `[0, 1)`.
    fn roll(&self) -> f64;

    /// Uniform integer in `[0, bound)`. `bound == 0` returns 0.
    fn jitter(&self, bound: u64) -> u64 {
        if bound == 0 {
            0
        } else {
            ((self.roll() * bound as f64) as u64).min(bound - 1)
        }
    }
}

/// Production dice backed by the thread-local RNG.
pub struct ThreadDice;

impl Dice for ThreadDice {
    fn roll(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Deterministic dice: replays a fixed script, then falls back to a
/// constant. Meant for tests and reproductions.
pub struct ScriptedDice {
    script: std::sync::Mutex<std::collections::VecDeque<f64>>,
    fallback: f64,
}

impl ScriptedDice {
    pub fn new(values: &[f64], fallback: f64) -> Self {
        Self {
            script: std::sync::Mutex::new(values.iter().copied().collect()),
            fallback,
        }
    }

    /// Dice that always roll the same value.
    pub fn constant(value: f64) -> Self {
        Self::new(&[], value)
    }
}

impl Dice for ScriptedDice {
    fn roll(&self) -> f64 {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback)
    }
}
