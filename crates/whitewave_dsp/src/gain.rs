//! Lock-free Gain Values

use std::sync::atomic::{AtomicU32, Ordering};

/// A linear gain shared between the control thread and the audio callback
///
/// Rust pattern: AtomicF32 doesn't exist, so the value is stored as f32 bits.
#[derive(Debug)]
pub struct GainCell {
    bits: AtomicU32,
}

impl GainCell {
    pub fn new(gain: f32) -> Self {
        Self {
            bits: AtomicU32::new(gain.to_bits()),
        }
    }

    /// Relaxed ordering is fine: a gain is a single value with no
    /// dependent memory.
    pub fn set(&self, gain: f32) {
        self.bits.store(gain.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

impl Default for GainCell {
    fn default() -> Self {
        Self::new(1.0)
    }
}
