//! Soft Clipping for the Summed Bus
//!
//! Several loops at full volume easily sum past 0dBFS. Instead of hard
//! clipping, samples above the threshold are bent toward ±1.0 with a tanh
//! curve:
//! - Below threshold: linear (unity gain)
//! - Above threshold: smooth saturation, asymptotic to ±1.0

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Soft clipper that prevents hard clipping with smooth saturation
///
/// Thread-safe: threshold and enable flag can be changed while rendering.
pub struct SoftClipper {
    /// Linear threshold stored as f32 bits for atomic access
    threshold_bits: AtomicU32,
    enabled: AtomicBool,
}

impl SoftClipper {
    /// Create a clipper whose knee starts `threshold_db` below 0dBFS
    pub fn new(threshold_db: f32) -> Self {
        Self {
            threshold_bits: AtomicU32::new(db_to_linear(threshold_db).to_bits()),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn set_threshold_db(&self, db: f32) {
        self.threshold_bits
            .store(db_to_linear(db).to_bits(), Ordering::Relaxed);
    }

    /// Current threshold in linear scale
    pub fn threshold(&self) -> f32 {
        f32::from_bits(self.threshold_bits.load(Ordering::Relaxed))
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn process_sample(&self, sample: f32) -> f32 {
        if !self.is_enabled() {
            return sample;
        }
        soft_clip(sample, self.threshold())
    }

    /// Process an interleaved buffer in-place
    ///
    /// # Real-time Safety
    /// No allocations, O(n) time.
    #[inline]
    pub fn process_interleaved(&self, buffer: &mut [f32]) {
        if !self.is_enabled() {
            return;
        }

        let threshold = self.threshold();
        for sample in buffer.iter_mut() {
            *sample = soft_clip(*sample, threshold);
        }
    }
}

impl Default for SoftClipper {
    fn default() -> Self {
        Self::new(-3.0)
    }
}

#[inline]
fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Input at `threshold` maps to itself; the excess is squashed into the
/// remaining headroom so output approaches but never exceeds ±1.0.
#[inline]
fn soft_clip(sample: f32, threshold: f32) -> f32 {
    let magnitude = sample.abs();
    if magnitude <= threshold {
        return sample;
    }

    let headroom = 1.0 - threshold;
    let excess = (magnitude - threshold) / headroom.max(0.001);
    sample.signum() * (threshold + headroom * excess.tanh())
}
