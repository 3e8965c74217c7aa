//! White Wave DSP - Digital Signal Processing Module
//!
//! This crate provides the mixing pipeline for White Wave, including:
//! - Immutable decoded sample buffers shared between voices
//! - Looping voices with independent, atomically updated gain
//! - A mix bus that sums voices and applies the master gain
//! - Soft clipping on the summed bus so stacked loops never hard-clip
//!
//! # Architecture
//!
//! ```text
//! Voice (buffer ─▶ gain) ──┐
//! Voice (buffer ─▶ gain) ──┼──▶ Σ ──▶ master gain ──▶ soft clip ──▶ output
//! Voice (buffer ─▶ gain) ──┘
//! ```
//!
//! The render path never allocates. Gains are updated lock-free between
//! callbacks; the voice list is only touched with `try_lock` from the
//! audio thread.

mod buffer;
mod bus;
mod error;
mod gain;
mod soft_clip;
mod voice;

pub use buffer::AudioBuffer;
pub use bus::{MixBus, VoiceId};
pub use error::DspError;
pub use gain::GainCell;
pub use soft_clip::SoftClipper;
pub use voice::LoopVoice;
