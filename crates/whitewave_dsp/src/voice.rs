//! Looping Voice
//!
//! Plays one `AudioBuffer` forever, wrapping at the end of the buffer.
//! The buffer's native rate is converted to the output rate with linear
//! interpolation, which is plenty for ambient loops.

use std::sync::Arc;

use crate::buffer::AudioBuffer;
use crate::gain::GainCell;

/// A looping source wired to its own gain
pub struct LoopVoice {
    buffer: AudioBuffer,
    gain: Arc<GainCell>,
    /// Read position in source frames
    position: f64,
    /// Source frames advanced per output frame
    step: f64,
}

impl LoopVoice {
    /// Create a voice rendering `buffer` at `output_rate`
    pub fn new(buffer: AudioBuffer, gain: Arc<GainCell>, output_rate: u32) -> Self {
        let step = buffer.sample_rate() as f64 / output_rate.max(1) as f64;
        Self {
            buffer,
            gain,
            position: 0.0,
            step,
        }
    }

    pub fn gain(&self) -> &Arc<GainCell> {
        &self.gain
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    /// Add this voice's output into an interleaved buffer
    ///
    /// Source channels are mapped onto output channels by index; output
    /// channels beyond the source's last channel repeat it (mono plays on
    /// both speakers).
    ///
    /// # Real-time Safety
    /// No allocations, O(n) time.
    #[inline]
    pub fn render_add(&mut self, output: &mut [f32], output_channels: usize) {
        if output_channels == 0 {
            return;
        }

        let frames = self.buffer.frames();
        let src_channels = self.buffer.channels() as usize;
        let samples = self.buffer.samples();
        let gain = self.gain.get();
        let length = frames as f64;

        for frame in output.chunks_exact_mut(output_channels) {
            let index = self.position as usize;
            let next = if index + 1 >= frames { 0 } else { index + 1 };
            let frac = (self.position - index as f64) as f32;

            for (channel, slot) in frame.iter_mut().enumerate() {
                let src = channel.min(src_channels - 1);
                let a = samples[index * src_channels + src];
                let b = samples[next * src_channels + src];
                *slot += (a + (b - a) * frac) * gain;
            }

            self.position += self.step;
            while self.position >= length {
                self.position -= length;
            }
        }
    }
}
