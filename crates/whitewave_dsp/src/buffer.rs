//! Decoded Sample Buffers

use std::sync::Arc;

use crate::error::DspError;

/// Immutable decoded audio for one sound
///
/// Samples are interleaved f32 in the source's own sample rate and channel
/// layout. Cloning is cheap; every voice playing the same sound shares the
/// same allocation.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: u16,
}

impl AudioBuffer {
    /// Wrap decoded samples, rejecting layouts a voice cannot loop over
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Result<Self, DspError> {
        if sample_rate == 0 {
            return Err(DspError::InvalidSampleRate(sample_rate));
        }
        if channels == 0 {
            return Err(DspError::InvalidChannelCount);
        }
        if samples.is_empty() {
            return Err(DspError::EmptyBuffer);
        }
        if samples.len() % channels as usize != 0 {
            return Err(DspError::PartialFrame {
                len: samples.len(),
                channels,
            });
        }

        Ok(Self {
            samples: samples.into(),
            sample_rate,
            channels,
        })
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Playback length in seconds at the native sample rate
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_buffer() {
        let buffer = AudioBuffer::new(vec![0.0; 96000], 48000, 2).unwrap();
        assert_eq!(buffer.frames(), 48000);
        assert!((buffer.duration_secs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_bad_layouts() {
        assert!(matches!(
            AudioBuffer::new(vec![0.0; 4], 0, 2),
            Err(DspError::InvalidSampleRate(0))
        ));
        assert!(matches!(
            AudioBuffer::new(vec![0.0; 4], 48000, 0),
            Err(DspError::InvalidChannelCount)
        ));
        assert!(matches!(
            AudioBuffer::new(Vec::new(), 48000, 2),
            Err(DspError::EmptyBuffer)
        ));
        assert!(matches!(
            AudioBuffer::new(vec![0.0; 5], 48000, 2),
            Err(DspError::PartialFrame { len: 5, channels: 2 })
        ));
    }

    #[test]
    fn test_clone_shares_samples() {
        let buffer = AudioBuffer::new(vec![0.25; 8], 44100, 1).unwrap();
        let clone = buffer.clone();
        assert!(std::ptr::eq(buffer.samples(), clone.samples()));
    }
}
