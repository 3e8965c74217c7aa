//! DSP Error Types

use thiserror::Error;

/// Errors that can occur during DSP operations
#[derive(Error, Debug)]
pub enum DspError {
    #[error("Sample rate must be positive, got {0}")]
    InvalidSampleRate(u32),

    #[error("Channel count must be positive")]
    InvalidChannelCount,

    #[error("Buffer holds no audio frames")]
    EmptyBuffer,

    #[error("Buffer length {len} is not a multiple of {channels} channels")]
    PartialFrame { len: usize, channels: u16 },
}
