//! Error Types
//!
//! Engine errors stop at the engine's dispatch boundary and router errors
//! at the router's; callers only ever see `{ok:false, error}` replies.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in the audio engine or while talking to it
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to load {sound_id}: {reason}")]
    AssetLoad { sound_id: String, reason: String },

    #[error("Failed to decode {sound_id}: {reason}")]
    Decode { sound_id: String, reason: String },

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid payload for {kind}: {reason}")]
    InvalidPayload { kind: String, reason: String },

    #[error("Audio output error: {0}")]
    Output(String),

    #[error("Stream configuration error: {0}")]
    ConfigError(String),

    #[error("Player host unreachable: {0}")]
    Transport(String),

    #[error("Player host did not reply within {0:?}")]
    Timeout(Duration),

    #[error("DSP error: {0}")]
    Dsp(#[from] whitewave_dsp::DspError),
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors from creating or addressing the player host
#[derive(Error, Debug)]
pub enum HostError {
    /// Another creation already won; callers treat this as success
    #[error("Only one player host may exist at a time")]
    AlreadyExists,

    #[error("Failed to spawn player host: {0}")]
    Spawn(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Errors raised by the command router itself
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("Invalid {kind} message: {reason}")]
    InvalidMessage { kind: String, reason: String },

    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::UnknownCommand("REWIND".into());
        assert_eq!(err.to_string(), "Unknown command: REWIND");

        let err = EngineError::AssetLoad {
            sound_id: "rain".into(),
            reason: "not found".into(),
        };
        assert!(err.to_string().contains("rain"));

        let err = RouterError::UnknownMessageType("PING".into());
        assert_eq!(err.to_string(), "Unknown message type: PING");
    }

    #[test]
    fn test_error_from_dsp() {
        let dsp_err = whitewave_dsp::DspError::EmptyBuffer;
        let engine_err: EngineError = dsp_err.into();
        assert!(matches!(engine_err, EngineError::Dsp(_)));
    }

    #[test]
    fn test_host_error_wraps_engine_error_transparently() {
        let err: HostError = EngineError::Transport("closed".into()).into();
        assert_eq!(err.to_string(), "Player host unreachable: closed");
    }
}
