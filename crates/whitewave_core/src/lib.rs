//! White Wave Core - Player Host
//!
//! This crate provides everything behind the White Wave ambient player:
//! - Command routing from client adapters to the player host
//! - On-demand lifecycle of the single player host thread
//! - The audio engine: buffer cache, looping channels, master mute
//! - Asset loading and decoding (via Symphonia)
//! - Audio output (via CPAL, or a silent driver for headless use)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Client Adapter                          │
//! │      (daemon / UI) ──envelope──▶ Router ◀──reply──          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ Lifecycle::get_or_create
//!                              ▼ crossbeam-channel
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   whitewave-host thread                     │
//! │   AudioEngine ──voices──▶ MixBus ──render──▶ Output         │
//! │     │ buffer cache           │ master gain      │ cpal      │
//! │     └────────────────────────┴──────────────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod asset;
mod config;
mod decode;
mod engine;
mod error;
mod host;
mod message;
mod output;
mod router;

pub use asset::{AssetSource, DirAssets, MemoryAssets};
pub use config::{EngineConfig, StreamConfig};
pub use decode::decode;
pub use engine::AudioEngine;
pub use error::{EngineError, EngineResult, HostError, RouterError};
pub use host::{engine_factory, EngineFactory, HostHandle, HostSlot, Lifecycle};
pub use message::{
    Ack, ChannelMix, Command, Envelope, Failure, MixState, RawCommand, Reply, SoundId,
    StateSnapshot, Target,
};
pub use output::{
    AudioGraph, CpalBackend, CpalOutput, GraphState, NullBackend, NullOutput, OutputBackend,
    OutputDriver,
};
pub use router::Router;

// Re-export DSP types for convenience
pub use whitewave_dsp::{AudioBuffer, GainCell, MixBus};
