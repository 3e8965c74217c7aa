//! Audio Output
//!
//! An [`OutputBackend`] opens the audio graph: a [`MixBus`] plus the
//! driver that pulls rendered audio out of it. A freshly opened graph is
//! suspended, like a browser audio context before a user gesture; the
//! engine resumes it before starting playback.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig as CpalStreamConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use whitewave_dsp::MixBus;

use crate::config::StreamConfig;
use crate::error::{EngineError, EngineResult};

/// Readiness of the audio graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphState {
    Uninitialized,
    Suspended,
    Running,
}

/// Drives a mix bus into some sink
///
/// Drivers live on the host thread for their whole life, so they need not
/// be `Send` (cpal streams are not on every platform).
pub trait OutputDriver {
    fn name(&self) -> &'static str;

    fn resume(&mut self) -> EngineResult<()>;

    fn suspend(&mut self) -> EngineResult<()>;

    fn is_running(&self) -> bool;
}

/// Opens audio graphs; shared by every engine a lifecycle manager creates
pub trait OutputBackend: Send + Sync {
    fn open(&self, stream: &StreamConfig) -> EngineResult<AudioGraph>;
}

/// Mix bus plus the driver rendering it
pub struct AudioGraph {
    bus: Arc<MixBus>,
    driver: Box<dyn OutputDriver>,
}

impl AudioGraph {
    pub fn new(bus: Arc<MixBus>, driver: Box<dyn OutputDriver>) -> Self {
        Self { bus, driver }
    }

    pub fn bus(&self) -> &Arc<MixBus> {
        &self.bus
    }

    pub fn state(&self) -> GraphState {
        if self.driver.is_running() {
            GraphState::Running
        } else {
            GraphState::Suspended
        }
    }

    /// Resume if suspended; returns once audio is flowing
    pub fn resume(&mut self) -> EngineResult<()> {
        if self.driver.is_running() {
            return Ok(());
        }
        debug!("Resuming {} output", self.driver.name());
        self.driver.resume()
    }

    pub fn suspend(&mut self) -> EngineResult<()> {
        self.driver.suspend()
    }

    pub fn driver_name(&self) -> &'static str {
        self.driver.name()
    }
}

/// Silent driver for headless hosts and tests
#[derive(Default)]
pub struct NullOutput {
    running: bool,
}

impl OutputDriver for NullOutput {
    fn name(&self) -> &'static str {
        "null"
    }

    fn resume(&mut self) -> EngineResult<()> {
        self.running = true;
        Ok(())
    }

    fn suspend(&mut self) -> EngineResult<()> {
        self.running = false;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

/// Opens [`NullOutput`] graphs at the configured stream format
#[derive(Default)]
pub struct NullBackend {
    opened: AtomicUsize,
}

impl NullBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many graphs this backend has opened
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::Relaxed)
    }
}

impl OutputBackend for NullBackend {
    fn open(&self, stream: &StreamConfig) -> EngineResult<AudioGraph> {
        stream.validate().map_err(EngineError::ConfigError)?;
        self.opened.fetch_add(1, Ordering::Relaxed);

        let bus = Arc::new(MixBus::new(stream.sample_rate, stream.channels));
        Ok(AudioGraph::new(bus, Box::new(NullOutput::default())))
    }
}

/// Default output device through cpal
pub struct CpalOutput {
    stream: Stream,
    running: bool,
}

impl OutputDriver for CpalOutput {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn resume(&mut self) -> EngineResult<()> {
        self.stream
            .play()
            .map_err(|e| EngineError::Output(format!("Failed to play output stream: {}", e)))?;
        self.running = true;
        Ok(())
    }

    fn suspend(&mut self) -> EngineResult<()> {
        self.stream
            .pause()
            .map_err(|e| EngineError::Output(format!("Failed to pause output stream: {}", e)))?;
        self.running = false;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

/// Opens graphs on the system's default output device
#[derive(Default)]
pub struct CpalBackend;

impl CpalBackend {
    fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
        device: &Device,
        config: &CpalStreamConfig,
        bus: Arc<MixBus>,
        scratch_len: usize,
    ) -> EngineResult<Stream> {
        let err_fn = |err| error!("Audio output error: {}", err);

        // Pre-sized so the callback only allocates if the device asks for
        // more than the configured buffer
        let mut scratch = vec![0.0f32; scratch_len];

        let data_callback = move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            if scratch.len() < data.len() {
                scratch.resize(data.len(), 0.0);
            }
            let rendered = &mut scratch[..data.len()];
            bus.render(rendered);

            for (out, sample) in data.iter_mut().zip(rendered.iter()) {
                *out = T::from_sample(*sample);
            }
        };

        device
            .build_output_stream(config, data_callback, err_fn, None)
            .map_err(|e| EngineError::Output(format!("Failed to build output stream: {}", e)))
    }
}

impl OutputBackend for CpalBackend {
    fn open(&self, stream: &StreamConfig) -> EngineResult<AudioGraph> {
        stream.validate().map_err(EngineError::ConfigError)?;

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| EngineError::Output("No default output device found".into()))?;

        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let supported = device
            .default_output_config()
            .map_err(|e| EngineError::Output(format!("Failed to get output config: {}", e)))?;
        let sample_format = supported.sample_format();
        let config: CpalStreamConfig = supported.into();

        info!(
            "Opening output on {}: {} Hz, {} channels, {:?}",
            device_name, config.sample_rate.0, config.channels, sample_format
        );

        let bus = Arc::new(MixBus::new(config.sample_rate.0, config.channels));
        let scratch_len = stream.buffer_size as usize * config.channels as usize * 4;

        let cpal_stream = match sample_format {
            SampleFormat::F32 => {
                Self::build_stream::<f32>(&device, &config, Arc::clone(&bus), scratch_len)?
            }
            SampleFormat::I16 => {
                Self::build_stream::<i16>(&device, &config, Arc::clone(&bus), scratch_len)?
            }
            SampleFormat::U16 => {
                Self::build_stream::<u16>(&device, &config, Arc::clone(&bus), scratch_len)?
            }
            other => {
                return Err(EngineError::Output(format!(
                    "Unsupported sample format: {:?}",
                    other
                )))
            }
        };

        // Some hosts start streams on build; normalise to suspended
        let _ = cpal_stream.pause();

        let driver = CpalOutput {
            stream: cpal_stream,
            running: false,
        };
        Ok(AudioGraph::new(bus, Box::new(driver)))
    }
}
