//! Master Mix Bus
//!
//! Owns every playing voice and the master gain node. The control thread
//! attaches and detaches voices; the audio callback calls [`MixBus::render`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::AudioBuffer;
use crate::gain::GainCell;
use crate::soft_clip::SoftClipper;
use crate::voice::LoopVoice;

/// Handle to a voice attached to a bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceId(u64);

/// Sums looping voices, then applies master gain and soft clipping
pub struct MixBus {
    voices: Mutex<Vec<(VoiceId, LoopVoice)>>,
    master: GainCell,
    clipper: SoftClipper,
    sample_rate: u32,
    channels: u16,
    next_id: AtomicU64,
}

impl MixBus {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            voices: Mutex::new(Vec::new()),
            master: GainCell::new(1.0),
            clipper: SoftClipper::default(),
            sample_rate,
            channels,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Start looping `buffer` through `gain`
    ///
    /// Note: This allocates. Only call from the control thread.
    pub fn add_voice(&self, buffer: AudioBuffer, gain: Arc<GainCell>) -> VoiceId {
        let id = VoiceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let voice = LoopVoice::new(buffer, gain, self.sample_rate);
        self.voices.lock().push((id, voice));
        id
    }

    /// Detach a voice; returns false if it was not attached
    pub fn remove_voice(&self, id: VoiceId) -> bool {
        let mut voices = self.voices.lock();
        match voices.iter().position(|(voice_id, _)| *voice_id == id) {
            Some(pos) => {
                voices.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn voice_count(&self) -> usize {
        self.voices.lock().len()
    }

    pub fn set_master_gain(&self, gain: f32) {
        self.master.set(gain);
    }

    pub fn master_gain(&self) -> f32 {
        self.master.get()
    }

    pub fn clipper(&self) -> &SoftClipper {
        &self.clipper
    }

    /// Render one interleaved output buffer
    ///
    /// # Real-time Safety
    /// Uses `try_lock` on the voice list; if the control thread holds it,
    /// this callback outputs silence instead of blocking.
    pub fn render(&self, output: &mut [f32]) {
        output.fill(0.0);

        let Some(mut voices) = self.voices.try_lock() else {
            return;
        };
        if voices.is_empty() {
            return;
        }

        let channels = self.channels as usize;
        for (_, voice) in voices.iter_mut() {
            voice.render_add(output, channels);
        }
        drop(voices);

        let master = self.master.get();
        if (master - 1.0).abs() > f32::EPSILON {
            for sample in output.iter_mut() {
                *sample *= master;
            }
        }

        self.clipper.process_interleaved(output);
    }
}
