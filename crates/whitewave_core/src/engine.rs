//! Audio Engine - The Mixer
//!
//! Owns the audio graph, the decoded-buffer cache and the active set. One
//! engine lives inside each player host and is only ever touched from the
//! host thread, so every operation takes `&mut self`: that is the
//! single-writer discipline keeping the active set and cache consistent.
//!
//! # Per-sound lifecycle
//!
//! ```text
//!  Idle ──play──▶ Loading (fetch + decode, cached) ──start──▶ Playing
//!   ▲                                                           │
//!   └──────────────────────── stop / stop_all / apply_mix ──────┘
//! ```
//!
//! A stop for a sound whose play is still decoding is queued behind that
//! play on the host, so the play registers first and the stop then removes
//! it. Loads are never cancelled.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use whitewave_dsp::{AudioBuffer, GainCell, MixBus, VoiceId};

use crate::asset::AssetSource;
use crate::config::EngineConfig;
use crate::decode;
use crate::error::EngineResult;
use crate::message::{Command, MixState, RawCommand, Reply, SoundId, StateSnapshot};
use crate::output::{AudioGraph, GraphState, OutputBackend};

/// One looping sound that is currently attached to the bus
struct PlaybackEntry {
    sound_id: SoundId,
    /// Clamped level as requested; the gain cell holds the render copy
    volume: f64,
    gain: Arc<GainCell>,
    voice: VoiceId,
}

impl PlaybackEntry {
    fn set_volume(&mut self, volume: f64) {
        self.volume = volume;
        self.gain.set(volume as f32);
    }
}

/// NaN becomes silence; everything else is clamped to [0, 1]
fn clamp_volume(volume: f64) -> f64 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}

/// The ambient sound mixer
pub struct AudioEngine {
    config: EngineConfig,
    assets: Arc<dyn AssetSource>,
    output: Arc<dyn OutputBackend>,

    /// Built lazily, once per engine
    graph: Option<AudioGraph>,

    /// Write-once decoded buffers
    buffers: HashMap<SoundId, AudioBuffer>,

    /// In start order; one entry per SoundId
    active: Vec<PlaybackEntry>,
}

impl AudioEngine {
    pub fn new(
        config: EngineConfig,
        assets: Arc<dyn AssetSource>,
        output: Arc<dyn OutputBackend>,
    ) -> Self {
        Self {
            config,
            assets,
            output,
            graph: None,
            buffers: HashMap::new(),
            active: Vec::new(),
        }
    }

    pub fn graph_state(&self) -> GraphState {
        self.graph
            .as_ref()
            .map_or(GraphState::Uninitialized, AudioGraph::state)
    }

    pub fn bus(&self) -> Option<&Arc<MixBus>> {
        self.graph.as_ref().map(AudioGraph::bus)
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_empty()
    }

    pub fn is_cached(&self, sound_id: &str) -> bool {
        self.buffers.contains_key(sound_id)
    }

    fn entry_mut(&mut self, sound_id: &str) -> Option<&mut PlaybackEntry> {
        self.active.iter_mut().find(|entry| entry.sound_id == sound_id)
    }

    /// Build the graph and master gain if this is the first use
    fn ensure_graph(&mut self) -> EngineResult<&mut AudioGraph> {
        let graph = match self.graph.take() {
            Some(graph) => graph,
            None => {
                let graph = self.output.open(&self.config.stream)?;
                graph.bus().clipper().set_enabled(self.config.soft_clip);
                info!(
                    "Audio graph created ({} output, {} Hz)",
                    graph.driver_name(),
                    graph.bus().sample_rate()
                );
                graph
            }
        };
        Ok(self.graph.insert(graph))
    }

    /// Build the graph if needed and resume it if suspended
    pub fn ensure_running(&mut self) -> EngineResult<()> {
        self.ensure_graph()?.resume()
    }

    /// Cached buffer, or fetch + decode + cache
    ///
    /// A failed fetch or decode leaves the cache untouched.
    pub fn load_buffer(&mut self, sound_id: &str) -> EngineResult<AudioBuffer> {
        if let Some(buffer) = self.buffers.get(sound_id) {
            return Ok(buffer.clone());
        }

        let bytes = self.assets.fetch(sound_id)?;
        let buffer = decode::decode(sound_id, bytes, self.assets.format_hint())?;

        debug!(
            "Cached {} ({:.1}s)",
            sound_id,
            buffer.duration_secs()
        );
        self.buffers.insert(sound_id.to_string(), buffer.clone());
        Ok(buffer)
    }

    /// Start looping a sound, or only update its volume if already playing
    ///
    /// The entry is registered only after the voice is attached; any
    /// failure before that leaves the active set as it was.
    pub fn play_sound(&mut self, sound_id: &str, volume: Option<f64>) -> EngineResult<()> {
        let volume = clamp_volume(volume.unwrap_or(self.config.default_volume));

        if let Some(entry) = self.entry_mut(sound_id) {
            debug!("{} already playing, volume -> {}", sound_id, volume);
            entry.set_volume(volume);
            return Ok(());
        }

        self.ensure_running()?;
        let buffer = self.load_buffer(sound_id)?;
        let bus = Arc::clone(self.ensure_graph()?.bus());

        let gain = Arc::new(GainCell::new(volume as f32));
        let voice = bus.add_voice(buffer, Arc::clone(&gain));
        self.active.push(PlaybackEntry {
            sound_id: sound_id.to_string(),
            volume,
            gain,
            voice,
        });

        info!("Playing {} at {}", sound_id, volume);
        Ok(())
    }

    /// Stop and release one sound; returns false if it was not playing
    pub fn stop_sound(&mut self, sound_id: &str) -> bool {
        let Some(index) = self.active.iter().position(|entry| entry.sound_id == sound_id) else {
            return false;
        };
        let entry = self.active.remove(index);
        if let Some(graph) = &self.graph {
            graph.bus().remove_voice(entry.voice);
        }
        info!("Stopped {}", sound_id);
        true
    }

    pub fn stop_all(&mut self) {
        let ids: Vec<SoundId> = self.active.iter().map(|entry| entry.sound_id.clone()).collect();
        for sound_id in ids {
            self.stop_sound(&sound_id);
        }
    }

    /// Replace everything that is playing with the active entries of `mix`
    ///
    /// Two ordered stages: stop everything, then start each active channel
    /// in mix order (each start waits for its decode). On success the active
    /// set is exactly the mix's active ids. A failure stops the pipeline
    /// and is returned; sounds started before it keep playing.
    pub fn apply_mix(&mut self, mix: &MixState) -> EngineResult<()> {
        self.stop_all();
        self.ensure_running()?;

        for (sound_id, volume) in mix.active_channels() {
            self.play_sound(sound_id, volume)?;
        }

        debug_assert!(self
            .active
            .iter()
            .map(|entry| &entry.sound_id)
            .eq(mix.active_channels().map(|(sound_id, _)| sound_id)));
        Ok(())
    }

    /// Clamp and apply a channel volume; returns false if not playing
    pub fn set_volume(&mut self, sound_id: &str, volume: f64) -> bool {
        match self.entry_mut(sound_id) {
            Some(entry) => {
                entry.set_volume(clamp_volume(volume));
                true
            }
            None => false,
        }
    }

    /// Master mute; channel volumes are left exactly as they were
    pub fn set_muted(&mut self, muted: bool) -> EngineResult<()> {
        let graph = self.ensure_graph()?;
        graph.bus().set_master_gain(if muted { 0.0 } else { 1.0 });
        info!("Master {}", if muted { "muted" } else { "unmuted" });
        Ok(())
    }

    pub fn get_state(&self) -> StateSnapshot {
        StateSnapshot {
            ok: true,
            active_sound_ids: self
                .active
                .iter()
                .map(|entry| entry.sound_id.clone())
                .collect(),
            volumes: self
                .active
                .iter()
                .map(|entry| (entry.sound_id.clone(), entry.volume))
                .collect(),
            muted: self
                .bus()
                .map_or(false, |bus| bus.master_gain() == 0.0),
        }
    }

    /// Bring the active set, volumes and mute back to an earlier snapshot
    ///
    /// Used when a command ran but its caller never saw the reply. Buffers
    /// that were needed are still cached, so restarting a stopped sound
    /// does not refetch it.
    pub fn restore(&mut self, target: &StateSnapshot) {
        let stale: Vec<SoundId> = self
            .active
            .iter()
            .filter(|entry| !target.volumes.contains_key(&entry.sound_id))
            .map(|entry| entry.sound_id.clone())
            .collect();
        for sound_id in stale {
            self.stop_sound(&sound_id);
        }

        for sound_id in &target.active_sound_ids {
            let volume = target.volumes.get(sound_id).copied();
            if let Err(e) = self.play_sound(sound_id, volume) {
                warn!("Could not restore {}: {}", sound_id, e);
            }
        }
        self.active.sort_by_key(|entry| {
            target
                .active_sound_ids
                .iter()
                .position(|sound_id| *sound_id == entry.sound_id)
        });

        if self.bus().map_or(false, |bus| (bus.master_gain() == 0.0) != target.muted) {
            if let Err(e) = self.set_muted(target.muted) {
                warn!("Could not restore mute: {}", e);
            }
        }
    }

    /// Execute one command; errors become failure replies
    pub fn handle(&mut self, command: Command) -> Reply {
        let kind = command.kind();
        debug!("Handling {}", kind);

        let result = match command {
            Command::Init => self.ensure_running().map(|_| Reply::ack()),
            Command::PlaySound { sound_id, volume } => self
                .play_sound(&sound_id, volume)
                .map(|_| Reply::from(self.get_state())),
            Command::ApplyMix { mix_state } => {
                self.apply_mix(&mix_state).map(|_| Reply::from(self.get_state()))
            }
            Command::StopSound { sound_id } => {
                self.stop_sound(&sound_id);
                Ok(Reply::from(self.get_state()))
            }
            Command::StopAll => {
                self.stop_all();
                Ok(Reply::from(self.get_state()))
            }
            Command::SetVolume { sound_id, volume } => {
                self.set_volume(&sound_id, volume);
                Ok(Reply::from(self.get_state()))
            }
            Command::SetMuted { muted } => {
                self.set_muted(muted).map(|_| Reply::from(self.get_state()))
            }
            Command::GetState => Ok(Reply::from(self.get_state())),
        };

        if let Some(bus) = self.bus() {
            debug_assert_eq!(bus.voice_count(), self.active.len());
        }

        result.unwrap_or_else(|e| {
            error!("{} failed: {}", kind, e);
            Reply::failure(e)
        })
    }

    /// Parse and execute a raw command from the wire
    pub fn dispatch(&mut self, raw: &RawCommand) -> Reply {
        match Command::parse(raw) {
            Ok(command) => self.handle(command),
            Err(e) => {
                error!("Rejected command: {}", e);
                Reply::failure(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::MemoryAssets;
    use crate::decode::tests::wav_bytes;
    use crate::output::NullBackend;
    use serde_json::json;

    struct Fixture {
        engine: AudioEngine,
        assets: Arc<MemoryAssets>,
        output: Arc<NullBackend>,
    }

    fn fixture() -> Fixture {
        let assets = Arc::new(MemoryAssets::with_hint("wav"));
        for id in ["rain", "waves", "fire"] {
            assets.insert(id, wav_bytes(2400, 2, 48000));
        }
        let output = Arc::new(NullBackend::new());
        let engine = AudioEngine::new(
            EngineConfig::default(),
            Arc::clone(&assets) as Arc<dyn AssetSource>,
            Arc::clone(&output) as Arc<dyn OutputBackend>,
        );
        Fixture {
            engine,
            assets,
            output,
        }
    }

    #[test]
    fn test_fresh_state() {
        let f = fixture();
        let state = f.engine.get_state();
        assert!(state.ok);
        assert!(state.active_sound_ids.is_empty());
        assert!(state.volumes.is_empty());
        assert!(!state.muted);
        assert_eq!(f.engine.graph_state(), GraphState::Uninitialized);
    }

    #[test]
    fn test_play_builds_and_resumes_graph_once() {
        let mut f = fixture();
        f.engine.play_sound("rain", Some(0.3)).unwrap();
        f.engine.play_sound("waves", Some(0.6)).unwrap();

        assert_eq!(f.engine.graph_state(), GraphState::Running);
        assert_eq!(f.output.opened(), 1);
        assert_eq!(f.engine.bus().unwrap().voice_count(), 2);
    }

    #[test]
    fn test_replay_is_volume_update_only() {
        let mut f = fixture();
        f.engine.play_sound("rain", Some(0.3)).unwrap();
        f.engine.play_sound("rain", Some(0.9)).unwrap();

        let state = f.engine.get_state();
        assert_eq!(state.active_sound_ids, vec!["rain".to_string()]);
        assert_eq!(state.volumes["rain"], 0.9);
        assert_eq!(f.engine.bus().unwrap().voice_count(), 1);
    }

    #[test]
    fn test_default_and_clamped_play_volume() {
        let mut f = fixture();
        f.engine.play_sound("rain", None).unwrap();
        f.engine.play_sound("waves", Some(3.0)).unwrap();

        let state = f.engine.get_state();
        assert_eq!(state.volumes["rain"], 0.5);
        assert_eq!(state.volumes["waves"], 1.0);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut f = fixture();
        let before = f.engine.get_state();

        assert!(!f.engine.stop_sound("fire"));
        let first = f.engine.get_state();
        assert!(!f.engine.stop_sound("fire"));
        let second = f.engine.get_state();

        assert_eq!(before, first);
        assert_eq!(first, second);
    }

    #[test]
    fn test_stop_releases_voice() {
        let mut f = fixture();
        f.engine.play_sound("rain", Some(0.5)).unwrap();
        assert!(f.engine.stop_sound("rain"));

        assert!(f.engine.is_idle());
        assert_eq!(f.engine.bus().unwrap().voice_count(), 0);
    }

    #[test]
    fn test_buffer_fetched_once() {
        let mut f = fixture();
        f.engine.play_sound("rain", Some(0.5)).unwrap();
        f.engine.stop_sound("rain");
        f.engine.play_sound("rain", Some(0.5)).unwrap();

        assert_eq!(f.assets.fetch_count(), 1);
        assert!(f.engine.is_cached("rain"));
    }

    #[test]
    fn test_failed_play_leaves_state_untouched() {
        let mut f = fixture();
        f.engine.play_sound("rain", Some(0.5)).unwrap();
        let before = f.engine.get_state();

        let err = f.engine.play_sound("thunderstorm", Some(0.5)).unwrap_err();
        assert!(err.to_string().contains("thunderstorm"));
        assert_eq!(f.engine.get_state(), before);
        assert!(!f.engine.is_cached("thunderstorm"));
        assert_eq!(f.engine.bus().unwrap().voice_count(), 1);

        // Nothing poisoned: once the asset exists the same id plays
        f.assets.insert("thunderstorm", wav_bytes(1200, 1, 44100));
        f.engine.play_sound("thunderstorm", Some(0.5)).unwrap();
        assert!(f.engine.is_cached("thunderstorm"));
    }

    #[test]
    fn test_decode_failure_not_cached() {
        let mut f = fixture();
        f.assets.insert("keyboard", b"not audio".to_vec());

        assert!(f.engine.play_sound("keyboard", Some(0.5)).is_err());
        assert!(!f.engine.is_cached("keyboard"));
        assert!(f.engine.is_idle());
    }

    #[test]
    fn test_mute_is_independent_of_channel_volume() {
        let mut f = fixture();
        f.engine.play_sound("rain", Some(0.4)).unwrap();

        f.engine.set_muted(true).unwrap();
        let state = f.engine.get_state();
        assert!(state.muted);
        assert_eq!(state.volumes["rain"], 0.4);

        let bus = Arc::clone(f.engine.bus().unwrap());
        let mut out = vec![1.0; 256];
        bus.render(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));

        f.engine.set_muted(false).unwrap();
        let state = f.engine.get_state();
        assert!(!state.muted);
        assert_eq!(state.volumes["rain"], 0.4);
        bus.render(&mut out);
        assert!(out.iter().any(|s| *s != 0.0));
    }

    #[test]
    fn test_mute_before_playback_builds_suspended_graph() {
        let mut f = fixture();
        f.engine.set_muted(true).unwrap();

        assert_eq!(f.engine.graph_state(), GraphState::Suspended);
        assert!(f.engine.get_state().muted);
    }

    #[test]
    fn test_apply_mix_replaces_active_set() {
        let mut f = fixture();
        f.engine.play_sound("waves", Some(0.7)).unwrap();

        let mix = MixState::new()
            .with("rain", 0.5, true)
            .with("waves", 0.7, false);
        f.engine.apply_mix(&mix).unwrap();

        let state = f.engine.get_state();
        assert_eq!(state.active_sound_ids, vec!["rain".to_string()]);
        assert_eq!(state.volumes["rain"], 0.5);
        assert_eq!(f.engine.bus().unwrap().voice_count(), 1);
    }

    #[test]
    fn test_apply_empty_mix_silences_everything() {
        let mut f = fixture();
        f.engine.play_sound("rain", Some(0.5)).unwrap();
        f.engine.play_sound("fire", Some(0.5)).unwrap();

        f.engine.apply_mix(&MixState::new()).unwrap();
        assert!(f.engine.is_idle());
    }

    #[test]
    fn test_apply_mix_stops_at_first_failure() {
        let mut f = fixture();
        let mix = MixState::new()
            .with("fire", 0.2, true)
            .with("lofi", 0.2, true)
            .with("rain", 0.2, true);

        assert!(f.engine.apply_mix(&mix).is_err());
        // "fire" comes before the missing "lofi", "rain" after it
        assert_eq!(
            f.engine.get_state().active_sound_ids,
            vec!["fire".to_string()]
        );
    }

    #[test]
    fn test_active_set_keeps_start_order() {
        let mut f = fixture();
        f.engine.play_sound("waves", Some(0.5)).unwrap();
        f.engine.play_sound("fire", Some(0.5)).unwrap();
        f.engine.play_sound("rain", Some(0.5)).unwrap();
        f.engine.stop_sound("fire");

        assert_eq!(
            f.engine.get_state().active_sound_ids,
            vec!["waves".to_string(), "rain".to_string()]
        );

        let mix = MixState::new()
            .with("rain", 0.2, true)
            .with("fire", 0.3, true)
            .with("waves", 0.4, true);
        f.engine.apply_mix(&mix).unwrap();
        assert_eq!(
            f.engine.get_state().active_sound_ids,
            vec!["rain".to_string(), "fire".to_string(), "waves".to_string()]
        );
    }

    #[test]
    fn test_muted_snapshot_wire_volumes() {
        let mut f = fixture();
        f.engine.play_sound("rain", Some(0.4)).unwrap();
        f.engine.set_muted(true).unwrap();

        let wire = serde_json::to_value(Reply::from(f.engine.get_state())).unwrap();
        assert_eq!(
            wire,
            json!({
                "ok": true,
                "activeSoundIds": ["rain"],
                "volumes": { "rain": 0.4 },
                "muted": true
            })
        );
    }

    #[test]
    fn test_restore_undoes_play_and_mix() {
        let mut f = fixture();
        f.engine.play_sound("waves", Some(0.7)).unwrap();
        f.engine.play_sound("rain", Some(0.3)).unwrap();
        let before = f.engine.get_state();

        f.engine.play_sound("fire", Some(0.5)).unwrap();
        f.engine.restore(&before);
        assert_eq!(f.engine.get_state(), before);

        let mix = MixState::new().with("fire", 0.9, true);
        f.engine.apply_mix(&mix).unwrap();
        f.engine.set_muted(true).unwrap();
        f.engine.restore(&before);

        assert_eq!(f.engine.get_state(), before);
        assert_eq!(f.engine.bus().unwrap().voice_count(), 2);
        // Restarting needed no new fetches
        assert_eq!(f.assets.fetch_count(), 3);
    }

    #[test]
    fn test_set_volume() {
        let mut f = fixture();
        assert!(!f.engine.set_volume("rain", 0.2));
        assert!(f.engine.is_idle());

        f.engine.play_sound("rain", Some(0.5)).unwrap();
        assert!(f.engine.set_volume("rain", 1.7));
        assert_eq!(f.engine.get_state().volumes["rain"], 1.0);

        assert!(f.engine.set_volume("rain", -0.5));
        assert_eq!(f.engine.get_state().volumes["rain"], 0.0);
    }

    #[test]
    fn test_dispatch_replies() {
        let mut f = fixture();

        let reply = f.engine.dispatch(&RawCommand::new("INIT", json!(null)));
        assert_eq!(reply, Reply::ack());
        assert_eq!(f.engine.graph_state(), GraphState::Running);

        let reply = f.engine.dispatch(&RawCommand::new(
            "PLAY_SOUND",
            json!({ "soundId": "rain", "volume": 0.3 }),
        ));
        let state = reply.state().unwrap();
        assert_eq!(state.active_sound_ids, vec!["rain".to_string()]);

        let reply = f.engine.dispatch(&RawCommand::new("FAST_FORWARD", json!({})));
        assert_eq!(reply.error(), Some("Unknown command: FAST_FORWARD"));
        assert_eq!(
            f.engine.get_state().active_sound_ids,
            vec!["rain".to_string()]
        );

        let reply = f.engine.dispatch(&RawCommand::new(
            "PLAY_SOUND",
            json!({ "soundId": "birds" }),
        ));
        assert!(!reply.is_ok());
        assert!(reply.error().unwrap().contains("birds"));
    }
}
