//! Message Types
//!
//! Envelopes arrive from client adapters and are addressed to the router.
//! `PLAYER_COMMAND` envelopes carry an inner [`RawCommand`] that travels to
//! the player host unchanged and is only parsed into a [`Command`] there.
//! Every command answers with exactly one [`Reply`].

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{DeserializeOwned, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{EngineError, EngineResult};

/// Opaque name of a loopable sound asset
pub type SoundId = String;

/// Who an envelope is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Router,
    Engine,
}

/// Outer message shape shared by every client adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub target: Target,

    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn router(kind: impl Into<String>, data: Value) -> Self {
        Self {
            target: Target::Router,
            kind: kind.into(),
            data,
        }
    }

    /// `PLAYER_COMMAND` envelope wrapping an engine command
    pub fn player_command(command: RawCommand) -> Self {
        Self::router(
            "PLAYER_COMMAND",
            serde_json::to_value(command).unwrap_or(Value::Null),
        )
    }
}

/// An engine command before parsing: type name plus untyped payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCommand {
    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default)]
    pub data: Value,
}

impl RawCommand {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Stop-class commands are followed by an idle check on the host
    pub fn is_stop(&self) -> bool {
        matches!(self.kind.as_str(), "STOP_ALL" | "STOP_SOUND")
    }
}

/// Desired level and on/off state of one channel inside a mix
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelMix {
    #[serde(default)]
    pub volume: Option<f64>,

    #[serde(default)]
    pub active: bool,
}

/// Externally owned snapshot of a desired mix
///
/// The engine never stores it; `APPLY_MIX` turns it into an active set.
/// Entries keep the order they arrived in and are applied in that order.
/// A `null` entry counts as inactive; a repeated SoundId replaces the
/// earlier entry in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MixState(Vec<(SoundId, Option<ChannelMix>)>);

impl MixState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sound_id: impl Into<SoundId>, volume: f64, active: bool) -> Self {
        self.insert(
            sound_id.into(),
            Some(ChannelMix {
                volume: Some(volume),
                active,
            }),
        );
        self
    }

    fn insert(&mut self, sound_id: SoundId, channel: Option<ChannelMix>) {
        match self.0.iter_mut().find(|(id, _)| *id == sound_id) {
            Some(entry) => entry.1 = channel,
            None => self.0.push((sound_id, channel)),
        }
    }

    /// Active channels in processing order
    pub fn active_channels(&self) -> impl Iterator<Item = (&SoundId, Option<f64>)> {
        self.0.iter().filter_map(|(id, channel)| match channel {
            Some(channel) if channel.active => Some((id, channel.volume)),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for MixState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (sound_id, channel) in &self.0 {
            map.serialize_entry(sound_id, channel)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for MixState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MixVisitor;

        impl<'de> Visitor<'de> for MixVisitor {
            type Value = MixState;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of sound ids to channel settings")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<MixState, A::Error> {
                let mut mix = MixState::new();
                while let Some((sound_id, channel)) =
                    access.next_entry::<SoundId, Option<ChannelMix>>()?
                {
                    mix.insert(sound_id, channel);
                }
                Ok(mix)
            }
        }

        deserializer.deserialize_map(MixVisitor)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SoundData {
    sound_id: SoundId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayData {
    sound_id: SoundId,
    #[serde(default)]
    volume: Option<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VolumeData {
    sound_id: SoundId,
    volume: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MixData {
    #[serde(default)]
    mix_state: MixState,
}

#[derive(Deserialize)]
struct MutedData {
    #[serde(default)]
    muted: bool,
}

/// Parsed engine command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Build and resume the audio graph
    Init,

    /// Start a loop, or only update its volume if already playing
    PlaySound { sound_id: SoundId, volume: Option<f64> },

    /// Replace whatever is playing with the active entries of a mix
    ApplyMix { mix_state: MixState },

    StopSound { sound_id: SoundId },

    StopAll,

    SetVolume { sound_id: SoundId, volume: f64 },

    /// Master mute, independent of channel volumes
    SetMuted { muted: bool },

    GetState,
}

impl Command {
    /// Parse a raw command; unknown types and malformed payloads are errors
    pub fn parse(raw: &RawCommand) -> EngineResult<Self> {
        let command = match raw.kind.as_str() {
            "INIT" => Command::Init,
            "PLAY_SOUND" => {
                let data: PlayData = payload(raw)?;
                Command::PlaySound {
                    sound_id: data.sound_id,
                    volume: data.volume,
                }
            }
            "APPLY_MIX" => {
                let data: MixData = payload(raw)?;
                Command::ApplyMix {
                    mix_state: data.mix_state,
                }
            }
            "STOP_SOUND" => {
                let data: SoundData = payload(raw)?;
                Command::StopSound {
                    sound_id: data.sound_id,
                }
            }
            "STOP_ALL" => Command::StopAll,
            "SET_VOLUME" => {
                let data: VolumeData = payload(raw)?;
                Command::SetVolume {
                    sound_id: data.sound_id,
                    volume: data.volume,
                }
            }
            "SET_MUTED" => {
                let data: MutedData = payload(raw)?;
                Command::SetMuted { muted: data.muted }
            }
            "GET_STATE" => Command::GetState,
            other => return Err(EngineError::UnknownCommand(other.to_string())),
        };
        Ok(command)
    }

    /// Wire name of this command
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Init => "INIT",
            Command::PlaySound { .. } => "PLAY_SOUND",
            Command::ApplyMix { .. } => "APPLY_MIX",
            Command::StopSound { .. } => "STOP_SOUND",
            Command::StopAll => "STOP_ALL",
            Command::SetVolume { .. } => "SET_VOLUME",
            Command::SetMuted { .. } => "SET_MUTED",
            Command::GetState => "GET_STATE",
        }
    }
}

/// Missing payloads parse like `{}` so optional fields fall back to defaults
fn payload<T: DeserializeOwned>(raw: &RawCommand) -> EngineResult<T> {
    let data = match &raw.data {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(data).map_err(|e| EngineError::InvalidPayload {
        kind: raw.kind.clone(),
        reason: e.to_string(),
    })
}

/// What is audible right now
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub ok: bool,
    pub active_sound_ids: Vec<SoundId>,
    pub volumes: BTreeMap<SoundId, f64>,
    pub muted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub ok: bool,
    pub error: String,
}

/// The single answer to any command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    State(StateSnapshot),
    Failure(Failure),
    Ack(Ack),
}

impl Reply {
    pub fn ack() -> Self {
        Reply::Ack(Ack { ok: true })
    }

    pub fn failure<E: fmt::Display>(err: E) -> Self {
        Reply::Failure(Failure {
            ok: false,
            error: err.to_string(),
        })
    }

    pub fn is_ok(&self) -> bool {
        match self {
            Reply::State(state) => state.ok,
            Reply::Failure(failure) => failure.ok,
            Reply::Ack(ack) => ack.ok,
        }
    }

    pub fn state(&self) -> Option<&StateSnapshot> {
        match self {
            Reply::State(state) => Some(state),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Reply::Failure(failure) => Some(&failure.error),
            _ => None,
        }
    }
}

impl From<StateSnapshot> for Reply {
    fn from(state: StateSnapshot) -> Self {
        Reply::State(state)
    }
}
