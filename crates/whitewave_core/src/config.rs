//! Engine and Stream Configuration
//!
//! Stored as JSON in the platform config directory:
//! - Linux: `~/.config/whitewave/config.json`
//! - Windows: `%APPDATA%\whitewave\config\config.json`
//! - macOS: `~/Library/Application Support/com.whitewave.whitewave/config.json`

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Preferred output stream configuration
///
/// The cpal backend follows the device's own default config; these values
/// drive the null backend and are validated either way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Sample rate in Hz (e.g., 44100, 48000, 96000)
    pub sample_rate: u32,

    /// Number of audio channels (1 = mono, 2 = stereo)
    pub channels: u16,

    /// Buffer size in frames
    pub buffer_size: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            buffer_size: 512,
        }
    }
}

impl StreamConfig {
    /// Calculate latency in milliseconds for this configuration
    pub fn latency_ms(&self) -> f32 {
        (self.buffer_size as f32 / self.sample_rate as f32) * 1000.0
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate < 8000 || self.sample_rate > 192000 {
            return Err(format!("Invalid sample rate: {}", self.sample_rate));
        }
        if self.channels == 0 || self.channels > 8 {
            return Err(format!("Invalid channel count: {}", self.channels));
        }
        if self.buffer_size < 32 || self.buffer_size > 8192 {
            return Err(format!("Invalid buffer size: {}", self.buffer_size));
        }
        Ok(())
    }
}

/// Overall engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub stream: StreamConfig,

    /// Directory holding the packaged sound loops
    pub sounds_dir: PathBuf,

    /// File extension of packaged loops (`<sounds_dir>/<id>.<ext>`)
    pub asset_extension: String,

    /// Channel volume used when a play request carries none
    pub default_volume: f64,

    /// How long a caller waits for the player host to answer
    pub reply_timeout_ms: u64,

    /// Soft clip the summed bus
    pub soft_clip: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stream: StreamConfig::default(),
            sounds_dir: PathBuf::from("sounds"),
            asset_extension: "mp3".to_string(),
            default_volume: 0.5,
            reply_timeout_ms: 5000,
            soft_clip: true,
        }
    }
}

impl EngineConfig {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        self.stream.validate()?;
        if !(0.0..=1.0).contains(&self.default_volume) {
            return Err(format!("Invalid default volume: {}", self.default_volume));
        }
        if self.reply_timeout_ms == 0 {
            return Err("Reply timeout must be positive".to_string());
        }
        Ok(())
    }

    /// Load config from the platform config directory, or defaults if
    /// missing/corrupt
    pub fn load() -> Self {
        match Self::get_config_path() {
            Some(path) if path.exists() => Self::load_from(&path).unwrap_or_else(|e| {
                error!("{}", e);
                info!("Using default config");
                Self::default()
            }),
            _ => {
                info!("Using default config");
                Self::default()
            }
        }
    }

    /// Load and validate config from an explicit file
    pub fn load_from(path: &Path) -> Result<Self, String> {
        let file = fs::File::open(path)
            .map_err(|e| format!("Failed to open config file {:?}: {}", path, e))?;
        let config: Self = serde_json::from_reader(file)
            .map_err(|e| format!("Failed to parse config file {:?}: {}", path, e))?;
        config.validate()?;

        info!("Config loaded from {:?}", path);
        Ok(config)
    }

    /// Save config to the platform config directory
    pub fn save(&self) -> Result<(), String> {
        let path = Self::get_config_path().ok_or("Could not determine config path")?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }

        let file = fs::File::create(path).map_err(|e| e.to_string())?;
        serde_json::to_writer_pretty(file, self).map_err(|e| e.to_string())?;

        info!("Config saved to {:?}", path);
        Ok(())
    }

    fn get_config_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "whitewave", "whitewave")
            .map(|proj| proj.config_dir().join("config.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.stream.sample_rate, 48000);
        assert_eq!(config.stream.channels, 2);
        assert_eq!(config.default_volume, 0.5);
        assert_eq!(config.asset_extension, "mp3");
        assert_eq!(config.reply_timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_latency_calculation() {
        let config = StreamConfig {
            sample_rate: 48000,
            channels: 2,
            buffer_size: 480, // Exactly 10ms at 48kHz
        };
        assert!((config.latency_ms() - 10.0).abs() < 0.01);
    }

    #[test]
    fn test_validation() {
        let invalid_rate = StreamConfig {
            sample_rate: 100,
            ..Default::default()
        };
        assert!(invalid_rate.validate().is_err());

        let invalid_channels = StreamConfig {
            channels: 0,
            ..Default::default()
        };
        assert!(invalid_channels.validate().is_err());

        let loud_default = EngineConfig {
            default_volume: 1.5,
            ..Default::default()
        };
        assert!(loud_default.validate().is_err());

        let no_timeout = EngineConfig {
            reply_timeout_ms: 0,
            ..Default::default()
        };
        assert!(no_timeout.validate().is_err());
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "sounds_dir": "/opt/whitewave/sounds" }"#).unwrap();

        assert_eq!(config.sounds_dir, PathBuf::from("/opt/whitewave/sounds"));
        assert_eq!(config.default_volume, 0.5);
        assert_eq!(config.stream.buffer_size, 512);
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = EngineConfig {
            default_volume: 0.3,
            reply_timeout_ms: 250,
            ..Default::default()
        };
        config.save_to(&path).unwrap();

        let loaded = EngineConfig::load_from(&path).unwrap();
        assert_eq!(loaded.default_volume, 0.3);
        assert_eq!(loaded.reply_timeout_ms, 250);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "default_volume": 7.0 }"#).unwrap();

        assert!(EngineConfig::load_from(&path).is_err());
    }
}
