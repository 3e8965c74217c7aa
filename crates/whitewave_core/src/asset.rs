//! Sound Asset Retrieval
//!
//! Maps a SoundId to the raw bytes of its packaged loop. Packaging itself
//! happens elsewhere; the engine only asks for bytes.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// Source of encoded sound bytes
pub trait AssetSource: Send + Sync {
    /// Fetch the encoded bytes for `sound_id`
    fn fetch(&self, sound_id: &str) -> EngineResult<Vec<u8>>;

    /// File extension the decoder can use as a format hint
    fn format_hint(&self) -> Option<&str> {
        None
    }
}

/// Packaged loops stored as `<root>/<sound_id>.<extension>`
pub struct DirAssets {
    root: PathBuf,
    extension: String,
}

impl DirAssets {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve the fixed path for a sound; ids that could escape the root
    /// are rejected
    pub fn path_for(&self, sound_id: &str) -> EngineResult<PathBuf> {
        let escapes = sound_id.is_empty()
            || sound_id.contains(['/', '\\'])
            || sound_id.contains("..");
        if escapes {
            return Err(EngineError::AssetLoad {
                sound_id: sound_id.to_string(),
                reason: "invalid sound id".to_string(),
            });
        }
        Ok(self.root.join(format!("{}.{}", sound_id, self.extension)))
    }
}

impl AssetSource for DirAssets {
    fn fetch(&self, sound_id: &str) -> EngineResult<Vec<u8>> {
        let path = self.path_for(sound_id)?;
        debug!("Fetching {} from {:?}", sound_id, path);
        fs::read(&path).map_err(|e| EngineError::AssetLoad {
            sound_id: sound_id.to_string(),
            reason: format!("{}: {}", path.display(), e),
        })
    }

    fn format_hint(&self) -> Option<&str> {
        Some(&self.extension)
    }
}

/// In-memory assets, e.g. loops bundled with `include_bytes!`
#[derive(Default)]
pub struct MemoryAssets {
    assets: RwLock<HashMap<String, Vec<u8>>>,
    hint: Option<String>,
    fetches: AtomicUsize,
}

impl MemoryAssets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hint(hint: impl Into<String>) -> Self {
        Self {
            hint: Some(hint.into()),
            ..Self::default()
        }
    }

    pub fn insert(&self, sound_id: impl Into<String>, bytes: Vec<u8>) {
        self.assets.write().insert(sound_id.into(), bytes);
    }

    /// Number of fetches served so far, successful or not
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }
}

impl AssetSource for MemoryAssets {
    fn fetch(&self, sound_id: &str) -> EngineResult<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.assets
            .read()
            .get(sound_id)
            .cloned()
            .ok_or_else(|| EngineError::AssetLoad {
                sound_id: sound_id.to_string(),
                reason: "no such asset".to_string(),
            })
    }

    fn format_hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_path_mapping() {
        let assets = DirAssets::new("/opt/whitewave/sounds", "mp3");
        assert_eq!(
            assets.path_for("rain").unwrap(),
            PathBuf::from("/opt/whitewave/sounds/rain.mp3")
        );
    }

    #[test]
    fn test_rejects_escaping_ids() {
        let assets = DirAssets::new("sounds", "mp3");
        for id in ["", "../secret", "a/b", "a\\b", ".."] {
            assert!(
                matches!(assets.path_for(id), Err(EngineError::AssetLoad { .. })),
                "{:?} should be rejected",
                id
            );
        }
    }

    #[test]
    fn test_dir_fetch() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("waves.mp3"), b"bytes").unwrap();

        let assets = DirAssets::new(dir.path(), "mp3");
        assert_eq!(assets.fetch("waves").unwrap(), b"bytes".to_vec());
        assert_eq!(assets.format_hint(), Some("mp3"));

        let err = assets.fetch("thunderstorm").unwrap_err();
        assert!(err.to_string().contains("thunderstorm"));
    }

    #[test]
    fn test_memory_fetch_counts() {
        let assets = MemoryAssets::new();
        assets.insert("fire", vec![1, 2, 3]);

        assert_eq!(assets.fetch("fire").unwrap(), vec![1, 2, 3]);
        assert!(assets.fetch("lofi").is_err());
        assert_eq!(assets.fetch_count(), 2);
    }
}
