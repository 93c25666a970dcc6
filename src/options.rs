//! Mount-time options.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::id::FileId;

/// Options fixed at mount time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct MountOptions {
    /// Reject every mutating operation with `EROFS`.
    pub read_only: bool,

    /// How many released inodes of each kind stay cached before the oldest
    /// is evicted.
    pub idle_capacity_per_kind: usize,

    /// Id of the root directory inode.
    pub root_id: FileId,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            idle_capacity_per_kind: 8,
            root_id: FileId::ROOT,
        }
    }
}

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("deserialization error: {0}")]
    Deserialize(#[from] toml::de::Error),
}

impl MountOptions {
    /// Load options from a TOML file.
    pub fn load(path: &Path) -> Result<Self, OptionsError> {
        debug!(path = ?path, "loading mount options");
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Write options to a TOML file, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<(), OptionsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn defaults() {
        let options = MountOptions::default();
        assert!(!options.read_only);
        assert_eq!(options.idle_capacity_per_kind, 8);
        assert_eq!(options.root_id, FileId::ROOT);
    }

    #[test]
    fn toml_round_trip() {
        let options = MountOptions {
            read_only: true,
            idle_capacity_per_kind: 3,
            root_id: FileId::from_hex("00112233445566778899aabbccddeeff").unwrap(),
        };
        let text = toml::to_string_pretty(&options).unwrap();
        let parsed: MountOptions = toml::from_str(&text).unwrap();
        assert_eq!(parsed, options);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let parsed: MountOptions = toml::from_str("read-only = true\n").unwrap();
        assert!(parsed.read_only);
        assert_eq!(parsed.idle_capacity_per_kind, 8);
    }

    #[test]
    fn save_and_load_from_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("conf").join("mount.toml");
        let options = MountOptions {
            read_only: true,
            ..MountOptions::default()
        };
        options.save(&path).unwrap();
        assert_eq!(MountOptions::load(&path).unwrap(), options);
    }
}
