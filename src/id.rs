//! Stable 128-bit inode identifiers.
//!
//! An id is opaque random data; its 32-character lowercase hex form names the
//! inode's two backing streams in the storage layer.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore as _;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Length of an id in bytes.
pub const ID_LEN: usize = 16;

/// A stable, content-compared inode identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId([u8; ID_LEN]);

impl FileId {
    /// The well-known id of the root directory.
    pub const ROOT: Self = Self([0; ID_LEN]);

    /// Mint a fresh id from the OS random source.
    ///
    /// `OsRng` is safe to use from any thread.
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; ID_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// The 32-character lowercase hex form.
    #[must_use]
    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the 32-character hex form back into an id.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; ID_LEN];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex())
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.hex())
    }
}

impl Serialize for FileId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.hex())
    }
}

impl<'de> Deserialize<'de> for FileId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_hex(&raw)
            .map_err(|_| D::Error::custom(format!("invalid inode id {raw:?}: expected 32 hex characters")))
    }
}
