//! Backing-storage interfaces and per-inode stream naming.
//!
//! The engine never touches a real directory itself; it talks to a
//! [`Storage`] implementation through opaque logical names. Every inode owns
//! two streams — payload data and metadata — named by its hex id under a
//! two-level shard prefix.

use crate::error::FsError;
use crate::id::FileId;

pub mod memory;

/// Suffix of an inode's payload stream.
pub const DATA_SUFFIX: &str = ".data";
/// Suffix of an inode's metadata stream.
pub const META_SUFFIX: &str = ".meta";

/// A random-access byte stream.
///
/// Contract notes:
/// - `read_at` returns fewer bytes than requested only at end of stream.
/// - `resize` zero-fills when growing.
/// - Mutations become durable only after `flush`.
pub trait Stream: Send {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, FsError>;

    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<(), FsError>;

    /// Current stream length in bytes.
    fn size(&self) -> Result<u64, FsError>;

    fn resize(&mut self, new_len: u64) -> Result<(), FsError>;

    fn flush(&mut self) -> Result<(), FsError>;
}

/// A flat namespace of streams over some physical medium.
///
/// Implementations must be safe for concurrent use across distinct names;
/// the engine serializes access to any single inode's streams itself.
pub trait Storage: Send + Sync {
    /// Open an existing stream. Fails with `NotFound` if the name is absent.
    fn open_stream(&self, name: &str) -> Result<Box<dyn Stream>, FsError>;

    /// Create a fresh, empty stream. Fails with `Exists` if the name is
    /// already taken.
    fn create_stream(&self, name: &str) -> Result<Box<dyn Stream>, FsError>;

    /// Delete a stream. Deleting an absent name is not an error, so cleanup
    /// paths can race deletion without special handling.
    fn remove(&self, name: &str) -> Result<(), FsError>;

    fn exists(&self, name: &str) -> Result<bool, FsError>;

    /// Atomically replace `to` with `from`.
    fn rename(&self, from: &str, to: &str) -> Result<(), FsError>;

    /// Ensure the given name prefix (shard directory) exists.
    fn mkdir_p(&self, prefix: &str) -> Result<(), FsError>;
}

/// The shard prefix an inode's streams live under.
#[must_use]
pub fn shard_prefix(id: FileId) -> String {
    id.hex()[..2].to_owned()
}

/// Logical name of an inode's payload stream.
#[must_use]
pub fn data_name(id: FileId) -> String {
    let hex = id.hex();
    format!("{}/{}{}", &hex[..2], &hex[2..], DATA_SUFFIX)
}

/// Logical name of an inode's metadata stream.
#[must_use]
pub fn meta_name(id: FileId) -> String {
    let hex = id.hex();
    format!("{}/{}{}", &hex[..2], &hex[2..], META_SUFFIX)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn stream_names_are_sharded() {
        let id = FileId::from_hex("00112233445566778899aabbccddeeff").unwrap();
        assert_eq!(data_name(id), "00/112233445566778899aabbccddeeff.data");
        assert_eq!(meta_name(id), "00/112233445566778899aabbccddeeff.meta");
        assert_eq!(shard_prefix(id), "00");
    }
}
