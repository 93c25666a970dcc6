//! Cryptographic stream interfaces.
//!
//! The engine consumes authenticated streams; it never performs encryption
//! itself. A [`CryptoEngine`] wraps an inode's two raw backing streams into a
//! payload [`Stream`] and a [`HeaderStore`] holding the fixed-size inode
//! header. Reads through the returned objects surface
//! [`FsError::Corrupted`](crate::FsError::Corrupted) when authentication
//! fails; the inode id acts as the tweak so streams cannot be swapped
//! between inodes.
//!
//! [`PlainEngine`] is the identity transform: it keeps the seam exercisable
//! without the external cipher and is what the test suite mounts over.

use crate::error::FsError;
use crate::id::FileId;
use crate::storage::Stream;

/// Encoded size of the inode header slot, in bytes.
///
/// mode/uid/gid/nlink (4 × u32), four second+nanosecond timestamps
/// (4 × (u64 + u32)), and the payload size (u64).
pub const HEADER_LEN: usize = 72;

/// Storage for the fixed-size encrypted inode header.
pub trait HeaderStore: Send {
    /// Load the header slot. Returns `None` when the slot has never been
    /// written (a freshly created inode).
    fn load(&mut self) -> Result<Option<[u8; HEADER_LEN]>, FsError>;

    fn store(&mut self, header: &[u8; HEADER_LEN]) -> Result<(), FsError>;

    fn flush(&mut self) -> Result<(), FsError>;
}

/// The authenticated view of one inode's backing streams.
pub struct InodeStreams {
    pub payload: Box<dyn Stream>,
    pub header: Box<dyn HeaderStore>,
}

/// Wraps raw backing streams into their authenticated form.
pub trait CryptoEngine: Send + Sync {
    fn attach(
        &self,
        id: FileId,
        data: Box<dyn Stream>,
        meta: Box<dyn Stream>,
    ) -> Result<InodeStreams, FsError>;
}

/// Identity engine: payload bytes pass through untouched and the header
/// occupies the first [`HEADER_LEN`] bytes of the meta stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainEngine;

impl CryptoEngine for PlainEngine {
    fn attach(
        &self,
        _id: FileId,
        data: Box<dyn Stream>,
        meta: Box<dyn Stream>,
    ) -> Result<InodeStreams, FsError> {
        Ok(InodeStreams {
            payload: data,
            header: Box::new(PlainHeaderStore { meta }),
        })
    }
}

struct PlainHeaderStore {
    meta: Box<dyn Stream>,
}

impl HeaderStore for PlainHeaderStore {
    fn load(&mut self) -> Result<Option<[u8; HEADER_LEN]>, FsError> {
        if self.meta.size()? == 0 {
            return Ok(None);
        }
        let mut slot = [0u8; HEADER_LEN];
        let n = self.meta.read_at(&mut slot, 0)?;
        if n != HEADER_LEN {
            return Err(FsError::Corrupted(format!(
                "header slot truncated: {n} of {HEADER_LEN} bytes"
            )));
        }
        Ok(Some(slot))
    }

    fn store(&mut self, header: &[u8; HEADER_LEN]) -> Result<(), FsError> {
        self.meta.write_at(header, 0)
    }

    fn flush(&mut self) -> Result<(), FsError> {
        self.meta.flush()
    }
}
