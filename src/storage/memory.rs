//! In-memory [`Storage`] backend.
//!
//! Backs the test suite and is usable for ephemeral mounts. Each stream is a
//! shared byte vector; `flush` is a no-op since nothing is more durable than
//! the process itself.

use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;

use crate::error::FsError;
use crate::storage::{Storage, Stream};

type SharedBytes = Arc<Mutex<Vec<u8>>>;

/// A [`Storage`] that keeps every stream in process memory.
#[derive(Default)]
pub struct MemoryStorage {
    streams: Mutex<FxHashMap<String, SharedBytes>>,
}

#[expect(
    clippy::expect_used,
    reason = "mutex poisoning is unrecoverable; panicking is the correct behavior"
)]
impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all live streams, in no particular order.
    ///
    /// Lets tests assert on backing-stream lifecycles (creation, deferred
    /// deletion) the way a directory listing would on a real backend.
    #[must_use]
    pub fn stream_names(&self) -> Vec<String> {
        self.streams.lock().expect("poisoned").keys().cloned().collect()
    }

    fn get(&self, name: &str) -> Option<SharedBytes> {
        self.streams.lock().expect("poisoned").get(name).map(Arc::clone)
    }
}

#[expect(
    clippy::expect_used,
    reason = "mutex poisoning is unrecoverable; panicking is the correct behavior"
)]
impl Storage for MemoryStorage {
    fn open_stream(&self, name: &str) -> Result<Box<dyn Stream>, FsError> {
        let bytes = self
            .get(name)
            .ok_or_else(|| FsError::NotFound(format!("stream {name}")))?;
        Ok(Box::new(MemoryStream { bytes }))
    }

    fn create_stream(&self, name: &str) -> Result<Box<dyn Stream>, FsError> {
        let mut streams = self.streams.lock().expect("poisoned");
        if streams.contains_key(name) {
            return Err(FsError::Exists(format!("stream {name}")));
        }
        let bytes: SharedBytes = Arc::new(Mutex::new(Vec::new()));
        streams.insert(name.to_owned(), Arc::clone(&bytes));
        Ok(Box::new(MemoryStream { bytes }))
    }

    fn remove(&self, name: &str) -> Result<(), FsError> {
        self.streams.lock().expect("poisoned").remove(name);
        Ok(())
    }

    fn exists(&self, name: &str) -> Result<bool, FsError> {
        Ok(self.streams.lock().expect("poisoned").contains_key(name))
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), FsError> {
        let mut streams = self.streams.lock().expect("poisoned");
        let bytes = streams
            .remove(from)
            .ok_or_else(|| FsError::NotFound(format!("stream {from}")))?;
        streams.insert(to.to_owned(), bytes);
        Ok(())
    }

    fn mkdir_p(&self, _prefix: &str) -> Result<(), FsError> {
        Ok(())
    }
}

struct MemoryStream {
    bytes: SharedBytes,
}

#[expect(
    clippy::expect_used,
    reason = "mutex poisoning is unrecoverable; panicking is the correct behavior"
)]
#[expect(
    clippy::cast_possible_truncation,
    reason = "in-memory streams are bounded by usize by construction"
)]
impl Stream for MemoryStream {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, FsError> {
        let bytes = self.bytes.lock().expect("poisoned");
        let start = offset as usize;
        if start >= bytes.len() {
            return Ok(0);
        }
        let n = buf.len().min(bytes.len() - start);
        buf[..n].copy_from_slice(&bytes[start..start + n]);
        Ok(n)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<(), FsError> {
        let mut bytes = self.bytes.lock().expect("poisoned");
        let start = offset as usize;
        let end = start + buf.len();
        if end > bytes.len() {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn size(&self) -> Result<u64, FsError> {
        Ok(self.bytes.lock().expect("poisoned").len() as u64)
    }

    fn resize(&mut self, new_len: u64) -> Result<(), FsError> {
        self.bytes.lock().expect("poisoned").resize(new_len as usize, 0);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), FsError> {
        Ok(())
    }
}
