//! Tamper-evident test engine.
//!
//! Not a real cipher: payload and header bytes are XOR-masked with a
//! keystream derived from the key, and a whole-payload tag (keyed over the
//! ciphertext and the inode id) is kept in the meta stream right after the
//! header slot. The tag is refreshed on flush and checked when an inode is
//! attached, so any at-rest modification surfaces as `Corrupted` on the
//! next open — the shape of the real engine's authenticated failure.

use std::hash::Hasher as _;
use std::sync::{Arc, Mutex};

use cloakfs::crypto::{CryptoEngine, HeaderStore, InodeStreams, HEADER_LEN};
use cloakfs::storage::Stream;
use cloakfs::{FileId, FsError};
use rustc_hash::FxHasher;
use secrecy::{ExposeSecret as _, SecretBox};

const TAG_OFFSET: u64 = HEADER_LEN as u64;
const TAG_LEN: usize = 8;

type SharedKey = Arc<SecretBox<[u8; 32]>>;
type SharedMeta = Arc<Mutex<Box<dyn Stream>>>;

pub struct SealingEngine {
    key: SharedKey,
}

impl SealingEngine {
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            key: Arc::new(SecretBox::new(Box::new(key))),
        }
    }
}

impl CryptoEngine for SealingEngine {
    fn attach(
        &self,
        id: FileId,
        mut data: Box<dyn Stream>,
        meta: Box<dyn Stream>,
    ) -> Result<InodeStreams, FsError> {
        let meta: SharedMeta = Arc::new(Mutex::new(meta));

        // Verify the payload tag, when one has been committed.
        {
            let mut meta_guard = meta.lock().expect("poisoned");
            if meta_guard.size()? >= TAG_OFFSET + TAG_LEN as u64 {
                let mut stored = [0u8; TAG_LEN];
                meta_guard.read_at(&mut stored, TAG_OFFSET)?;
                let ciphertext = read_all(data.as_mut())?;
                let expected = tag(&ciphertext, self.key.expose_secret(), id);
                if stored != expected {
                    return Err(FsError::Corrupted(format!(
                        "payload authentication failed for inode {id}"
                    )));
                }
            }
        }

        Ok(InodeStreams {
            payload: Box::new(SealedStream {
                inner: data,
                meta: Arc::clone(&meta),
                key: Arc::clone(&self.key),
                id,
            }),
            header: Box::new(SealedHeaderStore {
                meta,
                key: Arc::clone(&self.key),
            }),
        })
    }
}

fn read_all(stream: &mut dyn Stream) -> Result<Vec<u8>, FsError> {
    let len = usize::try_from(stream.size()?).expect("test streams fit in memory");
    let mut buf = vec![0u8; len];
    let n = stream.read_at(&mut buf, 0)?;
    assert_eq!(n, len, "short read of a whole in-memory stream");
    Ok(buf)
}

fn tag(ciphertext: &[u8], key: &[u8; 32], id: FileId) -> [u8; TAG_LEN] {
    let mut hasher = FxHasher::default();
    hasher.write(key);
    hasher.write(id.as_bytes());
    hasher.write(ciphertext);
    hasher.finish().to_le_bytes()
}

fn mask(buf: &mut [u8], key: &[u8; 32], offset: u64) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= key[((offset as usize) + i) % key.len()];
    }
}

struct SealedStream {
    inner: Box<dyn Stream>,
    meta: SharedMeta,
    key: SharedKey,
    id: FileId,
}

impl Stream for SealedStream {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, FsError> {
        let n = self.inner.read_at(buf, offset)?;
        mask(&mut buf[..n], self.key.expose_secret(), offset);
        Ok(n)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<(), FsError> {
        let mut masked = buf.to_vec();
        mask(&mut masked, self.key.expose_secret(), offset);
        self.inner.write_at(&masked, offset)
    }

    fn size(&self) -> Result<u64, FsError> {
        self.inner.size()
    }

    fn resize(&mut self, new_len: u64) -> Result<(), FsError> {
        let current = self.inner.size()?;
        if new_len <= current {
            return self.inner.resize(new_len);
        }
        // Growth must read back as plaintext zeroes, so the grown range is
        // written as masked zeroes rather than raw ones.
        let gap = usize::try_from(new_len - current).expect("test streams fit in memory");
        self.write_at(&vec![0u8; gap], current)
    }

    fn flush(&mut self) -> Result<(), FsError> {
        self.inner.flush()?;
        let ciphertext = read_all(self.inner.as_mut())?;
        let tag = tag(&ciphertext, self.key.expose_secret(), self.id);
        let mut meta = self.meta.lock().expect("poisoned");
        meta.write_at(&tag, TAG_OFFSET)?;
        meta.flush()
    }
}

struct SealedHeaderStore {
    meta: SharedMeta,
    key: SharedKey,
}

impl HeaderStore for SealedHeaderStore {
    fn load(&mut self) -> Result<Option<[u8; HEADER_LEN]>, FsError> {
        let mut meta = self.meta.lock().expect("poisoned");
        if meta.size()? == 0 {
            return Ok(None);
        }
        let mut slot = [0u8; HEADER_LEN];
        let n = meta.read_at(&mut slot, 0)?;
        if n != HEADER_LEN {
            return Err(FsError::Corrupted(format!(
                "header slot truncated: {n} of {HEADER_LEN} bytes"
            )));
        }
        mask(&mut slot, self.key.expose_secret(), 0);
        Ok(Some(slot))
    }

    fn store(&mut self, header: &[u8; HEADER_LEN]) -> Result<(), FsError> {
        let mut masked = *header;
        mask(&mut masked, self.key.expose_secret(), 0);
        self.meta.lock().expect("poisoned").write_at(&masked, 0)
    }

    fn flush(&mut self) -> Result<(), FsError> {
        self.meta.lock().expect("poisoned").flush()
    }
}
