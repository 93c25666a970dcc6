//! The in-memory inode: fixed-layout header plus a typed payload.
//!
//! The header occupies the engine-side view of an inode's encrypted meta
//! stream. Its layout is fixed and little-endian; the file-type bits inside
//! `mode` are the on-disk record of the inode's kind, so a header whose bits
//! disagree with the expected kind is treated as corruption, not as an
//! argument error.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::crypto::{HeaderStore, InodeStreams, HEADER_LEN};
use crate::error::FsError;
use crate::fs::dir::{DirEntry, Directory};
use crate::fs::file::RegularFile;
use crate::fs::symlink::Symlink;
use crate::fs::{FileKind, FileStat};
use crate::id::FileId;

/// The common inode header. Every mutation marks it dirty; [`Inode::flush`]
/// persists it.
#[derive(Debug, Clone)]
pub(crate) struct InodeHeader {
    mode: u32,
    uid: u32,
    gid: u32,
    nlink: u32,
    atime: SystemTime,
    mtime: SystemTime,
    ctime: SystemTime,
    birthtime: SystemTime,
    size: u64,
    dirty: bool,
}

impl InodeHeader {
    fn fresh(kind: FileKind) -> Self {
        let now = SystemTime::now();
        Self {
            mode: kind.mode_bits(),
            uid: 0,
            gid: 0,
            nlink: 1,
            atime: now,
            mtime: now,
            ctime: now,
            birthtime: now,
            size: 0,
            dirty: true,
        }
    }

    fn decode(bytes: &[u8; HEADER_LEN]) -> Result<Self, FsError> {
        let mode = read_u32(bytes, 0);
        if FileKind::from_mode(mode).is_none() {
            return Err(FsError::Corrupted(format!(
                "header mode {mode:#o} has no recognizable file-type bits"
            )));
        }
        Ok(Self {
            mode,
            uid: read_u32(bytes, 4),
            gid: read_u32(bytes, 8),
            nlink: read_u32(bytes, 12),
            atime: read_time(bytes, 16),
            mtime: read_time(bytes, 28),
            ctime: read_time(bytes, 40),
            birthtime: read_time(bytes, 52),
            size: read_u64(bytes, 64),
            dirty: false,
        })
    }

    fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        write_u32(&mut out, 0, self.mode);
        write_u32(&mut out, 4, self.uid);
        write_u32(&mut out, 8, self.gid);
        write_u32(&mut out, 12, self.nlink);
        write_time(&mut out, 16, self.atime);
        write_time(&mut out, 28, self.mtime);
        write_time(&mut out, 40, self.ctime);
        write_time(&mut out, 52, self.birthtime);
        write_u64(&mut out, 64, self.size);
        out
    }

    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    pub(crate) fn set_size(&mut self, size: u64) {
        if self.size != size {
            self.size = size;
            self.dirty = true;
        }
    }

    pub(crate) fn touch_mtime(&mut self) {
        let now = SystemTime::now();
        self.mtime = now;
        self.ctime = now;
        self.dirty = true;
    }

    fn touch_ctime(&mut self) {
        self.ctime = SystemTime::now();
        self.dirty = true;
    }
}

fn read_u32(bytes: &[u8; HEADER_LEN], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn read_u64(bytes: &[u8; HEADER_LEN], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(raw)
}

fn read_time(bytes: &[u8; HEADER_LEN], at: usize) -> SystemTime {
    let secs = read_u64(bytes, at);
    let nanos = read_u32(bytes, at + 8);
    UNIX_EPOCH + Duration::new(secs, nanos.min(999_999_999))
}

fn write_u32(bytes: &mut [u8; HEADER_LEN], at: usize, value: u32) {
    bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn write_u64(bytes: &mut [u8; HEADER_LEN], at: usize, value: u64) {
    bytes[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

fn write_time(bytes: &mut [u8; HEADER_LEN], at: usize, time: SystemTime) {
    // Pre-epoch timestamps saturate to the epoch.
    let since = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
    write_u64(bytes, at, since.as_secs());
    write_u32(bytes, at + 8, since.subsec_nanos());
}

enum InodePayload {
    File(RegularFile),
    Dir(Directory),
    Link(Symlink),
}

/// One live inode: header, header store, and the kind-specific payload.
///
/// An `Inode` is always reached through its cell's lock; nothing here
/// synchronizes.
pub struct Inode {
    kind: FileKind,
    header: InodeHeader,
    store: Box<dyn HeaderStore>,
    payload: InodePayload,
}

impl Inode {
    /// Build a brand-new inode over freshly created streams. The header is
    /// dirty from the start so even an untouched inode persists on flush.
    pub(crate) fn create(kind: FileKind, streams: InodeStreams) -> Self {
        let payload = match kind {
            FileKind::RegularFile => InodePayload::File(RegularFile::new(streams.payload)),
            FileKind::Directory => InodePayload::Dir(Directory::empty(streams.payload)),
            FileKind::Symlink => InodePayload::Link(Symlink::new(streams.payload)),
        };
        Self {
            kind,
            header: InodeHeader::fresh(kind),
            store: streams.header,
            payload,
        }
    }

    /// Load an existing inode, verifying the stored kind against what the
    /// caller resolved from the parent directory.
    pub(crate) fn open(expected: FileKind, mut streams: InodeStreams) -> Result<Self, FsError> {
        let slot = streams
            .header
            .load()?
            .ok_or_else(|| FsError::Corrupted("inode header missing".to_owned()))?;
        let header = InodeHeader::decode(&slot)?;
        let Some(kind) = FileKind::from_mode(header.mode) else {
            // decode() already rejects this; keep the check close to the use.
            return Err(FsError::Corrupted("header mode lost its file-type bits".to_owned()));
        };
        if kind != expected {
            return Err(FsError::Corrupted(format!(
                "inode stored as {kind:?} but referenced as {expected:?}"
            )));
        }
        let payload = match kind {
            FileKind::RegularFile => InodePayload::File(RegularFile::new(streams.payload)),
            FileKind::Directory => {
                InodePayload::Dir(Directory::load(streams.payload, header.size)?)
            }
            FileKind::Symlink => InodePayload::Link(Symlink::new(streams.payload)),
        };
        Ok(Self {
            kind,
            header,
            store: streams.header,
            payload,
        })
    }

    #[must_use]
    pub fn kind(&self) -> FileKind {
        self.kind
    }

    #[must_use]
    pub fn mode(&self) -> u32 {
        self.header.mode
    }

    #[must_use]
    pub fn uid(&self) -> u32 {
        self.header.uid
    }

    #[must_use]
    pub fn gid(&self) -> u32 {
        self.header.gid
    }

    #[must_use]
    pub fn nlink(&self) -> u32 {
        self.header.nlink
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.header.size
    }

    /// Set the full mode word. The file-type bits must agree with the
    /// inode's kind; the kind itself is immutable.
    pub fn set_mode(&mut self, mode: u32) -> Result<(), FsError> {
        if FileKind::from_mode(mode) != Some(self.kind) {
            return Err(FsError::InvalidArgument(format!(
                "mode {mode:#o} disagrees with inode kind {:?}",
                self.kind
            )));
        }
        self.header.mode = mode;
        self.header.touch_ctime();
        Ok(())
    }

    pub fn set_uid(&mut self, uid: u32) {
        self.header.uid = uid;
        self.header.touch_ctime();
    }

    pub fn set_gid(&mut self, gid: u32) {
        self.header.gid = gid;
        self.header.touch_ctime();
    }

    /// Always 1 in this design; kept for header completeness.
    pub fn set_nlink(&mut self, nlink: u32) {
        self.header.nlink = nlink;
        self.header.dirty = true;
    }

    /// Fill a stat buffer from the header.
    #[must_use]
    pub fn stat(&self) -> FileStat {
        FileStat {
            kind: self.kind,
            mode: self.header.mode,
            uid: self.header.uid,
            gid: self.header.gid,
            nlink: self.header.nlink,
            size: self.header.size,
            atime: self.header.atime,
            mtime: self.header.mtime,
            ctime: self.header.ctime,
            birthtime: self.header.birthtime,
        }
    }

    /// Persist any dirty payload and header state. No-op when clean.
    pub fn flush(&mut self) -> Result<(), FsError> {
        match &mut self.payload {
            InodePayload::File(file) => file.flush()?,
            InodePayload::Dir(dir) => dir.flush(&mut self.header)?,
            InodePayload::Link(link) => link.flush()?,
        }
        if self.header.dirty {
            self.store.store(&self.header.encode())?;
            self.store.flush()?;
            self.header.dirty = false;
        }
        Ok(())
    }

    // --- regular-file surface ---

    pub fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, FsError> {
        let InodePayload::File(file) = &mut self.payload else {
            return Err(not_a_regular_file());
        };
        // No atime maintenance: reads must stay write-free so they work on
        // read-only mounts.
        file.read(&self.header, buf, offset)
    }

    pub fn write(&mut self, buf: &[u8], offset: u64) -> Result<(), FsError> {
        let InodePayload::File(file) = &mut self.payload else {
            return Err(not_a_regular_file());
        };
        file.write(&mut self.header, buf, offset)?;
        self.header.touch_mtime();
        Ok(())
    }

    pub fn truncate(&mut self, new_size: u64) -> Result<(), FsError> {
        let InodePayload::File(file) = &mut self.payload else {
            return Err(not_a_regular_file());
        };
        file.truncate(&mut self.header, new_size)?;
        self.header.touch_mtime();
        Ok(())
    }

    // --- symlink surface ---

    pub fn link_target(&mut self) -> Result<String, FsError> {
        let InodePayload::Link(link) = &mut self.payload else {
            return Err(not_a_symlink());
        };
        link.target(&self.header)
    }

    pub fn set_link_target(&mut self, target: &str) -> Result<(), FsError> {
        let InodePayload::Link(link) = &mut self.payload else {
            return Err(not_a_symlink());
        };
        link.set(&mut self.header, target)?;
        self.header.touch_mtime();
        Ok(())
    }

    // --- directory surface ---

    pub fn dir_get(&self, name: &str) -> Result<Option<DirEntry>, FsError> {
        Ok(self.as_dir()?.get(name))
    }

    /// Bind a name. Returns `false` (without touching anything) when the
    /// name is already taken; the caller must not overwrite.
    pub fn dir_add(&mut self, name: &str, id: FileId, kind: FileKind) -> Result<bool, FsError> {
        let added = self.as_dir_mut()?.insert(name, DirEntry { id, kind })?;
        if added {
            self.header.touch_mtime();
        }
        Ok(added)
    }

    pub fn dir_remove(&mut self, name: &str) -> Result<Option<DirEntry>, FsError> {
        let removed = self.as_dir_mut()?.remove(name);
        if removed.is_some() {
            self.header.touch_mtime();
        }
        Ok(removed)
    }

    /// Visit each entry once; stop early when the visitor returns `false`.
    pub fn dir_for_each(
        &self,
        visit: impl FnMut(&str, DirEntry) -> bool,
    ) -> Result<(), FsError> {
        self.as_dir()?.for_each(visit);
        Ok(())
    }

    fn as_dir(&self) -> Result<&Directory, FsError> {
        match &self.payload {
            InodePayload::Dir(dir) => Ok(dir),
            _ => Err(FsError::NotADirectory(format!("{:?} inode", self.kind))),
        }
    }

    fn as_dir_mut(&mut self) -> Result<&mut Directory, FsError> {
        match &mut self.payload {
            InodePayload::Dir(dir) => Ok(dir),
            _ => Err(FsError::NotADirectory(format!("{:?} inode", self.kind))),
        }
    }
}

fn not_a_regular_file() -> FsError {
    FsError::NotPermitted("not a regular file".to_owned())
}

fn not_a_symlink() -> FsError {
    FsError::InvalidArgument("not a symlink".to_owned())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::crypto::{CryptoEngine as _, PlainEngine};
    use crate::storage::memory::MemoryStorage;
    use crate::storage::Storage as _;

    fn fresh_streams(storage: &MemoryStorage, tag: &str) -> InodeStreams {
        let data = storage.create_stream(&format!("{tag}.data")).unwrap();
        let meta = storage.create_stream(&format!("{tag}.meta")).unwrap();
        PlainEngine.attach(FileId::random(), data, meta).unwrap()
    }

    fn reopen_streams(storage: &MemoryStorage, tag: &str) -> InodeStreams {
        let data = storage.open_stream(&format!("{tag}.data")).unwrap();
        let meta = storage.open_stream(&format!("{tag}.meta")).unwrap();
        PlainEngine.attach(FileId::random(), data, meta).unwrap()
    }

    #[test]
    fn header_codec_round_trip() {
        let mut header = InodeHeader::fresh(FileKind::RegularFile);
        header.uid = 1000;
        header.gid = 100;
        header.mode = libc::S_IFREG | 0o640;
        header.size = 0xdead_beef;
        let decoded = InodeHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded.mode, header.mode);
        assert_eq!(decoded.uid, 1000);
        assert_eq!(decoded.gid, 100);
        assert_eq!(decoded.nlink, 1);
        assert_eq!(decoded.size, 0xdead_beef);
        assert!(!decoded.dirty);
    }

    #[test]
    fn decode_rejects_typeless_mode() {
        let mut header = InodeHeader::fresh(FileKind::RegularFile);
        header.mode = 0o644;
        assert!(matches!(
            InodeHeader::decode(&header.encode()),
            Err(FsError::Corrupted(_))
        ));
    }

    #[test]
    fn flush_then_open_preserves_header() {
        let storage = MemoryStorage::new();
        let mut inode = Inode::create(FileKind::RegularFile, fresh_streams(&storage, "f"));
        inode.set_mode(libc::S_IFREG | 0o600).unwrap();
        inode.set_uid(42);
        inode.set_gid(43);
        inode.flush().unwrap();
        drop(inode);

        let reopened = Inode::open(FileKind::RegularFile, reopen_streams(&storage, "f")).unwrap();
        assert_eq!(reopened.mode(), libc::S_IFREG | 0o600);
        assert_eq!(reopened.uid(), 42);
        assert_eq!(reopened.gid(), 43);
        assert_eq!(reopened.nlink(), 1);
    }

    #[test]
    fn open_with_wrong_kind_is_corruption() {
        let storage = MemoryStorage::new();
        let mut inode = Inode::create(FileKind::Symlink, fresh_streams(&storage, "l"));
        inode.flush().unwrap();
        drop(inode);

        assert!(matches!(
            Inode::open(FileKind::RegularFile, reopen_streams(&storage, "l")),
            Err(FsError::Corrupted(_))
        ));
    }

    #[test]
    fn open_without_header_is_corruption() {
        let storage = MemoryStorage::new();
        storage.create_stream("g.data").unwrap();
        storage.create_stream("g.meta").unwrap();
        assert!(matches!(
            Inode::open(FileKind::RegularFile, reopen_streams(&storage, "g")),
            Err(FsError::Corrupted(_))
        ));
    }

    #[test]
    fn set_mode_rejects_foreign_type_bits() {
        let storage = MemoryStorage::new();
        let mut inode = Inode::create(FileKind::RegularFile, fresh_streams(&storage, "f"));
        assert!(matches!(
            inode.set_mode(libc::S_IFDIR | 0o755),
            Err(FsError::InvalidArgument(_))
        ));
        assert!(matches!(
            inode.set_mode(0o644),
            Err(FsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn typed_surfaces_reject_other_kinds() {
        let storage = MemoryStorage::new();
        let mut dir = Inode::create(FileKind::Directory, fresh_streams(&storage, "d"));
        assert!(matches!(
            dir.read(&mut [0u8; 4], 0),
            Err(FsError::NotPermitted(_))
        ));
        assert!(matches!(dir.link_target(), Err(FsError::InvalidArgument(_))));

        let mut file = Inode::create(FileKind::RegularFile, fresh_streams(&storage, "f"));
        assert!(matches!(file.dir_get("x"), Err(FsError::NotADirectory(_))));
    }
}
