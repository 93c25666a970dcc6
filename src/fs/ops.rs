//! The public filesystem surface.
//!
//! One [`FileSystem`] per mount. Every operation resolves paths through the
//! file table, takes the target inode's lock for its duration, and returns a
//! typed [`FsError`] that the embedding bridge converts with
//! [`reply_code`](crate::error::reply_code). Open files and directories are
//! handed across the bridge as opaque `u64` tokens backed by a registry —
//! raw addresses never cross the boundary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use rustc_hash::FxHashMap;
use tracing::{info, instrument, warn};

use crate::crypto::CryptoEngine;
use crate::error::FsError;
use crate::fs::resolve;
use crate::fs::table::{FileHandle, FileTable, InodeCell};
use crate::fs::{FileKind, FileStat, OpenFlags};
use crate::id::FileId;
use crate::options::MountOptions;
use crate::storage::Storage;

/// Identity of the requesting process, as reported by the kernel bridge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Context {
    pub uid: u32,
    pub gid: u32,
}

/// One directory entry as reported by [`FileSystem::readdir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaddirEntry {
    pub name: String,
    pub kind: FileKind,
    /// File-type bits derived from the kind, for stat-less listings.
    pub mode: u32,
}

/// Token registry: `u64` ↔ live inode handle, interior-mutable so the
/// operations take `&self`.
struct HandleRegistry {
    next: AtomicU64,
    map: RwLock<FxHashMap<u64, FileHandle>>,
}

#[expect(
    clippy::expect_used,
    reason = "lock poisoning is unrecoverable; panicking is the correct behavior"
)]
impl HandleRegistry {
    fn new() -> Self {
        Self {
            // Token 0 is never allocated, so a zeroed bridge field reads as
            // a bad descriptor instead of aliasing a live one.
            next: AtomicU64::new(1),
            map: RwLock::new(FxHashMap::default()),
        }
    }

    fn register(&self, handle: FileHandle) -> u64 {
        let token = self.next.fetch_add(1, Ordering::Relaxed);
        self.map.write().expect("poisoned").insert(token, handle);
        token
    }

    fn cell(&self, token: u64) -> Result<Arc<InodeCell>, FsError> {
        self.map
            .read()
            .expect("poisoned")
            .get(&token)
            .map(FileHandle::cell)
            .ok_or(FsError::BadFileDescriptor)
    }

    fn take(&self, token: u64) -> Result<FileHandle, FsError> {
        self.map
            .write()
            .expect("poisoned")
            .remove(&token)
            .ok_or(FsError::BadFileDescriptor)
    }

    fn drain(&self) -> Vec<FileHandle> {
        self.map
            .write()
            .expect("poisoned")
            .drain()
            .map(|(_, handle)| handle)
            .collect()
    }
}

/// A mounted filesystem: the file table, the root id, and the token
/// registry. Cheap to share behind an `Arc`; all operations take `&self`.
pub struct FileSystem {
    table: FileTable,
    root_id: FileId,
    handles: HandleRegistry,
}

impl FileSystem {
    /// Mount over the given storage and crypto engine.
    ///
    /// Opens the root directory, creating it on a writable mount whose
    /// backing store has never been initialized.
    pub fn new(
        storage: Arc<dyn Storage>,
        engine: Arc<dyn CryptoEngine>,
        options: MountOptions,
    ) -> Result<Self, FsError> {
        let table = FileTable::new(
            storage,
            engine,
            options.read_only,
            options.idle_capacity_per_kind,
        );
        let fs = Self {
            table,
            root_id: options.root_id,
            handles: HandleRegistry::new(),
        };
        fs.ensure_root()?;
        Ok(fs)
    }

    /// The underlying table, for embedders that want cache introspection.
    #[must_use]
    pub fn table(&self) -> &FileTable {
        &self.table
    }

    fn ensure_root(&self) -> Result<(), FsError> {
        match self.table.open_as(self.root_id, FileKind::Directory) {
            Ok(handle) => self.table.close(handle),
            Err(FsError::NotFound(_)) if !self.table.is_readonly() => {
                info!(id = %self.root_id, "initializing root directory");
                let handle = self.table.create_as(self.root_id, FileKind::Directory)?;
                let setup = {
                    let mut inode = handle.lock();
                    inode
                        .set_mode(libc::S_IFDIR | 0o755)
                        .and_then(|()| inode.flush())
                };
                let closed = self.table.close(handle);
                setup.and(closed)
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(name = "FileSystem::getattr", skip(self))]
    pub fn getattr(&self, path: &str) -> Result<FileStat, FsError> {
        let guard = resolve::open_all(&self.table, self.root_id, path)?;
        let stat = {
            let mut inode = guard.handle().lock();
            let stat = inode.stat();
            // Opportunistic: persist any header state still pending from
            // earlier mutations through the same cached inode.
            inode.flush()?;
            stat
        };
        guard.close()?;
        Ok(stat)
    }

    #[instrument(name = "FileSystem::opendir", skip(self))]
    pub fn opendir(&self, path: &str) -> Result<u64, FsError> {
        let guard = resolve::open_all(&self.table, self.root_id, path)?;
        if guard.handle().kind() != FileKind::Directory {
            return Err(FsError::NotADirectory(path.to_owned()));
        }
        Ok(self.handles.register(guard.into_inner()))
    }

    #[instrument(name = "FileSystem::readdir", skip(self))]
    pub fn readdir(&self, token: u64) -> Result<Vec<ReaddirEntry>, FsError> {
        let cell = self.handles.cell(token)?;
        if cell.kind() != FileKind::Directory {
            return Err(FsError::NotADirectory("readdir on a non-directory token".to_owned()));
        }
        let inode = cell.lock();
        let mut entries = Vec::new();
        inode.dir_for_each(|name, entry| {
            entries.push(ReaddirEntry {
                name: name.to_owned(),
                kind: entry.kind,
                mode: entry.kind.mode_bits(),
            });
            true
        })?;
        Ok(entries)
    }

    #[instrument(name = "FileSystem::releasedir", skip(self))]
    pub fn releasedir(&self, token: u64) -> Result<(), FsError> {
        self.release(token)
    }

    #[instrument(name = "FileSystem::create", skip(self))]
    pub fn create(&self, ctx: Context, path: &str, mode: u32) -> Result<u64, FsError> {
        if self.table.is_readonly() {
            return Err(FsError::ReadOnly);
        }
        let guard = resolve::create(&self.table, self.root_id, path, FileKind::RegularFile)?;
        {
            let mut inode = guard.handle().lock();
            inode.set_uid(ctx.uid);
            inode.set_gid(ctx.gid);
            inode.set_nlink(1);
            inode.set_mode((mode & 0o777) | libc::S_IFREG)?;
            inode.flush()?;
        }
        Ok(self.handles.register(guard.into_inner()))
    }

    #[instrument(name = "FileSystem::open", skip(self))]
    pub fn open(&self, path: &str, flags: OpenFlags) -> Result<u64, FsError> {
        if flags.wants_write() && self.table.is_readonly() {
            return Err(FsError::ReadOnly);
        }
        let guard = resolve::open_all(&self.table, self.root_id, path)?;
        if guard.handle().kind() != FileKind::RegularFile {
            return Err(FsError::NotPermitted(format!("open of non-file {path:?}")));
        }
        if flags.contains(OpenFlags::TRUNC) {
            let mut inode = guard.handle().lock();
            inode.truncate(0)?;
        }
        Ok(self.handles.register(guard.into_inner()))
    }

    #[instrument(name = "FileSystem::release", skip(self))]
    pub fn release(&self, token: u64) -> Result<(), FsError> {
        let handle = self.handles.take(token)?;
        let flushed = {
            let mut inode = handle.lock();
            inode.flush()
        };
        let closed = self.table.close(handle);
        flushed.and(closed)
    }

    #[instrument(name = "FileSystem::read", skip(self))]
    pub fn read(&self, token: u64, offset: u64, len: usize) -> Result<Bytes, FsError> {
        let cell = self.handles.cell(token)?;
        if cell.kind() != FileKind::RegularFile {
            return Err(FsError::NotPermitted("read on a non-file token".to_owned()));
        }
        let mut buf = vec![0u8; len];
        let n = cell.lock().read(&mut buf, offset)?;
        buf.truncate(n);
        Ok(Bytes::from(buf))
    }

    #[instrument(name = "FileSystem::write", skip(self, data), fields(len = data.len()))]
    pub fn write(&self, token: u64, offset: u64, data: &[u8]) -> Result<usize, FsError> {
        let cell = self.handles.cell(token)?;
        if cell.kind() != FileKind::RegularFile {
            return Err(FsError::NotPermitted("write on a non-file token".to_owned()));
        }
        cell.lock().write(data, offset)?;
        Ok(data.len())
    }

    #[instrument(name = "FileSystem::flush", skip(self))]
    pub fn flush(&self, token: u64) -> Result<(), FsError> {
        let cell = self.handles.cell(token)?;
        if cell.kind() != FileKind::RegularFile {
            return Err(FsError::NotPermitted("flush on a non-file token".to_owned()));
        }
        let result = cell.lock().flush();
        result
    }

    #[instrument(name = "FileSystem::truncate", skip(self))]
    pub fn truncate(&self, path: &str, size: u64) -> Result<(), FsError> {
        let guard = resolve::open_all(&self.table, self.root_id, path)?;
        if guard.handle().kind() != FileKind::RegularFile {
            return Err(FsError::InvalidArgument(format!("truncate of non-file {path:?}")));
        }
        {
            let mut inode = guard.handle().lock();
            inode.truncate(size)?;
            inode.flush()?;
        }
        guard.close()
    }

    #[instrument(name = "FileSystem::ftruncate", skip(self))]
    pub fn ftruncate(&self, token: u64, size: u64) -> Result<(), FsError> {
        let cell = self.handles.cell(token)?;
        if cell.kind() != FileKind::RegularFile {
            return Err(FsError::InvalidArgument("ftruncate on a non-file token".to_owned()));
        }
        let mut inode = cell.lock();
        inode.truncate(size)?;
        inode.flush()
    }

    #[instrument(name = "FileSystem::unlink", skip(self))]
    pub fn unlink(&self, path: &str) -> Result<(), FsError> {
        if self.table.is_readonly() {
            return Err(FsError::ReadOnly);
        }
        resolve::remove(&self.table, self.root_id, path)
    }

    #[instrument(name = "FileSystem::mkdir", skip(self))]
    pub fn mkdir(&self, ctx: Context, path: &str, mode: u32) -> Result<(), FsError> {
        if self.table.is_readonly() {
            return Err(FsError::ReadOnly);
        }
        let guard = resolve::create(&self.table, self.root_id, path, FileKind::Directory)?;
        {
            let mut inode = guard.handle().lock();
            inode.set_uid(ctx.uid);
            inode.set_gid(ctx.gid);
            inode.set_nlink(1);
            inode.set_mode((mode & 0o777) | libc::S_IFDIR)?;
            inode.flush()?;
        }
        guard.close()
    }

    /// Identical to [`unlink`](Self::unlink): directory emptiness is not
    /// enforced at this layer, so removing a non-empty directory orphans its
    /// entries on disk.
    #[instrument(name = "FileSystem::rmdir", skip(self))]
    pub fn rmdir(&self, path: &str) -> Result<(), FsError> {
        self.unlink(path)
    }

    #[instrument(name = "FileSystem::chmod", skip(self))]
    pub fn chmod(&self, path: &str, mode: u32) -> Result<(), FsError> {
        let guard = resolve::open_all(&self.table, self.root_id, path)?;
        {
            let mut inode = guard.handle().lock();
            let preserved = inode.mode() & libc::S_IFMT;
            inode.set_mode(preserved | (mode & 0o777))?;
            inode.flush()?;
        }
        guard.close()
    }

    #[instrument(name = "FileSystem::chown", skip(self))]
    pub fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<(), FsError> {
        let guard = resolve::open_all(&self.table, self.root_id, path)?;
        {
            let mut inode = guard.handle().lock();
            inode.set_uid(uid);
            inode.set_gid(gid);
            inode.flush()?;
        }
        guard.close()
    }

    /// Create a symlink at `link_path` pointing at `target`.
    #[instrument(name = "FileSystem::symlink", skip(self))]
    pub fn symlink(&self, ctx: Context, target: &str, link_path: &str) -> Result<(), FsError> {
        if self.table.is_readonly() {
            return Err(FsError::ReadOnly);
        }
        let guard = resolve::create(&self.table, self.root_id, link_path, FileKind::Symlink)?;
        {
            let mut inode = guard.handle().lock();
            inode.set_uid(ctx.uid);
            inode.set_gid(ctx.gid);
            inode.set_nlink(1);
            inode.set_mode(libc::S_IFLNK | 0o755)?;
            inode.set_link_target(target)?;
            inode.flush()?;
        }
        guard.close()
    }

    /// Copy the target into `buf` C-style: the buffer is zeroed, at most
    /// `buf.len() - 1` target bytes are written, and the result is always
    /// NUL-terminated. An empty buffer is an `InvalidArgument`.
    #[instrument(name = "FileSystem::readlink", skip(self, buf), fields(buf_len = buf.len()))]
    pub fn readlink(&self, path: &str, buf: &mut [u8]) -> Result<(), FsError> {
        if buf.is_empty() {
            return Err(FsError::InvalidArgument("zero-length readlink buffer".to_owned()));
        }
        let guard = resolve::open_all(&self.table, self.root_id, path)?;
        if guard.handle().kind() != FileKind::Symlink {
            return Err(FsError::InvalidArgument(format!("readlink of non-symlink {path:?}")));
        }
        let target = {
            let mut inode = guard.handle().lock();
            inode.link_target()?
        };
        guard.close()?;
        buf.fill(0);
        let n = target.len().min(buf.len() - 1);
        buf[..n].copy_from_slice(&target.as_bytes()[..n]);
        Ok(())
    }
}

impl Drop for FileSystem {
    fn drop(&mut self) {
        // Return any tokens the bridge never released so their inodes get a
        // final flush instead of a leak warning.
        for handle in self.handles.drain() {
            let id = handle.id();
            if let Err(e) = self.table.close(handle) {
                warn!(id = %id, error = %e, "failed to release handle at teardown");
            }
        }
    }
}
