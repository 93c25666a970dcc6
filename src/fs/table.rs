//! The process-wide file table: at most one live instance per inode id,
//! reference counting, bounded idle pools, and deferred unlink.
//!
//! Lock ordering: the table lock is strictly below every inode lock. The
//! table lock is taken for the state transitions of `open_as`, `create_as`,
//! and `close`; inode flushes, backing-stream deletion, and evictee teardown
//! all happen after it is dropped, so no inode lock is ever acquired while
//! the table lock is held.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use rustc_hash::FxHashMap;
use tracing::{debug, error, trace, warn};

use crate::crypto::CryptoEngine;
use crate::error::FsError;
use crate::fs::inode::Inode;
use crate::fs::FileKind;
use crate::id::FileId;
use crate::storage::{self, Storage};

/// Shared state of one live inode: identity, the removal flag, and the
/// per-inode lock guarding header and payload.
pub struct InodeCell {
    id: FileId,
    kind: FileKind,
    removed: AtomicBool,
    state: Mutex<Inode>,
}

impl InodeCell {
    #[must_use]
    pub fn id(&self) -> FileId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> FileKind {
        self.kind
    }

    /// Acquire the per-inode lock. Held for the duration of one
    /// user-visible operation; reentry is not supported.
    #[expect(
        clippy::expect_used,
        reason = "mutex poisoning is unrecoverable; panicking is the correct behavior"
    )]
    pub fn lock(&self) -> MutexGuard<'_, Inode> {
        self.state.lock().expect("poisoned")
    }

    /// Flag the inode for removal. The backing streams are deleted when the
    /// table releases the last handle; the still-open instance stays fully
    /// usable until then.
    pub fn mark_removed(&self) {
        self.removed.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }
}

/// A live, counted reference to an inode, vended by [`FileTable::open_as`]
/// or [`FileTable::create_as`].
///
/// Handles are move-only and must be returned with [`FileTable::close`];
/// dropping one on the floor leaks its reference count and logs a warning.
pub struct FileHandle {
    cell: Arc<InodeCell>,
    returned: bool,
}

impl FileHandle {
    fn new(cell: Arc<InodeCell>) -> Self {
        Self {
            cell,
            returned: false,
        }
    }

    #[must_use]
    pub fn id(&self) -> FileId {
        self.cell.id()
    }

    #[must_use]
    pub fn kind(&self) -> FileKind {
        self.cell.kind()
    }

    /// Lock the inode this handle refers to.
    pub fn lock(&self) -> MutexGuard<'_, Inode> {
        self.cell.lock()
    }

    /// See [`InodeCell::mark_removed`]. Callers hold the inode lock, per the
    /// mutation contract.
    pub fn unlink(&self) {
        self.cell.mark_removed();
    }

    pub(crate) fn cell(&self) -> Arc<InodeCell> {
        Arc::clone(&self.cell)
    }

    fn into_cell(mut self) -> Arc<InodeCell> {
        self.returned = true;
        Arc::clone(&self.cell)
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if !self.returned {
            warn!(id = %self.cell.id(), "file handle dropped without being returned to the table");
        }
    }
}

struct TableEntry {
    cell: Arc<InodeCell>,
    refcount: u64,
    idle_since: Option<Instant>,
}

struct TableState {
    live: FxHashMap<FileId, TableEntry>,
    idle: [VecDeque<FileId>; FileKind::COUNT],
}

enum CloseAction {
    None,
    Flush,
    Delete,
}

/// The table itself. One per mounted filesystem.
pub struct FileTable {
    storage: Arc<dyn Storage>,
    engine: Arc<dyn CryptoEngine>,
    read_only: bool,
    idle_capacity: usize,
    state: Mutex<TableState>,
}

#[expect(
    clippy::expect_used,
    reason = "mutex poisoning is unrecoverable; panicking is the correct behavior"
)]
impl FileTable {
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        engine: Arc<dyn CryptoEngine>,
        read_only: bool,
        idle_capacity: usize,
    ) -> Self {
        Self {
            storage,
            engine,
            read_only,
            idle_capacity,
            state: Mutex::new(TableState {
                live: FxHashMap::default(),
                idle: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
            }),
        }
    }

    /// The mount-time write policy. Mutating operations consult this before
    /// doing anything.
    #[must_use]
    pub fn is_readonly(&self) -> bool {
        self.read_only
    }

    /// Open the inode with the given id, expecting the given kind.
    ///
    /// A cached instance with a different kind fails `InvalidArgument`:
    /// callers resolved the kind from a directory entry, so a mismatch means
    /// the directory and the cache disagree. Absent backing streams fail
    /// `NotFound`; a header that disagrees with `kind` fails `Corrupted`.
    pub fn open_as(&self, id: FileId, kind: FileKind) -> Result<FileHandle, FsError> {
        let mut state = self.state.lock().expect("poisoned");
        if let Some(entry) = state.live.get_mut(&id) {
            if entry.cell.kind() != kind {
                return Err(FsError::InvalidArgument(format!(
                    "inode {id} cached as {:?} but opened as {kind:?}",
                    entry.cell.kind()
                )));
            }
            let was_idle = entry.refcount == 0;
            entry.refcount += 1;
            entry.idle_since = None;
            let cached = Arc::clone(&entry.cell);
            if was_idle {
                state.idle[kind.index()].retain(|queued| *queued != id);
                trace!(id = %id, "revived idle inode");
            }
            return Ok(FileHandle::new(cached));
        }

        let inode = self.load_inode(id, kind).inspect_err(|e| {
            if !e.is_routine() {
                error!(id = %id, error = %e, "failed to load inode");
            }
        })?;
        let cell = Arc::new(InodeCell {
            id,
            kind,
            removed: AtomicBool::new(false),
            state: Mutex::new(inode),
        });
        state.live.insert(
            id,
            TableEntry {
                cell: Arc::clone(&cell),
                refcount: 1,
                idle_since: None,
            },
        );
        Ok(FileHandle::new(cell))
    }

    /// Create the backing streams for a fresh id and construct its inode.
    ///
    /// The caller fills owner/mode/nlink afterward and flushes; the kind is
    /// fixed here. Pre-existing streams fail `Exists` — with random ids that
    /// only happens under corruption.
    pub fn create_as(&self, id: FileId, kind: FileKind) -> Result<FileHandle, FsError> {
        let mut state = self.state.lock().expect("poisoned");
        if state.live.contains_key(&id) {
            return Err(FsError::Exists(format!("inode {id} is already live")));
        }

        let inode = self.new_inode(id, kind)?;
        let cell = Arc::new(InodeCell {
            id,
            kind,
            removed: AtomicBool::new(false),
            state: Mutex::new(inode),
        });
        state.live.insert(
            id,
            TableEntry {
                cell: Arc::clone(&cell),
                refcount: 1,
                idle_since: None,
            },
        );
        debug!(id = %id, kind = ?kind, "created inode");
        Ok(FileHandle::new(cell))
    }

    /// Return a handle. When the last reference drops, the inode is either
    /// deleted (removal flag set — both backing streams are gone before this
    /// returns) or flushed and parked in its kind's bounded idle pool.
    pub fn close(&self, handle: FileHandle) -> Result<(), FsError> {
        let cell = handle.into_cell();
        let id = cell.id();
        let mut evicted: Vec<TableEntry> = Vec::new();

        let action = {
            let mut state = self.state.lock().expect("poisoned");
            let remaining = {
                let Some(entry) = state.live.get_mut(&id) else {
                    return Err(FsError::Unexpected(format!("close of untracked inode {id}")));
                };
                debug_assert!(entry.refcount > 0, "refcount underflow on {id}");
                entry.refcount = entry.refcount.saturating_sub(1);
                entry.refcount
            };

            if remaining > 0 {
                CloseAction::None
            } else if cell.is_removed() {
                state.live.remove(&id);
                CloseAction::Delete
            } else {
                if let Some(entry) = state.live.get_mut(&id) {
                    entry.idle_since = Some(Instant::now());
                }
                let idx = cell.kind().index();
                state.idle[idx].push_back(id);
                while state.idle[idx].len() > self.idle_capacity {
                    let Some(oldest) = state.idle[idx].pop_front() else {
                        break;
                    };
                    if let Some(old) = state.live.remove(&oldest) {
                        evicted.push(old);
                    }
                }
                CloseAction::Flush
            }
        };

        // Everything below runs without the table lock.
        for entry in evicted {
            trace!(
                id = %entry.cell.id(),
                idle_for = ?entry.idle_since.map(|since| since.elapsed()),
                "evicting idle inode"
            );
        }

        match action {
            CloseAction::None => Ok(()),
            CloseAction::Delete => {
                self.storage.remove(&storage::data_name(id)).inspect_err(
                    |e| error!(id = %id, error = %e, "failed to delete payload stream"),
                )?;
                self.storage.remove(&storage::meta_name(id)).inspect_err(
                    |e| error!(id = %id, error = %e, "failed to delete meta stream"),
                )?;
                debug!(id = %id, "deleted backing streams of removed inode");
                Ok(())
            }
            CloseAction::Flush => cell.lock().flush().inspect_err(|e| {
                if !e.is_routine() {
                    error!(id = %id, error = %e, "flush on release failed");
                }
            }),
        }
    }

    /// Number of inodes the table currently tracks, idle ones included.
    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.state.lock().expect("poisoned").live.len()
    }

    /// Number of idle (refcount zero) inodes of the given kind.
    #[must_use]
    pub fn idle_count(&self, kind: FileKind) -> usize {
        self.state.lock().expect("poisoned").idle[kind.index()].len()
    }

    fn load_inode(&self, id: FileId, kind: FileKind) -> Result<Inode, FsError> {
        let data = self.storage.open_stream(&storage::data_name(id))?;
        let meta = self.storage.open_stream(&storage::meta_name(id))?;
        let streams = self.engine.attach(id, data, meta)?;
        Inode::open(kind, streams)
    }

    fn new_inode(&self, id: FileId, kind: FileKind) -> Result<Inode, FsError> {
        self.storage.mkdir_p(&storage::shard_prefix(id))?;
        let data = self.storage.create_stream(&storage::data_name(id))?;
        let meta = match self.storage.create_stream(&storage::meta_name(id)) {
            Ok(meta) => meta,
            Err(e) => {
                // Roll the half-created pair back so a retry sees nothing.
                if let Err(cleanup) = self.storage.remove(&storage::data_name(id)) {
                    warn!(id = %id, error = %cleanup, "failed to roll back payload stream");
                }
                return Err(e);
            }
        };
        let streams = self.engine.attach(id, data, meta)?;
        Ok(Inode::create(kind, streams))
    }
}
