//! Path resolution and name binding.
//!
//! A path is walked one component at a time against directory entries; at
//! most one inode lock is held at any point of a walk. Handles are carried
//! in a scoped [`Guard`] so every early-exit path returns them to the table.

use tracing::warn;

use crate::error::FsError;
use crate::fs::table::{FileHandle, FileTable};
use crate::fs::FileKind;
use crate::id::FileId;

/// Owns a handle for the duration of a resolution step. Dropping the guard
/// returns the handle to the table; errors on that path are logged, not
/// propagated (they only occur during unwinding).
pub(crate) struct Guard<'t> {
    table: &'t FileTable,
    handle: Option<FileHandle>,
}

#[expect(
    clippy::expect_used,
    reason = "the handle is only vacated by into_inner/close, which consume the guard"
)]
impl<'t> Guard<'t> {
    pub(crate) fn new(table: &'t FileTable, handle: FileHandle) -> Self {
        Self {
            table,
            handle: Some(handle),
        }
    }

    pub(crate) fn handle(&self) -> &FileHandle {
        self.handle.as_ref().expect("guard already emptied")
    }

    /// Swap in the next handle of a walk, returning the previous one to the
    /// table first.
    pub(crate) fn replace(&mut self, next: FileHandle) -> Result<(), FsError> {
        if let Some(previous) = self.handle.replace(next) {
            self.table.close(previous)?;
        }
        Ok(())
    }

    /// Keep the handle, releasing it from scope management.
    pub(crate) fn into_inner(mut self) -> FileHandle {
        self.handle.take().expect("guard already emptied")
    }

    /// Explicitly return the handle, surfacing close errors.
    pub(crate) fn close(mut self) -> Result<(), FsError> {
        match self.handle.take() {
            Some(handle) => self.table.close(handle),
            None => Ok(()),
        }
    }
}

impl Drop for Guard<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let id = handle.id();
            if let Err(e) = self.table.close(handle) {
                warn!(id = %id, error = %e, "failed to return handle while unwinding");
            }
        }
    }
}

fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

/// Walk every component but the last, returning the deepest directory and
/// the remaining component (empty for the root itself).
pub(crate) fn open_base_dir<'t>(
    table: &'t FileTable,
    root: FileId,
    path: &str,
) -> Result<(Guard<'t>, String), FsError> {
    let parts = components(path);
    let mut guard = Guard::new(table, table.open_as(root, FileKind::Directory)?);
    let Some((last, intermediate)) = parts.split_last() else {
        return Ok((guard, String::new()));
    };
    for part in intermediate {
        let entry = {
            let inode = guard.handle().lock();
            inode.dir_get(part)?
        };
        let Some(entry) = entry else {
            return Err(FsError::NotFound(format!("{part:?} in {path:?}")));
        };
        if entry.kind != FileKind::Directory {
            return Err(FsError::NotADirectory(format!("{part:?} in {path:?}")));
        }
        guard.replace(table.open_as(entry.id, entry.kind)?)?;
    }
    Ok((guard, (*last).to_owned()))
}

/// Resolve a whole path to a handle of whatever kind it names.
pub(crate) fn open_all<'t>(
    table: &'t FileTable,
    root: FileId,
    path: &str,
) -> Result<Guard<'t>, FsError> {
    let (mut guard, last) = open_base_dir(table, root, path)?;
    if last.is_empty() {
        return Ok(guard);
    }
    let entry = {
        let inode = guard.handle().lock();
        inode.dir_get(&last)?
    };
    let Some(entry) = entry else {
        return Err(FsError::NotFound(path.to_owned()));
    };
    guard.replace(table.open_as(entry.id, entry.kind)?)?;
    Ok(guard)
}

/// Mint an id, create the inode, and bind the final path component to it.
///
/// If binding fails for any reason the fresh inode is unlinked, so its
/// streams are destroyed when the guard returns it — nothing half-created
/// stays reachable or on disk.
pub(crate) fn create<'t>(
    table: &'t FileTable,
    root: FileId,
    path: &str,
    kind: FileKind,
) -> Result<Guard<'t>, FsError> {
    let (dir, last) = open_base_dir(table, root, path)?;
    if last.is_empty() {
        return Err(FsError::Exists("path names the root".to_owned()));
    }
    let id = FileId::random();
    let child = Guard::new(table, table.create_as(id, kind)?);

    let bound = (|| -> Result<bool, FsError> {
        let mut parent = dir.handle().lock();
        let added = parent.dir_add(&last, id, kind)?;
        if added {
            parent.flush()?;
        }
        Ok(added)
    })();

    match bound {
        Ok(true) => {
            dir.close()?;
            Ok(child)
        }
        Ok(false) => {
            discard(child);
            Err(FsError::Exists(path.to_owned()))
        }
        Err(e) => {
            discard(child);
            Err(e)
        }
    }
}

/// Unlink a fresh inode that never became reachable and return it.
fn discard(guard: Guard<'_>) {
    {
        let _locked = guard.handle().lock();
        guard.handle().unlink();
    }
    if let Err(e) = guard.close() {
        warn!(error = %e, "failed to discard unreachable inode");
    }
}

/// Unbind the final component and unlink the inode it named.
///
/// The directory entry goes first: if anything fails afterwards the name is
/// already unreachable, so no dangling entry can point at a removed inode.
pub(crate) fn remove(table: &FileTable, root: FileId, path: &str) -> Result<(), FsError> {
    let (dir, last) = open_base_dir(table, root, path)?;
    if last.is_empty() {
        return Err(FsError::NotPermitted("cannot remove the root directory".to_owned()));
    }
    let entry = {
        let mut parent = dir.handle().lock();
        let Some(entry) = parent.dir_remove(&last)? else {
            return Err(FsError::NotFound(path.to_owned()));
        };
        parent.flush()?;
        entry
    };
    let victim = Guard::new(table, table.open_as(entry.id, entry.kind)?);
    {
        let _locked = victim.handle().lock();
        victim.handle().unlink();
    }
    victim.close()?;
    dir.close()
}
