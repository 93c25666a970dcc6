//! Directory entry tables and their on-stream codec.
//!
//! A directory's payload is the serialized name table: for each entry a
//! little-endian `u16` name length, the UTF-8 name bytes, the 16-byte child
//! id, and one kind byte. The whole table is rewritten on flush; partial or
//! trailing bytes on load are corruption.

use rustc_hash::FxHashMap;

use crate::error::FsError;
use crate::fs::inode::InodeHeader;
use crate::fs::FileKind;
use crate::id::{FileId, ID_LEN};
use crate::storage::Stream;

/// Longest allowed entry name, in bytes.
pub const NAME_MAX: usize = 255;

/// What a directory knows about one child: its id and kind, never a memory
/// reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    pub id: FileId,
    pub kind: FileKind,
}

pub(crate) struct Directory {
    stream: Box<dyn Stream>,
    entries: FxHashMap<String, DirEntry>,
    dirty: bool,
}

impl Directory {
    pub(crate) fn empty(stream: Box<dyn Stream>) -> Self {
        Self {
            stream,
            entries: FxHashMap::default(),
            dirty: false,
        }
    }

    /// Load and decode the table from the payload stream. `size` is the
    /// committed table length from the inode header.
    pub(crate) fn load(mut stream: Box<dyn Stream>, size: u64) -> Result<Self, FsError> {
        let len = usize::try_from(size)
            .map_err(|_| FsError::Corrupted("directory table length overflows memory".to_owned()))?;
        let mut raw = vec![0u8; len];
        let n = stream.read_at(&mut raw, 0)?;
        if n != len {
            return Err(FsError::Corrupted(format!(
                "directory table truncated: {n} of {len} bytes"
            )));
        }
        let entries = decode_entries(&raw)?;
        Ok(Self {
            stream,
            entries,
            dirty: false,
        })
    }

    pub(crate) fn get(&self, name: &str) -> Option<DirEntry> {
        self.entries.get(name).copied()
    }

    /// Insert a binding. Returns `false` when the name is already present;
    /// existing bindings are never overwritten.
    pub(crate) fn insert(&mut self, name: &str, entry: DirEntry) -> Result<bool, FsError> {
        validate_name(name)?;
        if self.entries.contains_key(name) {
            return Ok(false);
        }
        self.entries.insert(name.to_owned(), entry);
        self.dirty = true;
        Ok(true)
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<DirEntry> {
        let removed = self.entries.remove(name);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Visit every entry exactly once; stop early when `visit` returns
    /// `false`. Callers hold the inode lock, so the table cannot change
    /// underneath the iteration.
    pub(crate) fn for_each(&self, mut visit: impl FnMut(&str, DirEntry) -> bool) {
        for (name, entry) in &self.entries {
            if !visit(name, *entry) {
                break;
            }
        }
    }

    /// Rewrite the table if any binding changed, updating the header size to
    /// the committed table length.
    pub(crate) fn flush(&mut self, header: &mut InodeHeader) -> Result<(), FsError> {
        if self.dirty {
            let raw = encode_entries(&self.entries);
            self.stream.resize(raw.len() as u64)?;
            self.stream.write_at(&raw, 0)?;
            header.set_size(raw.len() as u64);
            self.dirty = false;
        }
        self.stream.flush()
    }
}

fn validate_name(name: &str) -> Result<(), FsError> {
    if name.is_empty() {
        return Err(FsError::InvalidArgument("empty entry name".to_owned()));
    }
    if name.len() > NAME_MAX {
        return Err(FsError::InvalidArgument(format!(
            "entry name longer than {NAME_MAX} bytes"
        )));
    }
    if name.bytes().any(|b| b == b'/' || b == 0) {
        return Err(FsError::InvalidArgument(format!(
            "entry name {name:?} contains '/' or NUL"
        )));
    }
    Ok(())
}

fn encode_entries(entries: &FxHashMap<String, DirEntry>) -> Vec<u8> {
    let mut out = Vec::with_capacity(entries.len() * 32);
    for (name, entry) in entries {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "names are validated to at most NAME_MAX bytes on insert"
        )]
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(entry.id.as_bytes());
        out.push(entry.kind.as_u8());
    }
    out
}

fn decode_entries(raw: &[u8]) -> Result<FxHashMap<String, DirEntry>, FsError> {
    let mut entries = FxHashMap::default();
    let mut at = 0usize;
    while at < raw.len() {
        let rest = raw.len() - at;
        if rest < 2 {
            return Err(FsError::Corrupted("dangling bytes after last entry".to_owned()));
        }
        let name_len = usize::from(u16::from_le_bytes([raw[at], raw[at + 1]]));
        at += 2;
        if name_len == 0 || name_len > NAME_MAX {
            return Err(FsError::Corrupted(format!("entry name length {name_len}")));
        }
        if raw.len() - at < name_len + ID_LEN + 1 {
            return Err(FsError::Corrupted("entry truncated".to_owned()));
        }
        let name = std::str::from_utf8(&raw[at..at + name_len])
            .map_err(|_| FsError::Corrupted("entry name is not UTF-8".to_owned()))?
            .to_owned();
        at += name_len;
        let mut id = [0u8; ID_LEN];
        id.copy_from_slice(&raw[at..at + ID_LEN]);
        at += ID_LEN;
        let kind = FileKind::from_u8(raw[at])
            .ok_or_else(|| FsError::Corrupted(format!("unknown entry kind {}", raw[at])))?;
        at += 1;
        if entries
            .insert(
                name.clone(),
                DirEntry {
                    id: FileId::from_bytes(id),
                    kind,
                },
            )
            .is_some()
        {
            return Err(FsError::Corrupted(format!("duplicate entry name {name:?}")));
        }
    }
    Ok(entries)
}
