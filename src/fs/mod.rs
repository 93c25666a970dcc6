//! The logical filesystem object model and its operations.

pub mod dir;
pub mod file;
pub mod inode;
pub mod ops;
pub(crate) mod resolve;
pub mod symlink;
pub mod table;

use std::time::SystemTime;

use bitflags::bitflags;

/// What an inode is. Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    RegularFile,
    Directory,
    Symlink,
}

impl FileKind {
    pub(crate) const COUNT: usize = 3;

    /// The `S_IFMT` bits for this kind.
    #[must_use]
    pub fn mode_bits(self) -> u32 {
        match self {
            Self::RegularFile => libc::S_IFREG,
            Self::Directory => libc::S_IFDIR,
            Self::Symlink => libc::S_IFLNK,
        }
    }

    /// Recover the kind from a full mode word, if its file-type bits name a
    /// kind this filesystem stores.
    #[must_use]
    pub fn from_mode(mode: u32) -> Option<Self> {
        match mode & libc::S_IFMT {
            libc::S_IFREG => Some(Self::RegularFile),
            libc::S_IFDIR => Some(Self::Directory),
            libc::S_IFLNK => Some(Self::Symlink),
            _ => None,
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Self::RegularFile => 0,
            Self::Directory => 1,
            Self::Symlink => 2,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::RegularFile),
            1 => Some(Self::Directory),
            2 => Some(Self::Symlink),
            _ => None,
        }
    }

    pub(crate) fn index(self) -> usize {
        self.as_u8() as usize
    }
}

bitflags! {
    /// Open intent, mirroring the kernel's `O_*` flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: i32 {
        const RDONLY = libc::O_RDONLY;
        const WRONLY = libc::O_WRONLY;
        const RDWR = libc::O_RDWR;
        const APPEND = libc::O_APPEND;
        const TRUNC = libc::O_TRUNC;
        const CREAT = libc::O_CREAT;
        const EXCL = libc::O_EXCL;
    }
}

impl OpenFlags {
    /// Whether this open can mutate the file. Gates read-only mounts.
    #[must_use]
    pub fn wants_write(self) -> bool {
        self.intersects(Self::WRONLY | Self::RDWR | Self::APPEND | Self::TRUNC)
    }
}

impl From<i32> for OpenFlags {
    fn from(raw: i32) -> Self {
        Self::from_bits_truncate(raw)
    }
}

/// A filled stat buffer, straight from an inode header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub kind: FileKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub size: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub birthtime: SystemTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_mode_bits() {
        for kind in [FileKind::RegularFile, FileKind::Directory, FileKind::Symlink] {
            assert_eq!(FileKind::from_mode(kind.mode_bits() | 0o644), Some(kind));
            assert_eq!(FileKind::from_u8(kind.as_u8()), Some(kind));
        }
    }

    #[test]
    fn unknown_mode_bits_have_no_kind() {
        assert_eq!(FileKind::from_mode(libc::S_IFSOCK | 0o644), None);
        assert_eq!(FileKind::from_u8(9), None);
    }

    #[test]
    fn write_intent_detection() {
        assert!(!OpenFlags::RDONLY.wants_write());
        assert!(OpenFlags::RDWR.wants_write());
        assert!(OpenFlags::WRONLY.wants_write());
        assert!((OpenFlags::RDONLY | OpenFlags::TRUNC).wants_write());
        assert!((OpenFlags::RDONLY | OpenFlags::APPEND).wants_write());
    }
}
