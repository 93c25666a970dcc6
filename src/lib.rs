//! cloakfs — the logical engine of a userspace encrypted filesystem.
//!
//! Files, directories, and symlinks are keyed by opaque 128-bit ids; each
//! inode's header and payload live in two authenticated streams on a
//! [`storage::Storage`] backend, wrapped by a [`crypto::CryptoEngine`]. The
//! engine provides the in-memory object model, the process-wide
//! [`fs::table::FileTable`] (at most one live instance per id, refcounted,
//! with deferred unlink), path resolution, and the POSIX-style operation
//! surface on [`FileSystem`]. The kernel bridge, the real cipher, and the
//! on-disk storage backend are the embedder's.

pub mod crypto;
pub mod error;
pub mod fs;
pub mod id;
pub mod options;
pub mod storage;

pub use error::{reply_code, FsError};
pub use fs::ops::{Context, FileSystem, ReaddirEntry};
pub use fs::{FileKind, FileStat, OpenFlags};
pub use id::FileId;
pub use options::MountOptions;
