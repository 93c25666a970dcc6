#![allow(dead_code, missing_docs, clippy::unwrap_used)]

pub mod sealing;

use std::sync::Arc;

use cloakfs::crypto::{CryptoEngine, PlainEngine};
use cloakfs::storage::memory::MemoryStorage;
use cloakfs::{FileSystem, MountOptions};

/// Mount a fresh in-memory filesystem with default options.
pub fn mount() -> (Arc<MemoryStorage>, FileSystem) {
    mount_with(MountOptions::default())
}

pub fn mount_with(options: MountOptions) -> (Arc<MemoryStorage>, FileSystem) {
    let storage = Arc::new(MemoryStorage::new());
    let fs = FileSystem::new(storage.clone(), Arc::new(PlainEngine), options).unwrap();
    (storage, fs)
}

/// Mount over an existing backing store, as a remount would.
pub fn remount(storage: &Arc<MemoryStorage>, options: MountOptions) -> FileSystem {
    FileSystem::new(storage.clone(), Arc::new(PlainEngine), options).unwrap()
}

pub fn mount_sealed(key: [u8; 32]) -> (Arc<MemoryStorage>, FileSystem) {
    let storage = Arc::new(MemoryStorage::new());
    let engine: Arc<dyn CryptoEngine> = Arc::new(sealing::SealingEngine::new(key));
    let fs = FileSystem::new(storage.clone(), engine, MountOptions::default()).unwrap();
    (storage, fs)
}

pub fn remount_sealed(storage: &Arc<MemoryStorage>, key: [u8; 32]) -> Result<FileSystem, cloakfs::FsError> {
    let engine: Arc<dyn CryptoEngine> = Arc::new(sealing::SealingEngine::new(key));
    FileSystem::new(storage.clone(), engine, MountOptions::default())
}

/// The byte pattern used by the large-file scenarios.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Names of all backing streams that do not belong to the root directory.
pub fn non_root_streams(storage: &MemoryStorage) -> Vec<String> {
    let root_prefix = cloakfs::FileId::ROOT.hex()[..2].to_owned();
    let root_rest = cloakfs::FileId::ROOT.hex()[2..].to_owned();
    storage
        .stream_names()
        .into_iter()
        .filter(|name| !name.starts_with(&format!("{root_prefix}/{root_rest}")))
        .collect()
}
