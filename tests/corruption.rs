#![allow(clippy::unwrap_used, missing_docs)]

mod common;

use cloakfs::storage::{data_name, Storage as _};
use cloakfs::{Context, FileId, FsError, MountOptions, OpenFlags};
use common::{mount, non_root_streams, remount};

fn ctx() -> Context {
    Context { uid: 0, gid: 0 }
}

#[test]
fn mangled_header_surfaces_as_corruption() {
    let (storage, fs) = mount();
    fs.release(fs.create(ctx(), "/f", 0o644).unwrap()).unwrap();
    drop(fs);

    // Stomp the mode word in the file's header slot.
    let meta = non_root_streams(&storage)
        .into_iter()
        .find(|name| name.ends_with(".meta"))
        .expect("the file must have a meta stream");
    let mut stream = storage.open_stream(&meta).unwrap();
    stream.write_at(&[0xff, 0xff, 0xff, 0xff], 0).unwrap();

    let fs = remount(&storage, MountOptions::default());
    assert!(matches!(fs.getattr("/f"), Err(FsError::Corrupted(_))));
    assert!(matches!(
        fs.open("/f", OpenFlags::RDONLY),
        Err(FsError::Corrupted(_))
    ));
}

#[test]
fn truncated_directory_payload_surfaces_as_corruption() {
    let (storage, fs) = mount();
    fs.release(fs.create(ctx(), "/entry", 0o644).unwrap()).unwrap();
    drop(fs);

    // Chop the root directory's entry table in half; the committed size in
    // its header no longer matches.
    let root_data = data_name(FileId::ROOT);
    let mut stream = storage.open_stream(&root_data).unwrap();
    let half = stream.size().unwrap() / 2;
    stream.resize(half).unwrap();

    let result = remount_result(&storage);
    assert!(matches!(result, Err(FsError::Corrupted(_))));
}

#[test]
fn missing_header_surfaces_as_corruption() {
    let (storage, fs) = mount();
    fs.release(fs.create(ctx(), "/f", 0o644).unwrap()).unwrap();
    drop(fs);

    let meta = non_root_streams(&storage)
        .into_iter()
        .find(|name| name.ends_with(".meta"))
        .unwrap();
    let mut stream = storage.open_stream(&meta).unwrap();
    stream.resize(0).unwrap();

    let fs = remount(&storage, MountOptions::default());
    assert!(matches!(fs.getattr("/f"), Err(FsError::Corrupted(_))));
}

#[test]
fn vanished_streams_surface_as_not_found() {
    let (storage, fs) = mount();
    fs.release(fs.create(ctx(), "/f", 0o644).unwrap()).unwrap();
    drop(fs);

    for name in non_root_streams(&storage) {
        storage.remove(&name).unwrap();
    }

    let fs = remount(&storage, MountOptions::default());
    assert!(matches!(fs.getattr("/f"), Err(FsError::NotFound(_))));
}

fn remount_result(
    storage: &std::sync::Arc<cloakfs::storage::memory::MemoryStorage>,
) -> Result<cloakfs::FileSystem, FsError> {
    cloakfs::FileSystem::new(
        storage.clone(),
        std::sync::Arc::new(cloakfs::crypto::PlainEngine),
        MountOptions::default(),
    )
}
