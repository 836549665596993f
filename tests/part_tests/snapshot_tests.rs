//! Tests for freeze, clone and backup
//!
//! These tests verify:
//! - Frozen snapshots share inodes and drop live-part metadata
//! - Clones are independent copies, also across disks
//! - Backup entries pin hard links in a shared temporary directory

use std::cell::Cell;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use partstore::disk::{Disk, DiskRef, LocalDisk, SingleDiskVolume, VolumeRef, WriteMode};
use partstore::part::{
    BackupSource, Checksums, PartStorage, TemporaryDirs, TransactionId, VersionMetadata,
};
use partstore::{Config, PartError, Result};
use tempfile::TempDir;
use uuid::Uuid;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_volume(name: &str) -> (TempDir, DiskRef, VolumeRef) {
    let temp_dir = TempDir::new().unwrap();
    let disk: DiskRef = Arc::new(LocalDisk::new(name, temp_dir.path()).unwrap());
    let volume: VolumeRef = Arc::new(SingleDiskVolume::new(name, disk.clone()));
    (temp_dir, disk, volume)
}

fn write(disk: &DiskRef, path: &str, data: &[u8]) {
    let mut out = disk
        .write_file(Path::new(path), 64, WriteMode::Rewrite)
        .unwrap();
    out.write_all(data).unwrap();
    out.finalize().unwrap();
}

/// Live transactional part `t/<dir>` with a delete marker
fn create_live_part(disk: &DiskRef, volume: &VolumeRef, dir: &str) -> (PartStorage, Checksums) {
    disk.create_directories(&Path::new("t").join(dir).join("idx.proj")).unwrap();
    write(disk, &format!("t/{}/id.bin", dir), b"0123456789");
    write(disk, &format!("t/{}/idx.proj/k.bin", dir), b"key");

    let storage = PartStorage::new(volume.clone(), "t", dir);
    let checksums = Checksums::from_directory(disk.as_ref(), &storage.full_relative_path()).unwrap();
    storage.write_checksums(&checksums).unwrap();
    storage
        .write_version_metadata(
            &VersionMetadata::new(TransactionId::new(5, 1, Uuid::new_v4())),
            false,
        )
        .unwrap();
    storage.write_delete_on_destroy_marker();
    (storage, checksums)
}

// =============================================================================
// Freeze Tests
// =============================================================================

#[test]
fn test_freeze_hard_links_and_strips_metadata() {
    let (_temp, disk, volume) = setup_volume("default");
    let (storage, _) = create_live_part(&disk, &volume, "all_1_1_0");

    let frozen = storage
        .freeze("shadow/1/t", "all_1_1_0", false, None, false)
        .unwrap();

    assert_eq!(frozen.full_relative_path(), Path::new("shadow/1/t/all_1_1_0"));
    assert!(frozen.exists_file("id.bin"));
    assert!(frozen.exists_file("checksums.txt"));
    assert!(frozen.exists_file("idx.proj/k.bin"));
    assert!(!frozen.exists_file("delete-on-destroy.txt"));
    assert!(!frozen.exists_file("txn_version.txt"));

    assert_eq!(storage.ref_count("id.bin").unwrap(), 2);
    assert!(storage.exists_file("delete-on-destroy.txt"));
    assert!(storage.exists_file("txn_version.txt"));
    assert_eq!(
        frozen.load_version_metadata().unwrap(),
        VersionMetadata::prehistoric()
    );
}

#[test]
fn test_freeze_copy_instead_of_hardlink() {
    let (_temp, disk, volume) = setup_volume("default");
    let (storage, _) = create_live_part(&disk, &volume, "p");

    let frozen = storage.freeze("shadow", "p", false, None, true).unwrap();

    assert_eq!(storage.ref_count("id.bin").unwrap(), 1);
    assert_eq!(frozen.read_file("id.bin").unwrap(), b"0123456789");
}

#[test]
fn test_freeze_runs_save_metadata() {
    let (_temp, disk, volume) = setup_volume("default");
    let (storage, _) = create_live_part(&disk, &volume, "p");
    let called = Cell::new(false);

    let save = |d: &DiskRef| -> Result<()> {
        called.set(true);
        assert_eq!(d.name(), "default");
        Ok(())
    };
    storage.freeze("shadow", "p", false, Some(&save), false).unwrap();

    assert!(called.get());
}

#[test]
fn test_freeze_propagates_save_metadata_error() {
    let (_temp, disk, volume) = setup_volume("default");
    let (storage, _) = create_live_part(&disk, &volume, "p");

    let save = |_: &DiskRef| -> Result<()> { Err(PartError::Logical("no metadata".into())) };
    let result = storage.freeze("shadow", "p", false, Some(&save), false);

    assert!(matches!(result, Err(PartError::Logical(_))));
}

#[test]
fn test_freeze_refuses_existing_destination() {
    let (_temp, disk, volume) = setup_volume("default");
    let (storage, _) = create_live_part(&disk, &volume, "p");
    disk.create_directories(Path::new("shadow/p")).unwrap();

    let result = storage.freeze("shadow", "p", false, None, false);

    assert!(matches!(result, Err(PartError::AlreadyExists(_))));
}

#[cfg(unix)]
#[test]
fn test_failed_freeze_leaves_no_destination() {
    let (temp, disk, _) = setup_volume("default");
    let config = Arc::new(Config::builder().freeze_retries(2).build());
    let volume: VolumeRef = Arc::new(SingleDiskVolume::new("default", disk.clone()));
    let (_, _) = create_live_part(&disk, &volume, "p");
    let storage = PartStorage::with_config(volume, "t", "p", config);

    // Copying a dangling link fails on every attempt
    std::os::unix::fs::symlink(temp.path().join("nowhere"), temp.path().join("t/p/dangling"))
        .unwrap();

    let result = storage.freeze("shadow", "p", false, None, true);

    assert!(result.is_err());
    assert!(disk.exists(Path::new("shadow")));
    assert!(!disk.exists(Path::new("shadow/p")));
    assert!(storage.exists_file("id.bin"));
}

#[test]
fn test_frozen_then_cloned_has_no_version_metadata() {
    let (_temp, disk, volume) = setup_volume("default");
    let (storage, _) = create_live_part(&disk, &volume, "p");

    let frozen = storage.freeze("shadow", "p", false, None, false).unwrap();
    let cloned = frozen.clone_to("restore", "p").unwrap();

    assert!(!cloned.exists_file("txn_version.txt"));
    assert!(!cloned.exists_file("delete-on-destroy.txt"));
}

// =============================================================================
// Clone Tests
// =============================================================================

#[test]
fn test_clone_copies_and_strips_marker() {
    let (_temp, disk, volume) = setup_volume("default");
    let (storage, checksums) = create_live_part(&disk, &volume, "p");

    let cloned = storage.clone_to("copies", "p_copy").unwrap();

    assert_eq!(cloned.full_relative_path(), Path::new("copies/p_copy"));
    assert_eq!(storage.ref_count("id.bin").unwrap(), 1);
    assert_eq!(cloned.read_file("idx.proj/k.bin").unwrap(), b"key");
    assert!(!cloned.exists_file("delete-on-destroy.txt"));
    assert!(cloned.exists_file("txn_version.txt"));
    cloned.check_consistency(&checksums).unwrap();
}

#[test]
fn test_clone_replaces_existing_destination() {
    let (_temp, disk, volume) = setup_volume("default");
    let (storage, _) = create_live_part(&disk, &volume, "p");
    disk.create_directories(Path::new("copies/p")).unwrap();
    write(&disk, "copies/p/stale.bin", b"old");

    let cloned = storage.clone_to("copies", "p").unwrap();

    assert!(!cloned.exists_file("stale.bin"));
    assert!(cloned.exists_file("id.bin"));
}

#[test]
fn test_clone_to_other_disk() {
    let (_temp_a, disk_a, volume_a) = setup_volume("a");
    let (_temp_b, _disk_b, volume_b) = setup_volume("b");
    let (storage, checksums) = create_live_part(&disk_a, &volume_a, "p");

    let cloned = storage.clone_to_volume(volume_b, "t", "p").unwrap();

    assert_eq!(cloned.disk_name(), "b");
    assert_eq!(cloned.read_file("id.bin").unwrap(), b"0123456789");
    assert_eq!(cloned.read_checksums().unwrap(), checksums);
    assert!(!cloned.exists_file("delete-on-destroy.txt"));
}

// =============================================================================
// Backup Tests
// =============================================================================

#[test]
fn test_backup_hard_links_checksummed_files() {
    let (_temp, disk, volume) = setup_volume("default");
    let (storage, checksums) = create_live_part(&disk, &volume, "p");
    let mut temp_dirs = TemporaryDirs::new();
    let inline: BTreeSet<String> = ["checksums.txt".to_string()].into_iter().collect();

    let entries = storage.backup(&mut temp_dirs, &checksums, &inline).unwrap();

    // id.bin hard-linked, idx.proj skipped, checksums.txt inline
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].relative_path(), "p/id.bin");
    assert!(entries[0].is_hard_linked());
    assert_eq!(entries[0].size(), 10);
    assert_eq!(entries[0].checksum(), checksums.get("id.bin").unwrap().file_hash);
    assert_eq!(entries[0].read().unwrap().as_ref(), b"0123456789");
    assert_eq!(storage.ref_count("id.bin").unwrap(), 2);

    assert_eq!(entries[1].relative_path(), "p/checksums.txt");
    assert!(matches!(entries[1].source(), BackupSource::SmallFile { .. }));
    assert_eq!(
        entries[1].read().unwrap().as_ref(),
        storage.read_file("checksums.txt").unwrap().as_slice()
    );
}

#[test]
fn test_backup_temp_dir_shared_and_released() {
    let (_temp, disk, volume) = setup_volume("default");
    let (first, checksums_first) = create_live_part(&disk, &volume, "p1");
    let (second, checksums_second) = create_live_part(&disk, &volume, "p2");
    let mut temp_dirs = TemporaryDirs::new();

    let entries_first = first
        .backup(&mut temp_dirs, &checksums_first, &BTreeSet::new())
        .unwrap();
    let entries_second = second
        .backup(&mut temp_dirs, &checksums_second, &BTreeSet::new())
        .unwrap();

    assert_eq!(temp_dirs.len(), 1);
    let temp_path = temp_dirs.get("default").unwrap().path().to_path_buf();
    assert!(disk.exists(&temp_path.join("p1/id.bin")));
    assert!(disk.exists(&temp_path.join("p2/id.bin")));

    // The directory lives as long as any entry or the registry holds it
    drop(temp_dirs);
    assert!(disk.exists(&temp_path));
    drop(entries_first);
    assert!(disk.exists(&temp_path));
    drop(entries_second);
    assert!(!disk.exists(&temp_path));

    assert_eq!(first.ref_count("id.bin").unwrap(), 1);
}

#[test]
fn test_backup_projection_through_own_handle() {
    let (_temp, disk, volume) = setup_volume("default");
    let (storage, checksums) = create_live_part(&disk, &volume, "p");
    let mut temp_dirs = TemporaryDirs::new();

    let entries = storage.backup(&mut temp_dirs, &checksums, &BTreeSet::new()).unwrap();
    assert!(entries.iter().all(|e| !e.relative_path().contains("idx.proj")));

    let projection = storage.projection("idx");
    let projection_checksums =
        Checksums::from_directory(disk.as_ref(), &projection.full_relative_path()).unwrap();
    let projection_entries = projection
        .backup(&mut temp_dirs, &projection_checksums, &BTreeSet::new())
        .unwrap();

    assert_eq!(projection_entries.len(), 1);
    assert_eq!(projection_entries[0].relative_path(), "idx.proj/k.bin");
    assert_eq!(projection_entries[0].read().unwrap().as_ref(), b"key");
}
