//! Tests for part removal
//!
//! These tests verify:
//! - Rename-then-delete through a `delete_tmp_` directory
//! - Fast removal driven by checksums, with projections
//! - Fallback to recursive removal
//! - Leftovers of interrupted removals
//! - Concurrent removers of the same part

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use partstore::disk::{Disk, DiskRef, LocalDisk, SingleDiskVolume, VolumeRef, WriteMode};
use partstore::part::{
    Checksums, ColumnsDescription, PartStorage, ProjectionChecksums, RemovalOutcome,
    VersionMetadata, TransactionId,
};
use tempfile::TempDir;
use uuid::Uuid;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_volume() -> (TempDir, DiskRef, VolumeRef) {
    let temp_dir = TempDir::new().unwrap();
    let disk: DiskRef = Arc::new(LocalDisk::new("default", temp_dir.path()).unwrap());
    let volume: VolumeRef = Arc::new(SingleDiskVolume::new("main", disk.clone()));
    (temp_dir, disk, volume)
}

fn write(disk: &DiskRef, path: &str, data: &[u8]) {
    let mut out = disk
        .write_file(Path::new(path), 64, WriteMode::Rewrite)
        .unwrap();
    out.write_all(data).unwrap();
    out.finalize().unwrap();
}

/// Complete part `t/<dir>` with metadata files; returns its checksums
fn create_full_part(disk: &DiskRef, volume: &VolumeRef, dir: &str) -> (PartStorage, Checksums) {
    disk.create_directories(&Path::new("t").join(dir)).unwrap();
    write(disk, &format!("t/{}/id.bin", dir), b"0123456789");
    write(disk, &format!("t/{}/id.mrk", dir), b"mark");

    let storage = PartStorage::new(volume.clone(), "t", dir);
    let checksums = Checksums::from_directory(disk.as_ref(), &storage.full_relative_path()).unwrap();
    let mut columns = ColumnsDescription::new();
    columns.push("id", "UInt64");

    storage.write_checksums(&checksums).unwrap();
    storage.write_columns(&columns).unwrap();
    storage
        .write_version_metadata(
            &VersionMetadata::new(TransactionId::new(5, 1, Uuid::new_v4())),
            false,
        )
        .unwrap();

    (storage, checksums)
}

fn no_names() -> HashSet<String> {
    HashSet::new()
}

// =============================================================================
// Basic Removal Tests
// =============================================================================

#[test]
fn test_remove_full_part() {
    let (_temp, disk, volume) = setup_volume();
    let (storage, checksums) = create_full_part(&disk, &volume, "all_1_1_0");
    storage.write_delete_on_destroy_marker();

    let outcome = storage.remove(true, &no_names(), &checksums, &[]).unwrap();

    assert_eq!(outcome, RemovalOutcome::Removed);
    assert!(!disk.exists(Path::new("t/all_1_1_0")));
    assert!(!disk.exists(Path::new("t/delete_tmp_all_1_1_0")));
    assert!(disk.list_files(Path::new("t")).unwrap().is_empty());
}

#[test]
fn test_remove_with_projection() {
    let (_temp, disk, volume) = setup_volume();
    let (_, _) = create_full_part(&disk, &volume, "p");
    disk.create_directories(Path::new("t/p/agg.proj")).unwrap();
    write(&disk, "t/p/agg.proj/k.bin", b"key");

    let storage = PartStorage::new(volume.clone(), "t", "p");
    let projection = storage.projection("agg");
    let projection_checksums =
        Checksums::from_directory(disk.as_ref(), &projection.full_relative_path()).unwrap();
    projection.write_checksums(&projection_checksums).unwrap();
    projection.write_columns(&ColumnsDescription::new()).unwrap();

    // Parent checksums list the projection directory as one entry
    let checksums = Checksums::from_directory(disk.as_ref(), Path::new("t/p")).unwrap();
    assert!(checksums.get("agg.proj").is_some());
    storage.write_checksums(&checksums).unwrap();

    let outcome = storage
        .remove(
            true,
            &no_names(),
            &checksums,
            &[ProjectionChecksums::new("agg", projection_checksums)],
        )
        .unwrap();

    assert_eq!(outcome, RemovalOutcome::Removed);
    assert!(disk.list_files(Path::new("t")).unwrap().is_empty());
}

#[test]
fn test_remove_without_checksums_is_recursive() {
    let (_temp, disk, volume) = setup_volume();
    disk.create_directories(Path::new("t/tmp_insert_p/nested")).unwrap();
    write(&disk, "t/tmp_insert_p/half_written.bin", b"x");
    write(&disk, "t/tmp_insert_p/nested/f", b"y");
    let storage = PartStorage::new(volume, "t", "tmp_insert_p");

    let outcome = storage
        .remove(true, &no_names(), &Checksums::new(), &[])
        .unwrap();

    assert_eq!(outcome, RemovalOutcome::Removed);
    assert!(disk.list_files(Path::new("t")).unwrap().is_empty());
}

#[test]
fn test_remove_falls_back_on_unexpected_files() {
    let (_temp, disk, volume) = setup_volume();
    let (storage, checksums) = create_full_part(&disk, &volume, "p");
    write(&disk, "t/p/unlisted.bin", b"stray");

    let outcome = storage.remove(true, &no_names(), &checksums, &[]).unwrap();

    assert_eq!(outcome, RemovalOutcome::Removed);
    assert!(disk.list_files(Path::new("t")).unwrap().is_empty());
}

#[test]
fn test_remove_falls_back_on_missing_listed_file() {
    let (_temp, disk, volume) = setup_volume();
    let (storage, checksums) = create_full_part(&disk, &volume, "p");
    disk.remove_file(Path::new("t/p/id.mrk")).unwrap();

    let outcome = storage.remove(true, &no_names(), &checksums, &[]).unwrap();

    assert_eq!(outcome, RemovalOutcome::Removed);
    assert!(!disk.exists(Path::new("t/delete_tmp_p")));
}

#[test]
fn test_remove_missing_part_is_already_gone() {
    let (_temp, disk, volume) = setup_volume();
    disk.create_directories(Path::new("t")).unwrap();
    let storage = PartStorage::new(volume, "t", "ghost");

    let outcome = storage
        .remove(true, &no_names(), &Checksums::new(), &[])
        .unwrap();

    assert_eq!(outcome, RemovalOutcome::AlreadyGone);
}

#[test]
fn test_remove_clears_interrupted_leftover() {
    let (_temp, disk, volume) = setup_volume();
    let (storage, checksums) = create_full_part(&disk, &volume, "p");
    disk.create_directories(Path::new("t/delete_tmp_p")).unwrap();
    write(&disk, "t/delete_tmp_p/old.bin", b"left behind");

    let outcome = storage.remove(true, &no_names(), &checksums, &[]).unwrap();

    assert_eq!(outcome, RemovalOutcome::Removed);
    assert!(disk.list_files(Path::new("t")).unwrap().is_empty());
}

#[test]
fn test_remove_keeps_sibling_parts() {
    let (_temp, disk, volume) = setup_volume();
    let (storage, checksums) = create_full_part(&disk, &volume, "all_1_1_0");
    create_full_part(&disk, &volume, "all_2_2_0");

    storage.remove(false, &no_names(), &checksums, &[]).unwrap();

    assert_eq!(disk.list_files(Path::new("t")).unwrap(), vec!["all_2_2_0"]);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_remove_exactly_one_wins() {
    for _ in 0..20 {
        let (_temp, disk, volume) = setup_volume();
        let (storage, checksums) = create_full_part(&disk, &volume, "all_1_1_0");
        let other = storage.clone();

        let outcomes = crossbeam::scope(|s| {
            let a = s.spawn(|_| storage.remove(true, &no_names(), &checksums, &[]));
            let b = s.spawn(|_| other.remove(true, &no_names(), &checksums, &[]));
            (a.join().unwrap(), b.join().unwrap())
        })
        .unwrap();

        let (a, b) = (outcomes.0.unwrap(), outcomes.1.unwrap());
        let removed = [a, b]
            .iter()
            .filter(|o| **o == RemovalOutcome::Removed)
            .count();
        assert_eq!(removed, 1);
        assert!(disk.list_files(Path::new("t")).unwrap().is_empty());
    }
}
