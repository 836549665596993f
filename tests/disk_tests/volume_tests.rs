//! Tests for SingleDiskVolume reservations

use std::sync::Arc;

use partstore::disk::{DiskRef, LocalDisk, SingleDiskVolume, Volume};
use tempfile::TempDir;

fn setup_disk() -> (TempDir, DiskRef) {
    let temp_dir = TempDir::new().unwrap();
    let disk: DiskRef = Arc::new(LocalDisk::new("default", temp_dir.path()).unwrap());
    (temp_dir, disk)
}

#[test]
fn test_unbounded_volume_always_reserves() {
    let (_temp, disk) = setup_disk();
    let volume = SingleDiskVolume::new("main", disk);

    let reservation = volume.reserve(u64::MAX / 2).unwrap();

    assert_eq!(reservation.size(), u64::MAX / 2);
    assert_eq!(reservation.disk().name(), "default");
    assert_eq!(volume.name(), "main");
}

#[test]
fn test_capacity_limits_reservations() {
    let (_temp, disk) = setup_disk();
    let volume = SingleDiskVolume::with_capacity("main", disk, 100);

    let first = volume.reserve(60).unwrap();
    assert_eq!(volume.reserved_bytes(), 60);

    assert!(volume.reserve(50).is_none());

    let second = volume.reserve(40).unwrap();
    assert_eq!(volume.reserved_bytes(), 100);

    drop(first);
    drop(second);
    assert_eq!(volume.reserved_bytes(), 0);
}

#[test]
fn test_dropped_reservation_frees_space() {
    let (_temp, disk) = setup_disk();
    let volume = SingleDiskVolume::with_capacity("main", disk, 10);

    {
        let _r = volume.reserve(10).unwrap();
        assert!(volume.reserve(1).is_none());
    }

    assert!(volume.reserve(10).is_some());
}
