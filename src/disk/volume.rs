//! Volumes and space reservations
//!
//! A volume is the placement group a part is written to. It hands out the
//! disk parts live on and grants space reservations against it.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::DiskRef;

/// Shared handle to a volume
pub type VolumeRef = Arc<dyn Volume>;

/// Placement policy consumed by part storage
pub trait Volume: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Disk the volume currently places parts on
    fn disk(&self) -> DiskRef;

    /// Reserve `bytes`; `None` when no disk in the volume can hold them
    fn reserve(&self, bytes: u64) -> Option<Reservation>;
}

/// Space granted by a volume, returned to it on drop
#[derive(Debug)]
pub struct Reservation {
    disk: DiskRef,
    size: u64,
    ledger: Arc<Mutex<u64>>,
}

impl Reservation {
    /// Disk the space was reserved on
    pub fn disk(&self) -> &DiskRef {
        &self.disk
    }

    /// Reserved bytes
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let mut reserved = self.ledger.lock();
        *reserved = reserved.saturating_sub(self.size);
    }
}

/// Volume made of exactly one disk
///
/// With a capacity, outstanding reservations are counted against it;
/// without one every reservation succeeds.
#[derive(Debug)]
pub struct SingleDiskVolume {
    name: String,
    disk: DiskRef,
    capacity: Option<u64>,
    /// Bytes held by live reservations
    reserved: Arc<Mutex<u64>>,
}

impl SingleDiskVolume {
    /// Unbounded volume over `disk`
    pub fn new(name: impl Into<String>, disk: DiskRef) -> Self {
        Self {
            name: name.into(),
            disk,
            capacity: None,
            reserved: Arc::new(Mutex::new(0)),
        }
    }

    /// Volume over `disk` that grants at most `capacity` bytes at a time
    pub fn with_capacity(name: impl Into<String>, disk: DiskRef, capacity: u64) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::new(name, disk)
        }
    }

    /// Bytes currently held by outstanding reservations
    pub fn reserved_bytes(&self) -> u64 {
        *self.reserved.lock()
    }
}

impl Volume for SingleDiskVolume {
    fn name(&self) -> &str {
        &self.name
    }

    fn disk(&self) -> DiskRef {
        self.disk.clone()
    }

    fn reserve(&self, bytes: u64) -> Option<Reservation> {
        let mut reserved = self.reserved.lock();

        if let Some(capacity) = self.capacity {
            let available = capacity.saturating_sub(*reserved);
            if bytes > available {
                tracing::debug!(
                    "Volume {}: cannot reserve {} bytes, {} available",
                    self.name,
                    bytes,
                    available
                );
                return None;
            }
        }

        *reserved += bytes;
        tracing::trace!("Volume {}: reserved {} bytes", self.name, bytes);

        Some(Reservation {
            disk: self.disk.clone(),
            size: bytes,
            ledger: self.reserved.clone(),
        })
    }
}
