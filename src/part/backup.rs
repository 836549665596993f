//! Backup entries
//!
//! A backup of a part is a list of immutable entries. Checksummed files are
//! hard-linked into a temporary directory so the entry pins the original
//! inode without copying bytes; small files without checksums are read
//! inline.
//!
//! All entries taken from one disk share that disk's [`TemporaryDirOnDisk`]
//! through an `Arc`; the directory is removed once the last entry (and the
//! caller's [`TemporaryDirs`]) let go of it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use uuid::Uuid;
use xxhash_rust::xxh3::xxh3_128;

use crate::disk::DiskRef;
use crate::error::Result;

/// Temporary directory removed when dropped
#[derive(Debug)]
pub struct TemporaryDirOnDisk {
    disk: DiskRef,
    path: PathBuf,
}

impl TemporaryDirOnDisk {
    /// Create `<prefix><random>` on `disk`
    pub fn new(disk: DiskRef, prefix: &str) -> Result<Self> {
        let path = PathBuf::from(format!("{}{}", prefix, Uuid::new_v4().simple()));
        disk.create_directories(&path)?;
        Ok(Self { disk, path })
    }

    /// Path relative to the disk root
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn disk(&self) -> &DiskRef {
        &self.disk
    }
}

impl Drop for TemporaryDirOnDisk {
    fn drop(&mut self) {
        if let Err(e) = self.disk.remove_recursive(&self.path) {
            tracing::error!(
                "Cannot remove temporary directory {}: {}",
                self.disk.path().join(&self.path).display(),
                e
            );
        }
    }
}

/// One shared temporary directory per disk, reused across backup calls
#[derive(Debug, Default)]
pub struct TemporaryDirs {
    dirs: HashMap<String, Arc<TemporaryDirOnDisk>>,
}

impl TemporaryDirs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory for `disk`, created on first use
    pub fn get_or_create(&mut self, disk: &DiskRef, prefix: &str) -> Result<Arc<TemporaryDirOnDisk>> {
        if let Some(dir) = self.dirs.get(disk.name()) {
            return Ok(dir.clone());
        }

        let dir = Arc::new(TemporaryDirOnDisk::new(disk.clone(), prefix)?);
        self.dirs.insert(disk.name().to_string(), dir.clone());
        Ok(dir)
    }

    pub fn get(&self, disk_name: &str) -> Option<&Arc<TemporaryDirOnDisk>> {
        self.dirs.get(disk_name)
    }

    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }
}

/// Where the bytes of a backup entry come from
#[derive(Debug, Clone)]
pub enum BackupSource {
    /// Hard link inside a shared temporary directory
    ImmutableFile {
        disk: DiskRef,
        path: PathBuf,
        file_size: u64,
        file_hash: u128,
        temp_dir: Arc<TemporaryDirOnDisk>,
    },
    /// Content captured at backup time
    SmallFile { data: Bytes },
}

/// A file of a part, as handed to the backup writer
#[derive(Debug, Clone)]
pub struct BackupEntry {
    relative_path: String,
    source: BackupSource,
}

impl BackupEntry {
    pub(crate) fn immutable_file(
        relative_path: String,
        disk: DiskRef,
        path: PathBuf,
        file_size: u64,
        file_hash: u128,
        temp_dir: Arc<TemporaryDirOnDisk>,
    ) -> Self {
        Self {
            relative_path,
            source: BackupSource::ImmutableFile {
                disk,
                path,
                file_size,
                file_hash,
                temp_dir,
            },
        }
    }

    pub(crate) fn small_file(relative_path: String, data: Bytes) -> Self {
        Self {
            relative_path,
            source: BackupSource::SmallFile { data },
        }
    }

    /// `<part_dir>/<file>` path inside the backup
    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    pub fn source(&self) -> &BackupSource {
        &self.source
    }

    pub fn size(&self) -> u64 {
        match &self.source {
            BackupSource::ImmutableFile { file_size, .. } => *file_size,
            BackupSource::SmallFile { data } => data.len() as u64,
        }
    }

    pub fn checksum(&self) -> u128 {
        match &self.source {
            BackupSource::ImmutableFile { file_hash, .. } => *file_hash,
            BackupSource::SmallFile { data } => xxh3_128(data),
        }
    }

    /// Whether the entry pins a hard link rather than holding the bytes
    pub fn is_hard_linked(&self) -> bool {
        matches!(self.source, BackupSource::ImmutableFile { .. })
    }

    /// Entry content
    pub fn read(&self) -> Result<Bytes> {
        match &self.source {
            BackupSource::ImmutableFile { disk, path, .. } => Ok(Bytes::from(disk.read_file(path)?)),
            BackupSource::SmallFile { data } => Ok(data.clone()),
        }
    }
}
