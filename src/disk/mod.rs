//! Disk Module
//!
//! File-system-like storage backend abstraction that parts live on.
//!
//! ## Responsibilities
//! - File and directory primitives addressed by paths relative to the disk root
//! - Atomic replace/rename, hard links, batch removal
//! - Directory fsync via scoped [`SyncGuard`]s
//! - Capability queries (remote, broken, zero-copy replication, parallel write)
//! - Space reservation through the [`Volume`] placement layer
//!
//! A disk is a shared capability object: many part handles hold the same
//! [`DiskRef`] at once, so every implementation must be `Send + Sync` and
//! keep no per-part state.

mod local;
mod volume;

use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::Result;

pub use local::LocalDisk;
pub use volume::{Reservation, SingleDiskVolume, Volume, VolumeRef};

/// Shared handle to a storage backend
pub type DiskRef = Arc<dyn Disk>;

/// Lazy directory listing produced by [`Disk::iterate_directory`]
pub type DirectoryIterator = Box<dyn Iterator<Item = Result<DirEntry>> + Send>;

/// How `write_file` treats existing content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Truncate (or create) the file
    Rewrite,
    /// Append to the end of the file (creating it if missing)
    Append,
}

/// Backend kind, reported for logs and algorithm selection
///
/// Only [`DiskType::Local`] has an implementation in this crate; the other
/// kinds are for [`Disk`] implementations living outside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskType {
    Local,
    /// Object storage
    S3,
    Hdfs,
    /// Read-only disk served over HTTP
    Web,
}

impl fmt::Display for DiskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiskType::Local => "local",
            DiskType::S3 => "s3",
            DiskType::Hdfs => "hdfs",
            DiskType::Web => "web",
        };
        f.write_str(name)
    }
}

/// One entry of a batch removal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveRequest {
    pub path: PathBuf,
    /// Missing files are not an error when set
    pub if_exists: bool,
}

impl RemoveRequest {
    /// File that must exist
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            if_exists: false,
        }
    }

    /// File that is removed only if present
    pub fn if_exists(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            if_exists: true,
        }
    }
}

/// Immediate child of a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// File name of the entry
    pub name: String,
    /// Path of the entry relative to the disk root
    pub path: PathBuf,
}

/// Buffered writer handed out by [`Disk::write_file`]
pub trait DiskWriter: Write + Send {
    /// Push all buffered bytes to the backend
    fn finalize(&mut self) -> Result<()>;

    /// Make written bytes durable
    fn sync(&mut self) -> Result<()>;
}

/// Scoped directory fsync
///
/// Dropping the guard flushes the directory's metadata (entries created or
/// renamed inside it) to durable storage.
#[must_use = "the directory is synced when the guard is dropped"]
pub struct SyncGuard {
    dir: Option<(PathBuf, File)>,
}

impl SyncGuard {
    /// Guard for backends that have no directory fsync
    pub fn noop() -> Self {
        Self { dir: None }
    }

    /// Guard over a host directory
    pub fn for_directory(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            dir: Some((path.to_path_buf(), file)),
        })
    }
}

impl fmt::Debug for SyncGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncGuard")
            .field("dir", &self.dir.as_ref().map(|(path, _)| path))
            .finish()
    }
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        if let Some((path, file)) = self.dir.take() {
            if let Err(e) = file.sync_all() {
                tracing::error!("Cannot fsync directory {}: {}", path.display(), e);
            }
        }
    }
}

/// Storage backend consumed by part storage
///
/// Paths are relative to the disk root returned by [`Disk::path`].
pub trait Disk: Send + Sync + fmt::Debug {
    // -------------------------------------------------------------------------
    // Identity
    // -------------------------------------------------------------------------
    fn name(&self) -> &str;

    fn disk_type(&self) -> DiskType;

    /// Root of the disk (host path for local disks, used for logs)
    fn path(&self) -> &Path;

    // -------------------------------------------------------------------------
    // Metadata
    // -------------------------------------------------------------------------
    fn exists(&self, path: &Path) -> bool;

    fn is_file(&self, path: &Path) -> bool;

    fn is_directory(&self, path: &Path) -> bool;

    fn file_size(&self, path: &Path) -> Result<u64>;

    fn last_modified(&self, path: &Path) -> Result<SystemTime>;

    fn set_last_modified(&self, path: &Path, time: SystemTime) -> Result<()>;

    /// Number of hard links to the file
    fn ref_count(&self, path: &Path) -> Result<u32>;

    /// Names of the immediate children of a directory
    fn list_files(&self, path: &Path) -> Result<Vec<String>>;

    fn iterate_directory(&self, path: &Path) -> Result<DirectoryIterator>;

    // -------------------------------------------------------------------------
    // Reads and writes
    // -------------------------------------------------------------------------
    fn read_file(&self, path: &Path) -> Result<Vec<u8>>;

    fn write_file(&self, path: &Path, buf_size: usize, mode: WriteMode)
        -> Result<Box<dyn DiskWriter>>;

    /// Create an empty file; fails if it already exists
    fn create_file(&self, path: &Path) -> Result<()>;

    fn create_directory(&self, path: &Path) -> Result<()>;

    fn create_directories(&self, path: &Path) -> Result<()>;

    // -------------------------------------------------------------------------
    // Moves and links
    // -------------------------------------------------------------------------
    fn move_directory(&self, from: &Path, to: &Path) -> Result<()>;

    fn move_file(&self, from: &Path, to: &Path) -> Result<()>;

    /// Atomically overwrite `to` with `from`
    fn replace_file(&self, from: &Path, to: &Path) -> Result<()>;

    fn create_hard_link(&self, from: &Path, to: &Path) -> Result<()>;

    /// Copy the file or tree at `from` to `to` on `to_disk`
    fn copy(&self, from: &Path, to_disk: &dyn Disk, to: &Path) -> Result<()> {
        copy_tree(self, from, to_disk, to)
    }

    fn set_read_only(&self, path: &Path) -> Result<()>;

    // -------------------------------------------------------------------------
    // Removal
    // -------------------------------------------------------------------------
    fn remove_file(&self, path: &Path) -> Result<()>;

    fn remove_file_if_exists(&self, path: &Path) -> Result<()>;

    /// Remove an empty directory
    fn remove_directory(&self, path: &Path) -> Result<()>;

    fn remove_recursive(&self, path: &Path) -> Result<()>;

    /// Recursive removal that may keep data still referenced by other replicas
    fn remove_shared_recursive(
        &self,
        path: &Path,
        keep_in_remote_fs: bool,
        names_not_to_remove: &HashSet<String>,
    ) -> Result<()>;

    /// Batch removal of exactly the listed files
    fn remove_shared_files(
        &self,
        files: &[RemoveRequest],
        keep_in_remote_fs: bool,
        names_not_to_remove: &HashSet<String>,
    ) -> Result<()>;

    // -------------------------------------------------------------------------
    // Durability and replication
    // -------------------------------------------------------------------------
    fn directory_sync_guard(&self, path: &Path) -> Result<SyncGuard>;

    /// Backend-specific stable identifier of a file
    fn unique_id(&self, path: &Path) -> Result<String>;

    // -------------------------------------------------------------------------
    // Capabilities
    // -------------------------------------------------------------------------
    fn is_remote(&self) -> bool {
        false
    }

    fn is_broken(&self) -> bool {
        false
    }

    fn supports_zero_copy_replication(&self) -> bool {
        false
    }

    fn supports_parallel_write(&self) -> bool {
        false
    }
}

/// Backend-agnostic recursive copy, usable across different disks
pub fn copy_tree<F, T>(from_disk: &F, from: &Path, to_disk: &T, to: &Path) -> Result<()>
where
    F: Disk + ?Sized,
    T: Disk + ?Sized,
{
    if from_disk.is_file(from) {
        let data = from_disk.read_file(from)?;
        let mut out = to_disk.write_file(to, data.len().max(1), WriteMode::Rewrite)?;
        out.write_all(&data)?;
        out.finalize()?;
        return Ok(());
    }

    to_disk.create_directories(to)?;
    for name in from_disk.list_files(from)? {
        copy_tree(from_disk, &from.join(&name), to_disk, &to.join(&name))?;
    }
    Ok(())
}
