//! Part Storage Builder
//!
//! Write-side handle used while a part directory is being filled. Once all
//! files are written, [`PartStorageBuilder::storage`] hands out the
//! read/lifecycle handle over the same directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::disk::{DiskRef, DiskWriter, Reservation, SyncGuard, VolumeRef, WriteMode};
use crate::error::{PartError, Result};

use super::storage::{PartSource, PartStorage};
use super::PROJECTION_DIR_SUFFIX;

/// Builder of a new part directory at `root/part_dir`
#[derive(Debug, Clone)]
pub struct PartStorageBuilder {
    volume: VolumeRef,
    root_path: String,
    part_dir: String,
    config: Arc<Config>,
}

impl PartStorageBuilder {
    pub fn new(volume: VolumeRef, root_path: impl Into<String>, part_dir: impl Into<String>) -> Self {
        Self::with_config(volume, root_path, part_dir, Arc::new(Config::default()))
    }

    pub fn with_config(
        volume: VolumeRef,
        root_path: impl Into<String>,
        part_dir: impl Into<String>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            volume,
            root_path: root_path.into().trim_end_matches('/').to_string(),
            part_dir: part_dir.into(),
            config,
        }
    }

    pub fn relative_path(&self) -> &str {
        &self.part_dir
    }

    pub fn set_relative_path(&mut self, path: impl Into<String>) {
        self.part_dir = path.into();
    }

    pub fn full_relative_path(&self) -> PathBuf {
        Path::new(&self.root_path).join(&self.part_dir)
    }

    pub fn full_path(&self) -> PathBuf {
        self.disk().path().join(self.full_relative_path())
    }

    fn path_of(&self, path: &str) -> PathBuf {
        self.full_relative_path().join(path)
    }

    pub fn disk(&self) -> DiskRef {
        self.volume.disk()
    }

    pub fn exists(&self) -> bool {
        self.disk().exists(&self.full_relative_path())
    }

    pub fn exists_file(&self, path: &str) -> bool {
        self.disk().exists(&self.path_of(path))
    }

    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.disk().read_file(&self.path_of(path))
    }

    /// Buffered writer over `path`, truncating any existing content
    pub fn write_file(&self, path: &str, buf_size: usize) -> Result<Box<dyn DiskWriter>> {
        self.disk()
            .write_file(&self.path_of(path), buf_size, WriteMode::Rewrite)
    }

    pub fn remove_file(&self, path: &str) -> Result<()> {
        self.disk().remove_file(&self.path_of(path))
    }

    /// Remove the whole part directory
    pub fn remove_recursive(&self) -> Result<()> {
        self.disk().remove_recursive(&self.full_relative_path())
    }

    pub fn remove_shared_recursive(&self, keep_in_remote_fs: bool) -> Result<()> {
        self.disk()
            .remove_shared_recursive(&self.full_relative_path(), keep_in_remote_fs, &HashSet::new())
    }

    /// Sync guard over the part directory
    pub fn directory_sync_guard(&self) -> Result<SyncGuard> {
        self.disk().directory_sync_guard(&self.full_relative_path())
    }

    pub fn create_directories(&self) -> Result<()> {
        self.disk().create_directories(&self.full_relative_path())
    }

    /// Create `<name>.proj` inside the part directory
    pub fn create_projection(&self, name: &str) -> Result<()> {
        self.disk()
            .create_directory(&self.path_of(&format!("{}{}", name, PROJECTION_DIR_SUFFIX)))
    }

    /// Builder of the projection `<name>.proj` inside this part
    pub fn projection(&self, name: &str) -> PartStorageBuilder {
        PartStorageBuilder::with_config(
            self.volume.clone(),
            self.full_relative_path().to_string_lossy().into_owned(),
            format!("{}{}", name, PROJECTION_DIR_SUFFIX),
            self.config.clone(),
        )
    }

    pub fn reserve(&self, bytes: u64) -> Result<Reservation> {
        self.volume
            .reserve(bytes)
            .ok_or(PartError::NotEnoughSpace { requested: bytes })
    }

    /// Hard-link `from` of another part into `to` of this one
    ///
    /// The source must expose a local directory on this builder's disk.
    pub fn create_hard_link_from(&self, source: &dyn PartSource, from: &str, to: &str) -> Result<()> {
        let disk = self.disk();
        let link_source = source.hard_link_source().ok_or_else(|| {
            PartError::Logical(format!(
                "Cannot create hardlink from different storage: {} has no local directory",
                source.describe()
            ))
        })?;

        if link_source.disk.name() != disk.name() {
            return Err(PartError::Logical(format!(
                "Cannot create hardlink from {} on disk {} to disk {}",
                source.describe(),
                link_source.disk.name(),
                disk.name()
            )));
        }

        disk.create_hard_link(&link_source.dir.join(from), &self.path_of(to))
    }

    /// Read/lifecycle handle over the directory being built
    pub fn storage(&self) -> PartStorage {
        PartStorage::with_config(
            self.volume.clone(),
            self.root_path.clone(),
            self.part_dir.clone(),
            self.config.clone(),
        )
    }
}
