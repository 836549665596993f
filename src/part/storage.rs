//! Part Storage
//!
//! Handle bound to an existing part directory `(volume, root, part_dir)`.
//! Paths are recomputed from those three fields on every call, so after a
//! `rename` every later path the handle produces points at the new place.
//!
//! ## Removal
//! ```text
//! Live ──rename──▶ delete_tmp_<dir> ──┬─ fast: remove files listed in checksums, then rmdir
//!                                     └─ fallback: recursive removal
//! ```
//! The part is renamed before anything is deleted, so a concurrent remover
//! either loses the rename race (and reports the part as already gone) or
//! finds the `delete_tmp_` leftover of an interrupted removal and clears it.
//!
//! ## Version metadata recovery
//! | txn_version.txt | .tmp    | result                                   |
//! |-----------------|---------|------------------------------------------|
//! | present         | any     | read it; drop the stale .tmp             |
//! | absent          | absent  | prehistoric part, always visible         |
//! | absent          | present | creation never committed; rolled back    |

use std::collections::{BTreeSet, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::config::Config;
use crate::disk::{
    Disk, DiskRef, DiskType, RemoveRequest, Reservation, SingleDiskVolume, VolumeRef, WriteMode,
};
use crate::error::{PartError, Result};

use super::backup::{BackupEntry, TemporaryDirs};
use super::iterator::PartDirIterator;
use super::local_backup::{local_backup, LocalBackupOptions};
use super::{
    Checksums, ColumnsDescription, ProjectionChecksums, VersionMetadata, WhichCsn,
    CHECKSUMS_FILE_NAME, COLUMNS_FILE_NAME, DEFAULT_COMPRESSION_CODEC_FILE_NAME,
    DELETE_ON_DESTROY_MARKER_FILE_NAME, DELETE_TMP_PREFIX, DETACHED_DIR_NAME,
    PROJECTION_DIR_SUFFIX, TMP_SUFFIX, TXN_VERSION_METADATA_FILE_NAME,
};

// =============================================================================
// Cross-storage Capability
// =============================================================================

/// Directory a part can lend to hard links
#[derive(Debug, Clone)]
pub struct HardLinkSource {
    pub disk: DiskRef,
    /// Part directory relative to the disk root
    pub dir: PathBuf,
}

/// Anything a part builder may reuse files from
pub trait PartSource {
    /// Human-readable description for errors
    fn describe(&self) -> String;

    /// Local directory to hard-link from, if this source has one
    fn hard_link_source(&self) -> Option<HardLinkSource>;
}

/// Which of several concurrent removers deleted the part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// This call renamed and deleted the directory
    Removed,
    /// The directory was already gone when this call tried to rename it
    AlreadyGone,
}

// =============================================================================
// Part Storage
// =============================================================================

/// Read/lifecycle handle of a finished part
#[derive(Debug, Clone)]
pub struct PartStorage {
    volume: VolumeRef,
    /// Parent directory of the part, relative to the disk root, no trailing '/'
    root_path: String,
    part_dir: String,
    config: Arc<Config>,
}

impl PartStorage {
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
            root_path: trim_trailing_slash(&root_path.into()).to_string(),
            part_dir: part_dir.into(),
            config,
        }
    }

    // =========================================================================
    // Paths
    // =========================================================================

    /// Part directory name
    pub fn relative_path(&self) -> &str {
        &self.part_dir
    }

    pub fn set_relative_path(&mut self, path: impl Into<String>) {
        self.part_dir = path.into();
    }

    pub fn root_path(&self) -> &str {
        &self.root_path
    }

    /// `root/part_dir`, relative to the disk root
    pub fn full_relative_path(&self) -> PathBuf {
        Path::new(&self.root_path).join(&self.part_dir)
    }

    /// Host path of the part directory
    pub fn full_path(&self) -> PathBuf {
        self.disk().path().join(self.full_relative_path())
    }

    /// Host path of the root directory
    pub fn full_root_path(&self) -> PathBuf {
        self.disk().path().join(&self.root_path)
    }

    pub fn disk_path_for_logs(&self) -> PathBuf {
        self.disk().path().to_path_buf()
    }

    fn path_of(&self, path: &str) -> PathBuf {
        self.full_relative_path().join(path)
    }

    pub fn volume(&self) -> &VolumeRef {
        &self.volume
    }

    pub fn disk(&self) -> DiskRef {
        self.volume.disk()
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    // =========================================================================
    // Backend Pass-through
    // =========================================================================

    /// Whether the part directory exists
    pub fn exists(&self) -> bool {
        self.disk().exists(&self.full_relative_path())
    }

    pub fn exists_file(&self, path: &str) -> bool {
        self.disk().exists(&self.path_of(path))
    }

    pub fn is_directory(&self, path: &str) -> bool {
        self.disk().is_directory(&self.path_of(path))
    }

    pub fn last_modified(&self) -> Result<SystemTime> {
        self.disk().last_modified(&self.full_relative_path())
    }

    pub fn file_size(&self, path: &str) -> Result<u64> {
        self.disk().file_size(&self.path_of(path))
    }

    pub fn ref_count(&self, path: &str) -> Result<u32> {
        self.disk().ref_count(&self.path_of(path))
    }

    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.disk().read_file(&self.path_of(path))
    }

    pub fn iterate(&self) -> Result<PartDirIterator> {
        let disk = self.disk();
        let inner = disk.iterate_directory(&self.full_relative_path())?;
        Ok(PartDirIterator::new(disk, inner))
    }

    pub fn iterate_directory(&self, path: &str) -> Result<PartDirIterator> {
        let disk = self.disk();
        let inner = disk.iterate_directory(&self.path_of(path))?;
        Ok(PartDirIterator::new(disk, inner))
    }

    /// Sum of all file sizes under the part directory
    pub fn calculate_total_size_on_disk(&self) -> Result<u64> {
        total_size_on_disk(self.disk().as_ref(), &self.full_relative_path())
    }

    pub fn reserve(&self, bytes: u64) -> Result<Reservation> {
        self.volume
            .reserve(bytes)
            .ok_or(PartError::NotEnoughSpace { requested: bytes })
    }

    pub fn try_reserve(&self, bytes: u64) -> Option<Reservation> {
        self.volume.reserve(bytes)
    }

    // =========================================================================
    // Capabilities
    // =========================================================================

    pub fn is_stored_on_disk(&self, disks: &[DiskRef]) -> bool {
        let disk = self.disk();
        disks.iter().any(|d| d.name() == disk.name())
    }

    pub fn is_stored_on_remote_disk(&self) -> bool {
        self.disk().is_remote()
    }

    pub fn supports_zero_copy_replication(&self) -> bool {
        self.disk().supports_zero_copy_replication()
    }

    pub fn supports_parallel_write(&self) -> bool {
        self.disk().supports_parallel_write()
    }

    pub fn is_broken(&self) -> bool {
        self.disk().is_broken()
    }

    pub fn disk_name(&self) -> String {
        self.disk().name().to_string()
    }

    pub fn disk_type(&self) -> DiskType {
        self.disk().disk_type()
    }

    /// Zero-copy replication key of the part (its checksums file)
    pub fn unique_id(&self) -> Result<String> {
        let disk = self.disk();
        if !disk.supports_zero_copy_replication() {
            return Err(PartError::Logical(format!(
                "Disk {} doesn't support zero-copy replication",
                disk.name()
            )));
        }
        disk.unique_id(&self.path_of(CHECKSUMS_FILE_NAME))
    }

    /// Handle of the projection `<name>.proj` inside this part
    pub fn projection(&self, name: &str) -> PartStorage {
        PartStorage::with_config(
            self.volume.clone(),
            self.full_relative_path().to_string_lossy().into_owned(),
            format!("{}{}", name, PROJECTION_DIR_SUFFIX),
            self.config.clone(),
        )
    }

    // =========================================================================
    // Naming
    // =========================================================================

    /// Free directory name `<prefix>_<part_dir>[_tryN]`
    ///
    /// Probes `max_rename_attempts` candidates (under `detached/` if asked).
    /// If all of them exist the last candidate is returned anyway, so the
    /// caller must still be ready for the name to be taken.
    pub fn relative_path_for_prefix(&self, prefix: &str, detached: bool) -> String {
        let disk = self.disk();
        let mut base = PathBuf::from(&self.root_path);
        if detached {
            base.push(DETACHED_DIR_NAME);
        }

        let mut candidate = String::new();
        for try_no in 0..self.config.max_rename_attempts.max(1) {
            candidate = if prefix.is_empty() {
                self.part_dir.clone()
            } else {
                format!("{}_{}", prefix, self.part_dir)
            };
            if try_no > 0 {
                candidate.push_str(&format!("_try{}", try_no));
            }

            if !disk.exists(&base.join(&candidate)) {
                return candidate;
            }

            tracing::warn!(
                "Directory {} (to detach to) already exists. Will detach to directory with '_tryN' suffix.",
                candidate
            );
        }

        candidate
    }

    // =========================================================================
    // Removal
    // =========================================================================

    /// Retire the part: rename it to `delete_tmp_<dir>` and delete it
    ///
    /// `checksums` (and each projection's checksums) drive the fast path;
    /// empty checksums force recursive removal.
    pub fn remove(
        &self,
        can_remove_shared_data: bool,
        names_not_to_remove: &HashSet<String>,
        checksums: &Checksums,
        projections: &[ProjectionChecksums],
    ) -> Result<RemovalOutcome> {
        // delete_tmp_<dir>, not delete_tmp_<part name>: two parts with the same
        // name may live in different directories (e.g. a temporary merge result)
        let from = self.full_relative_path();
        let to = Path::new(&self.root_path).join(format!("{}{}", DELETE_TMP_PREFIX, self.part_dir));
        let disk = self.disk();

        if disk.exists(&to) {
            tracing::warn!(
                "Directory {} (to which part must be renamed before removing) already exists. \
                 Most likely this is due to unclean restart or race condition. Removing it.",
                disk.path().join(&to).display()
            );
            if let Err(e) =
                disk.remove_shared_recursive(&to, !can_remove_shared_data, names_not_to_remove)
            {
                tracing::error!(
                    "Cannot recursively remove directory {}: {}",
                    disk.path().join(&to).display(),
                    e
                );
                return Err(e);
            }
        }

        if let Err(e) = disk.move_directory(&from, &to) {
            if e.is_not_found() {
                tracing::error!(
                    "Directory {} (part to remove) doesn't exist or one of nested files has gone. \
                     Most likely this is due to manual removing. This should be discouraged. Ignoring.",
                    disk.path().join(&from).display()
                );
                return Ok(RemovalOutcome::AlreadyGone);
            }
            return Err(e);
        }

        let mut projection_directories = HashSet::new();
        for projection in projections {
            let dir_name = projection.dir_name();
            self.clear_directory(
                disk.as_ref(),
                &to.join(&dir_name),
                can_remove_shared_data,
                names_not_to_remove,
                &projection.checksums,
                &HashSet::new(),
                true,
            );
            projection_directories.insert(dir_name);
        }

        self.clear_directory(
            disk.as_ref(),
            &to,
            can_remove_shared_data,
            names_not_to_remove,
            checksums,
            &projection_directories,
            false,
        );

        tracing::debug!("Removed part {}", disk.path().join(&from).display());
        Ok(RemovalOutcome::Removed)
    }

    /// Delete `dir`, by its known file list if possible, recursively otherwise
    ///
    /// Never fails on the fast path; its errors only trigger the fallback.
    #[allow(clippy::too_many_arguments)]
    fn clear_directory(
        &self,
        disk: &dyn Disk,
        dir: &Path,
        can_remove_shared_data: bool,
        names_not_to_remove: &HashSet<String>,
        checksums: &Checksums,
        skip_directories: &HashSet<String>,
        is_projection: bool,
    ) {
        let keep_in_remote_fs = !can_remove_shared_data;

        if checksums.is_empty() {
            if is_projection {
                tracing::error!(
                    "Cannot quickly remove directory {} by removing files; fallback to recursive removal. \
                     Reason: checksums.txt is missing",
                    disk.path().join(dir).display()
                );
            }
            // An incompletely written part cannot be enumerated by its checksums
            self.remove_recursive_logged(disk, dir, keep_in_remote_fs, names_not_to_remove);
            return;
        }

        let fast_path = || -> Result<()> {
            let mut request: Vec<RemoveRequest> = checksums
                .iter()
                .filter(|(file, _)| !skip_directories.contains(file.as_str()))
                .map(|(file, _)| RemoveRequest::new(dir.join(file)))
                .collect();

            request.push(RemoveRequest::new(dir.join(CHECKSUMS_FILE_NAME)));
            request.push(RemoveRequest::new(dir.join(COLUMNS_FILE_NAME)));
            request.push(RemoveRequest::if_exists(dir.join(DEFAULT_COMPRESSION_CODEC_FILE_NAME)));
            request.push(RemoveRequest::if_exists(dir.join(DELETE_ON_DESTROY_MARKER_FILE_NAME)));
            if !is_projection {
                request.push(RemoveRequest::if_exists(dir.join(TXN_VERSION_METADATA_FILE_NAME)));
            }

            disk.remove_shared_files(&request, keep_in_remote_fs, names_not_to_remove)?;
            disk.remove_directory(dir)
        };

        if let Err(e) = fast_path() {
            tracing::error!(
                "Cannot quickly remove directory {} by removing files; fallback to recursive removal. Reason: {}",
                disk.path().join(dir).display(),
                e
            );
            self.remove_recursive_logged(disk, dir, keep_in_remote_fs, names_not_to_remove);
        }
    }

    fn remove_recursive_logged(
        &self,
        disk: &dyn Disk,
        dir: &Path,
        keep_in_remote_fs: bool,
        names_not_to_remove: &HashSet<String>,
    ) {
        if let Err(e) = disk.remove_shared_recursive(dir, keep_in_remote_fs, names_not_to_remove) {
            // The directory keeps its delete_tmp_ name; the next removal of
            // a part with this directory name clears it first.
            tracing::error!(
                "Cannot recursively remove directory {}: {}",
                disk.path().join(dir).display(),
                e
            );
        }
    }

    // =========================================================================
    // Moves
    // =========================================================================

    /// Move the part to `root/new_relative_path`
    ///
    /// An existing destination is an error unless `remove_new_dir_if_exists`
    /// is set, in which case it is deleted first. With `fsync_part_dir` the
    /// new parent directory is synced before returning.
    pub fn rename(
        &mut self,
        new_relative_path: &str,
        remove_new_dir_if_exists: bool,
        fsync_part_dir: bool,
    ) -> Result<()> {
        if !self.exists() {
            return Err(PartError::NotFound(format!(
                "Part directory {} doesn't exist. Most likely it is a logical error.",
                self.full_path().display()
            )));
        }

        let new_path = Path::new(&self.root_path).join(new_relative_path);
        let (new_root, new_dir) = match (new_path.parent(), new_path.file_name()) {
            (Some(parent), Some(name))
                if !new_relative_path.is_empty() && !new_relative_path.ends_with('/') =>
            {
                (
                    parent.to_string_lossy().into_owned(),
                    name.to_string_lossy().into_owned(),
                )
            }
            _ => {
                return Err(PartError::Logical(format!(
                    "Cannot rename from {} to {}. Destination should not contain trailing slash",
                    self.full_relative_path().display(),
                    new_relative_path
                )))
            }
        };

        let disk = self.disk();
        if disk.exists(&new_path) {
            if !remove_new_dir_if_exists {
                return Err(PartError::AlreadyExists(format!(
                    "Part directory {} already exists",
                    disk.path().join(&new_path).display()
                )));
            }

            let files = disk.list_files(&new_path).map(|f| f.len()).unwrap_or(0);
            tracing::warn!(
                "Part directory {} already exists and contains {} files. Removing it.",
                disk.path().join(&new_path).display(),
                files
            );
            disk.remove_recursive(&new_path)?;
        }

        let from = self.full_relative_path();
        // Age-based cleanup of the destination must see the part as fresh
        disk.set_last_modified(&from, SystemTime::now())?;
        disk.move_directory(&from, &new_path)?;

        self.root_path = new_root;
        self.part_dir = new_dir;

        if fsync_part_dir {
            let _guard = disk.directory_sync_guard(Path::new(&self.root_path))?;
        }
        Ok(())
    }

    /// Re-point the handle after the directory was moved by someone else
    ///
    /// Replaces the `from_root` prefix of the root path with `to_root`.
    /// Touches nothing on disk.
    pub fn change_root_path(&mut self, from_root: &str, to_root: &str) -> Result<()> {
        let from_root = trim_trailing_slash(from_root);
        let to_root = trim_trailing_slash(to_root);

        if !self.root_path.starts_with(from_root) {
            return Err(PartError::Logical(format!(
                "Cannot change part root to {} because {} is not a prefix of current root {}",
                to_root, from_root, self.root_path
            )));
        }

        self.root_path = format!("{}{}", to_root, &self.root_path[from_root.len()..]);
        Ok(())
    }

    // =========================================================================
    // Metadata Files
    // =========================================================================

    pub fn write_checksums(&self, checksums: &Checksums) -> Result<()> {
        self.write_file_atomically(CHECKSUMS_FILE_NAME, &checksums.encode()?)
    }

    pub fn write_columns(&self, columns: &ColumnsDescription) -> Result<()> {
        self.write_file_atomically(COLUMNS_FILE_NAME, &columns.encode())
    }

    pub fn read_checksums(&self) -> Result<Checksums> {
        Checksums::decode(&self.read_file(CHECKSUMS_FILE_NAME)?)
    }

    pub fn read_columns(&self) -> Result<ColumnsDescription> {
        ColumnsDescription::decode(&self.read_file(COLUMNS_FILE_NAME)?)
    }

    /// Write `<name>.tmp`, then rename it over `<name>`
    fn write_file_atomically(&self, name: &str, contents: &[u8]) -> Result<()> {
        let disk = self.disk();
        let path = self.path_of(name);
        let tmp_path = self.path_of(&format!("{}{}", name, TMP_SUFFIX));

        let result = (|| -> Result<()> {
            let mut out =
                disk.write_file(&tmp_path, self.config.write_buffer_size, WriteMode::Rewrite)?;
            out.write_all(contents)?;
            out.finalize()?;
            drop(out);
            disk.move_file(&tmp_path, &path)
        })();

        if result.is_err() {
            remove_tmp_file_quietly(disk.as_ref(), &tmp_path);
        }
        result
    }

    /// Durably write txn_version.txt through a synced temporary file
    pub fn write_version_metadata(&self, version: &VersionMetadata, fsync_part_dir: bool) -> Result<()> {
        let disk = self.disk();
        let path = self.path_of(TXN_VERSION_METADATA_FILE_NAME);
        let tmp_path = self.path_of(&format!("{}{}", TXN_VERSION_METADATA_FILE_NAME, TMP_SUFFIX));

        let result = (|| -> Result<()> {
            let mut out =
                disk.write_file(&tmp_path, self.config.write_buffer_size, WriteMode::Rewrite)?;
            version.write(&mut out)?;
            out.finalize()?;
            out.sync()?;
            drop(out);

            let _guard = if fsync_part_dir {
                Some(disk.directory_sync_guard(&self.full_relative_path())?)
            } else {
                None
            };
            disk.replace_file(&tmp_path, &path)
        })();

        if result.is_err() {
            remove_tmp_file_quietly(disk.as_ref(), &tmp_path);
        }
        result
    }

    /// Append a CSN record without rewriting the file
    ///
    /// Not fsynced: a lost append is restored from the transaction log.
    pub fn append_csn_to_version_metadata(&self, version: &VersionMetadata, which: WhichCsn) -> Result<()> {
        let mut out = self.disk().write_file(
            &self.path_of(TXN_VERSION_METADATA_FILE_NAME),
            self.config.append_buffer_size,
            WriteMode::Append,
        )?;
        version.write_csn(&mut out, which)?;
        out.finalize()
    }

    /// Append a removal TID record; synced only when setting a new lock
    pub fn append_removal_tid_to_version_metadata(&self, version: &VersionMetadata, clear: bool) -> Result<()> {
        let mut out = self.disk().write_file(
            &self.path_of(TXN_VERSION_METADATA_FILE_NAME),
            self.config.append_buffer_size,
            WriteMode::Append,
        )?;
        version.write_removal_tid(&mut out, clear)?;
        out.finalize()?;

        // A cleared lock is re-derived on restart
        if !clear {
            out.sync()?;
        }
        Ok(())
    }

    /// Read version metadata, recovering from interrupted writes
    pub fn load_version_metadata(&self) -> Result<VersionMetadata> {
        let disk = self.disk();
        let path = self.path_of(TXN_VERSION_METADATA_FILE_NAME);
        let tmp_path = self.path_of(&format!("{}{}", TXN_VERSION_METADATA_FILE_NAME, TMP_SUFFIX));

        if disk.exists(&path) {
            let content = disk.read_file(&path)?;
            let content = std::str::from_utf8(&content).map_err(|e| {
                PartError::Serialization(format!(
                    "{} is not UTF-8: {}",
                    disk.path().join(&path).display(),
                    e
                ))
            })?;
            let version = VersionMetadata::read(content)?;
            if disk.exists(&tmp_path) {
                discard_stale_version_file(disk.as_ref(), &tmp_path)?;
            }
            return Ok(version);
        }

        if !disk.exists(&tmp_path) {
            // Written before transactions existed. The metadata file is the
            // first file of a new part, so its absence is not a crash.
            return Ok(VersionMetadata::prehistoric());
        }

        // The .tmp was never renamed: the creating transaction did not commit
        let version = VersionMetadata::rolled_back();
        discard_stale_version_file(disk.as_ref(), &tmp_path)?;
        Ok(version)
    }

    pub fn remove_version_metadata(&self) -> Result<()> {
        self.disk()
            .remove_file_if_exists(&self.path_of(TXN_VERSION_METADATA_FILE_NAME))
    }

    /// Best effort; a failure is logged, not returned
    pub fn write_delete_on_destroy_marker(&self) {
        let disk = self.disk();
        let marker = self.path_of(DELETE_ON_DESTROY_MARKER_FILE_NAME);
        if let Err(e) = disk.create_file(&marker) {
            tracing::error!(
                "{} (while creating DeleteOnDestroy marker: `{}`)",
                e,
                disk.path().join(&marker).display()
            );
        }
    }

    pub fn remove_delete_on_destroy_marker(&self) -> Result<()> {
        self.disk()
            .remove_file_if_exists(&self.path_of(DELETE_ON_DESTROY_MARKER_FILE_NAME))
    }

    pub fn check_consistency(&self, checksums: &Checksums) -> Result<()> {
        checksums.check_sizes(self.disk().as_ref(), &self.full_relative_path())
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Hard-link every checksummed file into a shared temporary directory
    ///
    /// `temp_dirs` keeps one temporary directory per disk across calls.
    /// Files in `files_without_checksums` are read inline. Projection
    /// entries are skipped; back projections up through [`Self::projection`].
    pub fn backup(
        &self,
        temp_dirs: &mut TemporaryDirs,
        checksums: &Checksums,
        files_without_checksums: &BTreeSet<String>,
    ) -> Result<Vec<BackupEntry>> {
        let disk = self.disk();
        let temp_dir = temp_dirs.get_or_create(&disk, &self.config.backup_tmp_prefix)?;
        let temp_part_dir = temp_dir.path().join(&self.part_dir);
        disk.create_directories(&temp_part_dir)?;

        let mut entries = Vec::with_capacity(checksums.len() + files_without_checksums.len());

        for (file, checksum) in checksums.iter() {
            if file.ends_with(PROJECTION_DIR_SUFFIX) {
                tracing::debug!(
                    "Skipping projection {} of part {} in backup",
                    file,
                    self.part_dir
                );
                continue;
            }

            let hardlink_path = temp_part_dir.join(file);
            if let Some(parent) = hardlink_path.parent() {
                disk.create_directories(parent)?;
            }
            disk.create_hard_link(&self.path_of(file), &hardlink_path)?;

            entries.push(BackupEntry::immutable_file(
                format!("{}/{}", self.part_dir, file),
                disk.clone(),
                hardlink_path,
                checksum.file_size,
                checksum.file_hash,
                temp_dir.clone(),
            ));
        }

        for file in files_without_checksums {
            let data = disk.read_file(&self.path_of(file))?;
            entries.push(BackupEntry::small_file(
                format!("{}/{}", self.part_dir, file),
                Bytes::from(data),
            ));
        }

        Ok(entries)
    }

    /// Local snapshot of the part at `to/dir_path` on the same disk
    ///
    /// `save_metadata` runs after the tree is linked. The snapshot is not a
    /// live transactional part: its delete marker and version metadata are
    /// removed.
    pub fn freeze(
        &self,
        to: &str,
        dir_path: &str,
        make_source_readonly: bool,
        save_metadata: Option<&dyn Fn(&DiskRef) -> Result<()>>,
        copy_instead_of_hardlink: bool,
    ) -> Result<PartStorage> {
        let disk = self.disk();
        disk.create_directories(Path::new(to))?;

        let destination = Path::new(to).join(dir_path);
        local_backup(
            disk.as_ref(),
            &self.full_relative_path(),
            &destination,
            &LocalBackupOptions {
                make_source_readonly,
                copy_instead_of_hardlink,
                max_tries: self.config.freeze_retries.max(1),
            },
        )?;

        if let Some(save_metadata) = save_metadata {
            save_metadata(&disk)?;
        }

        disk.remove_file_if_exists(&destination.join(DELETE_ON_DESTROY_MARKER_FILE_NAME))?;
        disk.remove_file_if_exists(&destination.join(TXN_VERSION_METADATA_FILE_NAME))?;

        let volume: VolumeRef = Arc::new(SingleDiskVolume::new(disk.name(), disk.clone()));
        Ok(PartStorage::with_config(volume, to, dir_path, self.config.clone()))
    }

    /// Full copy of the part at `to/dir_path` on the same disk
    pub fn clone_to(&self, to: &str, dir_path: &str) -> Result<PartStorage> {
        let disk = self.disk();
        let volume: VolumeRef = Arc::new(SingleDiskVolume::new(disk.name(), disk.clone()));
        self.clone_to_volume(volume, to, dir_path)
    }

    /// Full copy of the part at `to/dir_path` on `volume`'s disk
    ///
    /// An existing destination is removed first.
    pub fn clone_to_volume(&self, volume: VolumeRef, to: &str, dir_path: &str) -> Result<PartStorage> {
        let source_disk = self.disk();
        let disk = volume.disk();
        let path_to_clone = Path::new(to).join(dir_path);

        if disk.exists(&path_to_clone) {
            tracing::warn!(
                "Path {} already exists. Will remove it and clone again.",
                disk.path().join(&path_to_clone).display()
            );
            disk.remove_recursive(&path_to_clone)?;
        }

        disk.create_directories(Path::new(to))?;
        source_disk.copy(&self.full_relative_path(), disk.as_ref(), &path_to_clone)?;
        disk.remove_file_if_exists(&path_to_clone.join(DELETE_ON_DESTROY_MARKER_FILE_NAME))?;

        Ok(PartStorage::with_config(volume, to, dir_path, self.config.clone()))
    }
}

impl PartSource for PartStorage {
    fn describe(&self) -> String {
        format!(
            "part storage {} on disk {}",
            self.full_relative_path().display(),
            self.disk().name()
        )
    }

    fn hard_link_source(&self) -> Option<HardLinkSource> {
        Some(HardLinkSource {
            disk: self.disk(),
            dir: self.full_relative_path(),
        })
    }
}

// =============================================================================
// Private Helpers
// =============================================================================

fn trim_trailing_slash(path: &str) -> &str {
    path.trim_end_matches('/')
}

fn total_size_on_disk(disk: &dyn Disk, path: &Path) -> Result<u64> {
    if disk.is_file(path) {
        return disk.file_size(path);
    }

    let mut total = 0;
    for name in disk.list_files(path)? {
        total += total_size_on_disk(disk, &path.join(name))?;
    }
    Ok(total)
}

/// Cleanup after a failed write; never masks the original error
fn remove_tmp_file_quietly(disk: &dyn Disk, tmp_path: &Path) {
    if !disk.exists(tmp_path) {
        return;
    }
    if let Err(e) = disk.remove_file(tmp_path) {
        tracing::error!(
            "Cannot remove temporary file {}: {}",
            disk.path().join(tmp_path).display(),
            e
        );
    }
}

/// Log the leftover of an interrupted version metadata write and delete it
fn discard_stale_version_file(disk: &dyn Disk, tmp_path: &Path) -> Result<()> {
    let last_modified = disk
        .last_modified(tmp_path)?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let content = disk.read_file(tmp_path)?;

    tracing::warn!(
        "Found file {} that was last modified on {}, has size {} and the following content: {}",
        disk.path().join(tmp_path).display(),
        last_modified,
        content.len(),
        String::from_utf8_lossy(&content)
    );

    disk.remove_file(tmp_path)
}
