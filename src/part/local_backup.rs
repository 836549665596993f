//! Local snapshot of a part tree on its own disk
//!
//! Mirrors the directory structure and hard-links (or copies) every file.

use std::path::Path;

use crate::disk::Disk;
use crate::error::{PartError, Result};

pub(crate) struct LocalBackupOptions {
    pub make_source_readonly: bool,
    pub copy_instead_of_hardlink: bool,
    /// Attempts before giving up when source files vanish mid-snapshot
    pub max_tries: usize,
}

/// Snapshot `source` into `destination`, which must not exist yet
///
/// A concurrent merge or removal may delete source files while the tree is
/// walked. In that case the partial destination is dropped and the walk
/// starts over.
pub(crate) fn local_backup(
    disk: &dyn Disk,
    source: &Path,
    destination: &Path,
    options: &LocalBackupOptions,
) -> Result<()> {
    if disk.exists(destination) {
        return Err(PartError::AlreadyExists(format!(
            "directory {} already exists",
            disk.path().join(destination).display()
        )));
    }

    let mut attempt = 1;
    loop {
        if !disk.exists(source) {
            return Err(PartError::NotFound(format!(
                "directory {} (source of local backup) doesn't exist",
                disk.path().join(source).display()
            )));
        }

        match backup_tree(disk, source, destination, options) {
            Ok(()) => return Ok(()),
            Err(e) if e.is_not_found() && attempt < options.max_tries => {
                tracing::warn!(
                    "Source {} changed during local backup ({}), retrying (attempt {})",
                    disk.path().join(source).display(),
                    e,
                    attempt + 1
                );
                disk.remove_recursive(destination)?;
                attempt += 1;
            }
            Err(e) => {
                if let Err(cleanup) = disk.remove_recursive(destination) {
                    tracing::error!(
                        "Cannot remove partially created backup {}: {}",
                        disk.path().join(destination).display(),
                        cleanup
                    );
                }
                return Err(e);
            }
        }
    }
}

fn backup_tree(
    disk: &dyn Disk,
    source: &Path,
    destination: &Path,
    options: &LocalBackupOptions,
) -> Result<()> {
    disk.create_directories(destination)?;

    for entry in disk.iterate_directory(source)? {
        let entry = entry?;
        let target = destination.join(&entry.name);

        if disk.is_directory(&entry.path) {
            backup_tree(disk, &entry.path, &target, options)?;
            continue;
        }

        if options.make_source_readonly {
            disk.set_read_only(&entry.path)?;
        }

        if options.copy_instead_of_hardlink {
            disk.copy(&entry.path, disk, &target)?;
        } else {
            disk.create_hard_link(&entry.path, &target)?;
        }
    }

    Ok(())
}
