//! Part directory iterator
//!
//! Lazy, forward-only traversal of a part directory's immediate entries.

use crate::disk::{DirectoryIterator, DiskRef};
use crate::error::Result;

/// One entry of a part directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartDirEntry {
    pub name: String,
    pub is_file: bool,
}

/// Iterator over a part directory (or a subdirectory of it)
///
/// Entries come in whatever order the backend lists them. The iterator
/// cannot be restarted; ask the storage handle for a new one instead.
pub struct PartDirIterator {
    disk: DiskRef,
    inner: DirectoryIterator,
}

impl PartDirIterator {
    pub(super) fn new(disk: DiskRef, inner: DirectoryIterator) -> Self {
        Self { disk, inner }
    }
}

impl Iterator for PartDirIterator {
    type Item = Result<PartDirEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = match self.inner.next()? {
            Ok(entry) => entry,
            Err(e) => return Some(Err(e)),
        };

        Some(Ok(PartDirEntry {
            is_file: self.disk.is_file(&entry.path),
            name: entry.name,
        }))
    }
}
