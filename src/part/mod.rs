//! Part Module
//!
//! Storage lifecycle of immutable data parts.
//!
//! ## Responsibilities
//! - Build a part directory ([`PartStorageBuilder`])
//! - Rename, remove, freeze, clone and back up finished parts ([`PartStorage`])
//! - Persist and recover MVCC version metadata ([`VersionMetadata`])
//! - Fast checksum-driven removal with recursive fallback
//!
//! ## Directory Layout
//! ```text
//! <root>/<part_dir>/
//!   ├── checksums.txt                  file → (size, hash) table
//!   ├── columns.txt                    column names and types
//!   ├── txn_version.txt                MVCC stamp (+ .tmp while written)
//!   ├── delete-on-destroy.txt          optional marker
//!   ├── default_compression_codec.txt  optional
//!   ├── <column files>
//!   └── <name>.proj/                   projection, same layout minus txn_version.txt
//! ```

mod backup;
mod builder;
mod checksums;
mod columns;
mod iterator;
mod local_backup;
mod storage;
mod version;

pub use backup::{BackupEntry, BackupSource, TemporaryDirOnDisk, TemporaryDirs};
pub use builder::PartStorageBuilder;
pub use checksums::{ChecksumEntry, Checksums};
pub use columns::ColumnsDescription;
pub use iterator::{PartDirEntry, PartDirIterator};
pub use storage::{HardLinkSource, PartSource, PartStorage, RemovalOutcome};
pub use version::{
    Csn, TransactionId, VersionMetadata, WhichCsn, MAX_RESERVED_CSN, PREHISTORIC_CSN,
    ROLLED_BACK_CSN, UNKNOWN_CSN,
};

// =============================================================================
// Well-known File Names
// =============================================================================

pub const CHECKSUMS_FILE_NAME: &str = "checksums.txt";

pub const COLUMNS_FILE_NAME: &str = "columns.txt";

pub const TXN_VERSION_METADATA_FILE_NAME: &str = "txn_version.txt";

pub const DELETE_ON_DESTROY_MARKER_FILE_NAME: &str = "delete-on-destroy.txt";

pub const DEFAULT_COMPRESSION_CODEC_FILE_NAME: &str = "default_compression_codec.txt";

/// Suffix of projection subdirectories
pub const PROJECTION_DIR_SUFFIX: &str = ".proj";

/// Prefix a part directory is renamed to before it is deleted
pub const DELETE_TMP_PREFIX: &str = "delete_tmp_";

/// Subdirectory of the table root holding detached parts
pub const DETACHED_DIR_NAME: &str = "detached";

/// Suffix of files written before being atomically renamed into place
pub(crate) const TMP_SUFFIX: &str = ".tmp";

/// Checksums of one projection of a part
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectionChecksums {
    /// Projection name, without the `.proj` suffix
    pub name: String,
    pub checksums: Checksums,
}

impl ProjectionChecksums {
    pub fn new(name: impl Into<String>, checksums: Checksums) -> Self {
        Self {
            name: name.into(),
            checksums,
        }
    }

    /// Name of the projection's directory inside the parent part
    pub fn dir_name(&self) -> String {
        format!("{}{}", self.name, PROJECTION_DIR_SUFFIX)
    }
}

/// Metadata files that are never listed in checksums.txt
pub(crate) fn is_auxiliary_file(name: &str) -> bool {
    matches!(
        name,
        CHECKSUMS_FILE_NAME
            | COLUMNS_FILE_NAME
            | TXN_VERSION_METADATA_FILE_NAME
            | DELETE_ON_DESTROY_MARKER_FILE_NAME
            | DEFAULT_COMPRESSION_CODEC_FILE_NAME
    ) || name.ends_with(TMP_SUFFIX)
}
