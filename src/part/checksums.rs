//! Checksums table
//!
//! Ordered mapping `file name → (size, 128-bit hash)` describing every data
//! file of a part, persisted as `checksums.txt`.
//!
//! ## File Format
//! ```text
//! ┌───────────────────────────────────────────────────┐
//! │ Header (6 bytes)                                  │
//! │   Magic: "PCHK" (4) | Version: u16 (2)            │
//! ├───────────────────────────────────────────────────┤
//! │ Body (variable)                                   │
//! │   bincode-encoded BTreeMap<String, ChecksumEntry> │
//! ├───────────────────────────────────────────────────┤
//! │ Footer (4 bytes)                                  │
//! │   CRC32 of body                                   │
//! └───────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_128;

use crate::disk::Disk;
use crate::error::{PartError, Result};

use super::{is_auxiliary_file, PROJECTION_DIR_SUFFIX};

/// Magic bytes identifying a checksums file
const MAGIC: &[u8; 4] = b"PCHK";

/// Current checksums format version
const FORMAT_VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2)
const HEADER_SIZE: usize = 6;

/// Footer size: CRC32 (4)
const FOOTER_SIZE: usize = 4;

/// Size and content hash of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumEntry {
    pub file_size: u64,
    pub file_hash: u128,
}

impl ChecksumEntry {
    /// Entry describing `data`
    pub fn of_bytes(data: &[u8]) -> Self {
        Self {
            file_size: data.len() as u64,
            file_hash: xxh3_128(data),
        }
    }
}

/// The authoritative file list of a part
///
/// Entries ending in `.proj` stand for projection directories; their size is
/// the projection's total data size and their hash covers the projection's
/// own encoded checksums.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checksums {
    pub files: BTreeMap<String, ChecksumEntry>,
}

impl Checksums {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, entry: ChecksumEntry) {
        self.files.insert(name.into(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&ChecksumEntry> {
        self.files.get(name)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ChecksumEntry)> {
        self.files.iter()
    }

    /// Sum of the recorded sizes
    pub fn total_size(&self) -> u64 {
        self.files.values().map(|e| e.file_size).sum()
    }

    /// Read a file from `disk` and describe it
    pub fn compute_entry<D: Disk + ?Sized>(disk: &D, path: &Path) -> Result<ChecksumEntry> {
        let data = disk.read_file(path)?;
        Ok(ChecksumEntry::of_bytes(&data))
    }

    /// Checksum every data file of the part directory `dir`
    ///
    /// Metadata files (checksums.txt, columns.txt, markers, version
    /// metadata, temporaries) are skipped. Projection subdirectories are
    /// summarised as a single `.proj` entry; other subdirectories are ignored.
    pub fn from_directory<D: Disk + ?Sized>(disk: &D, dir: &Path) -> Result<Self> {
        let mut checksums = Self::new();

        for entry in disk.iterate_directory(dir)? {
            let entry = entry?;

            if disk.is_directory(&entry.path) {
                if entry.name.ends_with(PROJECTION_DIR_SUFFIX) {
                    let projection = Self::from_directory(disk, &entry.path)?;
                    checksums.add(
                        entry.name,
                        ChecksumEntry {
                            file_size: projection.total_size(),
                            file_hash: xxh3_128(&projection.encode()?),
                        },
                    );
                }
                continue;
            }

            if is_auxiliary_file(&entry.name) {
                continue;
            }

            let file_entry = Self::compute_entry(disk, &entry.path)?;
            checksums.add(entry.name, file_entry);
        }

        Ok(checksums)
    }

    // =========================================================================
    // Codec
    // =========================================================================

    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(&self.files)?;

        let mut out = Vec::with_capacity(HEADER_SIZE + body.len() + FOOTER_SIZE);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&body);
        out.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE + FOOTER_SIZE {
            return Err(PartError::Corrupted(format!(
                "checksums file is too short: {} bytes",
                bytes.len()
            )));
        }

        if &bytes[0..4] != MAGIC {
            return Err(PartError::Corrupted(format!(
                "invalid checksums magic: expected PCHK, got {:?}",
                &bytes[0..4]
            )));
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != FORMAT_VERSION {
            return Err(PartError::Serialization(format!(
                "unsupported checksums format version: {}",
                version
            )));
        }

        let body = &bytes[HEADER_SIZE..bytes.len() - FOOTER_SIZE];
        let footer = &bytes[bytes.len() - FOOTER_SIZE..];
        let stored_crc = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]);
        let actual_crc = crc32fast::hash(body);
        if stored_crc != actual_crc {
            return Err(PartError::Corrupted(format!(
                "checksums CRC mismatch: stored {:08x}, computed {:08x}",
                stored_crc, actual_crc
            )));
        }

        let files = bincode::deserialize(body)?;
        Ok(Self { files })
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Verify that every listed file exists under `dir` with its recorded size
    ///
    /// Fails on the first mismatch. Projection entries are directories and
    /// are verified through the projection's own checksums.
    pub fn check_sizes<D: Disk + ?Sized>(&self, disk: &D, dir: &Path) -> Result<()> {
        for (name, entry) in &self.files {
            if name.ends_with(PROJECTION_DIR_SUFFIX) {
                continue;
            }

            let path = dir.join(name);
            if !disk.exists(&path) {
                return Err(PartError::Consistency(format!(
                    "file {} is listed in checksums but missing",
                    disk.path().join(&path).display()
                )));
            }

            let size = disk.file_size(&path)?;
            if size != entry.file_size {
                return Err(PartError::Consistency(format!(
                    "file {} has unexpected size: {} instead of {}",
                    disk.path().join(&path).display(),
                    size,
                    entry.file_size
                )));
            }
        }
        Ok(())
    }
}
