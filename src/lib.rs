//! # partstore
//!
//! On-disk storage lifecycle of immutable column-store data parts:
//! - Crash-consistent rename and removal of part directories
//! - Checksum-driven fast removal with recursive fallback
//! - MVCC version metadata with recovery from interrupted writes
//! - Local snapshots (freeze), full copies (clone) and hard-link backups
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Part owner (merges, mutations,               │
//! │                 replication, backups)                        │
//! └──────────────┬──────────────────────────────┬───────────────┘
//!                │                              │
//!                ▼                              ▼
//!   ┌────────────────────────┐     ┌────────────────────────┐
//!   │   PartStorageBuilder   │────▶│      PartStorage       │
//!   │   (write new part)     │     │ (rename/remove/freeze) │
//!   └───────────┬────────────┘     └───────────┬────────────┘
//!               │                              │
//!               └──────────────┬───────────────┘
//!                              ▼
//!                    ┌───────────────────┐
//!                    │      Volume       │
//!                    │  (reservations)   │
//!                    └─────────┬─────────┘
//!                              ▼
//!                    ┌───────────────────┐
//!                    │       Disk        │
//!                    │ (LocalDisk, ...)  │
//!                    └───────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod disk;
pub mod part;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{PartError, Result};
pub use config::Config;
pub use disk::{Disk, DiskRef, LocalDisk, SingleDiskVolume, Volume, VolumeRef};
pub use part::{
    Checksums, ColumnsDescription, PartStorage, PartStorageBuilder, RemovalOutcome,
    VersionMetadata,
};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of partstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
