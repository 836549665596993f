//! Version metadata
//!
//! MVCC visibility stamp of a part: which transaction created it and which
//! one (if any) removed it, plus the commit sequence numbers once known.
//!
//! ## File Format (`txn_version.txt`)
//! ```text
//! version: 1
//! creation_tid: (12, 3, 7c6d...)
//! creation_csn: 40          ← appended once the creating txn commits
//! removal_tid: (45, 1, ...) ← appended when a txn locks the part for removal
//! removal_csn: 51           ← appended once the removing txn commits
//! ```
//!
//! Records are single lines, so later appends override earlier values. A
//! removal TID equal to [`TransactionId::EMPTY`] clears the removal lock.

use std::fmt;
use std::io::Write;
use std::str::FromStr;

use uuid::Uuid;

use crate::error::{PartError, Result};

/// Commit sequence number
pub type Csn = u64;

/// Not committed yet
pub const UNKNOWN_CSN: Csn = 0;

/// Committed before transactions existed; visible to everyone
pub const PREHISTORIC_CSN: Csn = 1;

/// Values up to this one are sentinels, never assigned to real commits
pub const MAX_RESERVED_CSN: Csn = 32;

/// The transaction was rolled back
pub const ROLLED_BACK_CSN: Csn = Csn::MAX;

const FORMAT_VERSION: u32 = 1;

/// Identifier of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId {
    /// Snapshot the transaction started at
    pub start_csn: Csn,
    /// Counter local to the host that started the transaction
    pub local_tid: u64,
    pub host_id: Uuid,
}

impl TransactionId {
    pub const EMPTY: Self = Self {
        start_csn: 0,
        local_tid: 0,
        host_id: Uuid::nil(),
    };

    /// Creator of parts written before transactions existed
    pub const PREHISTORIC: Self = Self {
        start_csn: PREHISTORIC_CSN,
        local_tid: 1,
        host_id: Uuid::nil(),
    };

    /// Stand-in for a creator whose metadata was never committed
    pub const DUMMY: Self = Self {
        start_csn: PREHISTORIC_CSN,
        local_tid: 2,
        host_id: Uuid::nil(),
    };

    pub fn new(start_csn: Csn, local_tid: u64, host_id: Uuid) -> Self {
        Self {
            start_csn,
            local_tid,
            host_id,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }

    pub fn is_prehistoric(&self) -> bool {
        *self == Self::PREHISTORIC
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.start_csn, self.local_tid, self.host_id)
    }
}

impl FromStr for TransactionId {
    type Err = PartError;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = || PartError::Serialization(format!("malformed transaction id: {:?}", s));

        let inner = s
            .trim()
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .ok_or_else(malformed)?;

        let mut parts = inner.split(',').map(str::trim);
        let start_csn = parts.next().and_then(|p| p.parse().ok()).ok_or_else(malformed)?;
        let local_tid = parts.next().and_then(|p| p.parse().ok()).ok_or_else(malformed)?;
        let host_id = parts
            .next()
            .and_then(|p| Uuid::parse_str(p).ok())
            .ok_or_else(malformed)?;
        if parts.next().is_some() {
            return Err(malformed());
        }

        Ok(Self::new(start_csn, local_tid, host_id))
    }
}

/// Which commit sequence number an append records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhichCsn {
    Creation,
    Removal,
}

impl WhichCsn {
    fn key(self) -> &'static str {
        match self {
            WhichCsn::Creation => "creation_csn",
            WhichCsn::Removal => "removal_csn",
        }
    }
}

/// MVCC visibility stamp of a part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMetadata {
    pub creation_tid: TransactionId,
    pub creation_csn: Option<Csn>,
    pub removal_tid: Option<TransactionId>,
    pub removal_csn: Option<Csn>,
}

impl VersionMetadata {
    /// Metadata of a part created by `creation_tid`, not yet committed
    pub fn new(creation_tid: TransactionId) -> Self {
        Self {
            creation_tid,
            creation_csn: None,
            removal_tid: None,
            removal_csn: None,
        }
    }

    /// Part that predates transactions; always visible
    pub fn prehistoric() -> Self {
        Self {
            creation_csn: Some(PREHISTORIC_CSN),
            ..Self::new(TransactionId::PREHISTORIC)
        }
    }

    /// Part whose creation never committed; never visible
    pub fn rolled_back() -> Self {
        Self {
            creation_csn: Some(ROLLED_BACK_CSN),
            ..Self::new(TransactionId::DUMMY)
        }
    }

    pub fn is_rolled_back(&self) -> bool {
        self.creation_csn == Some(ROLLED_BACK_CSN)
    }

    /// Whether a reader at `snapshot` sees the part
    pub fn is_visible(&self, snapshot: Csn) -> bool {
        let created = match self.creation_csn {
            Some(csn) if csn != ROLLED_BACK_CSN && csn != UNKNOWN_CSN => csn <= snapshot,
            _ => false,
        };
        let removed = matches!(self.removal_csn, Some(csn) if csn != UNKNOWN_CSN && csn <= snapshot);
        created && !removed
    }

    // =========================================================================
    // Codec
    // =========================================================================

    /// Full record, as written at part creation
    pub fn write<W: Write + ?Sized>(&self, out: &mut W) -> Result<()> {
        writeln!(out, "version: {}", FORMAT_VERSION)?;
        writeln!(out, "creation_tid: {}", self.creation_tid)?;
        if let Some(csn) = self.creation_csn {
            writeln!(out, "creation_csn: {}", csn)?;
        }
        if let Some(tid) = self.removal_tid {
            writeln!(out, "removal_tid: {}", tid)?;
            if let Some(csn) = self.removal_csn {
                writeln!(out, "removal_csn: {}", csn)?;
            }
        }
        Ok(())
    }

    /// Single `*_csn` record for appending
    pub fn write_csn<W: Write + ?Sized>(&self, out: &mut W, which: WhichCsn) -> Result<()> {
        let csn = match which {
            WhichCsn::Creation => self.creation_csn,
            WhichCsn::Removal => self.removal_csn,
        };
        let csn = csn.ok_or_else(|| {
            PartError::Logical(format!("cannot write {}: it is not set", which.key()))
        })?;
        writeln!(out, "{}: {}", which.key(), csn)?;
        Ok(())
    }

    /// Single `removal_tid` record for appending; `clear` writes the empty TID
    pub fn write_removal_tid<W: Write + ?Sized>(&self, out: &mut W, clear: bool) -> Result<()> {
        let tid = if clear {
            TransactionId::EMPTY
        } else {
            self.removal_tid.ok_or_else(|| {
                PartError::Logical("cannot write removal_tid: part is not locked".to_string())
            })?
        };
        writeln!(out, "removal_tid: {}", tid)?;
        Ok(())
    }

    /// Parse a record and all of its appends
    ///
    /// A trailing line without a newline is a torn append and is ignored.
    pub fn read(content: &str) -> Result<Self> {
        let mut creation_tid = None;
        let mut version = Self::new(TransactionId::EMPTY);

        for line in content.split_inclusive('\n') {
            let Some(line) = line.strip_suffix('\n') else {
                tracing::warn!("Ignoring incomplete version metadata record: {:?}", line);
                break;
            };
            if line.trim().is_empty() {
                continue;
            }

            let (key, value) = line.split_once(": ").ok_or_else(|| {
                PartError::Serialization(format!("malformed version metadata line: {:?}", line))
            })?;

            match key {
                "version" => {
                    if value.trim() != FORMAT_VERSION.to_string() {
                        return Err(PartError::Serialization(format!(
                            "unsupported version metadata format: {}",
                            value
                        )));
                    }
                }
                "creation_tid" => creation_tid = Some(value.parse::<TransactionId>()?),
                "creation_csn" => version.creation_csn = Some(parse_csn(value)?),
                "removal_tid" => {
                    let tid = value.parse::<TransactionId>()?;
                    version.removal_tid = if tid.is_empty() { None } else { Some(tid) };
                }
                "removal_csn" => version.removal_csn = Some(parse_csn(value)?),
                _ => {
                    return Err(PartError::Serialization(format!(
                        "unknown version metadata field: {:?}",
                        key
                    )))
                }
            }
        }

        version.creation_tid = creation_tid.ok_or_else(|| {
            PartError::Serialization("version metadata has no creation_tid".to_string())
        })?;
        Ok(version)
    }
}

fn parse_csn(value: &str) -> Result<Csn> {
    value
        .trim()
        .parse()
        .map_err(|_| PartError::Serialization(format!("malformed CSN: {:?}", value)))
}
