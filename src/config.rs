//! Configuration for partstore
//!
//! Tunables shared by every part storage handle, with sensible defaults.

/// Configuration carried by part storage handles
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Write Configuration
    // -------------------------------------------------------------------------
    /// Buffer size for whole-file writes (checksums, columns, version metadata)
    pub write_buffer_size: usize,

    /// Buffer size for small appends to txn_version.txt
    pub append_buffer_size: usize,

    // -------------------------------------------------------------------------
    // Lifecycle Configuration
    // -------------------------------------------------------------------------
    /// How many `_tryN` candidates to probe when looking for a free part name
    pub max_rename_attempts: usize,

    /// How many times a local snapshot is restarted when source files vanish
    pub freeze_retries: usize,

    // -------------------------------------------------------------------------
    // Backup Configuration
    // -------------------------------------------------------------------------
    /// Prefix (relative to the disk root) of temporary backup directories
    pub backup_tmp_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            write_buffer_size: 4096,
            append_buffer_size: 256,
            max_rename_attempts: 10,
            freeze_retries: 10,
            backup_tmp_prefix: "tmp/backup_".to_string(),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the buffer size used for whole-file writes
    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.config.write_buffer_size = size;
        self
    }

    /// Set the buffer size used for metadata appends
    pub fn append_buffer_size(mut self, size: usize) -> Self {
        self.config.append_buffer_size = size;
        self
    }

    /// Set the number of `_tryN` candidates probed for a free name
    pub fn max_rename_attempts(mut self, attempts: usize) -> Self {
        self.config.max_rename_attempts = attempts;
        self
    }

    /// Set the number of local snapshot retries
    pub fn freeze_retries(mut self, retries: usize) -> Self {
        self.config.freeze_retries = retries;
        self
    }

    /// Set the prefix of temporary backup directories
    pub fn backup_tmp_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.backup_tmp_prefix = prefix.into();
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
