//! Configuration types for logmeta
//!
//! `MetaConfig` is loaded from a TOML file; every field has a default so a
//! partial file (or none at all) is valid.

use crate::error::{Error, Result};
use crate::types::GroupId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for the metadata service
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaConfig {
    /// Group that replicates the metadata state machine
    pub metadata_group_id: Option<GroupId>,
    /// Heartbeat age after which a peer is considered dead (milliseconds)
    pub failure_detection_period_ms: u64,
    /// Interval between health monitor cycles (milliseconds)
    pub check_interval_ms: u64,
    /// Number of peers in a newly allocated log group
    pub group_size: usize,
    /// Snapshot configuration
    pub snapshot: SnapshotConfig,
    /// Retry policy for durable file writes
    pub file_retry: FileRetryConfig,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            metadata_group_id: None,
            failure_detection_period_ms: 30_000,
            check_interval_ms: 1_000,
            group_size: 3,
            snapshot: SnapshotConfig::default(),
            file_retry: FileRetryConfig::default(),
        }
    }
}

impl MetaConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| Error::configuration(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.group_size == 0 {
            return Err(Error::configuration("group_size must be at least 1"));
        }
        if self.check_interval_ms == 0 {
            return Err(Error::configuration("check_interval_ms must be positive"));
        }
        if self.failure_detection_period_ms < self.check_interval_ms {
            return Err(Error::configuration(
                "failure_detection_period_ms must not be shorter than check_interval_ms",
            ));
        }
        if self.snapshot.retention == 0 {
            return Err(Error::configuration("snapshot.retention must be at least 1"));
        }
        Ok(())
    }

    #[must_use]
    pub const fn failure_detection_period(&self) -> Duration {
        Duration::from_millis(self.failure_detection_period_ms)
    }

    #[must_use]
    pub const fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

/// Snapshot configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Directory holding snapshot files
    pub dir: PathBuf,
    /// Number of snapshots kept on disk
    pub retention: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./meta-snapshots"),
            retention: 2,
        }
    }
}

/// Retry policy for flush, sync and rename of durable files
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FileRetryConfig {
    /// Attempts before giving up; unset retries forever
    pub max_attempts: Option<u32>,
    /// Fixed delay between attempts (milliseconds)
    pub delay_ms: u64,
}

impl Default for FileRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            delay_ms: 1,
        }
    }
}
