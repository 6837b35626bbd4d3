//! Snapshot files
//!
//! A snapshot is a 32-byte header followed by a bincode body. The header
//! carries the last applied index and a CRC32C of the body so a torn or
//! corrupted file is rejected on load. Files are named
//! `meta_<index>.snapshot` and always published through
//! [`AtomicFileWriter`], so an interrupted write leaves at most a `.tmp`
//! file behind, which loading ignores.

use crate::atomic_file::AtomicFileWriter;
use crate::retry::RetryPolicy;
use logmeta_common::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const SNAPSHOT_PREFIX: &str = "meta_";
const SNAPSHOT_EXTENSION: &str = "snapshot";

/// Fixed-size header at the start of every snapshot file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotHeader {
    /// Magic number for validation
    pub magic: u32,
    /// Format version
    pub version: u32,
    /// Last applied log index captured by the snapshot
    pub index: u64,
    /// Length of the body in bytes
    pub body_len: u64,
    /// CRC32C of the body
    pub checksum: u32,
    /// Creation time (seconds since epoch, truncated)
    pub created_at: u32,
}

impl SnapshotHeader {
    pub const MAGIC: u32 = 0x4C4D_534E; // "LMSN"
    pub const VERSION: u32 = 1;
    pub const SIZE: usize = 32;

    #[must_use]
    pub fn new(index: u64, body: &[u8]) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            index,
            body_len: body.len() as u64,
            checksum: crc32c::crc32c(body),
            created_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs() as u32,
        }
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..16].copy_from_slice(&self.index.to_le_bytes());
        buf[16..24].copy_from_slice(&self.body_len.to_le_bytes());
        buf[24..28].copy_from_slice(&self.checksum.to_le_bytes());
        buf[28..32].copy_from_slice(&self.created_at.to_le_bytes());
        buf
    }

    #[must_use]
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        let magic = u32::from_le_bytes(data[0..4].try_into().ok()?);
        if magic != Self::MAGIC {
            return None;
        }
        Some(Self {
            magic,
            version: u32::from_le_bytes(data[4..8].try_into().ok()?),
            index: u64::from_le_bytes(data[8..16].try_into().ok()?),
            body_len: u64::from_le_bytes(data[16..24].try_into().ok()?),
            checksum: u32::from_le_bytes(data[24..28].try_into().ok()?),
            created_at: u32::from_le_bytes(data[28..32].try_into().ok()?),
        })
    }
}

/// Directory of snapshot files for one state machine
#[derive(Clone, Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
    retention: usize,
    policy: RetryPolicy,
}

impl SnapshotStore {
    pub fn new(dir: impl AsRef<Path>, retention: usize, policy: RetryPolicy) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            retention: retention.max(1),
            policy,
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the snapshot taken at `index`
    #[must_use]
    pub fn path_for(&self, index: u64) -> PathBuf {
        self.dir
            .join(format!("{SNAPSHOT_PREFIX}{index}.{SNAPSHOT_EXTENSION}"))
    }

    /// Serialize `state` and publish it as the snapshot for `index`
    pub fn write<T: Serialize>(&self, index: u64, state: &T) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        let body = bincode::serialize(state)
            .map_err(|e| Error::Serialization(format!("snapshot body: {e}")))?;
        let header = SnapshotHeader::new(index, &body);

        let mut data = Vec::with_capacity(SnapshotHeader::SIZE + body.len());
        data.extend_from_slice(&header.to_bytes());
        data.extend_from_slice(&body);

        let path = self.path_for(index);
        AtomicFileWriter::write_atomic(&path, &data, self.policy)?;
        info!("Wrote snapshot at index {} to {:?}", index, path);

        self.cleanup_old_snapshots()?;
        Ok(path)
    }

    /// Load the newest snapshot, if any
    pub fn load_latest<T: DeserializeOwned>(&self) -> Result<Option<(u64, T)>> {
        let Some((index, path)) = self.list()?.into_iter().last() else {
            return Ok(None);
        };
        let state = Self::read(&path)?;
        debug!("Loaded snapshot {:?}", path);
        Ok(Some((index, state)))
    }

    /// Read and verify one snapshot file
    pub fn read<T: DeserializeOwned>(path: &Path) -> Result<T> {
        let data = fs::read(path)?;
        let header = SnapshotHeader::from_bytes(&data).ok_or_else(|| {
            Error::DataCorruption(format!("{}: bad snapshot header", path.display()))
        })?;
        if header.version != SnapshotHeader::VERSION {
            return Err(Error::DataCorruption(format!(
                "{}: unsupported snapshot version {}",
                path.display(),
                header.version
            )));
        }

        let body = &data[SnapshotHeader::SIZE..];
        if body.len() as u64 != header.body_len {
            return Err(Error::DataCorruption(format!(
                "{}: truncated snapshot body",
                path.display()
            )));
        }
        let actual = crc32c::crc32c(body);
        if actual != header.checksum {
            return Err(Error::DataCorruption(format!(
                "{}: checksum mismatch, expected {:08x}, got {:08x}",
                path.display(),
                header.checksum,
                actual
            )));
        }

        bincode::deserialize(body).map_err(|e| Error::Decode(format!("snapshot body: {e}")))
    }

    /// Snapshot files sorted by index, oldest first
    fn list(&self) -> Result<Vec<(u64, PathBuf)>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut snapshots: Vec<(u64, PathBuf)> = fs::read_dir(&self.dir)?
            .filter_map(std::result::Result::ok)
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().is_none_or(|ext| ext != SNAPSHOT_EXTENSION) {
                    return None;
                }
                let index = path
                    .file_stem()?
                    .to_str()?
                    .strip_prefix(SNAPSHOT_PREFIX)?
                    .parse::<u64>()
                    .ok()?;
                Some((index, path))
            })
            .collect();
        snapshots.sort_by_key(|(index, _)| *index);
        Ok(snapshots)
    }

    fn cleanup_old_snapshots(&self) -> Result<()> {
        let snapshots = self.list()?;
        let excess = snapshots.len().saturating_sub(self.retention);
        for (index, path) in snapshots.into_iter().take(excess) {
            match fs::remove_file(&path) {
                Ok(()) => debug!("Removed old snapshot at index {}", index),
                Err(e) => warn!("Failed to remove old snapshot {:?}: {}", path, e),
            }
        }
        Ok(())
    }
}
