//! Core type definitions for logmeta
//!
//! Identifiers for logs, peers and consensus groups, plus the records the
//! metadata service hands back to clients.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Name of a log. Used as the key of the metadata map.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct LogName(String);

impl LogName {
    /// Maximum accepted length in bytes
    pub const MAX_LEN: usize = 255;

    /// Create a new log name
    pub fn new(name: impl Into<String>) -> Result<Self, LogNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// Get the log name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(name: &str) -> Result<(), LogNameError> {
        if name.is_empty() {
            return Err(LogNameError::Empty);
        }
        if name.len() > Self::MAX_LEN {
            return Err(LogNameError::TooLong);
        }
        if let Some(c) = name.chars().find(|c| c.is_control()) {
            return Err(LogNameError::InvalidChar(c));
        }
        Ok(())
    }
}

impl fmt::Debug for LogName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogName({:?})", self.0)
    }
}

/// Errors that can occur when creating a log name
#[derive(Debug, Clone, thiserror::Error)]
pub enum LogNameError {
    #[error("log name must not be empty")]
    Empty,
    #[error("log name must be at most 255 bytes")]
    TooLong,
    #[error("log name contains invalid character: {0:?}")]
    InvalidChar(char),
}

/// Identifier of a server process
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct PeerId(String);

impl PeerId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

/// A server that can join consensus groups
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Peer {
    /// Unique peer identifier
    pub id: PeerId,
    /// Address other servers reach this peer at (host:port)
    pub address: String,
}

impl Peer {
    #[must_use]
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: PeerId::new(id),
            address: address.into(),
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.address)
    }
}

/// Unique identifier for a consensus group
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(Uuid);

impl GroupId {
    /// Generate a new random group ID
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Debug for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupId({})", self.0)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fixed set of peers replicating one ordered log.
///
/// Membership never changes; a membership change produces a new group id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsensusGroup {
    id: GroupId,
    peers: Vec<Peer>,
}

impl ConsensusGroup {
    #[must_use]
    pub fn new(id: GroupId, peers: Vec<Peer>) -> Self {
        Self { id, peers }
    }

    #[must_use]
    pub const fn id(&self) -> GroupId {
        self.id
    }

    #[must_use]
    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    /// Check whether the peer is a member of this group
    #[must_use]
    pub fn contains(&self, peer: &PeerId) -> bool {
        self.peers.iter().any(|p| &p.id == peer)
    }
}

impl fmt::Display for ConsensusGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.id)?;
        for (i, peer) in self.peers.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", peer.id)?;
        }
        write!(f, "]")
    }
}

/// A log together with the group that serves it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogInfo {
    pub name: LogName,
    pub group: ConsensusGroup,
}

impl LogInfo {
    #[must_use]
    pub fn new(name: LogName, group: ConsensusGroup) -> Self {
        Self { name, group }
    }
}

/// Lifecycle state of a log stream on its serving group
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogState {
    Open,
    Closed,
}
