//! Error types for logmeta
//!
//! This module defines the common error types used throughout the system.

use crate::types::LogNameError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Common result type for logmeta operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for logmeta
#[derive(Debug, Error)]
pub enum Error {
    // Metadata errors
    #[error("log already exists: {0}")]
    LogAlreadyExists(String),

    #[error("log not found: {0}")]
    LogNotFound(String),

    #[error("invalid log name: {0}")]
    InvalidLogName(#[from] LogNameError),

    // Allocation errors
    #[error("not enough workers: have {available}, need {required}")]
    NotEnoughWorkers { available: usize, required: usize },

    // Replication errors
    #[error("failed to decode replicated operation: {0}")]
    Decode(String),

    #[error("proposal to group {group} failed: {reason}")]
    Proposal { group: String, reason: String },

    #[error("call to peer {peer} failed: {reason}")]
    PeerCall { peer: String, reason: String },

    #[error("metadata group {0} is not hosted by this server")]
    GroupNotHosted(String),

    // Storage errors
    #[error("disk I/O error: {0}")]
    DiskIo(#[from] std::io::Error),

    #[error("data corruption detected: {0}")]
    DataCorruption(String),

    // Internal errors
    #[error("internal error: {0}")]
    Internal(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a peer call error
    pub fn peer_call(peer: impl ToString, reason: impl ToString) -> Self {
        Self::PeerCall {
            peer: peer.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::LogNotFound(_))
    }

    /// Domain errors are answered to clients as typed replies rather than
    /// surfaced as transport failures.
    #[must_use]
    pub fn is_domain_error(&self) -> bool {
        matches!(
            self,
            Self::LogAlreadyExists(_)
                | Self::LogNotFound(_)
                | Self::InvalidLogName(_)
                | Self::NotEnoughWorkers { .. }
        )
    }

    /// Convert into the wire representation carried in replies
    #[must_use]
    pub fn to_reply(&self) -> ReplyError {
        match self {
            Self::LogAlreadyExists(name) => ReplyError::LogAlreadyExists(name.clone()),
            Self::LogNotFound(name) => ReplyError::LogNotFound(name.clone()),
            Self::NotEnoughWorkers {
                available,
                required,
            } => ReplyError::NotEnoughWorkers {
                available: *available,
                required: *required,
            },
            Self::InvalidLogName(_) | Self::Decode(_) => ReplyError::BadRequest(self.to_string()),
            _ => ReplyError::Internal(self.to_string()),
        }
    }
}

/// Error carried inside a query reply
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum ReplyError {
    #[error("log already exists: {0}")]
    LogAlreadyExists(String),
    #[error("log not found: {0}")]
    LogNotFound(String),
    #[error("not enough workers: have {available}, need {required}")]
    NotEnoughWorkers { available: usize, required: usize },
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ReplyError> for Error {
    fn from(e: ReplyError) -> Self {
        match e {
            ReplyError::LogAlreadyExists(name) => Self::LogAlreadyExists(name),
            ReplyError::LogNotFound(name) => Self::LogNotFound(name),
            ReplyError::NotEnoughWorkers {
                available,
                required,
            } => Self::NotEnoughWorkers {
                available,
                required,
            },
            ReplyError::BadRequest(msg) => Self::Decode(msg),
            ReplyError::Internal(msg) => Self::Internal(msg),
        }
    }
}
