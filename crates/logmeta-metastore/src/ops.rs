//! Messages exchanged by the metadata service
//!
//! - [`MetaOp`]: operations replicated through the metadata group's log
//! - [`MetaRequest`] / [`MetaReply`]: the administrative query surface
//! - [`LogRequest`] / [`ChangeStateReply`]: requests sent to a log's group
//!
//! Everything is bincode-encoded.

use logmeta_common::error::ReplyError;
use logmeta_common::{ConsensusGroup, Error, LogInfo, LogName, LogState, Peer, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

fn encode<T: Serialize>(value: &T, what: &str) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| Error::Serialization(format!("{what}: {e}")))
}

fn decode<T: DeserializeOwned>(data: &[u8], what: &str) -> Result<T> {
    bincode::deserialize(data).map_err(|e| Error::decode(format!("{what}: {e}")))
}

/// Operation committed to the metadata group's replicated log
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetaOp {
    /// Record that `group` serves `log`
    Register { log: LogName, group: ConsensusGroup },
    /// Forget the group serving `log`
    Unregister { log: LogName },
    /// First contact from a log server
    Ping { peer: Peer },
    /// Liveness signal from a known log server
    Heartbeat { peer: Peer },
}

impl MetaOp {
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode(self, "meta op")
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        decode(data, "meta op")
    }

    /// Short name used in logs
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Unregister { .. } => "unregister",
            Self::Ping { .. } => "ping",
            Self::Heartbeat { .. } => "heartbeat",
        }
    }
}

/// Administrative request served by the query path
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetaRequest {
    CreateLog { name: String },
    DeleteLog { name: String },
    ListLogs,
    GetLog { name: String },
    Ping { peer: Peer },
    Heartbeat { peer: Peer },
}

impl MetaRequest {
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode(self, "meta request")
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        decode(data, "meta request")
    }
}

/// Reply to a [`MetaRequest`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetaReply {
    CreateLog(LogInfo),
    DeleteLog,
    ListLogs(Vec<LogInfo>),
    GetLog(LogInfo),
    Ping,
    Heartbeat,
    Error(ReplyError),
}

impl MetaReply {
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode(self, "meta reply")
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        decode(data, "meta reply")
    }
}

/// Request addressed to the group serving a log
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRequest {
    ChangeState {
        log: LogName,
        state: LogState,
        force: bool,
    },
}

impl LogRequest {
    /// Forced transition of `log` to `Closed`
    #[must_use]
    pub fn close(log: LogName) -> Self {
        Self::ChangeState {
            log,
            state: LogState::Closed,
            force: true,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        encode(self, "log request")
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        decode(data, "log request")
    }
}

/// Reply of a log group to [`LogRequest::ChangeState`]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStateReply {
    /// Set when the group refused or failed the transition
    pub error: Option<String>,
}

impl ChangeStateReply {
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode(self, "change state reply")
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        decode(data, "change state reply")
    }
}
