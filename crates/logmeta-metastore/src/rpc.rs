//! Collaborators of the metadata state machine
//!
//! The state machine never talks to the network itself. Consensus and
//! peer-to-peer calls go through these traits so the hosting server can plug
//! in its own transport.

use async_trait::async_trait;
use logmeta_common::{ConsensusGroup, GroupId, Peer, Result};

/// The replicated-consensus server hosting the metadata group
#[async_trait]
pub trait GroupHost: Send + Sync {
    /// Groups this server is currently a member of
    async fn groups(&self) -> Result<Vec<ConsensusGroup>>;

    /// Append `op` to the log of `group` and wait until it is committed.
    ///
    /// Returns the committed index.
    async fn propose(&self, group: GroupId, op: Vec<u8>) -> Result<u64>;

    /// Committed entries of `group` with an index greater than `after`,
    /// in commit order
    async fn committed_entries(&self, group: GroupId, after: u64) -> Result<Vec<(u64, Vec<u8>)>>;
}

/// Calls from the metadata service to individual log servers
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Ask `target` to start serving `group`
    async fn add_group(&self, group: &ConsensusGroup, target: &Peer) -> Result<()>;

    /// Ask `target` to stop serving `group`
    async fn remove_group(&self, group: GroupId, target: &Peer, force: bool) -> Result<()>;

    /// Send a request to whichever member of `group` currently leads it
    async fn send_to_group(&self, group: &ConsensusGroup, request: Vec<u8>) -> Result<Vec<u8>>;
}
