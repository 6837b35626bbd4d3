//! In-memory collaborators for tests

use crate::ops::{ChangeStateReply, LogRequest};
use crate::rpc::{GroupHost, PeerClient};
use crate::state_machine::MetaStateMachine;
use async_trait::async_trait;
use logmeta_common::{ConsensusGroup, Error, GroupId, Peer, PeerId, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Consensus host that commits every proposal to an in-memory log.
///
/// Committed entries are handed to a state machine explicitly through
/// [`RecordingHost::deliver`], standing in for the consensus apply loop.
#[derive(Default)]
pub struct RecordingHost {
    groups: Mutex<Vec<ConsensusGroup>>,
    log: Mutex<Vec<(u64, GroupId, Vec<u8>)>>,
    delivered: Mutex<u64>,
    fail_proposals: AtomicBool,
}

impl RecordingHost {
    pub fn new(groups: Vec<ConsensusGroup>) -> Self {
        Self {
            groups: Mutex::new(groups),
            ..Self::default()
        }
    }

    pub fn set_fail_proposals(&self, fail: bool) {
        self.fail_proposals.store(fail, Ordering::SeqCst);
    }

    /// Number of committed entries
    pub fn committed(&self) -> usize {
        self.log.lock().len()
    }

    /// Apply every committed entry not yet delivered
    pub fn deliver(&self, sm: &MetaStateMachine) {
        let pending: Vec<(u64, Vec<u8>)> = {
            let delivered = *self.delivered.lock();
            self.log
                .lock()
                .iter()
                .filter(|(index, _, _)| *index > delivered)
                .map(|(index, _, data)| (*index, data.clone()))
                .collect()
        };
        for (index, data) in pending {
            sm.apply(index, &data);
            *self.delivered.lock() = index;
        }
    }

    /// Append an entry without going through `propose`
    pub fn commit_raw(&self, group: GroupId, data: Vec<u8>) -> u64 {
        let mut log = self.log.lock();
        let index = log.len() as u64 + 1;
        log.push((index, group, data));
        index
    }
}

#[async_trait]
impl GroupHost for RecordingHost {
    async fn groups(&self) -> Result<Vec<ConsensusGroup>> {
        Ok(self.groups.lock().clone())
    }

    async fn propose(&self, group: GroupId, op: Vec<u8>) -> Result<u64> {
        if self.fail_proposals.load(Ordering::SeqCst) {
            return Err(Error::Proposal {
                group: group.to_string(),
                reason: "not leader".to_string(),
            });
        }
        Ok(self.commit_raw(group, op))
    }

    async fn committed_entries(&self, group: GroupId, after: u64) -> Result<Vec<(u64, Vec<u8>)>> {
        Ok(self
            .log
            .lock()
            .iter()
            .filter(|(index, g, _)| *g == group && *index > after)
            .map(|(index, _, data)| (*index, data.clone()))
            .collect())
    }
}

/// A call made through [`RecordingPeers`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerCall {
    AddGroup { group: GroupId, peer: PeerId },
    RemoveGroup { group: GroupId, peer: PeerId, force: bool },
    SendToGroup { group: GroupId, request: LogRequest },
}

/// Peer client that records calls and answers from canned settings
#[derive(Default)]
pub struct RecordingPeers {
    calls: Mutex<Vec<PeerCall>>,
    close_error: Mutex<Option<String>>,
    unreachable: AtomicBool,
}

impl RecordingPeers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<PeerCall> {
        self.calls.lock().clone()
    }

    /// Make log groups answer close requests with an error
    pub fn refuse_close(&self, reason: &str) {
        *self.close_error.lock() = Some(reason.to_string());
    }

    pub fn accept_close(&self) {
        *self.close_error.lock() = None;
    }

    /// Fail every call at the transport level
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    fn check_reachable(&self, target: impl ToString) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(Error::peer_call(target, "connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerClient for RecordingPeers {
    async fn add_group(&self, group: &ConsensusGroup, target: &Peer) -> Result<()> {
        self.calls.lock().push(PeerCall::AddGroup {
            group: group.id(),
            peer: target.id.clone(),
        });
        self.check_reachable(&target.id)
    }

    async fn remove_group(&self, group: GroupId, target: &Peer, force: bool) -> Result<()> {
        self.calls.lock().push(PeerCall::RemoveGroup {
            group,
            peer: target.id.clone(),
            force,
        });
        self.check_reachable(&target.id)
    }

    async fn send_to_group(&self, group: &ConsensusGroup, request: Vec<u8>) -> Result<Vec<u8>> {
        self.calls.lock().push(PeerCall::SendToGroup {
            group: group.id(),
            request: LogRequest::decode(&request)?,
        });
        self.check_reachable(group.id())?;
        ChangeStateReply {
            error: self.close_error.lock().clone(),
        }
        .encode()
    }
}
