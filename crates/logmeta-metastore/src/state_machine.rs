//! Metadata state machine
//!
//! Two paths reach the state:
//! - **apply**: committed `MetaOp` entries, delivered in commit order by the
//!   consensus layer on every replica
//! - **query**: administrative requests served by the leader, which validate
//!   against local state and propose new operations to the metadata group
//!
//! Creating a log calls the chosen peers before the REGISTER proposal
//! commits. If the leader crashes in between, those peers host a group the
//! metadata map never learns about.

use crate::monitor::{HealthMonitor, MonitorHandle};
use crate::ops::{MetaOp, MetaReply, MetaRequest};
use crate::rpc::{GroupHost, PeerClient};
use crate::state::{MetaSnapshot, MetaState};
use futures::future::join_all;
use logmeta_common::{ConsensusGroup, Error, GroupId, LogInfo, LogName, MetaConfig, Peer, Result};
use logmeta_storage::{RetryPolicy, SnapshotStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub struct MetaStateMachine {
    config: MetaConfig,
    metadata_group_id: GroupId,
    host: Arc<dyn GroupHost>,
    peers: Arc<dyn PeerClient>,
    state: Arc<MetaState>,
    snapshots: SnapshotStore,
    /// Index of the last applied entry; also serializes apply
    last_applied: parking_lot::Mutex<u64>,
    /// Held exclusively by create_log across its peer calls
    create_lock: RwLock<()>,
    metadata_group: parking_lot::RwLock<Option<ConsensusGroup>>,
    monitor: tokio::sync::Mutex<Option<MonitorHandle>>,
}

impl MetaStateMachine {
    pub fn new(
        config: MetaConfig,
        host: Arc<dyn GroupHost>,
        peers: Arc<dyn PeerClient>,
    ) -> Result<Self> {
        config.validate()?;
        let metadata_group_id = config
            .metadata_group_id
            .ok_or_else(|| Error::configuration("metadata_group_id is not set"))?;
        let snapshots = SnapshotStore::new(
            &config.snapshot.dir,
            config.snapshot.retention,
            RetryPolicy::from_config(&config.file_retry),
        );

        Ok(Self {
            config,
            metadata_group_id,
            host,
            peers,
            state: Arc::new(MetaState::new()),
            snapshots,
            last_applied: parking_lot::Mutex::new(0),
            create_lock: RwLock::new(()),
            metadata_group: parking_lot::RwLock::new(None),
            monitor: tokio::sync::Mutex::new(None),
        })
    }

    /// Join the metadata group, restore persisted state and start the
    /// health monitor
    pub async fn initialize(&self) -> Result<()> {
        let group = self
            .host
            .groups()
            .await?
            .into_iter()
            .find(|group| group.id() == self.metadata_group_id)
            .ok_or_else(|| Error::GroupNotHosted(self.metadata_group_id.to_string()))?;
        info!("Serving metadata group {}", group);
        *self.metadata_group.write() = Some(group);

        if let Some((index, snapshot)) = self.snapshots.load_latest::<MetaSnapshot>()? {
            let mut last_applied = self.last_applied.lock();
            if index > *last_applied {
                self.state.restore(snapshot, Instant::now());
                *last_applied = index;
                info!(
                    "Restored metadata snapshot at index {} ({} logs)",
                    index,
                    self.state.log_count()
                );
            }
        }

        let after = self.last_applied();
        let entries = self
            .host
            .committed_entries(self.metadata_group_id, after)
            .await?;
        if !entries.is_empty() {
            info!("Replaying {} committed entries after index {}", entries.len(), after);
        }
        for (index, data) in entries {
            self.apply(index, &data);
        }

        let mut monitor = self.monitor.lock().await;
        if monitor.is_none() {
            *monitor = Some(
                HealthMonitor::new(
                    Arc::clone(&self.state),
                    Arc::clone(&self.peers),
                    self.config.failure_detection_period(),
                    self.config.check_interval(),
                )
                .spawn(),
            );
        }
        Ok(())
    }

    /// Stop the health monitor and wait for it to exit
    pub async fn shutdown(&self) {
        if let Some(handle) = self.monitor.lock().await.take() {
            handle.stop().await;
        }
    }

    /// Apply the committed entry at `index`.
    ///
    /// Indexes start at 1. Entries at or below the last applied index are
    /// redeliveries and are ignored. An entry that fails to decode is
    /// skipped but still counts as applied.
    pub fn apply(&self, index: u64, data: &[u8]) {
        let mut last_applied = self.last_applied.lock();
        if index <= *last_applied {
            debug!("Ignoring redelivered entry {} (applied up to {})", index, *last_applied);
            return;
        }

        match MetaOp::decode(data) {
            Ok(op) => {
                debug!(index, op = op.kind(), "Applying metadata operation");
                self.state.apply_op(op, Instant::now());
            }
            Err(e) => error!("Skipping undecodable entry at index {}: {}", index, e),
        }
        *last_applied = index;
    }

    #[must_use]
    pub fn last_applied(&self) -> u64 {
        *self.last_applied.lock()
    }

    #[must_use]
    pub fn state(&self) -> &Arc<MetaState> {
        &self.state
    }

    /// The metadata group, once `initialize` has resolved it
    #[must_use]
    pub fn metadata_group(&self) -> Option<ConsensusGroup> {
        self.metadata_group.read().clone()
    }

    /// Allocate a group for a new log, start it on its peers and register
    /// it with the metadata group
    pub async fn create_log(&self, name: LogName) -> Result<LogInfo> {
        let _guard = self.create_lock.write().await;

        if self.state.contains_log(&name) {
            return Err(Error::LogAlreadyExists(name.to_string()));
        }
        let group = self.state.allocate_group(self.config.group_size)?;

        let calls = group.peers().iter().map(|peer| {
            let group = &group;
            async move { (peer, self.peers.add_group(group, peer).await) }
        });
        for (peer, result) in join_all(calls).await {
            if let Err(e) = result {
                warn!("Failed to add group {} on peer {}: {}", group.id(), peer, e);
            }
        }

        let op = MetaOp::Register {
            log: name.clone(),
            group: group.clone(),
        };
        match self.propose(&op).await {
            Ok(index) => info!("Created log {} on group {} at index {}", name, group, index),
            Err(e) => error!("Failed to register log {} on group {}: {}", name, group.id(), e),
        }
        Ok(LogInfo::new(name, group))
    }

    /// Stop the log's group on every member and unregister it
    pub async fn delete_log(&self, name: &LogName) -> Result<()> {
        let _guard = self.create_lock.read().await;

        let group = self
            .state
            .group_of(name)
            .ok_or_else(|| Error::LogNotFound(name.to_string()))?;

        let calls = group.peers().iter().map(|peer| {
            let group_id = group.id();
            async move { (peer, self.peers.remove_group(group_id, peer, true).await) }
        });
        for (peer, result) in join_all(calls).await {
            if let Err(e) = result {
                warn!("Failed to remove group {} from peer {}: {}", group.id(), peer, e);
            }
        }

        match self.propose(&MetaOp::Unregister { log: name.clone() }).await {
            Ok(index) => info!("Deleted log {} at index {}", name, index),
            Err(e) => error!("Failed to unregister log {}: {}", name, e),
        }
        Ok(())
    }

    /// All logs, ordered by name
    #[must_use]
    pub fn list_logs(&self) -> Vec<LogInfo> {
        self.state.list_logs()
    }

    pub fn get_log(&self, name: &LogName) -> Result<LogInfo> {
        self.state
            .get_log(name)
            .ok_or_else(|| Error::LogNotFound(name.to_string()))
    }

    /// Replicate first contact from a log server
    pub async fn ping(&self, peer: Peer) -> Result<()> {
        self.propose(&MetaOp::Ping { peer }).await.map(|_| ())
    }

    /// Replicate a liveness signal from a log server
    pub async fn heartbeat(&self, peer: Peer) -> Result<()> {
        self.propose(&MetaOp::Heartbeat { peer }).await.map(|_| ())
    }

    /// Serve an encoded [`MetaRequest`] and return the encoded [`MetaReply`].
    ///
    /// Failures of the request are carried in `MetaReply::Error`.
    pub async fn query(&self, request: &[u8]) -> Result<Vec<u8>> {
        let reply = match MetaRequest::decode(request) {
            Ok(request) => match self.dispatch(request).await {
                Ok(reply) => reply,
                Err(e) if e.is_domain_error() => {
                    debug!("Query rejected: {}", e);
                    MetaReply::Error(e.to_reply())
                }
                Err(e) => {
                    warn!("Query failed: {}", e);
                    MetaReply::Error(e.to_reply())
                }
            },
            Err(e) => {
                warn!("Rejecting malformed query: {}", e);
                MetaReply::Error(e.to_reply())
            }
        };
        reply.encode()
    }

    async fn dispatch(&self, request: MetaRequest) -> Result<MetaReply> {
        match request {
            MetaRequest::CreateLog { name } => {
                Ok(MetaReply::CreateLog(self.create_log(LogName::new(name)?).await?))
            }
            MetaRequest::DeleteLog { name } => {
                self.delete_log(&LogName::new(name)?).await?;
                Ok(MetaReply::DeleteLog)
            }
            MetaRequest::ListLogs => Ok(MetaReply::ListLogs(self.list_logs())),
            MetaRequest::GetLog { name } => Ok(MetaReply::GetLog(self.get_log(&LogName::new(name)?)?)),
            MetaRequest::Ping { peer } => {
                self.ping(peer).await?;
                Ok(MetaReply::Ping)
            }
            MetaRequest::Heartbeat { peer } => {
                self.heartbeat(peer).await?;
                Ok(MetaReply::Heartbeat)
            }
        }
    }

    /// Write the current state as a snapshot at the last applied index
    pub fn take_snapshot(&self) -> Result<PathBuf> {
        let (index, snapshot) = {
            let last_applied = self.last_applied.lock();
            (*last_applied, self.state.to_snapshot())
        };
        self.snapshots.write(index, &snapshot)
    }

    async fn propose(&self, op: &MetaOp) -> Result<u64> {
        let data = op.encode()?;
        self.host.propose(self.metadata_group_id, data).await
    }
}
