//! Replicated metadata state
//!
//! `MetaState` holds the metadata map (log name to serving group) and the
//! peer directory. It is owned by the state machine and shared with the
//! health monitor through an `Arc`.

use crate::directory::{PeerDirectory, PeerSnapshot};
use crate::ops::MetaOp;
use dashmap::DashMap;
use logmeta_common::{ConsensusGroup, Error, GroupId, LogInfo, LogName, Result};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

/// Persisted form of [`MetaState`]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaSnapshot {
    pub logs: Vec<LogInfo>,
    pub peers: Vec<PeerSnapshot>,
}

#[derive(Debug, Default)]
pub struct MetaState {
    logs: DashMap<LogName, ConsensusGroup>,
    directory: Mutex<PeerDirectory>,
}

impl MetaState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one committed operation
    pub fn apply_op(&self, op: MetaOp, now: Instant) {
        match op {
            MetaOp::Register { log, group } => self.register(log, group),
            MetaOp::Unregister { log } => self.unregister(&log),
            MetaOp::Ping { peer } => {
                let mut directory = self.directory.lock();
                if directory.ping(&peer, now) {
                    // A returning peer may still be a member of registered groups.
                    for entry in self.logs.iter().filter(|e| e.value().contains(&peer.id)) {
                        directory
                            .load_rank_mut()
                            .record_group(&peer.id, entry.value().id());
                    }
                    info!("Registered new peer: {}", peer);
                }
            }
            MetaOp::Heartbeat { peer } => {
                if !self.directory.lock().heartbeat(&peer.id, now) {
                    debug!("Ignoring heartbeat from unknown peer {}", peer);
                }
            }
        }
    }

    fn register(&self, log: LogName, group: ConsensusGroup) {
        let mut directory = self.directory.lock();
        if let Some(previous) = self.logs.insert(log.clone(), group.clone()) {
            if previous.id() != group.id() {
                for peer in previous.peers() {
                    directory.remove_hosted(&peer.id, &log, previous.id());
                    directory.remove_if_drained(&peer.id);
                }
            }
        }
        for peer in group.peers() {
            directory.add_hosted(peer, &log, group.id());
        }
        info!("Registered log {} on group {}", log, group);
    }

    fn unregister(&self, log: &LogName) {
        let Some((_, group)) = self.logs.remove(log) else {
            debug!("Unregister of unknown log {}", log);
            return;
        };
        let mut directory = self.directory.lock();
        for peer in group.peers() {
            directory.remove_hosted(&peer.id, log, group.id());
            directory.remove_if_drained(&peer.id);
        }
        info!("Unregistered log {} from group {}", log, group.id());
    }

    /// Pick the `size` least loaded peers and count a fresh group against them
    pub fn allocate_group(&self, size: usize) -> Result<ConsensusGroup> {
        let mut directory = self.directory.lock();
        let rank = directory.load_rank_mut();
        let available = rank.len();
        let Some(mut chosen) = rank.pop_least_loaded(size) else {
            return Err(Error::NotEnoughWorkers {
                available,
                required: size,
            });
        };

        let group = ConsensusGroup::new(
            GroupId::random(),
            chosen.iter().map(|entry| entry.peer.clone()).collect(),
        );
        for mut entry in chosen.drain(..) {
            entry.groups.insert(group.id());
            rank.push(entry);
        }
        Ok(group)
    }

    #[must_use]
    pub fn get_log(&self, log: &LogName) -> Option<LogInfo> {
        self.logs
            .get(log)
            .map(|entry| LogInfo::new(log.clone(), entry.value().clone()))
    }

    #[must_use]
    pub fn group_of(&self, log: &LogName) -> Option<ConsensusGroup> {
        self.logs.get(log).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn contains_log(&self, log: &LogName) -> bool {
        self.logs.contains_key(log)
    }

    #[must_use]
    pub fn log_count(&self) -> usize {
        self.logs.len()
    }

    /// All logs, ordered by name
    #[must_use]
    pub fn list_logs(&self) -> Vec<LogInfo> {
        let mut logs: Vec<LogInfo> = self
            .logs
            .iter()
            .map(|entry| LogInfo::new(entry.key().clone(), entry.value().clone()))
            .collect();
        logs.sort_by(|a, b| a.name.cmp(&b.name));
        logs
    }

    /// Lock the peer directory. Never hold the guard across an `.await`.
    pub fn directory(&self) -> MutexGuard<'_, PeerDirectory> {
        self.directory.lock()
    }

    #[must_use]
    pub fn to_snapshot(&self) -> MetaSnapshot {
        let directory = self.directory.lock();
        MetaSnapshot {
            logs: self.list_logs(),
            peers: directory.snapshot(),
        }
    }

    /// Replace the whole state with `snapshot`
    pub fn restore(&self, snapshot: MetaSnapshot, now: Instant) {
        let mut restored = PeerDirectory::restore(snapshot.peers, now);
        for info in &snapshot.logs {
            for peer in info.group.peers() {
                restored
                    .load_rank_mut()
                    .record_group(&peer.id, info.group.id());
            }
        }

        let mut directory = self.directory.lock();
        self.logs.clear();
        for info in snapshot.logs {
            self.logs.insert(info.name, info.group);
        }
        *directory = restored;
    }
}
