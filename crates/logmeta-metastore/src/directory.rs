//! Peer directory
//!
//! Tracks every log server the metadata service has heard of: which peers
//! are currently known (eligible for new groups), when each last sent a
//! heartbeat, and which logs each peer hosts.

use crate::load_rank::LoadRank;
use logmeta_common::{GroupId, LogName, Peer, PeerId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio::time::Instant;

/// What the directory knows about a single peer
#[derive(Clone, Debug)]
pub struct PeerRecord {
    pub peer: Peer,
    /// `None` until the peer pings; such peers are never reported dead
    pub last_heartbeat: Option<Instant>,
    /// Logs whose group includes this peer
    pub hosted: BTreeSet<LogName>,
}

impl PeerRecord {
    fn new(peer: Peer) -> Self {
        Self {
            peer,
            last_heartbeat: None,
            hosted: BTreeSet::new(),
        }
    }
}

/// A [`PeerRecord`] as written to a snapshot
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSnapshot {
    pub peer: Peer,
    pub known: bool,
    pub heartbeat_seen: bool,
    pub hosted: Vec<LogName>,
}

#[derive(Debug, Default)]
pub struct PeerDirectory {
    known: BTreeSet<PeerId>,
    records: BTreeMap<PeerId, PeerRecord>,
    load_rank: LoadRank,
}

impl PeerDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// First contact from `peer`. Returns true if the peer was not known.
    pub fn ping(&mut self, peer: &Peer, now: Instant) -> bool {
        if self.known.contains(&peer.id) {
            return false;
        }
        self.known.insert(peer.id.clone());
        self.load_rank.insert(peer.clone());
        let record = self
            .records
            .entry(peer.id.clone())
            .or_insert_with(|| PeerRecord::new(peer.clone()));
        record.peer = peer.clone();
        record.last_heartbeat = Some(now);
        true
    }

    /// Refresh the heartbeat of a known peer. Unknown peers are ignored.
    pub fn heartbeat(&mut self, peer: &PeerId, now: Instant) -> bool {
        if !self.known.contains(peer) {
            return false;
        }
        match self.records.get_mut(peer) {
            Some(record) => {
                record.last_heartbeat = Some(now);
                true
            }
            None => false,
        }
    }

    /// Record that `peer` hosts `log` through `group`
    pub fn add_hosted(&mut self, peer: &Peer, log: &LogName, group: GroupId) {
        self.records
            .entry(peer.id.clone())
            .or_insert_with(|| PeerRecord::new(peer.clone()))
            .hosted
            .insert(log.clone());
        self.load_rank.record_group(&peer.id, group);
    }

    /// Forget that `peer` hosts `log` through `group`
    pub fn remove_hosted(&mut self, peer: &PeerId, log: &LogName, group: GroupId) {
        if let Some(record) = self.records.get_mut(peer) {
            record.hosted.remove(log);
        }
        self.load_rank.release_group(peer, group);
    }

    /// Drop `log` from the hosted set of `peer` only
    pub fn drop_hosted(&mut self, peer: &PeerId, log: &LogName) {
        if let Some(record) = self.records.get_mut(peer) {
            record.hosted.remove(log);
        }
    }

    /// Peers whose last heartbeat is older than `threshold`
    #[must_use]
    pub fn dead_peers(&self, now: Instant, threshold: Duration) -> Vec<PeerId> {
        self.records
            .values()
            .filter(|record| {
                record
                    .last_heartbeat
                    .is_some_and(|last| now.saturating_duration_since(last) > threshold)
            })
            .map(|record| record.peer.id.clone())
            .collect()
    }

    /// Remove `peer` from the known set and the load ranking.
    ///
    /// The record stays until its hosted logs are drained. Returns true if
    /// the peer was known.
    pub fn evict(&mut self, peer: &PeerId) -> bool {
        self.load_rank.remove(peer);
        self.known.remove(peer)
    }

    /// Remove the record of an unknown peer that no longer hosts anything
    pub fn remove_if_drained(&mut self, peer: &PeerId) -> bool {
        let drained = !self.known.contains(peer)
            && self
                .records
                .get(peer)
                .is_some_and(|record| record.hosted.is_empty());
        if drained {
            self.records.remove(peer);
        }
        drained
    }

    #[must_use]
    pub fn hosted_logs(&self, peer: &PeerId) -> Vec<LogName> {
        self.records
            .get(peer)
            .map(|record| record.hosted.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_known(&self, peer: &PeerId) -> bool {
        self.known.contains(peer)
    }

    #[must_use]
    pub fn known_count(&self) -> usize {
        self.known.len()
    }

    #[must_use]
    pub fn record(&self, peer: &PeerId) -> Option<&PeerRecord> {
        self.records.get(peer)
    }

    pub fn records(&self) -> impl Iterator<Item = &PeerRecord> {
        self.records.values()
    }

    #[must_use]
    pub fn load_rank(&self) -> &LoadRank {
        &self.load_rank
    }

    pub fn load_rank_mut(&mut self) -> &mut LoadRank {
        &mut self.load_rank
    }

    /// Persistable view of every record, ranked peers first in the order
    /// they became known
    #[must_use]
    pub fn snapshot(&self) -> Vec<PeerSnapshot> {
        let mut records: Vec<&PeerRecord> = self.records.values().collect();
        records.sort_by_key(|record| {
            self.load_rank
                .sequence_of(&record.peer.id)
                .unwrap_or(u64::MAX)
        });
        records
            .into_iter()
            .map(|record| PeerSnapshot {
                peer: record.peer.clone(),
                known: self.known.contains(&record.peer.id),
                heartbeat_seen: record.last_heartbeat.is_some(),
                hosted: record.hosted.iter().cloned().collect(),
            })
            .collect()
    }

    /// Rebuild a directory from persisted records.
    ///
    /// Restored peers that had a heartbeat get `now`, so they are given a
    /// full detection period before being judged. Group loads are not
    /// persisted; callers re-record them from the metadata map.
    pub fn restore(records: Vec<PeerSnapshot>, now: Instant) -> Self {
        let mut directory = Self::new();
        for snapshot in records {
            if snapshot.known {
                directory.known.insert(snapshot.peer.id.clone());
                directory.load_rank.insert(snapshot.peer.clone());
            }
            let mut record = PeerRecord::new(snapshot.peer);
            record.last_heartbeat = snapshot.heartbeat_seen.then_some(now);
            record.hosted = snapshot.hosted.into_iter().collect();
            directory.records.insert(record.peer.id.clone(), record);
        }
        directory
    }

    /// Known peers are ranked and every ranked peer is known
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.load_rank.len() == self.known.len()
            && self.known.iter().all(|peer| {
                self.load_rank.contains(peer) && self.records.contains_key(peer)
            })
    }
}
