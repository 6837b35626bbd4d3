//! Peer load ranking
//!
//! A min-heap of known peers keyed on the number of groups assigned to each
//! peer. Ties are broken by the order in which peers became known, so every
//! replica that applies the same operations ranks peers identically.

use logmeta_common::{GroupId, Peer, PeerId};
use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap};

/// A peer together with the groups allocated to it
#[derive(Clone, Debug)]
pub struct PeerLoad {
    pub peer: Peer,
    pub groups: BTreeSet<GroupId>,
    /// Insertion sequence, used as tie-breaker
    seq: u64,
}

impl PeerLoad {
    /// Number of groups allocated to this peer
    #[must_use]
    pub fn load(&self) -> usize {
        self.groups.len()
    }

    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    fn key(&self) -> (usize, u64) {
        (self.groups.len(), self.seq)
    }
}

// BinaryHeap is a max-heap; reverse the key so the least loaded peer pops first.
impl Ord for PeerLoad {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

impl PartialOrd for PeerLoad {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PeerLoad {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for PeerLoad {}

/// Known peers ordered by load
#[derive(Debug, Default)]
pub struct LoadRank {
    heap: BinaryHeap<PeerLoad>,
    next_seq: u64,
}

impl LoadRank {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    #[must_use]
    pub fn contains(&self, peer: &PeerId) -> bool {
        self.heap.iter().any(|entry| &entry.peer.id == peer)
    }

    /// Add a peer with no groups. Returns false if it is already ranked.
    pub fn insert(&mut self, peer: Peer) -> bool {
        if self.contains(&peer.id) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(PeerLoad {
            peer,
            groups: BTreeSet::new(),
            seq,
        });
        true
    }

    /// Remove and return the `n` least loaded peers, least loaded first.
    ///
    /// Returns `None` without touching the ranking if fewer than `n` peers
    /// are known.
    pub fn pop_least_loaded(&mut self, n: usize) -> Option<Vec<PeerLoad>> {
        if self.heap.len() < n {
            return None;
        }
        let mut popped = Vec::with_capacity(n);
        while popped.len() < n {
            popped.extend(self.heap.pop());
        }
        Some(popped)
    }

    /// Put back an entry taken by [`pop_least_loaded`](Self::pop_least_loaded)
    pub fn push(&mut self, entry: PeerLoad) {
        if !self.contains(&entry.peer.id) {
            self.heap.push(entry);
        }
    }

    /// Drop a peer from the ranking
    pub fn remove(&mut self, peer: &PeerId) -> Option<PeerLoad> {
        let mut removed = None;
        self.rebuild(|entries| {
            if let Some(pos) = entries.iter().position(|e| &e.peer.id == peer) {
                removed = Some(entries.swap_remove(pos));
            }
        });
        removed
    }

    /// Count `group` against `peer`. No-op for unranked peers.
    pub fn record_group(&mut self, peer: &PeerId, group: GroupId) -> bool {
        self.update(peer, |groups| groups.insert(group))
    }

    /// Stop counting `group` against `peer`
    pub fn release_group(&mut self, peer: &PeerId, group: GroupId) -> bool {
        self.update(peer, |groups| groups.remove(&group))
    }

    /// Current load of `peer`, if ranked
    #[must_use]
    pub fn load_of(&self, peer: &PeerId) -> Option<usize> {
        self.heap
            .iter()
            .find(|e| &e.peer.id == peer)
            .map(PeerLoad::load)
    }

    /// Insertion sequence of `peer`, if ranked
    #[must_use]
    pub fn sequence_of(&self, peer: &PeerId) -> Option<u64> {
        self.heap.iter().find(|e| &e.peer.id == peer).map(|e| e.seq)
    }

    /// Ranked peers, least loaded first
    #[must_use]
    pub fn peers(&self) -> Vec<Peer> {
        let mut entries: Vec<&PeerLoad> = self.heap.iter().collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries.into_iter().map(|e| e.peer.clone()).collect()
    }

    fn update(&mut self, peer: &PeerId, f: impl FnOnce(&mut BTreeSet<GroupId>) -> bool) -> bool {
        let mut changed = false;
        self.rebuild(|entries| {
            if let Some(entry) = entries.iter_mut().find(|e| &e.peer.id == peer) {
                changed = f(&mut entry.groups);
            }
        });
        changed
    }

    // Keys change in place, so the heap is rebuilt around the edit.
    fn rebuild(&mut self, edit: impl FnOnce(&mut Vec<PeerLoad>)) {
        let mut entries = std::mem::take(&mut self.heap).into_vec();
        edit(&mut entries);
        self.heap = BinaryHeap::from(entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rank_of(ids: &[&str]) -> LoadRank {
        let mut rank = LoadRank::new();
        for id in ids {
            assert!(rank.insert(Peer::new(*id, format!("{id}:9500"))));
        }
        rank
    }

    fn ids(entries: &[PeerLoad]) -> Vec<&str> {
        entries.iter().map(|e| e.peer.id.as_str()).collect()
    }

    #[test]
    fn test_ties_break_by_insertion_order() {
        let mut rank = rank_of(&["c", "a", "b"]);
        let popped = rank.pop_least_loaded(2).unwrap();
        assert_eq!(ids(&popped), vec!["c", "a"]);
        assert_eq!(rank.len(), 1);
    }

    #[test]
    fn test_least_loaded_first() {
        let mut rank = rank_of(&["a", "b", "c", "d"]);
        let group = GroupId::random();
        for id in ["a", "b", "c"] {
            assert!(rank.record_group(&PeerId::new(id), group));
        }

        let popped = rank.pop_least_loaded(3).unwrap();
        assert_eq!(ids(&popped), vec!["d", "a", "b"]);
    }

    #[test]
    fn test_pop_matches_sorted_loads() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let count = rng.gen_range(3..12);
            let mut rank = LoadRank::new();
            let mut expected = Vec::new();
            for i in 0..count {
                let id = format!("p{i}");
                rank.insert(Peer::new(id.clone(), "addr"));
                let load = rng.gen_range(0..4);
                for _ in 0..load {
                    rank.record_group(&PeerId::new(id.clone()), GroupId::random());
                }
                expected.push((load, i, id));
            }
            expected.sort();

            let popped = rank.pop_least_loaded(3).unwrap();
            let want: Vec<&str> = expected.iter().take(3).map(|(_, _, id)| id.as_str()).collect();
            assert_eq!(ids(&popped), want);
        }
    }

    #[test]
    fn test_pop_requires_enough_peers() {
        let mut rank = rank_of(&["a", "b"]);
        assert!(rank.pop_least_loaded(3).is_none());
        assert_eq!(rank.len(), 2);
    }

    #[test]
    fn test_push_back_keeps_sequence() {
        let mut rank = rank_of(&["a", "b"]);
        let mut popped = rank.pop_least_loaded(2).unwrap();
        let group = GroupId::random();
        for entry in &mut popped {
            entry.groups.insert(group);
        }
        for entry in popped {
            rank.push(entry);
        }
        assert_eq!(rank.load_of(&PeerId::new("a")), Some(1));
        assert_eq!(rank.load_of(&PeerId::new("b")), Some(1));

        assert!(rank.insert(Peer::new("c", "c:9500")));
        let peers: Vec<_> = rank.peers().into_iter().map(|p| p.id).collect();
        assert_eq!(
            peers,
            vec![PeerId::new("c"), PeerId::new("a"), PeerId::new("b")]
        );
    }

    #[test]
    fn test_group_sets_are_idempotent() {
        let mut rank = rank_of(&["a"]);
        let peer = PeerId::new("a");
        let group = GroupId::random();
        assert!(rank.record_group(&peer, group));
        assert!(!rank.record_group(&peer, group));
        assert_eq!(rank.load_of(&peer), Some(1));

        assert!(rank.release_group(&peer, group));
        assert!(!rank.release_group(&peer, group));
        assert_eq!(rank.load_of(&peer), Some(0));

        assert!(!rank.record_group(&PeerId::new("ghost"), group));
    }

    #[test]
    fn test_remove_and_duplicate_insert() {
        let mut rank = rank_of(&["a", "b"]);
        assert!(!rank.insert(Peer::new("a", "elsewhere:1")));

        let removed = rank.remove(&PeerId::new("a")).unwrap();
        assert_eq!(removed.peer.id.as_str(), "a");
        assert!(!rank.contains(&PeerId::new("a")));
        assert!(rank.remove(&PeerId::new("a")).is_none());
        assert_eq!(rank.len(), 1);
    }
}
