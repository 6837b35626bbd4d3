//! Peer health monitor
//!
//! Periodically looks for peers whose last heartbeat is older than the
//! failure detection period. A dead peer is evicted from the known set and
//! the load ranking at once, then every log it hosts is closed on that log's
//! group. Logs whose close fails stay on the peer's record and are retried
//! on the next cycle; the record goes away once nothing is left.

use crate::ops::{ChangeStateReply, LogRequest};
use crate::rpc::PeerClient;
use crate::state::MetaState;
use logmeta_common::{Error, LogName, PeerId, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

/// Outcome of a single monitor cycle
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Peers found dead this cycle
    pub dead: Vec<PeerId>,
    /// Peers evicted from the known set this cycle
    pub evicted: Vec<PeerId>,
    /// Logs successfully closed
    pub closed: Vec<LogName>,
    /// Logs whose close failed and will be retried
    pub failed: Vec<LogName>,
    /// Peers whose record was removed
    pub removed: Vec<PeerId>,
}

impl CycleReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dead.is_empty()
    }
}

pub struct HealthMonitor {
    state: Arc<MetaState>,
    client: Arc<dyn PeerClient>,
    failure_detection_period: Duration,
    check_interval: Duration,
}

impl HealthMonitor {
    pub fn new(
        state: Arc<MetaState>,
        client: Arc<dyn PeerClient>,
        failure_detection_period: Duration,
        check_interval: Duration,
    ) -> Self {
        Self {
            state,
            client,
            failure_detection_period,
            check_interval,
        }
    }

    /// Run one detection and cleanup pass as of `now`
    pub async fn run_cycle(&self, now: Instant) -> CycleReport {
        let mut report = CycleReport {
            dead: self
                .state
                .directory()
                .dead_peers(now, self.failure_detection_period),
            ..CycleReport::default()
        };

        for peer in report.dead.clone() {
            let hosted = {
                let mut directory = self.state.directory();
                if directory.evict(&peer) {
                    warn!(
                        "Peer {} missed heartbeats for more than {:?}, evicting",
                        peer, self.failure_detection_period
                    );
                    report.evicted.push(peer.clone());
                }
                directory.hosted_logs(&peer)
            };

            for log in hosted {
                match self.close_log(&log).await {
                    Ok(()) => {
                        self.state.directory().drop_hosted(&peer, &log);
                        report.closed.push(log);
                    }
                    Err(e) => {
                        warn!("Failed to close log {} hosted by dead peer {}: {}", log, peer, e);
                        report.failed.push(log);
                    }
                }
            }

            if self.state.directory().remove_if_drained(&peer) {
                info!("Removed record of dead peer {}", peer);
                report.removed.push(peer);
            }
        }

        report
    }

    /// Force the log's group to close it. A log that is no longer registered
    /// counts as closed.
    async fn close_log(&self, log: &LogName) -> Result<()> {
        let Some(group) = self.state.group_of(log) else {
            debug!("Log {} no longer registered, nothing to close", log);
            return Ok(());
        };

        let request = LogRequest::close(log.clone()).encode()?;
        let reply = self.client.send_to_group(&group, request).await?;
        match ChangeStateReply::decode(&reply)?.error {
            None => {
                info!("Closed log {} on group {}", log, group.id());
                Ok(())
            }
            Some(reason) => Err(Error::peer_call(group.id(), reason)),
        }
    }

    /// Start the monitor on the current runtime
    pub fn spawn(self) -> MonitorHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.check_interval, self.check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = self.run_cycle(Instant::now()).await;
                        if !report.is_empty() {
                            debug!(
                                dead = report.dead.len(),
                                closed = report.closed.len(),
                                failed = report.failed.len(),
                                "Health monitor cycle finished"
                            );
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            info!("Health monitor stopped");
                            break;
                        }
                    }
                }
            }
        });

        MonitorHandle { stop_tx, handle }
    }
}

/// Handle to a running [`HealthMonitor`]
#[derive(Debug)]
pub struct MonitorHandle {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl MonitorHandle {
    /// Signal the monitor to stop and wait for it to exit
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            error!("Health monitor task failed: {}", e);
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::MetaOp;
    use crate::testing::{PeerCall, RecordingPeers};
    use logmeta_common::{ConsensusGroup, GroupId, Peer};

    const PERIOD: Duration = Duration::from_secs(30);

    fn peer(id: &str) -> Peer {
        Peer::new(id, format!("{id}:9500"))
    }

    fn name(s: &str) -> LogName {
        LogName::new(s).unwrap()
    }

    /// Three pinged peers and one log hosted on all of them
    fn cluster(start: Instant) -> (Arc<MetaState>, ConsensusGroup) {
        let state = Arc::new(MetaState::new());
        for id in ["p1", "p2", "p3"] {
            state.apply_op(MetaOp::Ping { peer: peer(id) }, start);
        }
        let group = state.allocate_group(3).unwrap();
        state.apply_op(
            MetaOp::Register {
                log: name("orders"),
                group: group.clone(),
            },
            start,
        );
        (state, group)
    }

    fn monitor(state: &Arc<MetaState>, peers: &Arc<RecordingPeers>) -> HealthMonitor {
        HealthMonitor::new(
            Arc::clone(state),
            Arc::clone(peers) as Arc<dyn PeerClient>,
            PERIOD,
            Duration::from_secs(1),
        )
    }

    fn keep_alive(state: &MetaState, ids: &[&str], at: Instant) {
        for id in ids {
            state.apply_op(MetaOp::Heartbeat { peer: peer(id) }, at);
        }
    }

    #[tokio::test]
    async fn test_fresh_peers_are_left_alone() {
        let start = Instant::now();
        let (state, _) = cluster(start);
        let peers = Arc::new(RecordingPeers::new());

        let report = monitor(&state, &peers).run_cycle(start + PERIOD).await;
        assert!(report.is_empty());
        assert!(peers.calls().is_empty());
        assert_eq!(state.directory().known_count(), 3);
    }

    #[tokio::test]
    async fn test_dead_peer_is_evicted_and_its_logs_closed() {
        let start = Instant::now();
        let (state, group) = cluster(start);
        let later = start + PERIOD + Duration::from_secs(1);
        keep_alive(&state, &["p2", "p3"], later);
        let peers = Arc::new(RecordingPeers::new());

        let report = monitor(&state, &peers).run_cycle(later).await;

        let p1 = PeerId::new("p1");
        assert_eq!(report.dead, vec![p1.clone()]);
        assert_eq!(report.evicted, vec![p1.clone()]);
        assert_eq!(report.closed, vec![name("orders")]);
        assert_eq!(report.removed, vec![p1.clone()]);
        assert_eq!(
            peers.calls(),
            vec![PeerCall::SendToGroup {
                group: group.id(),
                request: LogRequest::close(name("orders")),
            }]
        );

        let directory = state.directory();
        assert!(!directory.is_known(&p1));
        assert!(directory.record(&p1).is_none());
        assert!(!directory.load_rank().contains(&p1));
        assert!(directory.is_consistent());
        // The log itself stays registered; closing does not unregister it.
        drop(directory);
        assert!(state.contains_log(&name("orders")));
    }

    #[tokio::test]
    async fn test_failed_close_is_retried_next_cycle() {
        let start = Instant::now();
        let (state, _) = cluster(start);
        let later = start + PERIOD + Duration::from_secs(1);
        keep_alive(&state, &["p2", "p3"], later);
        let peers = Arc::new(RecordingPeers::new());
        peers.refuse_close("log is busy");
        let monitor = monitor(&state, &peers);

        let first = monitor.run_cycle(later).await;
        let p1 = PeerId::new("p1");
        assert_eq!(first.failed, vec![name("orders")]);
        assert!(first.removed.is_empty());
        {
            let directory = state.directory();
            assert!(!directory.is_known(&p1));
            assert!(!directory.load_rank().contains(&p1));
            assert_eq!(directory.hosted_logs(&p1), vec![name("orders")]);
        }

        peers.accept_close();
        let second = monitor.run_cycle(later + Duration::from_secs(1)).await;
        assert!(second.evicted.is_empty());
        assert_eq!(second.closed, vec![name("orders")]);
        assert_eq!(second.removed, vec![p1.clone()]);
        assert!(state.directory().record(&p1).is_none());
        assert_eq!(peers.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_group_does_not_block_other_peers() {
        let start = Instant::now();
        let (state, _) = cluster(start);
        state.apply_op(MetaOp::Ping { peer: peer("p4") }, start);
        let peers = Arc::new(RecordingPeers::new());
        peers.set_unreachable(true);

        let later = start + PERIOD + Duration::from_secs(1);
        let report = monitor(&state, &peers).run_cycle(later).await;

        assert_eq!(report.dead.len(), 4);
        assert_eq!(report.evicted.len(), 4);
        assert_eq!(report.failed.len(), 3);
        // p4 hosted nothing, so its record goes right away.
        assert_eq!(report.removed, vec![PeerId::new("p4")]);
        assert_eq!(state.directory().known_count(), 0);
    }

    #[tokio::test]
    async fn test_unregistered_log_is_dropped_without_rpc() {
        let start = Instant::now();
        let state = Arc::new(MetaState::new());
        state.apply_op(MetaOp::Ping { peer: peer("p1") }, start);
        // Hosted entry whose log is gone from the map.
        state
            .directory()
            .add_hosted(&peer("p1"), &name("stale"), GroupId::random());
        let peers = Arc::new(RecordingPeers::new());

        let report = monitor(&state, &peers)
            .run_cycle(start + PERIOD + Duration::from_secs(1))
            .await;
        assert_eq!(report.closed, vec![name("stale")]);
        assert_eq!(report.removed, vec![PeerId::new("p1")]);
        assert!(peers.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_monitor_detects_and_stops() {
        let start = Instant::now();
        let (state, _) = cluster(start);
        let peers = Arc::new(RecordingPeers::new());
        let handle = HealthMonitor::new(
            Arc::clone(&state),
            Arc::clone(&peers) as Arc<dyn PeerClient>,
            Duration::from_secs(3),
            Duration::from_secs(1),
        )
        .spawn();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(state.directory().known_count(), 3);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(state.directory().known_count(), 0);
        assert_eq!(peers.calls().len(), 3);

        handle.stop().await;
    }
}
