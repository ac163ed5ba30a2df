use std::collections::HashMap;

use astra_types::{HealthStatus, PeerId, HEARTBEAT_INTERVAL_SECS, LIVE_WINDOW_SECS, MISSED_BEATS_THRESHOLD};
use parking_lot::RwLock;

/// Tracks the most recent heartbeat from every peer this node has heard
/// from, and runs a deterministic leader election over whichever of them
/// are currently live.
pub struct HealthTracker {
    statuses: RwLock<HashMap<PeerId, HealthStatus>>,
    leader: RwLock<Option<PeerId>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            statuses: RwLock::new(HashMap::new()),
            leader: RwLock::new(None),
        }
    }

    /// Upsert a peer's heartbeat by peer identifier.
    pub fn update(&self, status: HealthStatus) {
        self.statuses.write().insert(status.peer_id.clone(), status);
    }

    pub fn get(&self, id: &PeerId) -> Option<HealthStatus> {
        self.statuses.read().get(id).cloned()
    }

    /// A peer is alive iff its last heartbeat is within `LIVE_WINDOW_SECS`
    /// of `now`. `LIVE_WINDOW_SECS` equals `MISSED_BEATS_THRESHOLD *
    /// HEARTBEAT_INTERVAL_SECS`, so this is also the test for whether a
    /// leader has exceeded the miss threshold.
    pub fn is_alive(&self, id: &PeerId, now: i64) -> bool {
        self.statuses
            .read()
            .get(id)
            .is_some_and(|s| now - s.timestamp < LIVE_WINDOW_SECS)
    }

    /// All peers whose heartbeat is currently within the live window.
    pub fn live_peers(&self, now: i64) -> Vec<PeerId> {
        self.statuses
            .read()
            .values()
            .filter(|s| now - s.timestamp < LIVE_WINDOW_SECS)
            .map(|s| s.peer_id.clone())
            .collect()
    }

    pub fn remove(&self, id: &PeerId) {
        self.statuses.write().remove(id);
        let mut leader = self.leader.write();
        if leader.as_ref() == Some(id) {
            *leader = None;
        }
    }

    /// The current leader: the lexicographically smallest live peer
    /// identifier. Caches the result so `should_reelect` can compare
    /// against it without recomputing the full ordering.
    pub fn elect(&self, now: i64) -> Option<PeerId> {
        let mut live = self.live_peers(now);
        live.sort();
        let winner = live.into_iter().next();
        *self.leader.write() = winner.clone();
        winner
    }

    /// True iff there is no tracked leader, or the tracked leader has
    /// missed `MISSED_BEATS_THRESHOLD` consecutive heartbeats (equivalently:
    /// is no longer alive).
    pub fn should_reelect(&self, now: i64) -> bool {
        match self.leader.read().clone() {
            None => true,
            Some(leader) => !self.is_alive(&leader, now),
        }
    }

    /// Split-brain resolution: true iff `candidate` is the legitimate
    /// leader per the deterministic ordering at `now`. A peer that sees
    /// this return `false` for itself must yield.
    pub fn is_legitimate_leader(&self, candidate: &PeerId, now: i64) -> bool {
        let mut live = self.live_peers(now);
        live.sort();
        live.first() == Some(candidate)
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn status(peer: &str, now: i64) -> HealthStatus {
    HealthStatus {
        peer_id: PeerId::from(peer),
        role: "follower".to_string(),
        load: 0.0,
        connections: 0,
        uptime_seconds: 0,
        timestamp: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s5_election_is_deterministic_and_reacts_to_staleness() {
        let tracker = HealthTracker::new();
        let t0 = 1_000_000_i64;
        tracker.update(status("peer-a", t0));
        tracker.update(status("peer-b", t0));
        tracker.update(status("peer-c", t0));

        assert_eq!(tracker.elect(t0), Some(PeerId::from("peer-a")));

        tracker.update(status("peer-a", t0 - 60));
        assert_eq!(tracker.elect(t0), Some(PeerId::from("peer-b")));
    }

    #[test]
    fn should_reelect_when_no_leader_tracked() {
        let tracker = HealthTracker::new();
        assert!(tracker.should_reelect(0));
    }

    #[test]
    fn should_reelect_when_leader_goes_stale() {
        let tracker = HealthTracker::new();
        let t0 = 1_000_000_i64;
        tracker.update(status("peer-a", t0));
        tracker.elect(t0);
        assert!(!tracker.should_reelect(t0));
        assert!(tracker.should_reelect(t0 + LIVE_WINDOW_SECS + 1));
    }

    #[test]
    fn is_alive_respects_heartbeat_threshold_product() {
        assert_eq!(LIVE_WINDOW_SECS, HEARTBEAT_INTERVAL_SECS * MISSED_BEATS_THRESHOLD);
    }

    #[test]
    fn remove_clears_tracked_leader() {
        let tracker = HealthTracker::new();
        let t0 = 0_i64;
        tracker.update(status("peer-a", t0));
        tracker.elect(t0);
        tracker.remove(&PeerId::from("peer-a"));
        assert!(tracker.get(&PeerId::from("peer-a")).is_none());
        assert!(tracker.should_reelect(t0));
    }

    #[test]
    fn is_legitimate_leader_matches_election_result() {
        let tracker = HealthTracker::new();
        let t0 = 0_i64;
        tracker.update(status("peer-a", t0));
        tracker.update(status("peer-b", t0));
        assert!(tracker.is_legitimate_leader(&PeerId::from("peer-a"), t0));
        assert!(!tracker.is_legitimate_leader(&PeerId::from("peer-b"), t0));
    }
}
