use serde::{Deserialize, Serialize};

use crate::peer::PeerId;

/// A node's self-reported heartbeat, used by the health tracker and leader
/// election. A peer is live iff `now - timestamp < LIVE_WINDOW_SECS`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub peer_id: PeerId,
    pub role: String,
    pub load: f32,
    pub connections: u32,
    pub uptime_seconds: u64,
    pub timestamp: i64,
}

/// Window, in seconds, after which a heartbeat is considered stale.
pub const LIVE_WINDOW_SECS: i64 = 30;

/// Heartbeat interval assumed by the election algorithm.
pub const HEARTBEAT_INTERVAL_SECS: i64 = 10;

/// Consecutive missed heartbeats after which a leader is considered failed.
pub const MISSED_BEATS_THRESHOLD: i64 = 3;
