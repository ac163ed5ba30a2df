use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use astra_types::{PeerId, TrustLevel};

/// A continuously-refilling token bucket. `capacity` tokens refill at
/// `refill_per_sec` tokens/second, capped at `capacity`.
#[derive(Debug, Clone, Copy)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, refill_per_sec: f64, now: Instant) -> Self {
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec,
            last: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last = now;
    }
}

struct PeerBucket {
    per_second: TokenBucket,
    per_minute: TokenBucket,
    burst: TokenBucket,
}

impl PeerBucket {
    fn new(limits: EffectiveLimits, now: Instant) -> Self {
        Self {
            per_second: TokenBucket::new(limits.mps, limits.mps, now),
            per_minute: TokenBucket::new(limits.mpm, limits.mpm / 60.0, now),
            burst: TokenBucket::new(limits.burst, limits.mps, now),
        }
    }

    /// Admit one message iff all three bounds have a token available. Never
    /// consumes a partial set: either all three buckets lose a token, or
    /// none do.
    fn try_admit(&mut self, now: Instant) -> bool {
        self.per_second.refill(now);
        self.per_minute.refill(now);
        self.burst.refill(now);

        if self.per_second.tokens >= 1.0
            && self.per_minute.tokens >= 1.0
            && self.burst.tokens >= 1.0
        {
            self.per_second.tokens -= 1.0;
            self.per_minute.tokens -= 1.0;
            self.burst.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct EffectiveLimits {
    mps: f64,
    mpm: f64,
    burst: f64,
}

/// Scale `(base_mps, base_mpm, base_burst)` by a peer's trust level, per the
/// table in the design: Untrusted is shut out entirely, Limited gets a
/// tenth, Standard gets the base rate, Trusted 5x, Admin 100x.
fn effective_limits(trust: TrustLevel, base_mps: f64, base_mpm: f64, base_burst: f64) -> EffectiveLimits {
    let (mps_mult, mpm_mult, burst_mult) = match trust {
        TrustLevel::Untrusted => (0.0, 0.0, 0.0),
        TrustLevel::Limited => (0.1, 0.1, 0.2),
        TrustLevel::Standard => (1.0, 1.0, 1.0),
        TrustLevel::Trusted => (5.0, 5.0, 3.0),
        TrustLevel::Admin => (100.0, 100.0, 10.0),
    };
    EffectiveLimits {
        mps: base_mps * mps_mult,
        mpm: base_mpm * mpm_mult,
        burst: base_burst * burst_mult,
    }
}

/// Per-peer token-bucket rate limiter, scaled by trust level. Each peer has
/// an independent bucket keyed by peer identifier under its own mutex so
/// one busy peer never contends with another's admission check.
pub struct TrustScaledRateLimiter {
    base_mps: f64,
    base_mpm: f64,
    base_burst: f64,
    buckets: Mutex<HashMap<PeerId, PeerBucket>>,
}

impl TrustScaledRateLimiter {
    pub fn new(base_mps: f64, base_mpm: f64, base_burst: f64) -> Self {
        Self {
            base_mps,
            base_mpm,
            base_burst,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Admit a single message from `peer` at `trust` level, observed at
    /// `now`. Returns false if any of the per-second, per-minute or burst
    /// bounds are currently exhausted.
    pub fn admit(&self, peer: &PeerId, trust: TrustLevel, now: Instant) -> bool {
        let mut buckets = self.buckets.lock().expect("rate limiter mutex poisoned");
        let limits = effective_limits(trust, self.base_mps, self.base_mpm, self.base_burst);
        let bucket = buckets
            .entry(peer.clone())
            .or_insert_with(|| PeerBucket::new(limits, now));
        bucket.try_admit(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn untrusted_peer_never_admitted() {
        let limiter = TrustScaledRateLimiter::new(10.0, 100.0, 20.0);
        let peer = PeerId::from("p");
        let now = Instant::now();
        assert!(!limiter.admit(&peer, TrustLevel::Untrusted, now));
    }

    #[test]
    fn standard_peer_admitted_up_to_base_mps_per_second() {
        let limiter = TrustScaledRateLimiter::new(5.0, 1000.0, 1000.0);
        let peer = PeerId::from("p");
        let now = Instant::now();
        let mut admitted = 0;
        for _ in 0..10 {
            if limiter.admit(&peer, TrustLevel::Standard, now) {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 5);
    }

    #[test]
    fn admin_gets_scaled_burst() {
        let limiter = TrustScaledRateLimiter::new(1.0, 1000.0, 1.0);
        let peer = PeerId::from("admin-peer");
        let now = Instant::now();
        let mut admitted = 0;
        for _ in 0..150 {
            if limiter.admit(&peer, TrustLevel::Admin, now) {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 100);
    }

    #[test]
    fn tokens_refill_over_time() {
        let limiter = TrustScaledRateLimiter::new(1.0, 1000.0, 1.0);
        let peer = PeerId::from("p");
        let now = Instant::now();
        assert!(limiter.admit(&peer, TrustLevel::Standard, now));
        assert!(!limiter.admit(&peer, TrustLevel::Standard, now));
        assert!(limiter.admit(&peer, TrustLevel::Standard, now + Duration::from_secs(2)));
    }
}
