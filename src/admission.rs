//! Admission control for WebSocket upgrades (part of C5).
//!
//! Before a connection is upgraded, a token bucket keyed by source address must admit
//! it (default 0.2 refill/sec, burst 5, per §4.5). Unlike [`crate::plugins::rate_limiter`],
//! which replenishes on a background tick for ordinary HTTP traffic, admission uses lazy
//! continuous refill: tokens accrue proportionally to elapsed time on every check, so a
//! bucket sitting at exactly zero admits its next connection the instant enough time has
//! passed for one token to accrue, without waiting on a tick boundary.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;

use crate::config::AdmissionConfig;
use crate::error::AdmissionError;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Per-source-address token bucket guarding WebSocket upgrade admission.
pub struct AdmissionControl {
    config: AdmissionConfig,
    buckets: DashMap<IpAddr, Bucket>,
}

impl AdmissionControl {
    pub fn new(config: AdmissionConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            buckets: DashMap::new(),
        })
    }

    /// Attempts to admit a connection from `addr`, consuming one token if available.
    pub fn check(&self, addr: IpAddr) -> Result<(), AdmissionError> {
        let now = Instant::now();
        let mut bucket = self.buckets.entry(addr).or_insert_with(|| Bucket {
            tokens: self.config.burst as f64,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.config.refill_per_second)
            .min(self.config.burst as f64);
        bucket.last_refill = now;

        if bucket.tokens < 1.0 {
            return Err(AdmissionError::RateLimited);
        }
        bucket.tokens -= 1.0;
        Ok(())
    }

    /// Drops buckets that have sat full and idle, to bound memory under churn of
    /// distinct source addresses (e.g. behind a rotating proxy pool).
    pub fn sweep_idle(&self, idle_for: std::time::Duration) {
        let now = Instant::now();
        self.buckets.retain(|_, b| {
            b.tokens < self.config.burst as f64 || now.duration_since(b.last_refill) < idle_for
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn addr() -> IpAddr {
        IpAddr::from([127, 0, 0, 1])
    }

    #[test]
    fn admits_up_to_burst_then_denies() {
        let cfg = AdmissionConfig {
            refill_per_second: 0.0,
            burst: 3,
            ..AdmissionConfig::default()
        };
        let control = AdmissionControl::new(cfg);
        for _ in 0..3 {
            assert!(control.check(addr()).is_ok());
        }
        assert!(matches!(
            control.check(addr()),
            Err(AdmissionError::RateLimited)
        ));
    }

    #[test]
    fn distinct_addresses_have_independent_buckets() {
        let cfg = AdmissionConfig {
            refill_per_second: 0.0,
            burst: 1,
            ..AdmissionConfig::default()
        };
        let control = AdmissionControl::new(cfg);
        assert!(control.check(IpAddr::from([10, 0, 0, 1])).is_ok());
        assert!(control.check(IpAddr::from([10, 0, 0, 2])).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_tokens_then_refill_tick_admits_exactly_one() {
        let cfg = AdmissionConfig {
            refill_per_second: 1.0,
            burst: 1,
            ..AdmissionConfig::default()
        };
        let control = AdmissionControl::new(cfg);
        assert!(control.check(addr()).is_ok());
        assert!(matches!(
            control.check(addr()),
            Err(AdmissionError::RateLimited)
        ));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(control.check(addr()).is_ok());
        assert!(matches!(
            control.check(addr()),
            Err(AdmissionError::RateLimited)
        ));
    }
}
