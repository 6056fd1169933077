//! Relay counters and the snapshot logged on every reap sweep.
//!
//! Counters are plain atomics bumped on the hot path by the acceptor, the distributor and the
//! reaper. Nothing reads them for correctness; snapshots exist for logs, tests and the shutdown
//! report.

use crate::buffer_pool::PoolStats;
use crate::line::BufferPool;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Shared relay counters.
pub struct RelayMetrics {
    started: Instant,
    pool: BufferPool,
    accepted: AtomicU64,
    registered: AtomicU64,
    live: AtomicU64,
    received: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    reaped: AtomicU64,
    reclaimed: AtomicU64,
}

impl RelayMetrics {
    /// Create counters reporting alongside the statistics of `pool`.
    pub fn new(pool: BufferPool) -> Self {
        Self {
            started: Instant::now(),
            pool,
            accepted: AtomicU64::new(0),
            registered: AtomicU64::new(0),
            live: AtomicU64::new(0),
            received: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            reaped: AtomicU64::new(0),
            reclaimed: AtomicU64::new(0),
        }
    }

    pub fn record_accept(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// An endpoint joined the live set, which now holds `live` endpoints.
    pub fn record_register(&self, live: usize) {
        self.registered.fetch_add(1, Ordering::Relaxed);
        self.live.store(live as u64, Ordering::Relaxed);
    }

    /// One inbound message was fanned out.
    pub fn record_distribution(&self, delivered: usize, dropped: usize) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        self.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
    }

    /// A sweep removed `reaped` endpoints, released `reclaimed` queued messages and left `live`.
    pub fn record_reap(&self, reaped: usize, reclaimed: usize, live: usize) {
        self.reaped.fetch_add(reaped as u64, Ordering::Relaxed);
        self.reclaimed.fetch_add(reclaimed as u64, Ordering::Relaxed);
        self.live.store(live as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime: self.started.elapsed(),
            accepted: self.accepted.load(Ordering::Relaxed),
            registered: self.registered.load(Ordering::Relaxed),
            live: self.live.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            reaped: self.reaped.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
            pool: self.pool.stats(),
        }
    }
}

impl std::fmt::Debug for RelayMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RelayMetrics").field(&self.snapshot()).finish()
    }
}

/// Point-in-time copy of the relay counters and pool statistics.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    #[serde(with = "duration_millis")]
    pub uptime: Duration,
    /// Connections accepted by the listener.
    pub accepted: u64,
    /// Endpoints added to the distributor's live set.
    pub registered: u64,
    /// Endpoints in the live set after the last registration or sweep.
    pub live: u64,
    /// Messages handed to the distributor.
    pub received: u64,
    /// Successful enqueues onto endpoint queues.
    pub delivered: u64,
    /// Enqueues refused because an endpoint queue was full.
    pub dropped: u64,
    /// Endpoints removed by the reaper.
    pub reaped: u64,
    /// Messages released from the queues of reaped endpoints.
    pub reclaimed: u64,
    pub pool: PoolStats,
}

impl MetricsSnapshot {
    /// One-line JSON rendering for logs.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|err| format!("{{\"error\":\"{err}\"}}"))
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = RelayMetrics::new(BufferPool::new());
        metrics.record_accept();
        metrics.record_register(1);
        metrics.record_register(2);
        metrics.record_distribution(2, 0);
        metrics.record_distribution(1, 1);
        metrics.record_reap(1, 1, 1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.accepted, 1);
        assert_eq!(snapshot.registered, 2);
        assert_eq!(snapshot.received, 2);
        assert_eq!(snapshot.delivered, 3);
        assert_eq!(snapshot.dropped, 1);
        assert_eq!(snapshot.reaped, 1);
        assert_eq!(snapshot.reclaimed, 1);
        assert_eq!(snapshot.live, 1);
    }

    #[test]
    fn snapshot_includes_pool_statistics() {
        let pool = BufferPool::new();
        let metrics = RelayMetrics::new(pool.clone());
        let held = pool.acquire();
        assert_eq!(metrics.snapshot().pool.in_flight(), 1);
        drop(held);
        assert_eq!(metrics.snapshot().pool.returned, 1);
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let metrics = RelayMetrics::new(BufferPool::new());
        metrics.record_distribution(4, 2);
        let json = metrics.snapshot().to_json();
        let parsed: MetricsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.delivered, 4);
        assert_eq!(parsed.dropped, 2);
        assert!(json.contains("\"allocated\":0"));
    }
}
