// Metrics collection and tracking

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Latency accumulator with lock-free min/max tracking.
#[derive(Debug)]
pub struct LatencyStats {
    count: AtomicU64,
    total_ms: AtomicU64,
    min_ms: AtomicU64,
    max_ms: AtomicU64,
}

impl LatencyStats {
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            total_ms: AtomicU64::new(0),
            min_ms: AtomicU64::new(u64::MAX),
            max_ms: AtomicU64::new(0),
        }
    }

    pub fn record(&self, latency_ms: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ms.fetch_add(latency_ms, Ordering::Relaxed);

        let mut current_min = self.min_ms.load(Ordering::Relaxed);
        while latency_ms < current_min {
            match self.min_ms.compare_exchange_weak(
                current_min,
                latency_ms,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => current_min = x,
            }
        }

        let mut current_max = self.max_ms.load(Ordering::Relaxed);
        while latency_ms > current_max {
            match self.max_ms.compare_exchange_weak(
                current_max,
                latency_ms,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => current_max = x,
            }
        }
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let total = self.total_ms.load(Ordering::Relaxed);
        let min = self.min_ms.load(Ordering::Relaxed);
        LatencySnapshot {
            count,
            avg_ms: if count == 0 { 0.0 } else { total as f64 / count as f64 },
            min_ms: if min == u64::MAX { 0 } else { min },
            max_ms: self.max_ms.load(Ordering::Relaxed),
        }
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters for the speech streaming pipeline.
#[derive(Debug, Default)]
pub struct StreamMetrics {
    pub connections_opened: AtomicU64,
    pub connections_closed: AtomicU64,
    pub sessions_started: AtomicU64,
    pub sessions_completed: AtomicU64,
    pub sessions_cancelled: AtomicU64,
    pub sessions_errored: AtomicU64,
    pub requests_rejected: AtomicU64,
    pub requests_ignored: AtomicU64,
    pub chunks_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    /// Time from accepted request to first audio frame.
    pub first_chunk_latency: LatencyStats,
}

impl StreamMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_chunk(&self, len: usize) {
        self.chunks_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StreamMetricsResponse {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StreamMetricsResponse {
            connections_opened: load(&self.connections_opened),
            connections_closed: load(&self.connections_closed),
            sessions_started: load(&self.sessions_started),
            sessions_completed: load(&self.sessions_completed),
            sessions_cancelled: load(&self.sessions_cancelled),
            sessions_errored: load(&self.sessions_errored),
            requests_rejected: load(&self.requests_rejected),
            requests_ignored: load(&self.requests_ignored),
            chunks_sent: load(&self.chunks_sent),
            bytes_sent: load(&self.bytes_sent),
            first_chunk_latency: self.first_chunk_latency.snapshot(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencySnapshot {
    pub count: u64,
    pub avg_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMetricsResponse {
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub sessions_started: u64,
    pub sessions_completed: u64,
    pub sessions_cancelled: u64,
    pub sessions_errored: u64,
    pub requests_rejected: u64,
    pub requests_ignored: u64,
    pub chunks_sent: u64,
    pub bytes_sent: u64,
    pub first_chunk_latency: LatencySnapshot,
}
