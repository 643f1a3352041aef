//! Read-only metrics over the relay queues and transport activity

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of queue depths
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMetrics {
    pub outbound_size: usize,
    pub outbound_high_priority: usize,
    pub outbound_normal_priority: usize,
    pub outbound_low_priority: usize,
    pub confirmation_size: usize,
    pub retry_size: usize,
    pub retry_avg_attempts: f64,
}

/// Snapshot of transport and reassembly activity
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportMetrics {
    pub fragments_buffered: usize,
    pub partial_transactions: usize,
    pub transactions_completed: u64,
    pub reassembly_failures: u64,
    pub frames_sent: u64,
    pub send_failures: u64,
    pub retries_abandoned: u64,
    pub invalid_frames: u64,
}

/// Combined metrics snapshot exposed to callers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayMetrics {
    pub queues: QueueMetrics,
    pub transport: TransportMetrics,
}

/// Monotonic counters owned by the engine. Snapshots never mutate the queues
/// they describe.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    frames_sent: AtomicU64,
    send_failures: AtomicU64,
    invalid_frames: AtomicU64,
    transactions_completed: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frames_sent(&self, count: u64) {
        self.frames_sent.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid_frame(&self) {
        self.invalid_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transaction_completed(&self) {
        self.transactions_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn send_failures(&self) -> u64 {
        self.send_failures.load(Ordering::Relaxed)
    }

    pub fn invalid_frames(&self) -> u64 {
        self.invalid_frames.load(Ordering::Relaxed)
    }

    pub fn transactions_completed(&self) -> u64 {
        self.transactions_completed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let collector = MetricsCollector::new();

        collector.record_frames_sent(3);
        collector.record_frames_sent(2);
        collector.record_send_failure();
        collector.record_invalid_frame();
        collector.record_transaction_completed();

        assert_eq!(collector.frames_sent(), 5);
        assert_eq!(collector.send_failures(), 1);
        assert_eq!(collector.invalid_frames(), 1);
        assert_eq!(collector.transactions_completed(), 1);
    }

    #[test]
    fn test_queue_metrics_wire_keys() {
        let metrics = QueueMetrics {
            outbound_size: 4,
            outbound_high_priority: 1,
            outbound_normal_priority: 2,
            outbound_low_priority: 1,
            confirmation_size: 0,
            retry_size: 3,
            retry_avg_attempts: 1.5,
        };

        let value = serde_json::to_value(&metrics).unwrap();
        assert_eq!(value["outboundSize"], 4);
        assert_eq!(value["outboundHighPriority"], 1);
        assert_eq!(value["retryAvgAttempts"], 1.5);
    }
}
