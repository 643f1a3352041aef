//! Failed-transmission queue gated by exponential backoff
//!
//! Transactions whose send failed wait here until their computed retry time
//! passes, then flow back into the outbound queue. Items that stay failed past
//! a terminal age are dropped and counted as abandoned rather than silently
//! lost.

use crate::outbound::{OutboundTransaction, Priority};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Backoff configuration with exponential growth and a ceiling
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Maximum number of retry attempts before a transaction is abandoned
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Ceiling for the computed delay
    pub max_delay: Duration,
    /// Multiplier applied per attempt (typically 2.0)
    pub backoff_multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Delay for a given attempt number (0-indexed), monotonically
    /// non-decreasing and capped at `max_delay`.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay_ms = (self.initial_delay.as_millis() as f64)
            * self.backoff_multiplier.powi(attempt as i32);

        let delay = Duration::from_millis(delay_ms as u64);

        if delay > self.max_delay {
            self.max_delay
        } else {
            delay
        }
    }
}

/// A transmission waiting out its backoff window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryItem {
    pub tx_id: String,
    pub payload: Vec<u8>,
    pub priority: Priority,
    pub attempt_count: u32,
    pub last_error: String,
    pub next_retry_at: SystemTime,
    pub created_at: SystemTime,
}

impl RetryItem {
    /// Seconds since the underlying transaction was first created
    pub fn age_seconds(&self, now: SystemTime) -> u64 {
        now.duration_since(self.created_at)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Backoff-gated retry queue
pub struct RetryQueue {
    items: Vec<RetryItem>,
    config: BackoffConfig,
    abandoned: u64,
}

impl RetryQueue {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            items: Vec::new(),
            config,
            abandoned: 0,
        }
    }

    /// Record a failed transmission. The retry time is `now +
    /// backoff(attempt_count)` with the attempt count taken from the
    /// transaction as-is; it is only advanced when the item is promoted back
    /// to the outbound queue.
    pub fn add(&mut self, tx: OutboundTransaction, error: &str, now: SystemTime) {
        let delay = self.config.calculate_delay(tx.retry_count);
        debug!(
            "transaction {} enters retry queue (attempt {}, next retry in {:?}): {}",
            tx.tx_id, tx.retry_count, delay, error
        );

        self.items.push(RetryItem {
            tx_id: tx.tx_id,
            payload: tx.payload,
            priority: tx.priority,
            attempt_count: tx.retry_count,
            last_error: error.to_string(),
            next_retry_at: now + delay,
            created_at: tx.created_at,
        });
    }

    /// Pop the item whose retry time has passed, earliest first. Returns
    /// `None` while every item is still inside its backoff window.
    pub fn pop_ready(&mut self, now: SystemTime) -> Option<RetryItem> {
        let mut ready: Option<usize> = None;
        for (i, item) in self.items.iter().enumerate() {
            if item.next_retry_at > now {
                continue;
            }
            match ready {
                Some(j) if self.items[j].next_retry_at <= item.next_retry_at => {}
                _ => ready = Some(i),
            }
        }
        ready.map(|i| self.items.remove(i))
    }

    /// Put an item back untouched after a failed promotion (e.g. the outbound
    /// queue was full).
    pub(crate) fn reinstate(&mut self, item: RetryItem) {
        self.items.push(item);
    }

    /// Drop items older than the terminal age, counting them as abandoned.
    /// Returns the number dropped.
    pub fn cleanup_expired(&mut self, max_age: Duration, now: SystemTime) -> usize {
        let limit = max_age.as_secs();
        let before = self.items.len();

        self.items.retain(|item| {
            let age = item.age_seconds(now);
            if age > limit {
                warn!(
                    "abandoning retry of transaction {} after {}s ({} attempts, last error: {})",
                    item.tx_id, age, item.attempt_count, item.last_error
                );
                false
            } else {
                true
            }
        });

        let removed = before - self.items.len();
        self.abandoned += removed as u64;
        removed
    }

    /// Count a transaction abandoned outside the queue (retry budget spent)
    pub(crate) fn note_abandoned(&mut self) {
        self.abandoned += 1;
    }

    pub fn contains(&self, tx_id: &str) -> bool {
        self.items.iter().any(|item| item.tx_id == tx_id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Mean attempt count across queued items, 0.0 when empty
    pub fn avg_attempts(&self) -> f64 {
        if self.items.is_empty() {
            return 0.0;
        }
        let total: u64 = self.items.iter().map(|i| i.attempt_count as u64).sum();
        total as f64 / self.items.len() as f64
    }

    pub fn abandoned_count(&self) -> u64 {
        self.abandoned
    }

    pub fn snapshot(&self) -> Vec<RetryItem> {
        self.items.clone()
    }

    pub fn restore(&mut self, items: Vec<RetryItem>) {
        self.items = items;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_time() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    fn tx(id: &str, retry_count: u32) -> OutboundTransaction {
        OutboundTransaction {
            tx_id: id.to_string(),
            payload: vec![1, 2, 3],
            fragment_count: 1,
            priority: Priority::Normal,
            created_at: base_time(),
            retry_count,
        }
    }

    #[test]
    fn test_calculate_delay_exponential() {
        let config = BackoffConfig {
            max_attempts: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        };

        assert_eq!(config.calculate_delay(0), Duration::from_secs(2));
        assert_eq!(config.calculate_delay(1), Duration::from_secs(4));
        assert_eq!(config.calculate_delay(2), Duration::from_secs(8));
        assert_eq!(config.calculate_delay(3), Duration::from_secs(16));
    }

    #[test]
    fn test_calculate_delay_capped_and_monotonic() {
        let config = BackoffConfig::default();

        let mut previous = Duration::ZERO;
        for attempt in 0..12 {
            let delay = config.calculate_delay(attempt);
            assert!(delay >= previous, "delay shrank at attempt {}", attempt);
            assert!(delay <= config.max_delay);
            previous = delay;
        }
        assert_eq!(config.calculate_delay(11), config.max_delay);
    }

    #[test]
    fn test_not_ready_before_backoff_elapses() {
        let mut queue = RetryQueue::new(BackoffConfig::default());
        let now = base_time();

        queue.add(tx("tx-1", 0), "timeout", now);

        assert!(queue.pop_ready(now).is_none());
        assert!(queue
            .pop_ready(now + Duration::from_millis(1_999))
            .is_none());

        let item = queue.pop_ready(now + Duration::from_secs(2)).unwrap();
        assert_eq!(item.tx_id, "tx-1");
        assert_eq!(item.attempt_count, 0);
        assert_eq!(item.last_error, "timeout");
    }

    #[test]
    fn test_earliest_ready_wins() {
        let config = BackoffConfig::default();
        let mut queue = RetryQueue::new(config.clone());
        let now = base_time();

        // Higher attempt count means a later retry time
        queue.add(tx("late", 2), "err", now);
        queue.add(tx("early", 0), "err", now);

        let after_both = now + config.calculate_delay(2) + Duration::from_secs(1);
        assert_eq!(queue.pop_ready(after_both).unwrap().tx_id, "early");
        assert_eq!(queue.pop_ready(after_both).unwrap().tx_id, "late");
    }

    #[test]
    fn test_cleanup_expired_counts_abandoned() {
        let mut queue = RetryQueue::new(BackoffConfig::default());
        let now = base_time();

        queue.add(tx("old", 3), "err", now);
        let removed = queue.cleanup_expired(
            Duration::from_secs(3600),
            now + Duration::from_secs(3601),
        );

        assert_eq!(removed, 1);
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.abandoned_count(), 1);
    }

    #[test]
    fn test_avg_attempts() {
        let mut queue = RetryQueue::new(BackoffConfig::default());
        let now = base_time();

        assert_eq!(queue.avg_attempts(), 0.0);

        queue.add(tx("a", 1), "err", now);
        queue.add(tx("b", 3), "err", now);
        assert!((queue.avg_attempts() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let mut queue = RetryQueue::new(BackoffConfig::default());
        let now = base_time();
        queue.add(tx("a", 1), "timeout", now);

        let snapshot = queue.snapshot();
        let mut restored = RetryQueue::new(BackoffConfig::default());
        restored.restore(snapshot);

        assert_eq!(restored.len(), 1);
        assert!(restored.contains("a"));
    }
}
