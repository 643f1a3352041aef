//! Priority-ordered outbound transaction queue
//!
//! Transactions awaiting transmission are drained strictly HIGH before NORMAL
//! before LOW, FIFO within a tier. A transaction id may appear at most once;
//! deduplication before pushing is the caller's responsibility and a repeated
//! id is reported as an error rather than silently merged.

use crate::error::{RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::time::SystemTime;
use tracing::debug;

/// Transmission priority tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "NORMAL")]
    Normal,
    #[serde(rename = "LOW")]
    Low,
}

/// A transaction queued for transmission over the mesh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundTransaction {
    pub tx_id: String,
    pub payload: Vec<u8>,
    pub fragment_count: u32,
    pub priority: Priority,
    pub created_at: SystemTime,
    pub retry_count: u32,
}

/// Three-tier priority queue with O(1) size queries
pub struct PriorityOutboundQueue {
    high: VecDeque<OutboundTransaction>,
    normal: VecDeque<OutboundTransaction>,
    low: VecDeque<OutboundTransaction>,
    ids: HashSet<String>,
    max_size: usize,
}

impl PriorityOutboundQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            high: VecDeque::new(),
            normal: VecDeque::new(),
            low: VecDeque::new(),
            ids: HashSet::new(),
            max_size,
        }
    }

    /// Enqueue a transaction in its priority tier.
    ///
    /// Fails with `DuplicateTransaction` if the id is already queued and with
    /// `QueueFull` at capacity.
    pub fn push(&mut self, tx: OutboundTransaction) -> RelayResult<()> {
        if self.ids.contains(&tx.tx_id) {
            return Err(RelayError::DuplicateTransaction(tx.tx_id));
        }
        if self.len() >= self.max_size {
            return Err(RelayError::QueueFull(self.max_size));
        }

        debug!(
            "queueing transaction {} at {:?} priority ({} bytes)",
            tx.tx_id,
            tx.priority,
            tx.payload.len()
        );

        self.ids.insert(tx.tx_id.clone());
        self.tier_mut(tx.priority).push_back(tx);
        Ok(())
    }

    /// Dequeue the next transaction: HIGH first, then NORMAL, then LOW, FIFO
    /// within a tier.
    pub fn pop(&mut self) -> Option<OutboundTransaction> {
        let tx = self
            .high
            .pop_front()
            .or_else(|| self.normal.pop_front())
            .or_else(|| self.low.pop_front())?;
        self.ids.remove(&tx.tx_id);
        Some(tx)
    }

    /// Return a popped transaction to the head of its tier. Used when the
    /// per-tick send budget runs out before the transaction could be sent.
    pub(crate) fn requeue_front(&mut self, tx: OutboundTransaction) {
        self.ids.insert(tx.tx_id.clone());
        self.tier_mut(tx.priority).push_front(tx);
    }

    pub fn contains(&self, tx_id: &str) -> bool {
        self.ids.contains(tx_id)
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.normal.len() + self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn high_count(&self) -> usize {
        self.high.len()
    }

    pub fn normal_count(&self) -> usize {
        self.normal.len()
    }

    pub fn low_count(&self) -> usize {
        self.low.len()
    }

    /// Clone the queue contents in drain order, for persistence
    pub fn snapshot(&self) -> Vec<OutboundTransaction> {
        self.high
            .iter()
            .chain(self.normal.iter())
            .chain(self.low.iter())
            .cloned()
            .collect()
    }

    /// Rebuild the queue from a persisted snapshot
    pub fn restore(&mut self, items: Vec<OutboundTransaction>) {
        for tx in items {
            if let Err(e) = self.push(tx) {
                tracing::warn!("dropping persisted outbound transaction: {}", e);
            }
        }
    }

    fn tier_mut(&mut self, priority: Priority) -> &mut VecDeque<OutboundTransaction> {
        match priority {
            Priority::High => &mut self.high,
            Priority::Normal => &mut self.normal,
            Priority::Low => &mut self.low,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(id: &str, priority: Priority) -> OutboundTransaction {
        OutboundTransaction {
            tx_id: id.to_string(),
            payload: vec![1, 2, 3],
            fragment_count: 1,
            priority,
            created_at: SystemTime::UNIX_EPOCH,
            retry_count: 0,
        }
    }

    #[test]
    fn test_priority_ordering() {
        let mut queue = PriorityOutboundQueue::new(100);
        queue.push(tx("low-1", Priority::Low)).unwrap();
        queue.push(tx("high-1", Priority::High)).unwrap();
        queue.push(tx("normal-1", Priority::Normal)).unwrap();
        queue.push(tx("high-2", Priority::High)).unwrap();

        assert_eq!(queue.pop().unwrap().tx_id, "high-1");
        assert_eq!(queue.pop().unwrap().tx_id, "high-2");
        assert_eq!(queue.pop().unwrap().tx_id, "normal-1");
        assert_eq!(queue.pop().unwrap().tx_id, "low-1");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_fifo_within_tier() {
        let mut queue = PriorityOutboundQueue::new(100);
        for i in 0..5 {
            queue.push(tx(&format!("tx-{}", i), Priority::Normal)).unwrap();
        }
        for i in 0..5 {
            assert_eq!(queue.pop().unwrap().tx_id, format!("tx-{}", i));
        }
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut queue = PriorityOutboundQueue::new(100);
        queue.push(tx("tx-1", Priority::Normal)).unwrap();

        let result = queue.push(tx("tx-1", Priority::High));
        assert!(matches!(
            result.unwrap_err(),
            RelayError::DuplicateTransaction(_)
        ));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_queue_full() {
        let mut queue = PriorityOutboundQueue::new(2);
        queue.push(tx("tx-1", Priority::Normal)).unwrap();
        queue.push(tx("tx-2", Priority::Normal)).unwrap();

        let result = queue.push(tx("tx-3", Priority::Normal));
        assert!(matches!(result.unwrap_err(), RelayError::QueueFull(2)));
    }

    #[test]
    fn test_per_tier_counts() {
        let mut queue = PriorityOutboundQueue::new(100);
        queue.push(tx("h", Priority::High)).unwrap();
        queue.push(tx("n1", Priority::Normal)).unwrap();
        queue.push(tx("n2", Priority::Normal)).unwrap();
        queue.push(tx("l", Priority::Low)).unwrap();

        assert_eq!(queue.len(), 4);
        assert_eq!(queue.high_count(), 1);
        assert_eq!(queue.normal_count(), 2);
        assert_eq!(queue.low_count(), 1);
    }

    #[test]
    fn test_requeue_front_preserves_order() {
        let mut queue = PriorityOutboundQueue::new(100);
        queue.push(tx("n1", Priority::Normal)).unwrap();
        queue.push(tx("n2", Priority::Normal)).unwrap();

        let popped = queue.pop().unwrap();
        assert_eq!(popped.tx_id, "n1");
        queue.requeue_front(popped);

        assert_eq!(queue.pop().unwrap().tx_id, "n1");
        assert_eq!(queue.pop().unwrap().tx_id, "n2");
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let mut queue = PriorityOutboundQueue::new(100);
        queue.push(tx("h", Priority::High)).unwrap();
        queue.push(tx("n", Priority::Normal)).unwrap();
        queue.push(tx("l", Priority::Low)).unwrap();

        let snapshot = queue.snapshot();
        let mut restored = PriorityOutboundQueue::new(100);
        restored.restore(snapshot);

        assert_eq!(restored.len(), 3);
        assert_eq!(restored.pop().unwrap().tx_id, "h");
        assert_eq!(restored.pop().unwrap().tx_id, "n");
        assert_eq!(restored.pop().unwrap().tx_id, "l");
    }
}
