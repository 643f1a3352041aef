//! Confirmation queue and mesh relay of transaction outcomes
//!
//! Confirmations travel back toward the transaction's origin hop by hop. The
//! wire encoding of the status is key-tagged (`{"SUCCESS": signature}` /
//! `{"FAILED": error}`) and other mesh participants depend on that exact
//! shape, so the serde representation must never change.

use crate::error::{RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// Terminal outcome of a relayed transaction. Exactly one of the two variants
/// is ever present; the serialized key carries the tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfirmationStatus {
    #[serde(rename = "SUCCESS")]
    Success(String),
    #[serde(rename = "FAILED")]
    Failed(String),
}

/// A transaction outcome travelling back through the mesh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Confirmation {
    pub tx_id: String,
    pub status: ConfirmationStatus,
    pub timestamp: u64,
    pub relay_count: u32,
}

/// FIFO queue of confirmations awaiting pickup or forwarding
pub struct ConfirmationQueue {
    queue: VecDeque<Confirmation>,
    max_size: usize,
}

impl ConfirmationQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            max_size,
        }
    }

    /// Queue a locally authored success confirmation (`relay_count` = 0)
    pub fn queue_success(
        &mut self,
        tx_id: &str,
        signature: &str,
        timestamp: u64,
    ) -> RelayResult<()> {
        self.push(Confirmation {
            tx_id: tx_id.to_string(),
            status: ConfirmationStatus::Success(signature.to_string()),
            timestamp,
            relay_count: 0,
        })
    }

    /// Queue a locally authored failure confirmation (`relay_count` = 0)
    pub fn queue_failure(&mut self, tx_id: &str, error: &str, timestamp: u64) -> RelayResult<()> {
        self.push(Confirmation {
            tx_id: tx_id.to_string(),
            status: ConfirmationStatus::Failed(error.to_string()),
            timestamp,
            relay_count: 0,
        })
    }

    /// Queue a confirmation as-is (restored or received in final form)
    pub fn push(&mut self, confirmation: Confirmation) -> RelayResult<()> {
        if self.queue.len() >= self.max_size {
            return Err(RelayError::QueueFull(self.max_size));
        }
        debug!(
            "queueing confirmation for transaction {} (hop {})",
            confirmation.tx_id, confirmation.relay_count
        );
        self.queue.push_back(confirmation);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Confirmation> {
        self.queue.pop_front()
    }

    /// Re-queue a confirmation authored elsewhere for onward propagation,
    /// incrementing its hop count by exactly one.
    pub fn relay(&mut self, mut confirmation: Confirmation) -> RelayResult<()> {
        confirmation.relay_count += 1;
        self.push(confirmation)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn snapshot(&self) -> Vec<Confirmation> {
        self.queue.iter().cloned().collect()
    }

    pub fn restore(&mut self, items: Vec<Confirmation>) {
        self.queue = items.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_and_pop_success() {
        let mut queue = ConfirmationQueue::new(100);
        queue.queue_success("tid1", "sig-abc", 1_700_000_000).unwrap();

        let confirmation = queue.pop().unwrap();
        assert_eq!(confirmation.tx_id, "tid1");
        assert_eq!(
            confirmation.status,
            ConfirmationStatus::Success("sig-abc".to_string())
        );
        assert_eq!(confirmation.relay_count, 0);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_relay_increments_hop_count() {
        let mut queue = ConfirmationQueue::new(100);
        queue.queue_success("tid1", "sig-abc", 1_700_000_000).unwrap();

        let confirmation = queue.pop().unwrap();
        queue.relay(confirmation).unwrap();

        let relayed = queue.pop().unwrap();
        assert_eq!(relayed.tx_id, "tid1");
        assert_eq!(relayed.relay_count, 1);
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = ConfirmationQueue::new(100);
        queue.queue_success("a", "sig-a", 1).unwrap();
        queue.queue_failure("b", "simulation failed", 2).unwrap();
        queue.queue_success("c", "sig-c", 3).unwrap();

        assert_eq!(queue.pop().unwrap().tx_id, "a");
        assert_eq!(queue.pop().unwrap().tx_id, "b");
        assert_eq!(queue.pop().unwrap().tx_id, "c");
    }

    #[test]
    fn test_queue_full() {
        let mut queue = ConfirmationQueue::new(1);
        queue.queue_success("a", "sig", 1).unwrap();

        let result = queue.queue_success("b", "sig", 2);
        assert!(matches!(result.unwrap_err(), RelayError::QueueFull(1)));
    }

    #[test]
    fn test_success_wire_encoding_is_key_tagged() {
        let confirmation = Confirmation {
            tx_id: "tid1".to_string(),
            status: ConfirmationStatus::Success("sig-abc".to_string()),
            timestamp: 1_700_000_000,
            relay_count: 0,
        };

        let encoded = serde_json::to_string(&confirmation).unwrap();
        assert_eq!(
            encoded,
            r#"{"txId":"tid1","status":{"SUCCESS":"sig-abc"},"timestamp":1700000000,"relayCount":0}"#
        );
    }

    #[test]
    fn test_failed_wire_encoding_is_key_tagged() {
        let confirmation = Confirmation {
            tx_id: "tid2".to_string(),
            status: ConfirmationStatus::Failed("blockhash expired".to_string()),
            timestamp: 1_700_000_001,
            relay_count: 3,
        };

        let encoded = serde_json::to_string(&confirmation).unwrap();
        assert_eq!(
            encoded,
            r#"{"txId":"tid2","status":{"FAILED":"blockhash expired"},"timestamp":1700000001,"relayCount":3}"#
        );
    }

    #[test]
    fn test_wire_round_trip() {
        let confirmation = Confirmation {
            tx_id: "tid3".to_string(),
            status: ConfirmationStatus::Failed("no route".to_string()),
            timestamp: 42,
            relay_count: 7,
        };

        let encoded = serde_json::to_vec(&confirmation).unwrap();
        let decoded: Confirmation = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded, confirmation);
    }
}
