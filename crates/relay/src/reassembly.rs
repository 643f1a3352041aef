//! Inbound fragment accumulation and payload reconstruction
//!
//! Buffers fragments per transaction id until the set covers every index,
//! then reconstructs the payload and drops the state. Incomplete state older
//! than a configured age is expired so that transactions which will never
//! complete (peer out of range, corrupted stream) cannot grow memory without
//! bound.

use crate::fragment::{self, Fragment};
use std::collections::HashMap;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Result of feeding one fragment into the buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyOutcome {
    /// Fragment recorded, more are needed
    Incomplete { received: usize, total: u32 },
    /// Final fragment arrived; the original payload is returned
    Complete(Vec<u8>),
    /// Index already recorded for this transaction; no state changed
    DuplicateIgnored,
    /// Fragment refused (bad checksum, out-of-range index, total mismatch)
    Rejected(String),
}

#[derive(Debug)]
struct ReassemblyState {
    total_fragments: u32,
    fragments: HashMap<u32, Fragment>,
    total_bytes_received: usize,
    first_seen_at: SystemTime,
}

/// Per-transaction reassembly buffer
pub struct ReassemblyBuffer {
    states: HashMap<String, ReassemblyState>,
    completed: u64,
    failures: u64,
}

impl ReassemblyBuffer {
    pub fn new() -> Self {
        Self {
            states: HashMap::new(),
            completed: 0,
            failures: 0,
        }
    }

    /// Record one inbound fragment.
    ///
    /// Duplicate delivery is a no-op (`DuplicateIgnored`), not an error: the
    /// radio layer may replay frames. When the last missing index arrives the
    /// payload is reconstructed and the transaction's state removed.
    pub fn on_fragment(&mut self, frag: Fragment, now: SystemTime) -> ReassemblyOutcome {
        if frag.total == 0 {
            return ReassemblyOutcome::Rejected("fragment declares a total of zero".to_string());
        }
        if frag.index >= frag.total {
            return ReassemblyOutcome::Rejected(format!(
                "fragment index {} out of range for total {}",
                frag.index, frag.total
            ));
        }
        if !frag.verify_checksum() {
            return ReassemblyOutcome::Rejected(format!(
                "checksum mismatch on fragment {} of transaction {}",
                frag.index, frag.id
            ));
        }

        let id = frag.id.clone();
        let total = frag.total;
        let state = self.states.entry(id.clone()).or_insert_with(|| {
            debug!("opening reassembly buffer for transaction {}", id);
            ReassemblyState {
                total_fragments: total,
                fragments: HashMap::new(),
                total_bytes_received: 0,
                first_seen_at: now,
            }
        });

        if state.total_fragments != frag.total {
            return ReassemblyOutcome::Rejected(format!(
                "fragment total {} does not match recorded total {}",
                frag.total, state.total_fragments
            ));
        }
        if state.fragments.contains_key(&frag.index) {
            debug!(
                "duplicate fragment {} for transaction {}, ignoring",
                frag.index, id
            );
            return ReassemblyOutcome::DuplicateIgnored;
        }

        state.total_bytes_received += frag.data.len();
        state.fragments.insert(frag.index, frag);

        let received = state.fragments.len();
        if received < state.total_fragments as usize {
            return ReassemblyOutcome::Incomplete {
                received,
                total: state.total_fragments,
            };
        }

        match self.states.remove(&id) {
            Some(complete) => {
                let fragments: Vec<Fragment> = complete.fragments.into_values().collect();
                match fragment::reconstruct(&fragments) {
                    Ok(payload) => {
                        info!(
                            "transaction {} reassembled from {} fragments ({} bytes)",
                            id,
                            fragments.len(),
                            payload.len()
                        );
                        self.completed += 1;
                        ReassemblyOutcome::Complete(payload)
                    }
                    Err(e) => {
                        warn!("reconstruction of transaction {} failed: {}", id, e);
                        self.failures += 1;
                        ReassemblyOutcome::Rejected(e.to_string())
                    }
                }
            }
            None => ReassemblyOutcome::Rejected("reassembly state missing".to_string()),
        }
    }

    /// Remove incomplete state older than `max_age`, counting each removal as
    /// a reassembly failure. Returns the number of transactions expired.
    pub fn cleanup_stale(&mut self, max_age: Duration, now: SystemTime) -> usize {
        let before = self.states.len();

        self.states.retain(|id, state| {
            match now.duration_since(state.first_seen_at) {
                Ok(age) if age > max_age => {
                    warn!(
                        "expiring stale reassembly for transaction {} ({}/{} fragments after {:?})",
                        id,
                        state.fragments.len(),
                        state.total_fragments,
                        age
                    );
                    false
                }
                // First-seen in the future means clock skew; keep the state
                _ => true,
            }
        });

        let removed = before - self.states.len();
        self.failures += removed as u64;
        removed
    }

    /// Fragments currently held across all incomplete transactions
    pub fn fragments_buffered(&self) -> usize {
        self.states.values().map(|s| s.fragments.len()).sum()
    }

    /// Incomplete transactions currently tracked
    pub fn partial_transactions(&self) -> usize {
        self.states.len()
    }

    /// Bytes buffered for one transaction, if tracked
    pub fn bytes_buffered(&self, tx_id: &str) -> Option<usize> {
        self.states.get(tx_id).map(|s| s.total_bytes_received)
    }

    /// Fragments recorded for one transaction, if tracked
    pub fn received_count(&self, tx_id: &str) -> Option<usize> {
        self.states.get(tx_id).map(|s| s.fragments.len())
    }

    pub fn completed_count(&self) -> u64 {
        self.completed
    }

    pub fn failure_count(&self) -> u64 {
        self.failures
    }
}

impl Default for ReassemblyBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::fragment;

    fn now() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    #[test]
    fn test_reverse_order_completes_on_final_index() {
        let payload: Vec<u8> = (0..1400u32).map(|i| (i % 251) as u8).collect();
        let fragments = fragment("tx-rev", &payload, 200).unwrap();
        assert_eq!(fragments.len(), 7);

        let mut buffer = ReassemblyBuffer::new();
        let mut outcome = ReassemblyOutcome::DuplicateIgnored;

        // Feed indices 6..=0; only the arrival of index 0 completes the set
        for frag in fragments.into_iter().rev() {
            let index = frag.index;
            outcome = buffer.on_fragment(frag, now());
            if index != 0 {
                assert!(matches!(outcome, ReassemblyOutcome::Incomplete { .. }));
            }
        }

        match outcome {
            ReassemblyOutcome::Complete(bytes) => assert_eq!(bytes, payload),
            other => panic!("expected completion, got {:?}", other),
        }
        assert_eq!(buffer.partial_transactions(), 0);
        assert_eq!(buffer.completed_count(), 1);
    }

    #[test]
    fn test_duplicate_fragment_ignored() {
        let fragments = fragment("tx-dup", &[5u8; 600], 200).unwrap();
        let mut buffer = ReassemblyBuffer::new();

        buffer.on_fragment(fragments[0].clone(), now());
        assert_eq!(buffer.received_count("tx-dup"), Some(1));

        let outcome = buffer.on_fragment(fragments[0].clone(), now());
        assert_eq!(outcome, ReassemblyOutcome::DuplicateIgnored);
        assert_eq!(buffer.received_count("tx-dup"), Some(1));
    }

    #[test]
    fn test_corrupted_fragment_rejected_without_state_change() {
        let fragments = fragment("tx-bad", &[5u8; 600], 200).unwrap();
        let mut buffer = ReassemblyBuffer::new();

        let mut corrupted = fragments[0].clone();
        corrupted.data[0] ^= 0xFF;

        let outcome = buffer.on_fragment(corrupted, now());
        assert!(matches!(outcome, ReassemblyOutcome::Rejected(_)));
        assert_eq!(buffer.partial_transactions(), 0);
    }

    #[test]
    fn test_total_mismatch_rejected() {
        let fragments = fragment("tx-mismatch", &[5u8; 600], 200).unwrap();
        let mut buffer = ReassemblyBuffer::new();
        buffer.on_fragment(fragments[0].clone(), now());

        let conflicting = fragment("tx-mismatch", &[5u8; 800], 200).unwrap();
        let outcome = buffer.on_fragment(conflicting[1].clone(), now());
        assert!(matches!(outcome, ReassemblyOutcome::Rejected(_)));
    }

    #[test]
    fn test_out_of_range_index_rejected() {
        let fragments = fragment("tx-range", &[5u8; 600], 200).unwrap();
        let mut buffer = ReassemblyBuffer::new();

        let mut rogue = fragments[0].clone();
        rogue.index = 9;
        rogue.checksum = crc32fast::hash(&rogue.data).to_be_bytes();

        let outcome = buffer.on_fragment(rogue, now());
        assert!(matches!(outcome, ReassemblyOutcome::Rejected(_)));
    }

    #[test]
    fn test_cleanup_stale_counts_failures() {
        let fragments = fragment("tx-stale", &[5u8; 600], 200).unwrap();
        let mut buffer = ReassemblyBuffer::new();
        buffer.on_fragment(fragments[0].clone(), now());

        let removed = buffer.cleanup_stale(Duration::from_secs(300), now() + Duration::from_secs(301));
        assert_eq!(removed, 1);
        assert_eq!(buffer.partial_transactions(), 0);
        assert_eq!(buffer.failure_count(), 1);
    }

    #[test]
    fn test_cleanup_keeps_fresh_state() {
        let fragments = fragment("tx-fresh", &[5u8; 600], 200).unwrap();
        let mut buffer = ReassemblyBuffer::new();
        buffer.on_fragment(fragments[0].clone(), now());

        let removed = buffer.cleanup_stale(Duration::from_secs(300), now() + Duration::from_secs(10));
        assert_eq!(removed, 0);
        assert_eq!(buffer.partial_transactions(), 1);
        assert_eq!(buffer.fragments_buffered(), 1);
    }

    #[test]
    fn test_single_fragment_transaction_completes_immediately() {
        let fragments = fragment("tx-one", &[1, 2, 3], 200).unwrap();
        let mut buffer = ReassemblyBuffer::new();

        match buffer.on_fragment(fragments[0].clone(), now()) {
            ReassemblyOutcome::Complete(bytes) => assert_eq!(bytes, vec![1, 2, 3]),
            other => panic!("expected completion, got {:?}", other),
        }
    }
}
