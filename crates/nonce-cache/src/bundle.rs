//! Offline transaction bundle: pre-fetched durable-nonce material
//!
//! Each cached entry holds everything transaction construction needs from the
//! chain while offline: the nonce account's stored blockhash, its authority
//! and the fee rate at caching time. An entry is consumed at most once; the
//! `used` flag never reverts.

use crate::error::{NonceCacheError, NonceCacheResult};
use serde::{Deserialize, Serialize};

/// Version stamped into every persisted bundle
pub const BUNDLE_FORMAT_VERSION: u32 = 1;

/// One durable-nonce account's cached on-chain state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedNonceData {
    pub nonce_account: String,
    pub authority: String,
    pub blockhash: String,
    pub lamports_per_signature: u64,
    pub cached_at: u64,
    pub used: bool,
}

impl CachedNonceData {
    /// Consume this nonce. The transition happens exactly once; a second call
    /// is an error and the flag never goes back to unused.
    pub fn mark_used(&mut self) -> NonceCacheResult<()> {
        if self.used {
            return Err(NonceCacheError::AlreadyUsed(self.nonce_account.clone()));
        }
        self.used = true;
        Ok(())
    }

    /// Seconds since this entry was cached
    pub fn age_seconds(&self, now_secs: u64) -> u64 {
        now_secs.saturating_sub(self.cached_at)
    }
}

/// A set of cached nonces prepared while online, sized for the number of
/// transactions the device should be able to construct offline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineTransactionBundle {
    pub version: u32,
    pub nonce_caches: Vec<CachedNonceData>,
    pub max_transactions: u32,
    pub created_at: u64,
}

impl OfflineTransactionBundle {
    pub fn new(nonce_caches: Vec<CachedNonceData>, created_at: u64) -> Self {
        let max_transactions = nonce_caches.len() as u32;
        Self {
            version: BUNDLE_FORMAT_VERSION,
            nonce_caches,
            max_transactions,
            created_at,
        }
    }

    pub fn total_nonces(&self) -> usize {
        self.nonce_caches.len()
    }

    pub fn available_nonces(&self) -> usize {
        self.nonce_caches.iter().filter(|c| !c.used).count()
    }

    pub fn used_nonces(&self) -> usize {
        self.nonce_caches.iter().filter(|c| c.used).count()
    }

    /// The oldest unused entry, if any. Does not consume it.
    pub fn oldest_available(&self) -> Option<&CachedNonceData> {
        self.nonce_caches
            .iter()
            .filter(|c| !c.used)
            .min_by_key(|c| c.cached_at)
    }
}
