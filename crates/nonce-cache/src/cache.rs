//! Offline nonce bundle cache
//!
//! While online, `prepare` snapshots the state of a set of durable-nonce
//! accounts so transactions can be constructed later with no network access.
//! `get_available` hands out the oldest unused entry without consuming it;
//! consumption is the caller's explicit `mark_used` transition, so a
//! construction failure after the fetch never strands a nonce. When
//! connectivity returns, `refresh` re-synchronizes the cache against current
//! chain state and evicts entries past the retention window.

use crate::bundle::{CachedNonceData, OfflineTransactionBundle, BUNDLE_FORMAT_VERSION};
use crate::error::{NonceCacheError, NonceCacheResult};
use crate::fetcher::NonceSource;
use relay::clock::{unix_seconds, Clock};
use relay::storage::RelayStore;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Storage key for the persisted bundle
pub const BUNDLE_STORAGE_KEY: &str = "offline_nonce_bundle";

/// Cache of pre-fetched durable-nonce state for offline construction
pub struct OfflineNonceBundleCache {
    source: Arc<dyn NonceSource>,
    store: Arc<dyn RelayStore>,
    clock: Arc<dyn Clock>,
    retention: Duration,
    bundle: Mutex<Option<OfflineTransactionBundle>>,
}

impl OfflineNonceBundleCache {
    pub fn new(
        source: Arc<dyn NonceSource>,
        store: Arc<dyn RelayStore>,
        clock: Arc<dyn Clock>,
        retention: Duration,
    ) -> Self {
        Self {
            source,
            store,
            clock,
            retention,
            bundle: Mutex::new(None),
        }
    }

    /// Restore a previously persisted bundle. Returns whether one was found.
    pub async fn load(&self) -> NonceCacheResult<bool> {
        let data = self
            .store
            .load_data(BUNDLE_STORAGE_KEY)
            .await
            .map_err(NonceCacheError::from)?;

        let data = match data {
            Some(data) => data,
            None => {
                debug!("no persisted nonce bundle");
                return Ok(false);
            }
        };

        let restored: OfflineTransactionBundle = serde_json::from_slice(&data)?;
        if restored.version != BUNDLE_FORMAT_VERSION {
            warn!(
                "ignoring persisted nonce bundle with unknown format version {}",
                restored.version
            );
            return Ok(false);
        }

        info!(
            "restored nonce bundle: {} available, {} used",
            restored.available_nonces(),
            restored.used_nonces()
        );
        *self.bundle.lock().await = Some(restored);
        Ok(true)
    }

    /// Fetch `count` fresh durable-nonce account states while online and
    /// cache them unused. Every account must be authorized for the provided
    /// keypair; a mismatch aborts the whole preparation.
    pub async fn prepare(
        &self,
        count: usize,
        authority: &Keypair,
        nonce_accounts: &[Pubkey],
    ) -> NonceCacheResult<OfflineTransactionBundle> {
        if count == 0 {
            return Err(NonceCacheError::InvalidArgument(
                "bundle size must be positive".to_string(),
            ));
        }
        if nonce_accounts.len() < count {
            return Err(NonceCacheError::InvalidArgument(format!(
                "need {} nonce accounts, got {}",
                count,
                nonce_accounts.len()
            )));
        }

        let expected = authority.pubkey();
        let now_secs = unix_seconds(self.clock.now());
        let mut caches = Vec::with_capacity(count);

        for account in nonce_accounts.iter().take(count) {
            let state = self.source.fetch_nonce_state(account).await?;
            if state.authority != expected {
                return Err(NonceCacheError::AuthorityMismatch {
                    account: account.to_string(),
                    expected: expected.to_string(),
                });
            }
            caches.push(CachedNonceData {
                nonce_account: account.to_string(),
                authority: state.authority.to_string(),
                blockhash: state.blockhash.to_string(),
                lamports_per_signature: state.lamports_per_signature,
                cached_at: now_secs,
                used: false,
            });
        }

        let bundle = OfflineTransactionBundle::new(caches, now_secs);
        self.persist(&bundle).await?;
        *self.bundle.lock().await = Some(bundle.clone());

        info!("prepared offline bundle with {} durable nonces", count);
        Ok(bundle)
    }

    /// The oldest unused cached nonce, or `None`. The entry is not consumed;
    /// call `mark_used` once construction has actually spent it.
    pub async fn get_available(&self) -> Option<CachedNonceData> {
        let bundle = self.bundle.lock().await;
        bundle.as_ref()?.oldest_available().cloned()
    }

    /// Record that a cached nonce was consumed by transaction construction.
    /// The transition happens exactly once and never reverts, even if the
    /// subsequent persist fails.
    pub async fn mark_used(&self, nonce_account: &str) -> NonceCacheResult<()> {
        let mut guard = self.bundle.lock().await;
        let bundle = guard.as_mut().ok_or(NonceCacheError::NoBundle)?;

        let entry = bundle
            .nonce_caches
            .iter_mut()
            .find(|c| c.nonce_account == nonce_account)
            .ok_or_else(|| {
                NonceCacheError::InvalidArgument(format!(
                    "nonce account {} is not in the bundle",
                    nonce_account
                ))
            })?;

        entry.mark_used()?;
        debug!("nonce {} marked used", nonce_account);

        let snapshot = bundle.clone();
        drop(guard);
        self.persist(&snapshot).await
    }

    /// Re-synchronize the cache against current chain state once connectivity
    /// is back. Used entries past the retention window are evicted; unused
    /// entries are re-fetched (and evicted if their account is gone). Returns
    /// the number of entries refreshed.
    pub async fn refresh(&self) -> NonceCacheResult<usize> {
        let mut guard = self.bundle.lock().await;
        let bundle = guard.as_mut().ok_or(NonceCacheError::NoBundle)?;

        let now_secs = unix_seconds(self.clock.now());
        let retention_secs = self.retention.as_secs();

        bundle.nonce_caches.retain(|entry| {
            if entry.used && entry.age_seconds(now_secs) > retention_secs {
                debug!("evicting consumed nonce {}", entry.nonce_account);
                false
            } else {
                true
            }
        });

        let mut refreshed = 0usize;
        let mut evict: Vec<String> = Vec::new();

        for entry in bundle.nonce_caches.iter_mut().filter(|c| !c.used) {
            let account = match Pubkey::from_str(&entry.nonce_account) {
                Ok(account) => account,
                Err(e) => {
                    warn!("evicting unparsable nonce account {}: {}", entry.nonce_account, e);
                    evict.push(entry.nonce_account.clone());
                    continue;
                }
            };
            match self.source.fetch_nonce_state(&account).await {
                Ok(state) => {
                    entry.blockhash = state.blockhash.to_string();
                    entry.lamports_per_signature = state.lamports_per_signature;
                    entry.cached_at = now_secs;
                    refreshed += 1;
                }
                Err(e) => {
                    warn!("evicting nonce {} after failed refresh: {}", entry.nonce_account, e);
                    evict.push(entry.nonce_account.clone());
                }
            }
        }

        bundle
            .nonce_caches
            .retain(|entry| !evict.contains(&entry.nonce_account));

        info!(
            "nonce refresh complete: {} refreshed, {} remaining",
            refreshed,
            bundle.nonce_caches.len()
        );

        let snapshot = bundle.clone();
        drop(guard);
        self.persist(&snapshot).await?;
        Ok(refreshed)
    }

    pub async fn available_nonces(&self) -> usize {
        let bundle = self.bundle.lock().await;
        bundle.as_ref().map(|b| b.available_nonces()).unwrap_or(0)
    }

    pub async fn used_nonces(&self) -> usize {
        let bundle = self.bundle.lock().await;
        bundle.as_ref().map(|b| b.used_nonces()).unwrap_or(0)
    }

    pub async fn total_nonces(&self) -> usize {
        let bundle = self.bundle.lock().await;
        bundle.as_ref().map(|b| b.total_nonces()).unwrap_or(0)
    }

    async fn persist(&self, bundle: &OfflineTransactionBundle) -> NonceCacheResult<()> {
        let data = serde_json::to_vec(bundle)?;
        self.store
            .store_data(BUNDLE_STORAGE_KEY, &data)
            .await
            .map_err(NonceCacheError::from)
    }
}
