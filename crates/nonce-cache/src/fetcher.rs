//! Durable-nonce account state source
//!
//! Fetching lives behind a trait so the cache can be exercised without a
//! validator; the production implementation reads nonce accounts through the
//! Solana RPC client.

use crate::error::{NonceCacheError, NonceCacheResult};
use async_trait::async_trait;
use solana_client::nonce_utils;
use solana_client::rpc_client::RpcClient;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use tracing::debug;

/// On-chain state of one durable-nonce account
#[derive(Debug, Clone)]
pub struct NonceAccountState {
    pub authority: Pubkey,
    pub blockhash: Hash,
    pub lamports_per_signature: u64,
}

/// Source of durable-nonce account state
#[async_trait]
pub trait NonceSource: Send + Sync {
    async fn fetch_nonce_state(&self, nonce_account: &Pubkey) -> NonceCacheResult<NonceAccountState>;
}

/// RPC-backed nonce source for use while the device is online
pub struct RpcNonceSource {
    client: Arc<RpcClient>,
}

impl RpcNonceSource {
    pub fn new(client: Arc<RpcClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NonceSource for RpcNonceSource {
    async fn fetch_nonce_state(&self, nonce_account: &Pubkey) -> NonceCacheResult<NonceAccountState> {
        debug!("fetching nonce account {}", nonce_account);

        let account = self.client.get_account(nonce_account).map_err(|e| {
            NonceCacheError::Rpc(format!("failed to fetch nonce account {}: {}", nonce_account, e))
        })?;

        let data = nonce_utils::data_from_account(&account).map_err(|e| {
            NonceCacheError::InvalidAccount(format!("{}: {}", nonce_account, e))
        })?;

        Ok(NonceAccountState {
            authority: data.authority,
            blockhash: data.blockhash(),
            lamports_per_signature: data.fee_calculator.lamports_per_signature,
        })
    }
}
