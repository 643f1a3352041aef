//! Durable store abstraction and the persisted queue snapshot format
//!
//! Queue state survives process restarts: the engine serializes the outbound,
//! retry and confirmation queues into a versioned snapshot and writes it
//! through a `RelayStore` capability object. The platform layer decides where
//! bytes actually land (keystore-backed file, app sandbox, test memory).

use crate::confirmation::Confirmation;
use crate::error::RelayResult;
use crate::outbound::OutboundTransaction;
use crate::retry::RetryItem;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Storage key for the persisted queue snapshot
pub const QUEUE_STORAGE_KEY: &str = "relay_queues";

/// Version stamped into every snapshot; bumped on incompatible layout changes
pub const QUEUE_FORMAT_VERSION: u32 = 1;

/// Trait for platform-agnostic durable storage
#[async_trait]
pub trait RelayStore: Send + Sync {
    /// Persist a value under a key, replacing any previous value
    async fn store_data(&self, key: &str, data: &[u8]) -> RelayResult<()>;

    /// Load a previously stored value, `None` if the key was never written
    async fn load_data(&self, key: &str) -> RelayResult<Option<Vec<u8>>>;

    /// Remove a stored value; removing a missing key is not an error
    async fn delete_data(&self, key: &str) -> RelayResult<()>;
}

/// In-memory store for tests and ephemeral deployments
pub struct InMemoryStore {
    data: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelayStore for InMemoryStore {
    async fn store_data(&self, key: &str, data: &[u8]) -> RelayResult<()> {
        let mut map = self.data.write().await;
        map.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn load_data(&self, key: &str) -> RelayResult<Option<Vec<u8>>> {
        let map = self.data.read().await;
        Ok(map.get(key).cloned())
    }

    async fn delete_data(&self, key: &str) -> RelayResult<()> {
        let mut map = self.data.write().await;
        map.remove(key);
        Ok(())
    }
}

/// Everything the engine persists between runs
#[derive(Debug, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub version: u32,
    pub outbound: Vec<OutboundTransaction>,
    pub retry: Vec<RetryItem>,
    pub confirmations: Vec<Confirmation>,
}
