//! Offline durable-nonce bundle cache
//!
//! Pre-fetches the on-chain state of a wallet's durable-nonce accounts while
//! connectivity exists, so transactions can be constructed and signed later
//! with no network path at all. Shares the relay engine's persistence and
//! clock discipline.

pub mod bundle;
pub mod cache;
pub mod error;
pub mod fetcher;

// Re-export main types
pub use bundle::{CachedNonceData, OfflineTransactionBundle, BUNDLE_FORMAT_VERSION};
pub use cache::{OfflineNonceBundleCache, BUNDLE_STORAGE_KEY};
pub use error::{NonceCacheError, NonceCacheResult};
pub use fetcher::{NonceAccountState, NonceSource, RpcNonceSource};
