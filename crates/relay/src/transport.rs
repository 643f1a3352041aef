//! Mesh transport seam
//!
//! The engine never talks to a radio directly; it hands encoded frames to a
//! `MeshTransport` capability object and polls it for inbound frames. The
//! platform layer (BLE, test harness, loopback) implements this trait.

use crate::confirmation::Confirmation;
use crate::error::RelayResult;
use crate::fragment::Fragment;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Transport capability consumed by the relay engine.
///
/// All methods are non-blocking: `poll_inbound` returns immediately with
/// whatever frame is already available, and a `send_frame` failure is
/// reported as an error rather than awaited out.
#[async_trait]
pub trait MeshTransport: Send + Sync {
    /// Hand one encoded frame to the underlying transport
    async fn send_frame(&self, frame: &[u8]) -> RelayResult<()>;

    /// Take the next inbound frame if one has arrived
    async fn poll_inbound(&self) -> Option<Vec<u8>>;

    /// Current per-frame data budget derived from the negotiated MTU
    fn max_frame_payload(&self) -> usize;
}

/// Envelope carried by every mesh frame: either a payload fragment or a
/// confirmation travelling back toward the origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MeshFrame {
    Fragment(Fragment),
    Confirmation(Confirmation),
}

impl MeshFrame {
    pub fn encode(&self) -> RelayResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> RelayResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
