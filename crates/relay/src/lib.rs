//! Offline transaction relay over an MTU-bounded mesh
//!
//! This crate implements the transport/relay protocol that lets devices with
//! no internet path propagate signed transactions to each other over small
//! radio frames: payload fragmentation and reassembly, priority/retry/
//! confirmation queueing, and a periodic tick-driven engine that advances all
//! of it without blocking the caller.

pub mod clock;
pub mod config;
pub mod confirmation;
pub mod engine;
pub mod error;
pub mod fragment;
pub mod metrics;
pub mod outbound;
pub mod reassembly;
pub mod retry;
pub mod storage;
pub mod transport;

// Re-export main types
pub use clock::{unix_seconds, Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use confirmation::{Confirmation, ConfirmationQueue, ConfirmationStatus};
pub use engine::{RelayEngine, TransactionPhase};
pub use error::{RelayError, RelayResult};
pub use fragment::{
    fragment, fragmentation_stats, reconstruct, Fragment, FragmentKind, FragmentationStats,
    FRAME_HEADER_OVERHEAD,
};
pub use metrics::{MetricsCollector, QueueMetrics, RelayMetrics, TransportMetrics};
pub use outbound::{OutboundTransaction, Priority, PriorityOutboundQueue};
pub use reassembly::{ReassemblyBuffer, ReassemblyOutcome};
pub use retry::{BackoffConfig, RetryItem, RetryQueue};
pub use storage::{InMemoryStore, QueueSnapshot, RelayStore};
pub use transport::{MeshFrame, MeshTransport};
