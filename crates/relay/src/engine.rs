//! Tick-driven relay protocol engine
//!
//! A single periodic `tick()` advances every queue and buffer: stale
//! reassembly state expires, overdue retries flow back into the outbound
//! queue, outbound transactions are fragmented and handed to the transport
//! within a per-tick frame budget, and inbound frames are drained into the
//! reassembly buffer or matched against transactions awaiting confirmation.
//! Nothing inside a tick blocks on the network; a genuine wait is deferred to
//! the next tick. Per-transaction failures are absorbed into retry and
//! metrics state so one bad transaction never aborts processing of the rest.

use crate::clock::{unix_seconds, Clock};
use crate::config::EngineConfig;
use crate::confirmation::{Confirmation, ConfirmationQueue};
use crate::error::{RelayError, RelayResult};
use crate::fragment::{self, FragmentationStats};
use crate::metrics::{MetricsCollector, QueueMetrics, RelayMetrics, TransportMetrics};
use crate::outbound::{OutboundTransaction, Priority, PriorityOutboundQueue};
use crate::reassembly::{ReassemblyBuffer, ReassemblyOutcome};
use crate::retry::RetryQueue;
use crate::storage::{QueueSnapshot, RelayStore, QUEUE_FORMAT_VERSION, QUEUE_STORAGE_KEY};
use crate::transport::{MeshFrame, MeshTransport};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Where a transaction currently sits in its send lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionPhase {
    Queued,
    AwaitingConfirmation,
    Retrying,
}

#[derive(Debug, Clone)]
struct InFlightTransaction {
    payload: Vec<u8>,
    priority: Priority,
    retry_count: u32,
    created_at: SystemTime,
    sent_at: SystemTime,
}

/// The relay protocol engine. One explicit instance per process; every
/// collaborator receives it by reference, there is no global handle.
pub struct RelayEngine {
    config: EngineConfig,
    transport: Arc<dyn MeshTransport>,
    store: Arc<dyn RelayStore>,
    clock: Arc<dyn Clock>,
    outbound: Mutex<PriorityOutboundQueue>,
    retry: Mutex<RetryQueue>,
    confirmations: Mutex<ConfirmationQueue>,
    reassembly: Mutex<ReassemblyBuffer>,
    in_flight: DashMap<String, InFlightTransaction>,
    inbound_payloads: Mutex<HashMap<String, Vec<u8>>>,
    metrics: MetricsCollector,
    initialized: AtomicBool,
    dirty: AtomicBool,
    save_in_flight: AtomicBool,
    last_save: Mutex<SystemTime>,
}

impl RelayEngine {
    pub fn new(
        config: EngineConfig,
        transport: Arc<dyn MeshTransport>,
        store: Arc<dyn RelayStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let outbound = PriorityOutboundQueue::new(config.max_queue_size);
        let retry = RetryQueue::new(config.retry.clone());
        let confirmations = ConfirmationQueue::new(config.max_queue_size);
        let started_at = clock.now();

        Self {
            config,
            transport,
            store,
            clock,
            outbound: Mutex::new(outbound),
            retry: Mutex::new(retry),
            confirmations: Mutex::new(confirmations),
            reassembly: Mutex::new(ReassemblyBuffer::new()),
            in_flight: DashMap::new(),
            inbound_payloads: Mutex::new(HashMap::new()),
            metrics: MetricsCollector::new(),
            initialized: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            save_in_flight: AtomicBool::new(false),
            last_save: Mutex::new(started_at),
        }
    }

    /// Restore persisted queue state and accept operations. Every public
    /// operation before this call fails with `NotInitialized`.
    pub async fn initialize(&self) -> RelayResult<()> {
        match self.store.load_data(QUEUE_STORAGE_KEY).await {
            Ok(Some(data)) => match serde_json::from_slice::<QueueSnapshot>(&data) {
                Ok(snapshot) if snapshot.version == QUEUE_FORMAT_VERSION => {
                    let mut outbound = self.outbound.lock().await;
                    let mut retry = self.retry.lock().await;
                    let mut confirmations = self.confirmations.lock().await;
                    info!(
                        "restoring queues: {} outbound, {} retrying, {} confirmations",
                        snapshot.outbound.len(),
                        snapshot.retry.len(),
                        snapshot.confirmations.len()
                    );
                    outbound.restore(snapshot.outbound);
                    retry.restore(snapshot.retry);
                    confirmations.restore(snapshot.confirmations);
                }
                Ok(snapshot) => {
                    warn!(
                        "ignoring persisted queues with unknown format version {}",
                        snapshot.version
                    );
                }
                Err(e) => {
                    warn!("persisted queue snapshot is unreadable, starting fresh: {}", e);
                }
            },
            Ok(None) => {
                debug!("no persisted queues, starting fresh");
            }
            Err(e) => {
                warn!("could not load persisted queues, starting fresh: {}", e);
            }
        }

        self.initialized.store(true, Ordering::SeqCst);
        info!("relay engine initialized");
        Ok(())
    }

    /// Stop accepting operations. An in-progress tick is allowed to finish;
    /// this only gates future calls. Queue state is flushed best-effort.
    pub async fn shutdown(&self) {
        if let Err(e) = self.save_queues().await {
            warn!("final queue save failed during shutdown: {}", e);
        }
        self.initialized.store(false, Ordering::SeqCst);
        info!("relay engine shut down");
    }

    fn ensure_initialized(&self) -> RelayResult<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RelayError::NotInitialized)
        }
    }

    /// Queue a transaction payload for transmission over the mesh.
    ///
    /// The id must be unique across the outbound queue, the retry queue and
    /// transactions awaiting confirmation; callers deduplicate before
    /// pushing and a repeat is an error, never a silent merge.
    pub async fn push_outbound(
        &self,
        tx_id: &str,
        payload: Vec<u8>,
        priority: Priority,
    ) -> RelayResult<()> {
        self.ensure_initialized()?;
        if tx_id.is_empty() {
            return Err(RelayError::InvalidArgument(
                "transaction id must not be empty".to_string(),
            ));
        }
        if payload.is_empty() {
            return Err(RelayError::InvalidArgument(
                "transaction payload must not be empty".to_string(),
            ));
        }

        let max_frame_payload = self.transport.max_frame_payload();
        let fragment_count = fragment::fragment_count_for(payload.len(), max_frame_payload);

        let mut outbound = self.outbound.lock().await;
        let retry = self.retry.lock().await;

        if outbound.contains(tx_id) || retry.contains(tx_id) || self.in_flight.contains_key(tx_id)
        {
            return Err(RelayError::DuplicateTransaction(tx_id.to_string()));
        }

        outbound.push(OutboundTransaction {
            tx_id: tx_id.to_string(),
            payload,
            fragment_count,
            priority,
            created_at: self.clock.now(),
            retry_count: 0,
        })?;

        self.dirty.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Accept an opaque, already-signed transaction from the wallet layer and
    /// queue it under a freshly generated id. Returns the id used.
    pub async fn accept_externally_signed_transaction(
        &self,
        payload: Vec<u8>,
        priority: Priority,
    ) -> RelayResult<String> {
        let tx_id = Uuid::new_v4().to_string();
        self.push_outbound(&tx_id, payload, priority).await?;
        info!("accepted externally signed transaction as {}", tx_id);
        Ok(tx_id)
    }

    /// Queue a locally authored success confirmation for mesh propagation
    pub async fn queue_confirmation(&self, tx_id: &str, signature: &str) -> RelayResult<()> {
        self.ensure_initialized()?;
        let timestamp = unix_seconds(self.clock.now());
        let mut confirmations = self.confirmations.lock().await;
        confirmations.queue_success(tx_id, signature, timestamp)?;
        self.dirty.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Queue a locally authored failure confirmation
    pub async fn queue_failed_confirmation(&self, tx_id: &str, reason: &str) -> RelayResult<()> {
        self.ensure_initialized()?;
        let timestamp = unix_seconds(self.clock.now());
        let mut confirmations = self.confirmations.lock().await;
        confirmations.queue_failure(tx_id, reason, timestamp)?;
        self.dirty.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Take the next queued confirmation, FIFO
    pub async fn pop_confirmation(&self) -> RelayResult<Option<Confirmation>> {
        self.ensure_initialized()?;
        let mut confirmations = self.confirmations.lock().await;
        let popped = confirmations.pop();
        if popped.is_some() {
            self.dirty.store(true, Ordering::Relaxed);
        }
        Ok(popped)
    }

    /// Forward a confirmation authored elsewhere, incrementing its hop count
    pub async fn relay_confirmation(&self, confirmation: Confirmation) -> RelayResult<()> {
        self.ensure_initialized()?;
        let mut confirmations = self.confirmations.lock().await;
        confirmations.relay(confirmation)?;
        self.dirty.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Take the reassembled payload of a completed inbound transaction
    pub async fn take_inbound_payload(&self, tx_id: &str) -> RelayResult<Option<Vec<u8>>> {
        self.ensure_initialized()?;
        let mut payloads = self.inbound_payloads.lock().await;
        Ok(payloads.remove(tx_id))
    }

    /// Fragmentation cost report at the transport's current frame limit
    pub fn fragmentation_stats(&self, payload: &[u8]) -> RelayResult<FragmentationStats> {
        fragment::fragmentation_stats(payload, self.transport.max_frame_payload())
    }

    /// Current lifecycle phase of a transaction, if the engine is tracking it
    pub async fn transaction_phase(&self, tx_id: &str) -> Option<TransactionPhase> {
        if self.in_flight.contains_key(tx_id) {
            return Some(TransactionPhase::AwaitingConfirmation);
        }
        if self.outbound.lock().await.contains(tx_id) {
            return Some(TransactionPhase::Queued);
        }
        if self.retry.lock().await.contains(tx_id) {
            return Some(TransactionPhase::Retrying);
        }
        None
    }

    /// Advance the protocol one step. Returns the ids of transactions that
    /// completed during this invocation: inbound transactions whose final
    /// fragment arrived, and outbound transactions whose confirmation came
    /// back. Never blocks waiting on the network and only fails when the
    /// engine is not initialized.
    pub async fn tick(&self) -> RelayResult<Vec<String>> {
        self.ensure_initialized()?;
        let now = self.clock.now();
        let mut completed = Vec::new();

        // (a) bound memory held by reassemblies that will never finish
        {
            let mut reassembly = self.reassembly.lock().await;
            let expired = reassembly.cleanup_stale(self.config.reassembly_max_age, now);
            if expired > 0 {
                warn!("expired {} stale reassembly buffers", expired);
            }
        }

        // (b) transactions that never got a confirmation go back through retry
        self.expire_awaiting(now).await;

        // (c) overdue retries rejoin the outbound queue
        self.promote_ready_retries(now).await;

        // (d) send outbound transactions within the per-tick frame budget
        self.drain_outbound(now).await;

        // (e) drain inbound frames
        self.poll_inbound_frames(now, &mut completed).await;

        // (f) abandon retries past the terminal age
        {
            let mut retry = self.retry.lock().await;
            let dropped = retry.cleanup_expired(self.config.retry_max_age, now);
            if dropped > 0 {
                self.dirty.store(true, Ordering::Relaxed);
            }
        }

        // (g) debounced persistence
        self.autosave(now).await;

        Ok(completed)
    }

    /// Snapshot of queue depths and transport counters
    pub async fn metrics(&self) -> RelayMetrics {
        let outbound = self.outbound.lock().await;
        let retry = self.retry.lock().await;
        let confirmations = self.confirmations.lock().await;
        let reassembly = self.reassembly.lock().await;

        RelayMetrics {
            queues: QueueMetrics {
                outbound_size: outbound.len(),
                outbound_high_priority: outbound.high_count(),
                outbound_normal_priority: outbound.normal_count(),
                outbound_low_priority: outbound.low_count(),
                confirmation_size: confirmations.len(),
                retry_size: retry.len(),
                retry_avg_attempts: retry.avg_attempts(),
            },
            transport: TransportMetrics {
                fragments_buffered: reassembly.fragments_buffered(),
                partial_transactions: reassembly.partial_transactions(),
                transactions_completed: self.metrics.transactions_completed(),
                reassembly_failures: reassembly.failure_count(),
                frames_sent: self.metrics.frames_sent(),
                send_failures: self.metrics.send_failures(),
                retries_abandoned: retry.abandoned_count(),
                invalid_frames: self.metrics.invalid_frames(),
            },
        }
    }

    /// Serialize all queues and write them through the store
    pub async fn save_queues(&self) -> RelayResult<()> {
        let snapshot = {
            let outbound = self.outbound.lock().await;
            let retry = self.retry.lock().await;
            let confirmations = self.confirmations.lock().await;
            QueueSnapshot {
                version: QUEUE_FORMAT_VERSION,
                outbound: outbound.snapshot(),
                retry: retry.snapshot(),
                confirmations: confirmations.snapshot(),
            }
        };

        let data = serde_json::to_vec(&snapshot)?;
        self.store.store_data(QUEUE_STORAGE_KEY, &data).await?;

        self.dirty.store(false, Ordering::Relaxed);
        debug!("queue state persisted");
        Ok(())
    }

    async fn autosave(&self, now: SystemTime) {
        if !self.dirty.load(Ordering::Relaxed) {
            return;
        }
        {
            let last_save = self.last_save.lock().await;
            if let Ok(elapsed) = now.duration_since(*last_save) {
                if elapsed < self.config.autosave_interval {
                    return;
                }
            }
        }
        // Coalesce: only one flush in flight at a time
        if self.save_in_flight.swap(true, Ordering::SeqCst) {
            return;
        }

        // A failed save keeps the dirty flag set; the next pass retries it
        if let Err(e) = self.save_queues().await {
            warn!("queue autosave failed, will retry: {}", e);
        } else {
            let mut last_save = self.last_save.lock().await;
            *last_save = now;
        }
        self.save_in_flight.store(false, Ordering::SeqCst);
    }

    async fn expire_awaiting(&self, now: SystemTime) {
        let timeout = self.config.confirmation_timeout;
        let mut expired: Vec<(String, InFlightTransaction)> = Vec::new();

        self.in_flight.retain(|tx_id, tx| {
            match now.duration_since(tx.sent_at) {
                Ok(age) if age > timeout => {
                    expired.push((tx_id.clone(), tx.clone()));
                    false
                }
                _ => true,
            }
        });

        for (tx_id, tx) in expired {
            let fragment_count = fragment::fragment_count_for(
                tx.payload.len(),
                self.transport.max_frame_payload(),
            );
            self.route_failure(
                OutboundTransaction {
                    tx_id,
                    payload: tx.payload,
                    fragment_count,
                    priority: tx.priority,
                    created_at: tx.created_at,
                    retry_count: tx.retry_count,
                },
                "confirmation timeout",
                now,
            )
            .await;
        }
    }

    async fn promote_ready_retries(&self, now: SystemTime) {
        let mut outbound = self.outbound.lock().await;
        let mut retry = self.retry.lock().await;

        // Both locks held across the move: a transaction is never visible in
        // two queues at once and cannot vanish between them.
        while let Some(item) = retry.pop_ready(now) {
            let tx = OutboundTransaction {
                tx_id: item.tx_id.clone(),
                payload: item.payload.clone(),
                fragment_count: fragment::fragment_count_for(
                    item.payload.len(),
                    self.transport.max_frame_payload(),
                ),
                priority: item.priority,
                created_at: item.created_at,
                retry_count: item.attempt_count + 1,
            };

            debug!(
                "retrying transaction {} (attempt {})",
                tx.tx_id, tx.retry_count
            );

            if let Err(e) = outbound.push(tx) {
                warn!(
                    "could not promote retry of {}, keeping it queued: {}",
                    item.tx_id, e
                );
                retry.reinstate(item);
                break;
            }
            self.dirty.store(true, Ordering::Relaxed);
        }
    }

    async fn drain_outbound(&self, now: SystemTime) {
        let budget = self.config.max_frames_per_tick;
        let mut frames_sent = 0usize;

        while frames_sent < budget {
            let tx = {
                let mut outbound = self.outbound.lock().await;
                outbound.pop()
            };
            let mut tx = match tx {
                Some(tx) => tx,
                None => break,
            };
            self.dirty.store(true, Ordering::Relaxed);

            let fragments =
                match fragment::fragment(&tx.tx_id, &tx.payload, self.transport.max_frame_payload())
                {
                    Ok(fragments) => fragments,
                    Err(e) => {
                        warn!("fragmentation of {} failed: {}", tx.tx_id, e);
                        self.route_failure(tx, &e.to_string(), now).await;
                        continue;
                    }
                };

            // A transaction is sent whole. If it cannot fit the remaining
            // budget, defer it; a transaction larger than the entire budget
            // is still sent rather than starved.
            if frames_sent > 0 && frames_sent + fragments.len() > budget {
                let mut outbound = self.outbound.lock().await;
                outbound.requeue_front(tx);
                break;
            }

            tx.fragment_count = fragments.len() as u32;
            let mut send_error: Option<RelayError> = None;

            for frag in &fragments {
                let frame = match MeshFrame::Fragment(frag.clone()).encode() {
                    Ok(frame) => frame,
                    Err(e) => {
                        send_error = Some(e);
                        break;
                    }
                };
                match self.transport.send_frame(&frame).await {
                    Ok(()) => {
                        frames_sent += 1;
                        self.metrics.record_frames_sent(1);
                    }
                    Err(e) => {
                        self.metrics.record_send_failure();
                        send_error = Some(e);
                        break;
                    }
                }
            }

            match send_error {
                Some(e) => {
                    self.route_failure(tx, &e.to_string(), now).await;
                }
                None => {
                    debug!(
                        "transaction {} sent in {} frames, awaiting confirmation",
                        tx.tx_id, tx.fragment_count
                    );
                    self.in_flight.insert(
                        tx.tx_id.clone(),
                        InFlightTransaction {
                            payload: tx.payload,
                            priority: tx.priority,
                            retry_count: tx.retry_count,
                            created_at: tx.created_at,
                            sent_at: now,
                        },
                    );
                }
            }
        }
    }

    async fn poll_inbound_frames(&self, now: SystemTime, completed: &mut Vec<String>) {
        for _ in 0..self.config.max_inbound_per_tick {
            let raw = match self.transport.poll_inbound().await {
                Some(raw) => raw,
                None => break,
            };

            match MeshFrame::decode(&raw) {
                Err(e) => {
                    self.metrics.record_invalid_frame();
                    warn!("dropping undecodable frame: {}", e);
                }
                Ok(MeshFrame::Fragment(frag)) => {
                    let tx_id = frag.id.clone();
                    let outcome = {
                        let mut reassembly = self.reassembly.lock().await;
                        reassembly.on_fragment(frag, now)
                    };
                    match outcome {
                        ReassemblyOutcome::Complete(payload) => {
                            let mut payloads = self.inbound_payloads.lock().await;
                            payloads.insert(tx_id.clone(), payload);
                            drop(payloads);
                            self.metrics.record_transaction_completed();
                            completed.push(tx_id);
                        }
                        ReassemblyOutcome::Rejected(reason) => {
                            warn!("fragment for {} rejected: {}", tx_id, reason);
                        }
                        ReassemblyOutcome::DuplicateIgnored
                        | ReassemblyOutcome::Incomplete { .. } => {}
                    }
                }
                Ok(MeshFrame::Confirmation(confirmation)) => {
                    self.handle_inbound_confirmation(confirmation, completed)
                        .await;
                }
            }
        }
    }

    async fn handle_inbound_confirmation(
        &self,
        confirmation: Confirmation,
        completed: &mut Vec<String>,
    ) {
        if let Some((tx_id, _)) = self.in_flight.remove(&confirmation.tx_id) {
            info!("transaction {} confirmed by the mesh", tx_id);
            self.metrics.record_transaction_completed();
            completed.push(tx_id);

            let mut confirmations = self.confirmations.lock().await;
            if let Err(e) = confirmations.push(confirmation) {
                warn!("could not queue received confirmation: {}", e);
            }
            self.dirty.store(true, Ordering::Relaxed);
        } else {
            debug!(
                "relaying confirmation for {} (hop {})",
                confirmation.tx_id,
                confirmation.relay_count + 1
            );
            let mut confirmations = self.confirmations.lock().await;
            if let Err(e) = confirmations.relay(confirmation) {
                warn!("could not relay confirmation: {}", e);
            }
            self.dirty.store(true, Ordering::Relaxed);
        }
    }

    /// Route a failed transmission: back through the retry queue while the
    /// retry budget lasts, otherwise abandoned with a failure confirmation
    /// queued so the outcome is observable.
    async fn route_failure(&self, tx: OutboundTransaction, cause: &str, now: SystemTime) {
        if tx.retry_count >= self.config.retry.max_attempts {
            error!(
                "abandoning transaction {} after {} attempts: {}",
                tx.tx_id,
                tx.retry_count + 1,
                cause
            );
            let reason = format!(
                "abandoned after {} attempts: {}",
                tx.retry_count + 1,
                cause
            );
            {
                let mut retry = self.retry.lock().await;
                retry.note_abandoned();
            }
            let timestamp = unix_seconds(now);
            let mut confirmations = self.confirmations.lock().await;
            if let Err(e) = confirmations.queue_failure(&tx.tx_id, &reason, timestamp) {
                warn!("could not queue abandonment confirmation: {}", e);
            }
        } else {
            let mut retry = self.retry.lock().await;
            retry.add(tx, cause, now);
        }
        self.dirty.store(true, Ordering::Relaxed);
    }
}
