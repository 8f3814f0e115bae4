//! Broadcaster and Connection Registry
//!
//! Fans published snapshots out to every live push subscription.
//!
//! # Architecture
//!
//! Each subscription owns a bounded `mpsc` queue. `publish` serializes the
//! snapshot once into a `SnapshotFrame` and `try_send`s it to every queue
//! while holding the registry lock, so a stalled client can never block
//! the scheduler or other clients:
//!
//! - closed queue: the subscriber is removed (lazy discovery)
//! - full queue: the subscriber is removed or the frame is skipped,
//!   depending on `SlowConsumerPolicy`
//!
//! Dropping a `Subscription` unregisters it immediately.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::domain::snapshot::Snapshot;
use crate::infrastructure::config::{BroadcastSettings, SlowConsumerPolicy};
use crate::infrastructure::metrics::{self, EvictionReason};

// =============================================================================
// Frames and Identifiers
// =============================================================================

/// A snapshot serialized once for delivery to every subscriber.
#[derive(Debug, Clone)]
pub struct SnapshotFrame {
    /// Round that produced the snapshot.
    pub round_id: u64,
    /// JSON push payload.
    pub payload: Arc<str>,
}

/// Opaque per-connection subscription handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Broadcast error.
#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    /// Snapshot could not be serialized.
    #[error("Failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}

// =============================================================================
// Configuration
// =============================================================================

/// Broadcaster behaviour.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Bounded queue length per subscriber.
    pub queue_capacity: usize,
    /// Behaviour when a subscriber's queue is full.
    pub slow_consumer_policy: SlowConsumerPolicy,
    /// Prime new subscribers with the last published frame.
    pub replay_last_on_connect: bool,
    /// Include intraday history in push payloads.
    pub include_history: bool,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 16,
            slow_consumer_policy: SlowConsumerPolicy::Disconnect,
            replay_last_on_connect: true,
            include_history: false,
        }
    }
}

impl From<BroadcastSettings> for BroadcastConfig {
    fn from(settings: BroadcastSettings) -> Self {
        Self {
            queue_capacity: settings.queue_capacity,
            slow_consumer_policy: settings.slow_consumer_policy,
            replay_last_on_connect: settings.replay_last_on_connect,
            include_history: settings.include_history,
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Debug, Default)]
struct RegistryState {
    subscribers: HashMap<SubscriptionId, mpsc::Sender<SnapshotFrame>>,
    last_frame: Option<SnapshotFrame>,
}

#[derive(Debug, Default)]
struct Registry {
    state: RwLock<RegistryState>,
}

impl Registry {
    fn remove(&self, id: SubscriptionId) -> bool {
        let mut state = self.state.write();
        let removed = state.subscribers.remove(&id).is_some();
        let remaining = state.subscribers.len();
        if removed {
            metrics::set_subscribers(remaining);
        }
        drop(state);

        if removed {
            tracing::debug!(subscription_id = %id, subscribers = remaining, "Subscription unregistered");
        }
        removed
    }
}

#[derive(Debug, Default)]
struct Counters {
    frames_published: AtomicU64,
    frames_delivered: AtomicU64,
    frames_dropped: AtomicU64,
    subscribers_evicted: AtomicU64,
}

// =============================================================================
// Broadcaster
// =============================================================================

/// Outcome of one `publish` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers the frame was queued to.
    pub delivered: usize,
    /// Subscribers that skipped the frame (full queue, drop policy).
    pub dropped: usize,
    /// Subscribers removed during this publish.
    pub evicted: usize,
}

/// Statistics about the broadcaster.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct BroadcastStats {
    /// Currently registered subscribers.
    pub subscribers: usize,
    /// Frames published since startup.
    pub frames_published: u64,
    /// Frames queued to subscribers since startup.
    pub frames_delivered: u64,
    /// Frames skipped for full queues since startup.
    pub frames_dropped: u64,
    /// Subscribers removed by the broadcaster since startup.
    pub subscribers_evicted: u64,
}

/// Connection registry and snapshot fan-out.
#[derive(Debug)]
pub struct Broadcaster {
    registry: Arc<Registry>,
    config: BroadcastConfig,
    counters: Counters,
}

/// Shared broadcaster reference.
pub type SharedBroadcaster = Arc<Broadcaster>;

impl Broadcaster {
    /// Create a broadcaster with the given configuration.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            registry: Arc::new(Registry::default()),
            config,
            counters: Counters::default(),
        }
    }

    /// Create a broadcaster with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BroadcastConfig::default())
    }

    /// Broadcaster configuration.
    #[must_use]
    pub const fn config(&self) -> &BroadcastConfig {
        &self.config
    }

    /// Register a new subscription.
    ///
    /// With replay enabled the subscription is primed with the last
    /// published frame before it becomes visible to `publish`.
    #[must_use]
    pub fn register(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let id = SubscriptionId::new();

        let mut state = self.registry.state.write();
        if self.config.replay_last_on_connect
            && let Some(frame) = state.last_frame.clone()
        {
            // Fresh queue with capacity >= 1 cannot be full.
            let _ = tx.try_send(frame);
        }
        state.subscribers.insert(id, tx);
        let count = state.subscribers.len();
        metrics::set_subscribers(count);
        drop(state);

        tracing::debug!(subscription_id = %id, subscribers = count, "Subscription registered");

        Subscription {
            id,
            receiver: rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Remove a subscription. Idempotent; returns whether it was present.
    pub fn unregister(&self, id: SubscriptionId) -> bool {
        self.registry.remove(id)
    }

    /// Serialize `snapshot` and deliver it to every registered subscriber.
    ///
    /// # Errors
    ///
    /// Returns `BroadcastError::Serialize` if the payload cannot be encoded;
    /// nothing is delivered in that case.
    pub fn publish(&self, snapshot: &Snapshot) -> Result<PublishReport, BroadcastError> {
        let frame = self.encode(snapshot)?;
        Ok(self.publish_frame(frame))
    }

    /// Serialize `snapshot` into a frame using this broadcaster's payload
    /// settings, without delivering it.
    ///
    /// # Errors
    ///
    /// Returns `BroadcastError::Serialize` if the payload cannot be encoded.
    pub fn encode(&self, snapshot: &Snapshot) -> Result<SnapshotFrame, BroadcastError> {
        let payload = snapshot.to_push_json(self.config.include_history)?;
        Ok(SnapshotFrame {
            round_id: snapshot.round_id(),
            payload: Arc::from(payload),
        })
    }

    /// Deliver an already encoded frame to every registered subscriber and
    /// remember it for replay.
    pub fn publish_frame(&self, frame: SnapshotFrame) -> PublishReport {
        let mut report = PublishReport::default();
        let mut evicted = Vec::new();

        let mut state = self.registry.state.write();
        for (id, tx) in &state.subscribers {
            match tx.try_send(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => match self.config.slow_consumer_policy {
                    SlowConsumerPolicy::DropFrame => report.dropped += 1,
                    SlowConsumerPolicy::Disconnect => evicted.push((*id, EvictionReason::Slow)),
                },
                Err(TrySendError::Closed(_)) => evicted.push((*id, EvictionReason::Closed)),
            }
        }
        for (id, _) in &evicted {
            state.subscribers.remove(id);
        }
        let round_id = frame.round_id;
        state.last_frame = Some(frame);
        let remaining = state.subscribers.len();
        metrics::set_subscribers(remaining);
        drop(state);

        for (id, reason) in &evicted {
            metrics::record_eviction(*reason);
            tracing::debug!(
                subscription_id = %id,
                reason = reason.as_str(),
                "Subscriber evicted during publish"
            );
        }
        report.evicted = evicted.len();

        let delivered = report.delivered as u64;
        let dropped = report.dropped as u64;
        self.counters.frames_published.fetch_add(1, Ordering::Relaxed);
        self.counters
            .frames_delivered
            .fetch_add(delivered, Ordering::Relaxed);
        self.counters
            .frames_dropped
            .fetch_add(dropped, Ordering::Relaxed);
        self.counters
            .subscribers_evicted
            .fetch_add(evicted.len() as u64, Ordering::Relaxed);
        metrics::record_frames_delivered(delivered);
        metrics::record_frames_dropped(dropped);

        tracing::debug!(
            round_id,
            delivered = report.delivered,
            dropped = report.dropped,
            evicted = report.evicted,
            "Snapshot published"
        );
        report
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.registry.state.read().subscribers.len()
    }

    /// Whether `id` is currently registered.
    #[must_use]
    pub fn is_registered(&self, id: SubscriptionId) -> bool {
        self.registry.state.read().subscribers.contains_key(&id)
    }

    /// Most recently published frame.
    #[must_use]
    pub fn last_frame(&self) -> Option<SnapshotFrame> {
        self.registry.state.read().last_frame.clone()
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            subscribers: self.subscriber_count(),
            frames_published: self.counters.frames_published.load(Ordering::Relaxed),
            frames_delivered: self.counters.frames_delivered.load(Ordering::Relaxed),
            frames_dropped: self.counters.frames_dropped.load(Ordering::Relaxed),
            subscribers_evicted: self.counters.subscribers_evicted.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// One connection's registration for push delivery.
///
/// Owned by exactly one connection task. Yields frames until the
/// broadcaster evicts it or is dropped; dropping it unregisters.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    receiver: mpsc::Receiver<SnapshotFrame>,
    registry: Weak<Registry>,
}

impl Subscription {
    /// Subscription id.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next frame. `None` once the subscription was evicted
    /// and its queue drained.
    pub async fn recv(&mut self) -> Option<SnapshotFrame> {
        self.receiver.recv().await
    }
}

impl Stream for Subscription {
    type Item = SnapshotFrame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
