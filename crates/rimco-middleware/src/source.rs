//! The channel source seam.
//!
//! The bridge never speaks to the upstream pub/sub transport directly.  It
//! asks a [`ChannelSource`] for a subscription and hands it a
//! [`MessageSink`]; the source pushes every message it receives for that
//! channel into the sink, in arrival order.
//!
//! - [`RosbridgeSource`][crate::rosbridge::RosbridgeSource] – rosbridge v2
//!   over a WebSocket.
//! - [`MemorySource`] – in-process source; messages are injected by the
//!   caller.  Used by tests and offline replays.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use rimco_types::{Channel, RimcoError, now_ms};
use serde_json::Value;
use tokio::sync::mpsc;

/// A raw message delivered by a [`ChannelSource`].
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel: String,
    pub payload: Value,
    pub received_ms: i64,
}

impl InboundMessage {
    pub fn new(channel: impl Into<String>, payload: Value) -> Self {
        Self {
            channel: channel.into(),
            payload,
            received_ms: now_ms(),
        }
    }
}

/// Where a source delivers messages.  Bounded, so a slow consumer applies
/// backpressure to the transport reader instead of growing without limit.
pub type MessageSink = mpsc::Sender<InboundMessage>;

/// Opaque token identifying one underlying subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

/// Every upstream transport must implement this trait.
///
/// # Contract
///
/// * `subscribe` – start delivering messages for `channel` into `sink`.
///   Calling it twice for the same channel yields two independent handles;
///   deduplication is the caller's job (see
///   [`SubscriptionManager`][crate::subscription::SubscriptionManager]).
/// * `unsubscribe` – stop delivery for `handle`.  Unknown handles are a
///   no-op.
#[async_trait]
pub trait ChannelSource: Send + Sync {
    async fn subscribe(
        &self,
        channel: &Channel,
        sink: MessageSink,
    ) -> Result<SubscriptionHandle, RimcoError>;

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), RimcoError>;
}

// ---------------------------------------------------------------------------
// In-process source
// ---------------------------------------------------------------------------

/// A [`ChannelSource`] fed by [`MemorySource::inject`].
#[derive(Default)]
pub struct MemorySource {
    next_id: AtomicU64,
    subscriptions: Mutex<HashMap<u64, (Channel, MessageSink)>>,
    subscribe_calls: AtomicU64,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `payload` to every live subscription on `channel`.
    ///
    /// Returns the number of subscriptions the message was handed to.
    pub async fn inject(&self, channel: &str, payload: Value) -> usize {
        let sinks: Vec<MessageSink> = self
            .lock()
            .values()
            .filter(|(c, _)| c.name == channel)
            .map(|(_, sink)| sink.clone())
            .collect();

        let mut delivered = 0;
        for sink in sinks {
            if sink.send(InboundMessage::new(channel, payload.clone())).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Number of live subscriptions on `channel`.
    pub fn active(&self, channel: &str) -> usize {
        self.lock().values().filter(|(c, _)| c.name == channel).count()
    }

    /// Total number of `subscribe` calls served so far.
    pub fn subscribe_calls(&self) -> u64 {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, (Channel, MessageSink)>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ChannelSource for MemorySource {
    async fn subscribe(
        &self,
        channel: &Channel,
        sink: MessageSink,
    ) -> Result<SubscriptionHandle, RimcoError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.lock().insert(id, (channel.clone(), sink));
        Ok(SubscriptionHandle(id))
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), RimcoError> {
        self.lock().remove(&handle.0);
        Ok(())
    }
}
