//! Reference-counted channel subscriptions.
//!
//! Viewers and tracks declare overlapping data needs independently.  The
//! [`SubscriptionManager`] keeps exactly one underlying
//! [`ChannelSource`] subscription per channel name, no matter how many
//! logical consumers asked for it, and releases it when the last one goes
//! away.
//!
//! All methods take `&mut self`: the manager is owned by the bridge event
//! loop, so two `ensure` calls for the same channel can never race each
//! other into a duplicate subscription.

use std::collections::HashMap;
use std::sync::Arc;

use rimco_types::{Channel, RimcoError};
use tracing::{debug, info, warn};

use crate::source::{ChannelSource, MessageSink, SubscriptionHandle};

struct Subscription {
    channel: Channel,
    refcount: usize,
    handle: SubscriptionHandle,
}

pub struct SubscriptionManager {
    source: Arc<dyn ChannelSource>,
    sink: MessageSink,
    registry: HashMap<String, Subscription>,
}

impl SubscriptionManager {
    /// Create a manager that subscribes through `source` and routes every
    /// message into `sink`.
    pub fn new(source: Arc<dyn ChannelSource>, sink: MessageSink) -> Self {
        Self {
            source,
            sink,
            registry: HashMap::new(),
        }
    }

    /// Add one logical subscriber to `channel`.
    ///
    /// The first call for a name creates the underlying subscription; later
    /// calls only bump the refcount (the message type given then is
    /// ignored).  Returns the new refcount.
    ///
    /// # Errors
    ///
    /// [`RimcoError::UnsupportedType`] when the type has no decoder, or the
    /// source's error when the underlying subscribe fails.  The registry is
    /// unchanged in both cases.
    pub async fn ensure(&mut self, channel: Channel) -> Result<usize, RimcoError> {
        if let Some(sub) = self.registry.get_mut(&channel.name) {
            sub.refcount += 1;
            debug!(channel = %channel.name, refcount = sub.refcount, "subscription shared");
            return Ok(sub.refcount);
        }

        if channel.kind().is_none() {
            return Err(RimcoError::UnsupportedType(channel.message_type));
        }

        let handle = self.source.subscribe(&channel, self.sink.clone()).await?;
        info!(channel = %channel.name, r#type = %channel.message_type, "subscribed");
        self.registry.insert(
            channel.name.clone(),
            Subscription {
                channel,
                refcount: 1,
                handle,
            },
        );
        Ok(1)
    }

    /// Remove one logical subscriber from `name`.
    ///
    /// When the refcount reaches zero the underlying subscription is
    /// released and the entry removed, even if the source reports an error
    /// while unsubscribing.  Dropping an unknown channel is logged and
    /// returns `Ok(0)`.
    pub async fn drop_channel(&mut self, name: &str) -> Result<usize, RimcoError> {
        let Some(sub) = self.registry.get_mut(name) else {
            warn!(channel = %name, "drop on unknown channel ignored");
            return Ok(0);
        };

        sub.refcount -= 1;
        if sub.refcount > 0 {
            debug!(channel = %name, refcount = sub.refcount, "subscription released by one consumer");
            return Ok(sub.refcount);
        }

        if let Some(sub) = self.registry.remove(name) {
            info!(channel = %name, "unsubscribed");
            self.source.unsubscribe(sub.handle).await?;
        }
        Ok(0)
    }

    /// Current refcount of `name` (0 when absent).
    pub fn refcount(&self, name: &str) -> usize {
        self.registry.get(name).map_or(0, |s| s.refcount)
    }

    /// The channel registered under `name`.
    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.registry.get(name).map(|s| &s.channel)
    }

    /// Names of every channel with a live subscription, sorted.
    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.keys().cloned().collect();
        names.sort();
        names
    }
}
