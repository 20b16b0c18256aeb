//! `rimco-middleware` – channel plumbing between the robot bus and viewers.
//!
//! Routes messages from the upstream transport into the bridge and frames
//! from the bridge out to viewers, without caring about their meaning.
//!
//! # Modules
//!
//! - [`source`] – the [`ChannelSource`] seam plus an in-process
//!   [`MemorySource`].
//! - [`subscription`] – reference-counted [`SubscriptionManager`].
//! - [`fanout`] – fire-and-forget [`BroadcastFanout`] to live viewers.
//! - [`rosbridge`] – [`RosbridgeSource`], a rosbridge v2 WebSocket client.

pub mod fanout;
pub mod rosbridge;
pub mod source;
pub mod subscription;

pub use fanout::{BroadcastFanout, DEFAULT_CAPACITY, Frame, ViewerConnection, ViewerId};
pub use rosbridge::RosbridgeSource;
pub use source::{ChannelSource, InboundMessage, MemorySource, MessageSink, SubscriptionHandle};
pub use subscription::SubscriptionManager;
