//! [`Bridge`] – the single-consumer event loop that owns all bridge state.
//!
//! Every mutation of the subscription registry, snapshot cache, track
//! states, diagnostics cache and viewer set happens inside [`Bridge::run`],
//! one event at a time:
//!
//! | Event source | Handling |
//! |---|---|
//! | inbound channel message | decode by declared type, then cache + broadcast, track projection, or diagnostics |
//! | [`BridgeHandle`] command | viewer connect/disconnect, value-channel set changes, snapshot reads, shutdown |
//! | flush timer | write the snapshot cache if it is dirty |
//!
//! Because a handler runs to completion before the next event is taken, a
//! viewer's bootstrap snapshot can never observe a half-applied update.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn demo(source: std::sync::Arc<dyn rimco_middleware::ChannelSource>) {
//! use rimco_memory::SnapshotCache;
//! use rimco_perception::TrackProjector;
//! use rimco_runtime::bridge::{Bridge, BridgeOptions};
//! use rimco_runtime::diagnostics::DiagnosticsMonitor;
//!
//! let cache = SnapshotCache::load("data/last.json").await;
//! let tracks = TrackProjector::new(Default::default(), "data", "2025-06-01_13", 10 << 20);
//! let monitor = DiagnosticsMonitor::new("data", 5 << 20);
//! let (bridge, handle) = Bridge::new(source, cache, tracks, monitor, BridgeOptions::default());
//! tokio::spawn(bridge.run());
//! let viewer = handle.connect().await;
//! # }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rimco_memory::SnapshotCache;
use rimco_middleware::{
    BroadcastFanout, ChannelSource, DEFAULT_CAPACITY, InboundMessage, SubscriptionManager,
    ViewerConnection, ViewerId,
};
use rimco_perception::TrackProjector;
use rimco_types::{Channel, ChannelValue, RimcoError, Snapshot, ViewerEvent};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::diagnostics::DiagnosticsMonitor;

/// Inbound messages buffered between the transport and the loop.
const INBOUND_BUFFER: usize = 1024;
const COMMAND_BUFFER: usize = 64;

// ─────────────────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────────────────

pub struct BridgeOptions {
    /// Period of the debounced snapshot flush.
    pub flush_interval: Duration,
    /// Channel carrying `DiagnosticStatus` messages.
    pub monitoring_channel: String,
    /// Opaque settings forwarded to viewers in the snapshot.
    pub settings: Value,
    /// Initial value channels, name → message type.
    pub channels: BTreeMap<String, String>,
    /// Where the desired value-channel set is persisted, if anywhere.
    pub topics_path: Option<PathBuf>,
    /// Per-viewer queue capacity.
    pub viewer_capacity: usize,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(5),
            monitoring_channel: "/monitoring".into(),
            settings: serde_json::json!({ "stale_ttl_ms": 10_000 }),
            channels: BTreeMap::new(),
            topics_path: None,
            viewer_capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Message type used for the diagnostics channel.
pub const DIAGNOSTIC_MESSAGE_TYPE: &str = "diagnostic_msgs/msg/DiagnosticStatus";

/// Read a persisted value-channel set.  Missing or corrupt files yield an
/// empty map.
pub async fn load_topics(path: &Path) -> BTreeMap<String, String> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "ignoring corrupt topic list");
            BTreeMap::new()
        }),
        Err(_) => BTreeMap::new(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handle
// ─────────────────────────────────────────────────────────────────────────────

enum Command {
    Connect {
        reply: oneshot::Sender<Result<ViewerConnection, RimcoError>>,
    },
    Disconnect(ViewerId),
    SetTopics {
        desired: BTreeMap<String, String>,
        reply: oneshot::Sender<Vec<String>>,
    },
    Snapshot {
        reply: oneshot::Sender<Snapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable front door to a running [`Bridge`].
#[derive(Clone)]
pub struct BridgeHandle {
    commands: mpsc::Sender<Command>,
}

fn stopped() -> RimcoError {
    RimcoError::Transport("bridge event loop stopped".into())
}

impl BridgeHandle {
    /// Register a viewer.  Its first frame is the current snapshot.
    pub async fn connect(&self) -> Result<ViewerConnection, RimcoError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Connect { reply }).await?;
        rx.await.map_err(|_| stopped())?
    }

    pub async fn disconnect(&self, id: ViewerId) {
        let _ = self.commands.send(Command::Disconnect(id)).await;
    }

    /// Replace the declared value-channel set with `desired`
    /// (name → message type).  Returns every channel that now has an
    /// underlying subscription, sorted.
    pub async fn set_topics(&self, desired: BTreeMap<String, String>) -> Result<Vec<String>, RimcoError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SetTopics { desired, reply }).await?;
        rx.await.map_err(|_| stopped())
    }

    pub async fn snapshot(&self) -> Result<Snapshot, RimcoError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply }).await?;
        rx.await.map_err(|_| stopped())
    }

    /// Stop the loop after a final flush.  Resolves once the flush is done.
    pub async fn shutdown(&self) -> Result<(), RimcoError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown { reply }).await?;
        rx.await.map_err(|_| stopped())
    }

    async fn send(&self, command: Command) -> Result<(), RimcoError> {
        self.commands.send(command).await.map_err(|_| stopped())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bridge
// ─────────────────────────────────────────────────────────────────────────────

pub struct Bridge {
    subscriptions: SubscriptionManager,
    inbound: mpsc::Receiver<InboundMessage>,
    commands: mpsc::Receiver<Command>,
    cache: SnapshotCache,
    tracks: TrackProjector,
    monitor: DiagnosticsMonitor,
    fanout: BroadcastFanout,
    /// Declared value channels, name → message type.
    values: BTreeMap<String, String>,
    options: BridgeOptions,
}

impl Bridge {
    pub fn new(
        source: Arc<dyn ChannelSource>,
        cache: SnapshotCache,
        tracks: TrackProjector,
        monitor: DiagnosticsMonitor,
        options: BridgeOptions,
    ) -> (Self, BridgeHandle) {
        let (inbound_tx, inbound) = mpsc::channel(INBOUND_BUFFER);
        let (commands_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let bridge = Self {
            subscriptions: SubscriptionManager::new(source, inbound_tx),
            inbound,
            commands,
            cache,
            tracks,
            monitor,
            fanout: BroadcastFanout::new(options.viewer_capacity),
            values: BTreeMap::new(),
            options,
        };
        (bridge, BridgeHandle { commands: commands_tx })
    }

    /// Subscribe the static channels, then process events until shutdown or
    /// until every handle is dropped.
    pub async fn run(mut self) {
        self.subscribe_static().await;

        let mut flush = tokio::time::interval(self.options.flush_interval);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        flush.tick().await;

        let mut shutdown_reply = None;
        loop {
            tokio::select! {
                Some(message) = self.inbound.recv() => self.dispatch(message).await,
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        shutdown_reply = Some(reply);
                        break;
                    }
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                _ = flush.tick() => self.flush_snapshot().await,
            }
        }

        info!("bridge shutting down");
        self.flush_snapshot().await;
        self.tracks.flush_logs().await;
        self.monitor.flush().await;
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    async fn subscribe_static(&mut self) {
        let monitoring = Channel::new(&self.options.monitoring_channel, DIAGNOSTIC_MESSAGE_TYPE);
        let mut statics = vec![monitoring];
        statics.extend(self.tracks.channels());
        for channel in statics {
            let name = channel.name.clone();
            if let Err(e) = self.subscriptions.ensure(channel).await {
                warn!(channel = %name, error = %e, "static channel not subscribed");
            }
        }

        let initial = std::mem::take(&mut self.options.channels);
        self.apply_topics(initial).await;
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Connect { reply } => {
                let snapshot = self.snapshot();
                let _ = reply.send(self.fanout.connect(snapshot));
            }
            Command::Disconnect(id) => {
                self.fanout.disconnect(id);
            }
            Command::SetTopics { desired, reply } => {
                self.apply_topics(desired).await;
                self.persist_topics().await;
                let _ = reply.send(self.subscriptions.channels());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            values: self.cache.snapshot(),
            monitoring: self.monitor.snapshot(),
            tracks: self.tracks.states(),
            settings: self.options.settings.clone(),
        }
    }

    /// Diff `desired` against the declared value channels.
    async fn apply_topics(&mut self, desired: BTreeMap<String, String>) {
        let stale: Vec<String> = self
            .values
            .iter()
            .filter(|(name, ty)| desired.get(*name) != Some(*ty))
            .map(|(name, _)| name.clone())
            .collect();
        for name in stale {
            self.values.remove(&name);
            if let Err(e) = self.subscriptions.drop_channel(&name).await {
                warn!(channel = %name, error = %e, "unsubscribe failed");
            }
        }

        for (name, message_type) in desired {
            if self.values.contains_key(&name) {
                continue;
            }
            match self.subscriptions.ensure(Channel::new(&name, &message_type)).await {
                Ok(_) => {
                    self.values.insert(name, message_type);
                }
                Err(e) => warn!(channel = %name, error = %e, "value channel rejected"),
            }
        }
    }

    async fn persist_topics(&self) {
        let Some(path) = &self.options.topics_path else {
            return;
        };
        let result = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let bytes = serde_json::to_vec_pretty(&self.values)?;
            tokio::fs::write(path, bytes).await?;
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(())
        }
        .await;
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "topic list not persisted");
        }
    }

    async fn dispatch(&mut self, message: InboundMessage) {
        let Some(kind) = self.subscriptions.channel(&message.channel).and_then(Channel::kind) else {
            debug!(channel = %message.channel, "message on undeclared channel dropped");
            return;
        };
        let value = match ChannelValue::decode(kind, &message.channel, &message.payload) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "malformed message dropped");
                return;
            }
        };

        if message.channel == self.options.monitoring_channel {
            if let ChannelValue::Diagnostic(status) = &value {
                let event = self.monitor.observe(status, message.received_ms).await;
                self.fanout.broadcast(&event);
            }
        }

        if self.values.contains_key(&message.channel) {
            self.cache.update(&message.channel, value.clone(), message.received_ms);
            self.fanout.broadcast(&ViewerEvent::Value {
                topic: message.channel.clone(),
                data: value.clone(),
            });
        }

        if self.tracks.routes(&message.channel) {
            for (name, data) in self.tracks.on_message(&message.channel, &value).await {
                self.fanout.broadcast(&ViewerEvent::Track { name, data });
            }
        }
    }

    async fn flush_snapshot(&mut self) {
        match self.cache.flush().await {
            Ok(true) => debug!(channels = self.cache.len(), "snapshot flushed"),
            Ok(false) => {}
            Err(e) => warn!(path = %self.cache.path().display(), error = %e, "snapshot flush failed"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
