//! rosbridge v2 client implementing [`ChannelSource`].
//!
//! [`RosbridgeSource`] keeps one WebSocket to a `rosbridge_server` and
//! multiplexes every subscription over it:
//!
//! * **Outbound** – `{"op":"subscribe","id","topic","type"}` and
//!   `{"op":"unsubscribe","id","topic"}` frames.
//! * **Inbound** – `{"op":"publish","topic","msg"}` frames are turned into
//!   [`InboundMessage`] values and pushed into the sink of every
//!   subscription on that topic, in arrival order.
//!
//! Connection loss is logged and the client reconnects after a fixed delay,
//! replaying every live subscription.  It is never fatal to the bridge.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rimco_types::{Channel, RimcoError};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::source::{ChannelSource, InboundMessage, MessageSink, SubscriptionHandle};

/// Delay between reconnection attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

enum Command {
    Subscribe {
        id: u64,
        channel: Channel,
        sink: MessageSink,
    },
    Unsubscribe {
        id: u64,
    },
}

/// Handle to the background rosbridge connection task.
pub struct RosbridgeSource {
    commands: mpsc::UnboundedSender<Command>,
    next_id: AtomicU64,
}

impl RosbridgeSource {
    /// Spawn the connection task for `url` (e.g. `"ws://localhost:9090"`).
    ///
    /// Must be called from within a Tokio runtime.  Returns immediately; the
    /// first connection attempt happens in the background.
    pub fn connect(url: impl Into<String>, reconnect_delay: Duration) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(url.into(), rx, reconnect_delay));
        Self {
            commands,
            next_id: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl ChannelSource for RosbridgeSource {
    async fn subscribe(
        &self,
        channel: &Channel,
        sink: MessageSink,
    ) -> Result<SubscriptionHandle, RimcoError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.commands
            .send(Command::Subscribe {
                id,
                channel: channel.clone(),
                sink,
            })
            .map_err(|_| RimcoError::Transport("rosbridge task has stopped".into()))?;
        Ok(SubscriptionHandle(id))
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), RimcoError> {
        self.commands
            .send(Command::Unsubscribe { id: handle.0 })
            .map_err(|_| RimcoError::Transport("rosbridge task has stopped".into()))
    }
}

// ---------------------------------------------------------------------------
// Connection task
// ---------------------------------------------------------------------------

type Registry = HashMap<u64, (Channel, MessageSink)>;

async fn run(url: String, mut commands: mpsc::UnboundedReceiver<Command>, delay: Duration) {
    let mut registry: Registry = HashMap::new();

    loop {
        match connect_async(url.as_str()).await {
            Ok((ws_stream, _)) => {
                info!(url = %url, "rosbridge connected");
                // Commands queued while disconnected only update the registry;
                // the replay below sends them.
                while let Ok(cmd) = commands.try_recv() {
                    apply(&mut registry, cmd);
                }

                let (mut ws_tx, mut ws_rx) = ws_stream.split();
                let mut replay_failed = false;
                for (id, (channel, _)) in &registry {
                    let frame = subscribe_frame(*id, channel);
                    if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                        replay_failed = true;
                        break;
                    }
                }

                if !replay_failed {
                    loop {
                        tokio::select! {
                            cmd = commands.recv() => {
                                let Some(cmd) = cmd else {
                                    debug!("rosbridge source dropped, closing connection");
                                    let _ = ws_tx.close().await;
                                    return;
                                };
                                let frame = match &cmd {
                                    Command::Subscribe { id, channel, .. } => Some(subscribe_frame(*id, channel)),
                                    Command::Unsubscribe { id } => registry
                                        .get(id)
                                        .map(|(channel, _)| unsubscribe_frame(*id, &channel.name)),
                                };
                                apply(&mut registry, cmd);
                                if let Some(frame) = frame {
                                    if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            msg = ws_rx.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        dispatch(&registry, text.as_str()).await;
                                    }
                                    Some(Ok(Message::Close(_))) | None => break,
                                    Some(Err(e)) => {
                                        warn!(error = %e, "rosbridge read error");
                                        break;
                                    }
                                    _ => {}
                                }
                            }
                        }
                    }
                }
                warn!(url = %url, "rosbridge connection lost; reconnecting");
            }
            Err(e) => {
                warn!(url = %url, error = %e, "rosbridge not reachable; retrying");
            }
        }

        if commands.is_closed() && commands.is_empty() {
            return;
        }
        tokio::time::sleep(delay).await;
    }
}

fn apply(registry: &mut Registry, cmd: Command) {
    match cmd {
        Command::Subscribe { id, channel, sink } => {
            registry.insert(id, (channel, sink));
        }
        Command::Unsubscribe { id } => {
            registry.remove(&id);
        }
    }
}

async fn dispatch(registry: &Registry, text: &str) {
    let Some((topic, msg)) = parse_publish(text) else {
        return;
    };
    for (channel, sink) in registry.values() {
        if channel.name == topic {
            // A closed sink means the bridge is shutting down.
            let _ = sink.send(InboundMessage::new(topic.clone(), msg.clone())).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Wire helpers
// ---------------------------------------------------------------------------

/// Build the rosbridge `subscribe` op for subscription `id`.
pub fn subscribe_frame(id: u64, channel: &Channel) -> String {
    json!({
        "op": "subscribe",
        "id": format!("rimco:{id}"),
        "topic": channel.name,
        "type": channel.message_type,
    })
    .to_string()
}

/// Build the rosbridge `unsubscribe` op for subscription `id`.
pub fn unsubscribe_frame(id: u64, topic: &str) -> String {
    json!({
        "op": "unsubscribe",
        "id": format!("rimco:{id}"),
        "topic": topic,
    })
    .to_string()
}

/// Extract `(topic, msg)` from a rosbridge `publish` op.
///
/// Any other op, or a frame that is not valid JSON, yields `None`.
pub fn parse_publish(text: &str) -> Option<(String, Value)> {
    let mut json = serde_json::from_str::<Value>(text).ok()?;
    if json.get("op").and_then(Value::as_str) != Some("publish") {
        return None;
    }
    let topic = json.get("topic")?.as_str()?.to_string();
    let msg = json.get_mut("msg")?.take();
    Some((topic, msg))
}
