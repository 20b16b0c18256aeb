//! Fire-and-forget delivery of viewer envelopes.
//!
//! Every connected viewer owns a bounded queue.  [`BroadcastFanout::broadcast`]
//! serializes an event once and offers the frame to every queue with
//! `try_send`, so a slow or dead viewer never blocks delivery to the others:
//!
//! | Queue state | Effect |
//! |---|---|
//! | space available | frame queued |
//! | full (slow viewer) | frame dropped for that viewer only |
//! | closed (viewer gone) | viewer pruned from the set |
//!
//! A new viewer's queue is seeded with its `snapshot` envelope before it is
//! added to the set, so it can never observe a delta before its bootstrap.

use std::collections::HashMap;
use std::sync::Arc;

use rimco_types::{RimcoError, Snapshot, ViewerEvent};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Default per-viewer queue capacity (frames buffered before drops start).
pub const DEFAULT_CAPACITY: usize = 256;

/// A serialized envelope, shared between all viewer queues.
pub type Frame = Arc<str>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewerId(pub u64);

impl std::fmt::Display for ViewerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "viewer-{}", self.0)
    }
}

/// The receiving half handed to a viewer's connection task.
pub struct ViewerConnection {
    pub id: ViewerId,
    pub frames: mpsc::Receiver<Frame>,
}

pub struct BroadcastFanout {
    viewers: HashMap<ViewerId, mpsc::Sender<Frame>>,
    capacity: usize,
    next_id: u64,
}

impl BroadcastFanout {
    pub fn new(capacity: usize) -> Self {
        Self {
            viewers: HashMap::new(),
            capacity,
            next_id: 0,
        }
    }

    /// Serialize `event` into a frame.
    pub fn encode(event: &ViewerEvent) -> Result<Frame, RimcoError> {
        serde_json::to_string(event)
            .map(Frame::from)
            .map_err(|e| RimcoError::Serialization(e.to_string()))
    }

    /// Register a viewer whose first frame is `snapshot`.
    pub fn connect(&mut self, snapshot: Snapshot) -> Result<ViewerConnection, RimcoError> {
        let frame = Self::encode(&ViewerEvent::Snapshot(snapshot))?;
        let (tx, rx) = mpsc::channel(self.capacity);
        // Fresh queue with capacity >= 1: cannot be full or closed.
        let _ = tx.try_send(frame);

        let id = ViewerId(self.next_id);
        self.next_id += 1;
        self.viewers.insert(id, tx);
        debug!(viewer = %id, viewers = self.viewers.len(), "viewer connected");
        Ok(ViewerConnection { id, frames: rx })
    }

    /// Remove a viewer.  Returns `false` if it was already gone.
    pub fn disconnect(&mut self, id: ViewerId) -> bool {
        let removed = self.viewers.remove(&id).is_some();
        if removed {
            debug!(viewer = %id, viewers = self.viewers.len(), "viewer disconnected");
        }
        removed
    }

    /// Offer `event` to every viewer.  Returns how many queued it.
    pub fn broadcast(&mut self, event: &ViewerEvent) -> usize {
        let frame = match Self::encode(event) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "dropping unserializable viewer event");
                return 0;
            }
        };

        let mut delivered = 0;
        self.viewers.retain(|id, tx| match tx.try_send(Arc::clone(&frame)) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                debug!(viewer = %id, "viewer queue full, frame dropped");
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!(viewer = %id, "viewer gone, pruned");
                false
            }
        });
        delivered
    }

    pub fn len(&self) -> usize {
        self.viewers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.viewers.is_empty()
    }
}

impl Default for BroadcastFanout {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rimco_types::ChannelValue;

    fn value(n: f64) -> ViewerEvent {
        ViewerEvent::Value {
            topic: "/speed".into(),
            data: ChannelValue::Number(n),
        }
    }

    fn decode(frame: &Frame) -> ViewerEvent {
        serde_json::from_str(frame).expect("valid envelope")
    }

    #[tokio::test]
    async fn snapshot_is_first_frame() {
        let mut fanout = BroadcastFanout::default();
        let mut conn = fanout.connect(Snapshot::default()).unwrap();
        fanout.broadcast(&value(1.0));

        let first = conn.frames.recv().await.unwrap();
        assert!(matches!(decode(&first), ViewerEvent::Snapshot(_)));
        let second = conn.frames.recv().await.unwrap();
        assert_eq!(decode(&second), value(1.0));
    }

    #[tokio::test]
    async fn every_viewer_receives_broadcast() {
        let mut fanout = BroadcastFanout::default();
        let mut a = fanout.connect(Snapshot::default()).unwrap();
        let mut b = fanout.connect(Snapshot::default()).unwrap();
        assert_ne!(a.id, b.id);

        assert_eq!(fanout.broadcast(&value(2.0)), 2);
        for conn in [&mut a, &mut b] {
            conn.frames.recv().await.unwrap();
            assert_eq!(decode(&conn.frames.recv().await.unwrap()), value(2.0));
        }
    }

    #[test]
    fn slow_viewer_does_not_block_others() {
        let mut fanout = BroadcastFanout::new(2);
        let _slow = fanout.connect(Snapshot::default()).unwrap();
        let mut fast = fanout.connect(Snapshot::default()).unwrap();

        for i in 0..10 {
            // Keep the fast viewer drained.
            while fast.frames.try_recv().is_ok() {}
            assert!(fanout.broadcast(&value(i as f64)) >= 1);
        }
        // The slow viewer is still registered; its extra frames were dropped.
        assert_eq!(fanout.len(), 2);
    }

    #[test]
    fn closed_viewer_is_pruned_on_broadcast() {
        let mut fanout = BroadcastFanout::default();
        let gone = fanout.connect(Snapshot::default()).unwrap();
        let _alive = fanout.connect(Snapshot::default()).unwrap();
        drop(gone);

        assert_eq!(fanout.broadcast(&value(3.0)), 1);
        assert_eq!(fanout.len(), 1);
    }

    #[test]
    fn disconnect_removes_viewer() {
        let mut fanout = BroadcastFanout::default();
        let conn = fanout.connect(Snapshot::default()).unwrap();
        assert!(fanout.disconnect(conn.id));
        assert!(!fanout.disconnect(conn.id));
        assert!(fanout.is_empty());
        assert_eq!(fanout.broadcast(&value(4.0)), 0);
    }
}
