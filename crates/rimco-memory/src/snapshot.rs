//! Last-known-value cache with a debounced durable flush.
//!
//! [`SnapshotCache`] holds one [`SnapshotEntry`] per channel.  Every
//! [`update`][SnapshotCache::update] replaces the entry wholesale and marks
//! the cache dirty; [`flush`][SnapshotCache::flush] writes the whole map to
//! disk only when it is dirty, so a periodic caller produces at most one
//! write per period regardless of message rate.
//!
//! # Storage layout
//!
//! One JSON object, `channel name → {"data": …, "timestampMs": …}`, written
//! to a sibling temp file and renamed over the target so readers never see
//! a partial file.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use rimco_types::{ChannelValue, SnapshotEntry};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::StoreError;

pub struct SnapshotCache {
    path: PathBuf,
    entries: HashMap<String, SnapshotEntry>,
    dirty: bool,
}

impl SnapshotCache {
    /// An empty, clean cache persisting to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: HashMap::new(),
            dirty: false,
        }
    }

    /// Seed the cache from the last durable snapshot at `path`.
    ///
    /// A missing or unreadable file is a cold start: the cache comes back
    /// empty and the problem is logged.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let mut cache = Self::new(path);
        match fs::read(&cache.path).await {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, SnapshotEntry>>(&bytes) {
                Ok(entries) => {
                    info!(path = %cache.path.display(), channels = entries.len(), "snapshot restored");
                    cache.entries = entries;
                }
                Err(e) => {
                    warn!(path = %cache.path.display(), error = %e, "corrupt snapshot; cold start");
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %cache.path.display(), "no snapshot; cold start");
            }
            Err(e) => {
                warn!(path = %cache.path.display(), error = %e, "unreadable snapshot; cold start");
            }
        }
        cache
    }

    /// Replace the entry for `channel` and mark the cache dirty.
    pub fn update(&mut self, channel: &str, data: ChannelValue, timestamp_ms: i64) {
        self.entries
            .insert(channel.to_string(), SnapshotEntry { data, timestamp_ms });
        self.dirty = true;
    }

    pub fn get(&self, channel: &str) -> Option<&SnapshotEntry> {
        self.entries.get(channel)
    }

    /// An owned copy of every entry, ordered by channel name.
    pub fn snapshot(&self) -> BTreeMap<String, SnapshotEntry> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist the cache if it changed since the last successful flush.
    ///
    /// Returns `Ok(true)` when a write happened.  The dirty flag is cleared
    /// only after the rename succeeds, so a failed flush is retried on the
    /// next call.
    pub async fn flush(&mut self) -> Result<bool, StoreError> {
        if !self.dirty {
            return Ok(false);
        }

        let bytes = serde_json::to_vec(&self.snapshot())?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &self.path).await?;

        self.dirty = false;
        debug!(path = %self.path.display(), bytes = bytes.len(), "snapshot flushed");
        Ok(true)
    }
}
