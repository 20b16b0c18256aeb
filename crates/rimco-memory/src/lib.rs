//! `rimco-memory` – durable state of the bridge.
//!
//! # Modules
//!
//! - [`snapshot`] – [`SnapshotCache`][snapshot::SnapshotCache]: last known
//!   value per channel, seeded from disk at startup and flushed back only
//!   when dirty.
//! - [`rotating_log`] – [`RotatingLogWriter`][rotating_log::RotatingLogWriter]:
//!   append-only JSON-lines files rotated by size.
//! - [`layouts`] – [`LayoutStore`][layouts::LayoutStore]: named viewer layout
//!   blobs.

pub mod error;
pub mod layouts;
pub mod rotating_log;
pub mod snapshot;

pub use error::StoreError;
pub use layouts::LayoutStore;
pub use rotating_log::{BYTES_PER_MB, LogRecord, RotatingLogWriter, SessionStamp};
pub use snapshot::SnapshotCache;
