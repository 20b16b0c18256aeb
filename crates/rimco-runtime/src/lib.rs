//! `rimco-runtime` – the bridge's moving parts.
//!
//! # Modules
//!
//! - [`bridge`] – [`Bridge`][bridge::Bridge]: the single-consumer event loop
//!   owning subscriptions, the snapshot cache, tracks and the viewer set,
//!   driven through a cloneable [`BridgeHandle`][bridge::BridgeHandle].
//! - [`diagnostics`] – [`DiagnosticsMonitor`][diagnostics::DiagnosticsMonitor]:
//!   latest severity per component plus the hourly monitoring log.
//! - [`action`] – [`ActionStreamProxy`][action::ActionStreamProxy]: action
//!   goals run as supervised child processes and exposed as cancellable
//!   event streams.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with optional OTLP export.

pub mod action;
pub mod bridge;
pub mod diagnostics;
pub mod telemetry;

pub use action::{ActionConfig, ActionRequest, ActionSession, ActionStreamProxy};
pub use bridge::{Bridge, BridgeHandle, BridgeOptions};
pub use diagnostics::DiagnosticsMonitor;
