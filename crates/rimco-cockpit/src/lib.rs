//! `rimco-cockpit` – the viewer-facing network surface.
//!
//! One axum [`Router`][axum::Router] (default port `8080`) serves:
//!
//! 1. **WebSocket viewers.**  Each upgrade becomes a push connection that
//!    receives the full snapshot first, then every `value`, `monitoring`
//!    and `track` envelope, plus a `ping` every keepalive period.
//! 2. **The JSON API.**  Value-channel selection (`/api/topics`), layout
//!    storage (`/api/layouts`) and action cancellation.  Failures reply
//!    `{"ok": false, "error": …}` through [`ApiError`].
//! 3. **Action streams.**  `POST /api/ros2` answers with server-sent events
//!    relayed from an [`ActionStreamProxy`][rimco_runtime::ActionStreamProxy]
//!    session.

pub mod error;
mod handlers;
pub mod server;

pub use error::ApiError;
pub use handlers::sse_event;
pub use server::{AppState, CockpitServer, DEFAULT_KEEPALIVE, DEFAULT_PORT};
