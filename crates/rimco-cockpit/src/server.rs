//! [`CockpitServer`] – HTTP + WebSocket front end of the bridge.
//!
//! Listens on `0.0.0.0:8080` (configurable via [`CockpitServer::with_port`]).
//!
//! | Route | Handling |
//! |---|---|
//! | `GET /ws` (also `/`) | viewer push connection: snapshot, then live envelopes and keepalive pings |
//! | `POST /api/topics` | replace the value-channel set, reply `{ok, current}` |
//! | `POST /api/ros2` | start an action, reply with a `text/event-stream` |
//! | `POST /api/ros2/:id/cancel` | cancel a running action |
//! | `GET /api/layouts` | stored layout names |
//! | `GET/POST/DELETE /api/layouts/:name` | read, write, delete one layout |
//!
//! Every route answers CORS preflights for any origin.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use rimco_memory::LayoutStore;
use rimco_runtime::{ActionStreamProxy, BridgeHandle};
use rimco_types::RimcoError;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::handlers;

/// Default TCP port for the cockpit server.
pub const DEFAULT_PORT: u16 = 8080;

/// Default interval between viewer keepalive pings.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// CockpitServer
// ---------------------------------------------------------------------------

/// Handles shared by every request.
pub struct AppState {
    pub bridge: BridgeHandle,
    pub actions: ActionStreamProxy,
    pub layouts: LayoutStore,
}

pub(crate) struct ServerState {
    pub(crate) app: AppState,
    pub(crate) keepalive: Duration,
}

/// # Example
///
/// ```rust,no_run
/// # async fn demo(state: rimco_cockpit::AppState) {
/// use rimco_cockpit::CockpitServer;
///
/// CockpitServer::new(state)
///     .with_port(8080)
///     .run()
///     .await
///     .expect("cockpit server failed");
/// # }
/// ```
pub struct CockpitServer {
    state: AppState,
    port: u16,
    keepalive: Duration,
}

impl CockpitServer {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            port: DEFAULT_PORT,
            keepalive: DEFAULT_KEEPALIVE,
        }
    }

    /// Override the listening port (builder-style).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Override the viewer keepalive interval (builder-style).
    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The full route table, ready for [`axum::serve`].
    pub fn router(self) -> Router {
        let state = Arc::new(ServerState {
            app: self.state,
            keepalive: self.keepalive,
        });
        Router::new()
            .route("/", get(handlers::viewer_ws))
            .route("/ws", get(handlers::viewer_ws))
            .route("/api/topics", post(handlers::set_topics))
            .route("/api/ros2", post(handlers::start_action))
            .route("/api/ros2/:id/cancel", post(handlers::cancel_action))
            .route("/api/layouts", get(handlers::list_layouts))
            .route(
                "/api/layouts/:name",
                get(handlers::get_layout)
                    .post(handlers::put_layout)
                    .delete(handlers::delete_layout),
            )
            .fallback(handlers::not_found)
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind `0.0.0.0:<port>` and serve until the listener fails.
    ///
    /// # Errors
    ///
    /// Returns [`RimcoError::Transport`] if the listener cannot bind.
    pub async fn run(self) -> Result<(), RimcoError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RimcoError::Transport(format!("bind error on {addr}: {e}")))?;
        info!(port = self.port, "cockpit listening on http://localhost:{}", self.port);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), RimcoError> {
        axum::serve(listener, self.router())
            .await
            .map_err(|e| RimcoError::Transport(format!("cockpit server error: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
