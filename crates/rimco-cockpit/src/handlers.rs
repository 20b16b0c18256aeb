//! Request handlers behind the cockpit [`Router`][axum::Router].

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, Stream};
use futures_util::{SinkExt, StreamExt};
use rimco_middleware::BroadcastFanout;
use rimco_runtime::{ActionRequest, ActionSession};
use rimco_types::{ActionEvent, ViewerEvent};
use serde_json::{Value, json};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::server::ServerState;

type Shared = State<Arc<ServerState>>;

// ---------------------------------------------------------------------------
// WebSocket: viewer push connection
// ---------------------------------------------------------------------------

pub(crate) async fn viewer_ws(ws: WebSocketUpgrade, State(state): Shared) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_viewer(socket, state))
}

async fn handle_viewer(socket: WebSocket, state: Arc<ServerState>) {
    let mut viewer = match state.app.bridge.connect().await {
        Ok(viewer) => viewer,
        Err(e) => {
            warn!(error = %e, "viewer rejected");
            return;
        }
    };
    let id = viewer.id;
    info!(viewer = %id, "viewer connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let ping = match BroadcastFanout::encode(&ViewerEvent::Ping) {
        Ok(ping) => ping,
        Err(e) => {
            warn!(error = %e, "ping frame unavailable");
            state.app.bridge.disconnect(id).await;
            return;
        }
    };
    let mut ticker = tokio::time::interval(state.keepalive);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            frame = viewer.frames.recv() => match frame {
                Some(frame) => {
                    if ws_tx.send(Message::Text(frame.to_string())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if ws_tx.send(Message::Text(ping.to_string())).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                // Viewers only listen.
                Some(Ok(_)) => continue,
            },
        }
    }

    state.app.bridge.disconnect(id).await;
    info!(viewer = %id, "viewer disconnected");
}

// ---------------------------------------------------------------------------
// JSON API
// ---------------------------------------------------------------------------

pub(crate) async fn set_topics(
    State(state): Shared,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body?;
    let Some(topics) = body.get("topics").and_then(Value::as_object) else {
        return Err(ApiError::BadRequest("expected {\"topics\": {name: type}}".into()));
    };
    let desired: BTreeMap<String, String> = topics
        .iter()
        .filter_map(|(name, ty)| ty.as_str().map(|ty| (name.clone(), ty.to_string())))
        .collect();

    let current = state
        .app
        .bridge
        .set_topics(desired)
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;
    Ok(Json(json!({ "ok": true, "current": current })))
}

pub(crate) async fn list_layouts(State(state): Shared) -> Json<Vec<String>> {
    match state.app.layouts.list().await {
        Ok(names) => Json(names),
        Err(e) => {
            warn!(error = %e, "layout listing failed");
            Json(Vec::new())
        }
    }
}

pub(crate) async fn get_layout(State(state): Shared, Path(name): Path<String>) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.app.layouts.get(&name).await?))
}

pub(crate) async fn put_layout(
    State(state): Shared,
    Path(name): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(layout) = body?;
    state.app.layouts.put(&name, &layout).await?;
    Ok(Json(json!({ "ok": true })))
}

pub(crate) async fn delete_layout(State(state): Shared, Path(name): Path<String>) -> Result<Json<Value>, ApiError> {
    state.app.layouts.delete(&name).await?;
    Ok(Json(json!({ "ok": true })))
}

pub(crate) async fn cancel_action(State(state): Shared, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let id = Uuid::parse_str(&id).map_err(|_| ApiError::BadRequest("invalid session id".into()))?;
    Ok(Json(json!({ "ok": state.app.actions.cancel(id) })))
}

pub(crate) async fn not_found() -> ApiError {
    ApiError::NotFound("not found".into())
}

// ---------------------------------------------------------------------------
// Server-sent action stream
// ---------------------------------------------------------------------------

pub(crate) async fn start_action(
    State(state): Shared,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let Json(body) = body?;
    let request = ActionRequest::from_json(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let session = state.app.actions.start(&request).map_err(|e| {
        warn!(error = %e, "action request rejected");
        ApiError::BadRequest(e.to_string())
    })?;
    info!(session = %session.id, action = %request.action, "action stream opened");
    let keepalive = KeepAlive::new().interval(state.keepalive);
    Ok(Sse::new(action_events(session)).keep_alive(keepalive))
}

/// Relay `session` until its terminal event.
///
/// The session lives inside the stream, so a client hanging up drops it,
/// which stops the child if it is still running.
fn action_events(session: ActionSession) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(Some(session), |session| async move {
        let mut session = session?;
        let event = session.events.recv().await?;
        if event.is_terminal() {
            debug!(session = %session.id, "action stream complete");
        }
        let next = (!event.is_terminal()).then_some(session);
        Some((Ok(sse_event(&event)), next))
    })
}

/// One SSE event named after the action event's kind.
pub fn sse_event(event: &ActionEvent) -> Event {
    let named = Event::default().event(event.kind());
    match named.clone().json_data(event) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "action event not serializable");
            named.data("{}")
        }
    }
}
