//! [`ActionStreamProxy`] – long-running action goals as cancellable event
//! streams.
//!
//! Each request spawns the action client as a child process and supervises
//! it from one task.  Every stdout line is forwarded as [`ActionEvent::Line`]
//! and matched against progress markers:
//!
//! | Marker (case-insensitive) | Event | State |
//! |---|---|---|
//! | `waiting for … server` | `waiting` | `Waiting` |
//! | `goal accepted` | `accepted` | `Accepted` |
//! | `finished … succeeded` | `success` | `Finished` |
//! | `finished … failed/aborted/canceled`, `goal rejected` | `failure` | `Finished` |
//!
//! Stderr lines become [`ActionEvent::Error`].  The stream always ends with
//! exactly one [`ActionEvent::End`] carrying the exit code.
//!
//! # Cancellation
//!
//! [`ActionStreamProxy::cancel`] or dropping the session's event receiver
//! kills the child and fires the cleanup command as a detached task.  The
//! cleanup is best effort and never awaited.  Cancelling a session whose
//! goal already finished is a no-op.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};

use rimco_types::{ActionEvent, ActionState, RimcoError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Events buffered per session before the supervisor waits on the consumer.
const EVENT_BUFFER: usize = 64;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration and requests
// ─────────────────────────────────────────────────────────────────────────────

/// External programs used by the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionConfig {
    /// Action client, invoked as `<program> action send_goal <name> <type> <goal>`.
    pub program: String,
    /// Invoked as `<cleanup_program> -f "action send_goal <name>"` on cancel.
    pub cleanup_program: String,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            program: "ros2".into(),
            cleanup_program: "pkill".into(),
        }
    }
}

/// One goal to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    pub action: String,
    pub action_type: String,
    /// Goal in the client's inline YAML/JSON form.
    pub goal: String,
}

impl ActionRequest {
    /// Parse a request body.
    ///
    /// Accepts `{"action", "action_type", "goal"}` (goal as object or string)
    /// or `{"cmd": "action send_goal <name> <type> '<goal>'"}`.
    pub fn from_json(body: &Value) -> Result<Self, RimcoError> {
        if let Some(cmd) = body.get("cmd").and_then(Value::as_str) {
            return Self::parse_command(cmd);
        }

        let field = |key: &str| {
            body.get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or_else(|| RimcoError::Subprocess(format!("missing `{key}`")))
        };
        let goal = match body.get("goal") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "{}".to_string(),
        };
        Ok(Self {
            action: field("action")?,
            action_type: field("action_type")?,
            goal,
        })
    }

    /// Parse the legacy command line form, with or without a leading `ros2`.
    pub fn parse_command(cmd: &str) -> Result<Self, RimcoError> {
        let invalid = || RimcoError::Subprocess(format!("unsupported command: {cmd}"));

        let mut rest = cmd.trim();
        if let Some(stripped) = rest.strip_prefix("ros2 ") {
            rest = stripped.trim_start();
        }
        let (verb, rest) = next_token(rest).ok_or_else(invalid)?;
        let (sub, rest) = next_token(rest).ok_or_else(invalid)?;
        if verb != "action" || sub != "send_goal" {
            return Err(invalid());
        }
        let (action, rest) = next_token(rest).ok_or_else(invalid)?;
        let (action_type, rest) = next_token(rest).ok_or_else(invalid)?;

        let goal = rest.trim();
        let goal = goal
            .strip_prefix('\'')
            .and_then(|g| g.strip_suffix('\''))
            .unwrap_or(goal);
        Ok(Self {
            action: action.to_string(),
            action_type: action_type.to_string(),
            goal: if goal.is_empty() { "{}".into() } else { goal.to_string() },
        })
    }

    fn command_line(&self, program: &str) -> String {
        format!(
            "{program} action send_goal {} {} '{}'",
            self.action, self.action_type, self.goal
        )
    }
}

fn next_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    match s.find(char::is_whitespace) {
        Some(end) => Some((&s[..end], &s[end..])),
        None => Some((s, "")),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Marker classification
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Waiting,
    Accepted,
    Succeeded,
    Failed,
}

fn classify(line: &str) -> Option<Marker> {
    let line = line.to_ascii_lowercase();
    if line.contains("goal rejected") {
        Some(Marker::Failed)
    } else if line.contains("goal accepted") {
        Some(Marker::Accepted)
    } else if line.contains("finished") {
        if line.contains("succeeded") {
            Some(Marker::Succeeded)
        } else if ["failed", "aborted", "canceled", "cancelled"]
            .iter()
            .any(|m| line.contains(m))
        {
            Some(Marker::Failed)
        } else {
            None
        }
    } else if line.contains("waiting for") && line.contains("server") {
        Some(Marker::Waiting)
    } else {
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

/// The consumer side of one in-flight action.
pub struct ActionSession {
    pub id: Uuid,
    pub events: mpsc::Receiver<ActionEvent>,
    pub state: watch::Receiver<ActionState>,
}

struct SessionControl {
    cancel: oneshot::Sender<()>,
    state: watch::Receiver<ActionState>,
}

type Registry = Arc<Mutex<HashMap<Uuid, SessionControl>>>;

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<Uuid, SessionControl>> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Spawns and supervises action sessions.  Cheap to clone.
#[derive(Clone)]
pub struct ActionStreamProxy {
    config: ActionConfig,
    sessions: Registry,
}

impl ActionStreamProxy {
    pub fn new(config: ActionConfig) -> Self {
        Self {
            config,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Launch `request` and return its event stream.
    ///
    /// The first event is always [`ActionEvent::Start`].
    pub fn start(&self, request: &ActionRequest) -> Result<ActionSession, RimcoError> {
        let mut command = Command::new(&self.config.program);
        command
            .arg("action")
            .arg("send_goal")
            .arg(&request.action)
            .arg(&request.action_type)
            .arg(&request.goal);
        let cleanup = Some((
            self.config.cleanup_program.clone(),
            format!("action send_goal {}", request.action),
        ));
        self.launch(command, request.command_line(&self.config.program), cleanup)
    }

    /// Cancel session `id`.
    ///
    /// Returns `false` when the session is unknown, already ended, or its
    /// goal already finished.
    pub fn cancel(&self, id: Uuid) -> bool {
        let Some(control) = lock(&self.sessions).remove(&id) else {
            return false;
        };
        if *control.state.borrow() == ActionState::Finished {
            debug!(session = %id, "cancel after finish ignored");
            return false;
        }
        control.cancel.send(()).is_ok()
    }

    /// Number of sessions still running.
    pub fn active(&self) -> usize {
        lock(&self.sessions).len()
    }

    fn launch(
        &self,
        mut command: Command,
        command_line: String,
        cleanup: Option<(String, String)>,
    ) -> Result<ActionSession, RimcoError> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let child = command
            .spawn()
            .map_err(|e| RimcoError::Subprocess(format!("spawn `{command_line}`: {e}")))?;

        let id = Uuid::new_v4();
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (state_tx, state_rx) = watch::channel(ActionState::Starting);
        let (cancel_tx, cancel_rx) = oneshot::channel();

        // The buffer is empty, so the start event always fits.
        let _ = events_tx.try_send(ActionEvent::Start {
            session: id,
            pid: child.id(),
            command: command_line.clone(),
        });
        info!(session = %id, command = %command_line, "action session started");

        lock(&self.sessions).insert(
            id,
            SessionControl {
                cancel: cancel_tx,
                state: state_rx.clone(),
            },
        );

        let supervisor = Supervisor {
            id,
            events: events_tx,
            state: state_tx,
            cleanup,
            sessions: Arc::clone(&self.sessions),
        };
        tokio::spawn(supervisor.run(child, cancel_rx));

        Ok(ActionSession {
            id,
            events: events_rx,
            state: state_rx,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Supervisor task
// ─────────────────────────────────────────────────────────────────────────────

struct Supervisor {
    id: Uuid,
    events: mpsc::Sender<ActionEvent>,
    state: watch::Sender<ActionState>,
    cleanup: Option<(String, String)>,
    sessions: Registry,
}

impl Supervisor {
    async fn run(self, mut child: Child, mut cancel: oneshot::Receiver<()>) {
        let mut stdout = child.stdout.take().map(LineReader::new);
        let mut stderr = child.stderr.take().map(LineReader::new);
        let mut cancel_armed = true;
        let mut consumer_gone = false;
        let mut cancelled = false;
        let mut verdict = false;

        while !cancelled && !consumer_gone && (stdout.is_some() || stderr.is_some()) {
            tokio::select! {
                read = next_line(&mut stdout), if stdout.is_some() => match read {
                    LineRead::Line(line) => verdict |= self.on_stdout(line).await,
                    LineRead::Failed { error, gave_up } => {
                        self.on_read_error("stdout", &error).await;
                        if gave_up {
                            stdout = None;
                        }
                    }
                    LineRead::Eof => stdout = None,
                },
                read = next_line(&mut stderr), if stderr.is_some() => match read {
                    LineRead::Line(message) => self.emit(ActionEvent::Error { message }).await,
                    LineRead::Failed { error, gave_up } => {
                        self.on_read_error("stderr", &error).await;
                        if gave_up {
                            stderr = None;
                        }
                    }
                    LineRead::Eof => stderr = None,
                },
                signal = &mut cancel, if cancel_armed => {
                    cancel_armed = false;
                    cancelled = signal.is_ok() && self.stop_requested("action cancelled by client");
                }
                _ = self.events.closed() => {
                    consumer_gone = true;
                    cancelled = self.stop_requested("action consumer went away");
                }
            }
        }

        // Both pipes may close while the client keeps running.
        let exit = loop {
            if cancelled {
                if let Err(e) = child.start_kill() {
                    warn!(session = %self.id, error = %e, "failed to signal action client");
                }
                self.spawn_cleanup();
                break child.wait().await;
            }
            if consumer_gone {
                break child.wait().await;
            }
            tokio::select! {
                status = child.wait() => break status,
                signal = &mut cancel, if cancel_armed => {
                    cancel_armed = false;
                    cancelled = signal.is_ok() && self.stop_requested("action cancelled by client");
                }
                _ = self.events.closed() => {
                    consumer_gone = true;
                    cancelled = self.stop_requested("action consumer went away");
                }
            }
        };

        let code = match exit {
            Ok(status) => status.code(),
            Err(e) => {
                warn!(session = %self.id, error = %e, "failed to reap action client");
                None
            }
        };

        if !cancelled && !verdict && code != Some(0) {
            let reason = match code {
                Some(c) => format!("exited with code {c}"),
                None => "terminated by signal".to_string(),
            };
            self.emit(ActionEvent::Failure { reason }).await;
        }
        self.state.send_replace(ActionState::Finished);
        self.emit(ActionEvent::End { code }).await;

        lock(&self.sessions).remove(&self.id);
        info!(session = %self.id, ?code, cancelled, "action session ended");
    }

    /// Whether a stop request should kill the client.  A finished goal is
    /// left to exit on its own.
    fn stop_requested(&self, reason: &str) -> bool {
        if *self.state.borrow() == ActionState::Finished {
            return false;
        }
        info!(session = %self.id, "{reason}");
        true
    }

    async fn on_read_error(&self, pipe: &str, error: &std::io::Error) {
        warn!(session = %self.id, pipe, error = %error, "action output read failed");
        self.emit(ActionEvent::Error {
            message: format!("{pipe} read failed: {error}"),
        })
        .await;
    }

    /// Forward one stdout line.  Returns `true` if it carried a verdict.
    async fn on_stdout(&self, line: String) -> bool {
        let marker = classify(&line);
        self.emit(ActionEvent::Line { text: line.clone() }).await;
        match marker {
            Some(Marker::Waiting) => {
                self.state.send_replace(ActionState::Waiting);
                self.emit(ActionEvent::Waiting).await;
                false
            }
            Some(Marker::Accepted) => {
                self.state.send_replace(ActionState::Accepted);
                self.emit(ActionEvent::Accepted).await;
                false
            }
            Some(Marker::Succeeded) => {
                self.state.send_replace(ActionState::Finished);
                self.emit(ActionEvent::Success).await;
                true
            }
            Some(Marker::Failed) => {
                self.state.send_replace(ActionState::Finished);
                self.emit(ActionEvent::Failure { reason: line }).await;
                true
            }
            None => false,
        }
    }

    async fn emit(&self, event: ActionEvent) {
        if self.events.send(event).await.is_err() {
            debug!(session = %self.id, "action event dropped, consumer closed");
        }
    }

    fn spawn_cleanup(&self) {
        let Some((program, pattern)) = self.cleanup.clone() else {
            return;
        };
        let id = self.id;
        tokio::spawn(async move {
            let status = Command::new(&program)
                .arg("-f")
                .arg(&pattern)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            match status {
                Ok(status) => debug!(session = %id, %pattern, ?status, "action cleanup ran"),
                Err(e) => warn!(session = %id, %program, error = %e, "action cleanup failed"),
            }
        });
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output lines
// ─────────────────────────────────────────────────────────────────────────────

/// Consecutive read errors tolerated before a pipe is abandoned.
const MAX_READ_ERRORS: u32 = 3;

enum LineRead {
    Line(String),
    Failed { error: std::io::Error, gave_up: bool },
    Eof,
}

/// Newline-delimited reader that decodes lossily, so stray non-UTF-8 bytes
/// never end the stream.
///
/// Partial data stays in `buf` when a `select!` drops the read future, which
/// keeps [`LineReader::next`] cancel safe.
struct LineReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
    errors: u32,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            buf: Vec::new(),
            errors: 0,
        }
    }

    async fn next(&mut self) -> LineRead {
        match self.inner.read_until(b'\n', &mut self.buf).await {
            Ok(0) if self.buf.is_empty() => LineRead::Eof,
            Ok(_) => {
                self.errors = 0;
                let raw = std::mem::take(&mut self.buf);
                let text = String::from_utf8_lossy(&raw);
                LineRead::Line(text.trim_end_matches(['\n', '\r']).to_string())
            }
            Err(error) => {
                self.errors += 1;
                LineRead::Failed {
                    error,
                    gave_up: self.errors >= MAX_READ_ERRORS,
                }
            }
        }
    }
}

async fn next_line<R: AsyncRead + Unpin>(reader: &mut Option<LineReader<R>>) -> LineRead {
    match reader.as_mut() {
        Some(reader) => reader.next().await,
        None => LineRead::Eof,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn shell(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    async fn collect(session: &mut ActionSession) -> Vec<ActionEvent> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = timeout(Duration::from_secs(10), session.events.recv()).await {
            events.push(event);
        }
        events
    }

    async fn wait_for_state(session: &mut ActionSession, want: ActionState) {
        timeout(Duration::from_secs(10), session.state.wait_for(|s| *s == want))
            .await
            .expect("state not reached in time")
            .expect("session dropped");
    }

    fn kinds(events: &[ActionEvent]) -> Vec<&'static str> {
        events.iter().map(ActionEvent::kind).collect()
    }

    #[test]
    fn structured_request_body() {
        let body = serde_json::json!({
            "action": "/follow_gps_waypoints",
            "action_type": "nav2_msgs/action/FollowGPSWaypoints",
            "goal": {"gps_poses": []}
        });
        let req = ActionRequest::from_json(&body).unwrap();
        assert_eq!(req.action, "/follow_gps_waypoints");
        assert_eq!(req.goal, r#"{"gps_poses":[]}"#);
    }

    #[test]
    fn legacy_command_body() {
        let body = serde_json::json!({
            "cmd": "action send_goal /follow_gps_waypoints nav2_msgs/action/FollowGPSWaypoints '{gps_poses: [{position: {latitude: 50.0}}]}'"
        });
        let req = ActionRequest::from_json(&body).unwrap();
        assert_eq!(req.action, "/follow_gps_waypoints");
        assert_eq!(req.action_type, "nav2_msgs/action/FollowGPSWaypoints");
        assert_eq!(req.goal, "{gps_poses: [{position: {latitude: 50.0}}]}");
    }

    #[test]
    fn other_commands_are_rejected() {
        assert!(ActionRequest::parse_command("topic pub /cmd_vel x y").is_err());
        assert!(ActionRequest::parse_command("action send_goal").is_err());
        assert!(ActionRequest::from_json(&serde_json::json!({"goal": {}})).is_err());
    }

    #[test]
    fn markers_are_classified() {
        assert_eq!(classify("Waiting for an action server to become available..."), Some(Marker::Waiting));
        assert_eq!(classify("Goal accepted with ID: 4f1c"), Some(Marker::Accepted));
        assert_eq!(classify("Goal finished with status: SUCCEEDED"), Some(Marker::Succeeded));
        assert_eq!(classify("Goal finished with status: ABORTED"), Some(Marker::Failed));
        assert_eq!(classify("Goal rejected :("), Some(Marker::Failed));
        assert_eq!(classify("Sending goal:"), None);
    }

    #[tokio::test]
    async fn successful_goal_streams_full_lifecycle() {
        let proxy = ActionStreamProxy::new(ActionConfig::default());
        let mut session = proxy
            .launch(
                shell("echo 'Waiting for an action server to become available...'; \
                       echo 'Goal accepted with ID: 1'; \
                       echo 'Goal finished with status: SUCCEEDED'"),
                "test".into(),
                None,
            )
            .unwrap();

        let events = collect(&mut session).await;
        assert_eq!(
            kinds(&events),
            vec!["start", "line", "waiting", "line", "accepted", "line", "success", "end"]
        );
        assert_eq!(events.last(), Some(&ActionEvent::End { code: Some(0) }));
        assert_eq!(*session.state.borrow(), ActionState::Finished);
    }

    #[tokio::test]
    async fn invalid_utf8_output_keeps_the_stream_alive() {
        let proxy = ActionStreamProxy::new(ActionConfig::default());
        let mut session = proxy
            .launch(
                shell("printf 'Sending goal \\377\\n'; sleep 0.2; \
                       echo 'Goal accepted with ID: 1'; \
                       echo 'Goal finished with status: SUCCEEDED'"),
                "test".into(),
                None,
            )
            .unwrap();

        let events = collect(&mut session).await;
        assert_eq!(
            kinds(&events),
            vec!["start", "line", "line", "accepted", "line", "success", "end"]
        );
        assert_eq!(events[1], ActionEvent::Line { text: "Sending goal \u{FFFD}".into() });
        assert_eq!(events.last(), Some(&ActionEvent::End { code: Some(0) }));
    }

    #[tokio::test]
    async fn cancel_reaches_client_with_closed_pipes() {
        let proxy = ActionStreamProxy::new(ActionConfig::default());
        let mut session = proxy
            .launch(shell("exec >&- 2>&-; sleep 30"), "test".into(), None)
            .unwrap();
        // Let the supervisor see both pipes close.
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(proxy.cancel(session.id));
        let events = timeout(Duration::from_secs(5), collect(&mut session))
            .await
            .expect("cancel did not stop the client");
        assert_eq!(kinds(&events), vec!["start", "end"]);
        assert_eq!(proxy.active(), 0);
    }

    #[tokio::test]
    async fn nonzero_exit_without_verdict_is_a_failure() {
        let proxy = ActionStreamProxy::new(ActionConfig::default());
        let mut session = proxy
            .launch(shell("echo 'no server here' >&2; exit 3"), "test".into(), None)
            .unwrap();

        let events = collect(&mut session).await;
        assert_eq!(kinds(&events), vec!["start", "error", "failure", "end"]);
        assert_eq!(events.last(), Some(&ActionEvent::End { code: Some(3) }));
    }

    #[tokio::test]
    async fn cancel_before_accepted_terminates_and_ends() {
        let proxy = ActionStreamProxy::new(ActionConfig::default());
        let mut session = proxy
            .launch(
                shell("echo 'Waiting for an action server to become available...'; sleep 30"),
                "test".into(),
                None,
            )
            .unwrap();
        wait_for_state(&mut session, ActionState::Waiting).await;

        assert!(proxy.cancel(session.id));
        let events = collect(&mut session).await;
        assert!(matches!(events.last(), Some(ActionEvent::End { .. })));
        assert!(!kinds(&events).contains(&"accepted"));
        assert_eq!(proxy.active(), 0);
    }

    #[tokio::test]
    async fn cancel_after_finished_is_a_noop() {
        let proxy = ActionStreamProxy::new(ActionConfig::default());
        let mut session = proxy
            .launch(
                shell("echo 'Goal finished with status: SUCCEEDED'; sleep 1"),
                "test".into(),
                None,
            )
            .unwrap();
        wait_for_state(&mut session, ActionState::Finished).await;

        assert!(!proxy.cancel(session.id));
        let events = collect(&mut session).await;
        assert_eq!(events.last(), Some(&ActionEvent::End { code: Some(0) }));
    }

    #[tokio::test]
    async fn dropping_the_consumer_stops_the_child() {
        let proxy = ActionStreamProxy::new(ActionConfig::default());
        let session = proxy.launch(shell("sleep 30"), "test".into(), None).unwrap();
        let id = session.id;
        drop(session);

        timeout(Duration::from_secs(10), async {
            while proxy.active() > 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("session did not wind down");
        assert!(!proxy.cancel(id));
    }

    #[tokio::test]
    async fn start_invokes_configured_program() {
        let proxy = ActionStreamProxy::new(ActionConfig {
            program: "echo".into(),
            cleanup_program: "true".into(),
        });
        let request = ActionRequest {
            action: "/navigate".into(),
            action_type: "nav2_msgs/action/NavigateToPose".into(),
            goal: "{}".into(),
        };
        let mut session = proxy.start(&request).unwrap();

        let events = collect(&mut session).await;
        assert!(matches!(&events[0], ActionEvent::Start { command, .. } if command.starts_with("echo action send_goal /navigate")));
        assert_eq!(
            events[1],
            ActionEvent::Line { text: "action send_goal /navigate nav2_msgs/action/NavigateToPose {}".into() }
        );
        assert_eq!(events.last(), Some(&ActionEvent::End { code: Some(0) }));
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let proxy = ActionStreamProxy::new(ActionConfig {
            program: "/nonexistent/rimco-action-client".into(),
            cleanup_program: "true".into(),
        });
        let request = ActionRequest::parse_command("action send_goal /a t/T '{}'").unwrap();
        assert!(matches!(proxy.start(&request), Err(RimcoError::Subprocess(_))));
        assert_eq!(proxy.active(), 0);
    }
}
