//! The gateway server.
//!
//! Two websocket endpoints (`/agent`, `/controller`) plus a small HTTP
//! read surface. Agent telemetry updates the world state and fans out to
//! subscribed controllers; `act` requests run the command pipeline:
//! policy check, delivery to the first open agent socket, and a pending
//! entry that resolves exactly once, whether by ack, policy denial, transport
//! failure, or the 30 s timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path as AxumPath, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, Mutex};
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use tabsense_core::config::{Config, PolicyConfig};
use tabsense_core::ids;
use tabsense_core::protocol::{
    AgentMessage, CommandAck, CommandEnvelope, ControllerRequest, GatewayReply,
};
use tabsense_core::search::SearchFilters;
use tabsense_core::Result;

use crate::audit::AuditLogger;
use crate::debug::{CdpRemote, RemoteDebug};
use crate::pending::{AckWaiter, PendingCommands};
use crate::policy::PolicyEngine;
use crate::world::WorldState;

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

struct AgentConn {
    id: u64,
    tx: mpsc::UnboundedSender<String>,
}

struct ControllerConn {
    tx: mpsc::UnboundedSender<String>,
    subscribed_tab_id: Option<u64>,
}

#[derive(Clone)]
pub struct GatewayState {
    world: Arc<Mutex<WorldState>>,
    policy: Arc<Mutex<PolicyEngine>>,
    audit: Arc<Option<AuditLogger>>,
    agents: Arc<Mutex<Vec<AgentConn>>>,
    controllers: Arc<Mutex<HashMap<u64, ControllerConn>>>,
    pending: PendingCommands,
    next_conn_id: Arc<AtomicU64>,
    remote: Arc<dyn RemoteDebug>,
    command_timeout: Duration,
}

pub struct Gateway {
    config: Config,
    state: GatewayState,
}

impl Gateway {
    pub fn new(config: Config) -> Self {
        let remote: Arc<dyn RemoteDebug> =
            Arc::new(CdpRemote::new(config.gateway.remote_debug_port));
        let state = GatewayState {
            world: Arc::new(Mutex::new(WorldState::new())),
            policy: Arc::new(Mutex::new(PolicyEngine::new(config.policy.clone()))),
            audit: Arc::new(None),
            agents: Arc::new(Mutex::new(Vec::new())),
            controllers: Arc::new(Mutex::new(HashMap::new())),
            pending: PendingCommands::new(),
            next_conn_id: Arc::new(AtomicU64::new(1)),
            remote,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        };
        Self { config, state }
    }

    /// Replace the remote-debug client (tests use a mock).
    pub fn with_remote(mut self, remote: Arc<dyn RemoteDebug>) -> Self {
        self.state.remote = remote;
        self
    }

    /// Shorten the pending-command timeout (tests).
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.state.command_timeout = timeout;
        self
    }

    /// Enable the JSONL audit log.
    pub fn with_audit_dir(mut self, dir: std::path::PathBuf) -> Self {
        if self.config.policy.log_all_commands {
            self.state.audit = Arc::new(Some(AuditLogger::new(dir)));
        }
        self
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/agent", get(agent_ws))
            .route("/controller", get(controller_ws))
            .route("/ws", get(controller_ws))
            .route("/status", get(handle_status))
            .route("/tabs", get(handle_tabs))
            .route("/tabs/:tab_id/candidates", get(handle_candidates))
            .route("/tabs/:tab_id/search", get(handle_search))
            .route("/command", post(handle_command))
            .route("/policy", get(handle_policy_get).post(handle_policy_set))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve forever.
    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.gateway.host, self.config.gateway.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| tabsense_core::Error::Transport(format!("bind {}: {}", addr, e)))?;
        info!(addr = %addr, "gateway listening");
        self.serve(listener).await
    }

    /// Serve on an already-bound listener (tests use port 0).
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let router = self.router();
        axum::serve(listener, router)
            .await
            .map_err(|e| tabsense_core::Error::Transport(format!("serve: {}", e)))?;
        Ok(())
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn audit_log(
    state: &GatewayState,
    command_id: &str,
    kind: &str,
    tab_id: u64,
    outcome: &str,
    reason: Option<&str>,
) {
    info!(
        command_id,
        kind, tab_id, outcome, reason = reason.unwrap_or(""), "command audit"
    );
    if let Some(logger) = state.audit.as_ref() {
        logger.log_command(command_id, kind, tab_id, outcome, reason);
    }
}

// ---------------------------------------------------------------------------
// Agent endpoint
// ---------------------------------------------------------------------------

async fn agent_ws(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> Response {
    ws.on_upgrade(move |socket| handle_agent_socket(socket, state))
}

async fn handle_agent_socket(socket: WebSocket, state: GatewayState) {
    let conn_id = state.next_conn_id.fetch_add(1, Ordering::SeqCst);
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    {
        let mut agents = state.agents.lock().await;
        agents.push(AgentConn { id: conn_id, tx });
        if agents.len() > 1 {
            // Tolerated, but commands only go to the first open socket.
            warn!(agents = agents.len(), "multiple agent connections");
        }
    }
    info!(conn_id, "agent connected");

    let (mut sink, mut stream) = socket.split();
    let send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => handle_agent_frame(&state, &text).await,
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "agent socket error");
                break;
            }
        }
    }

    send_task.abort();
    state.agents.lock().await.retain(|a| a.id != conn_id);
    info!(conn_id, "agent disconnected");
}

/// Each inbound frame is parsed in isolation; malformed frames are logged
/// and dropped without touching the connection.
async fn handle_agent_frame(state: &GatewayState, text: &str) {
    let msg: AgentMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "dropping malformed agent frame");
            return;
        }
    };

    match &msg {
        AgentMessage::Ack {
            tab_id,
            command_id,
            ..
        } => {
            resolve_pending(state, command_id, *tab_id, &msg, text).await;
        }
        _ => {
            let tab_id = msg.tab_id();
            state.world.lock().await.apply(&msg, now_ms());
            broadcast(state, tab_id, text, None).await;
        }
    }
}

/// Fan a frame out to every controller whose subscription filter matches.
async fn broadcast(state: &GatewayState, tab_id: u64, text: &str, except: Option<u64>) {
    let controllers = state.controllers.lock().await;
    for (id, conn) in controllers.iter() {
        if Some(*id) == except {
            continue;
        }
        let wants = conn.subscribed_tab_id.is_none() || conn.subscribed_tab_id == Some(tab_id);
        if wants {
            let _ = conn.tx.send(text.to_string());
        }
    }
}

/// Resolve an inbound ack against the pending table. The requester gets
/// the ack exactly once through its pending entry; other matching
/// subscribers see it mirrored. Acks with no pending entry (duplicates
/// after timeout, or redelivery across agent reconnect) are dropped.
async fn resolve_pending(
    state: &GatewayState,
    command_id: &str,
    tab_id: u64,
    frame: &AgentMessage,
    text: &str,
) {
    let entry = match state.pending.take(command_id).await {
        Some(e) => e,
        None => {
            debug!(command_id, "dropping ack with no pending entry");
            return;
        }
    };
    audit_log(state, command_id, entry.kind, tab_id, "acked", None);

    match entry.waiter {
        AckWaiter::Conn(conn_id) => {
            {
                let controllers = state.controllers.lock().await;
                if let Some(conn) = controllers.get(&conn_id) {
                    let _ = conn.tx.send(text.to_string());
                }
            }
            broadcast(state, tab_id, text, Some(conn_id)).await;
        }
        AckWaiter::Oneshot(tx) => {
            let _ = tx.send(frame.clone());
            broadcast(state, tab_id, text, None).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Command pipeline
// ---------------------------------------------------------------------------

/// Deliver a synthesized or forwarded ack frame to one waiter.
async fn deliver(state: &GatewayState, waiter: AckWaiter, frame: AgentMessage) {
    match waiter {
        AckWaiter::Conn(conn_id) => {
            let text = match serde_json::to_string(&frame) {
                Ok(t) => t,
                Err(_) => return,
            };
            let controllers = state.controllers.lock().await;
            if let Some(conn) = controllers.get(&conn_id) {
                let _ = conn.tx.send(text);
            }
        }
        AckWaiter::Oneshot(tx) => {
            let _ = tx.send(frame);
        }
    }
}

fn fail_frame(tab_id: u64, command_id: &str, reason: &str) -> AgentMessage {
    AgentMessage::Ack {
        tab_id,
        command_id: command_id.to_string(),
        ack: CommandAck::fail(reason),
    }
}

/// The `act` pipeline: id assignment, policy, transport, pending entry
/// with timeout. Every path resolves the waiter exactly once.
async fn submit_act(state: &GatewayState, waiter: AckWaiter, mut cmd: CommandEnvelope) {
    let command_id = cmd
        .command_id
        .clone()
        .unwrap_or_else(ids::command_id);
    cmd.command_id = Some(command_id.clone());
    let kind = cmd.op.kind();
    let tab_id = cmd.tab_id;

    // Policy inputs: the tab's url and the target candidate's name.
    let (tab_url, candidate_name) = {
        let world = state.world.lock().await;
        let url = world
            .tab(tab_id)
            .map(|t| t.url.clone())
            .unwrap_or_default();
        let name = cmd
            .op
            .target_id()
            .and_then(|id| world.candidate(tab_id, id))
            .map(|c| c.name.clone());
        (url, name)
    };

    let verdict = state
        .policy
        .lock()
        .await
        .check(kind, &tab_url, candidate_name.as_deref(), now_ms());
    if let Err(reason) = verdict {
        audit_log(state, &command_id, kind, tab_id, "denied", Some(&reason));
        deliver(state, waiter, fail_frame(tab_id, &command_id, &reason)).await;
        return;
    }

    let agent_tx = state.agents.lock().await.first().map(|a| a.tx.clone());
    let agent_tx = match agent_tx {
        Some(tx) => tx,
        None => {
            let reason = "No extension connected";
            audit_log(state, &command_id, kind, tab_id, "failed", Some(reason));
            deliver(state, waiter, fail_frame(tab_id, &command_id, reason)).await;
            return;
        }
    };

    let text = match serde_json::to_string(&cmd) {
        Ok(t) => t,
        Err(e) => {
            let reason = format!("Failed to encode command: {}", e);
            deliver(state, waiter, fail_frame(tab_id, &command_id, &reason)).await;
            return;
        }
    };

    // Register the pending entry before transmitting, so even an
    // immediate ack finds it.
    let on_timeout = {
        let state = state.clone();
        let command_id = command_id.clone();
        move |entry: crate::pending::PendingEntry| async move {
            audit_log(
                &state,
                &command_id,
                entry.kind,
                tab_id,
                "failed",
                Some("Command timeout"),
            );
            deliver(
                &state,
                entry.waiter,
                fail_frame(tab_id, &command_id, "Command timeout"),
            )
            .await;
        }
    };
    state
        .pending
        .register(
            command_id.clone(),
            waiter,
            kind,
            state.command_timeout,
            on_timeout,
        )
        .await;

    if agent_tx.send(text).is_err() {
        // The agent socket went away between lookup and send; unwind the
        // entry and fail like a missing agent.
        if let Some(entry) = state.pending.take(&command_id).await {
            let reason = "No extension connected";
            audit_log(state, &command_id, kind, tab_id, "failed", Some(reason));
            deliver(state, entry.waiter, fail_frame(tab_id, &command_id, reason)).await;
        }
        return;
    }
    audit_log(state, &command_id, kind, tab_id, "allowed", None);
}

// ---------------------------------------------------------------------------
// Controller endpoint
// ---------------------------------------------------------------------------

async fn controller_ws(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> Response {
    ws.on_upgrade(move |socket| handle_controller_socket(socket, state))
}

async fn handle_controller_socket(socket: WebSocket, state: GatewayState) {
    let conn_id = state.next_conn_id.fetch_add(1, Ordering::SeqCst);
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    state.controllers.lock().await.insert(
        conn_id,
        ControllerConn {
            tx: tx.clone(),
            subscribed_tab_id: None,
        },
    );
    info!(conn_id, "controller connected");

    let (mut sink, mut stream) = socket.split();
    let send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                handle_controller_frame(&state, conn_id, &tx, &text).await;
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "controller socket error");
                break;
            }
        }
    }

    send_task.abort();
    state.controllers.lock().await.remove(&conn_id);
    info!(conn_id, "controller disconnected");
}

fn send_reply(tx: &mpsc::UnboundedSender<String>, reply: &GatewayReply) {
    if let Ok(text) = serde_json::to_string(reply) {
        let _ = tx.send(text);
    }
}

async fn handle_controller_frame(
    state: &GatewayState,
    conn_id: u64,
    tx: &mpsc::UnboundedSender<String>,
    text: &str,
) {
    let request: ControllerRequest = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            send_reply(
                tx,
                &GatewayReply::Error {
                    message: format!("Malformed request: {}", e),
                },
            );
            return;
        }
    };

    match request {
        ControllerRequest::Subscribe { tab_id } => {
            if let Some(conn) = state.controllers.lock().await.get_mut(&conn_id) {
                conn.subscribed_tab_id = tab_id;
            }
            send_reply(tx, &GatewayReply::Subscribed { tab_id });
            // A fresh subscriber wants current state: ask the agent for a
            // full snapshot of that tab.
            if let Some(tab_id) = tab_id {
                let control = CommandEnvelope {
                    command_id: None,
                    tab_id,
                    op: tabsense_core::protocol::CommandOp::RequestSnapshot,
                };
                if let (Some(agent), Ok(text)) = (
                    state.agents.lock().await.first(),
                    serde_json::to_string(&control),
                ) {
                    let _ = agent.tx.send(text);
                }
            }
        }
        ControllerRequest::ListTabs => {
            let tabs = state.world.lock().await.tab_summaries();
            send_reply(tx, &GatewayReply::Tabs { tabs });
        }
        ControllerRequest::Query {
            tab_id,
            search,
            filters,
        } => {
            let result = state.world.lock().await.search(
                tab_id,
                search.as_deref().unwrap_or(""),
                filters.as_ref(),
            );
            match result {
                Some(matches) => {
                    send_reply(tx, &GatewayReply::Candidates { tab_id, matches });
                }
                None => send_reply(
                    tx,
                    &GatewayReply::Error {
                        message: format!("Unknown tab: {}", tab_id),
                    },
                ),
            }
        }
        ControllerRequest::Act { command } => {
            submit_act(state, AckWaiter::Conn(conn_id), command).await;
        }
        ControllerRequest::Navigate { url } => {
            let reply = match state.remote.navigate(&url).await {
                Ok(()) => GatewayReply::NavigateResult {
                    ok: true,
                    url,
                    error: None,
                },
                Err(e) => GatewayReply::NavigateResult {
                    ok: false,
                    url,
                    error: Some(e.to_string()),
                },
            };
            send_reply(tx, &reply);
        }
        ControllerRequest::CdpStatus => {
            let status = state.remote.status().await;
            send_reply(
                tx,
                &GatewayReply::CdpStatus {
                    connected: status.connected,
                    browser: status.browser,
                    error: status.error,
                },
            );
        }
        ControllerRequest::CdpType { text: input } => {
            let reply = match state.remote.type_text(&input).await {
                Ok(()) => GatewayReply::CdpTypeResult {
                    ok: true,
                    error: None,
                },
                Err(e) => GatewayReply::CdpTypeResult {
                    ok: false,
                    error: Some(e.to_string()),
                },
            };
            send_reply(tx, &reply);
        }
        ControllerRequest::CdpKey { key } => {
            let reply = match state.remote.press_key(&key).await {
                Ok(()) => GatewayReply::CdpKeyResult {
                    ok: true,
                    error: None,
                },
                Err(e) => GatewayReply::CdpKeyResult {
                    ok: false,
                    error: Some(e.to_string()),
                },
            };
            send_reply(tx, &reply);
        }
        ControllerRequest::CdpEval { expression } => {
            let reply = match state.remote.evaluate(&expression).await {
                Ok(value) => GatewayReply::CdpEvalResult {
                    ok: true,
                    value: Some(value),
                    error: None,
                },
                Err(e) => GatewayReply::CdpEvalResult {
                    ok: false,
                    value: None,
                    error: Some(e.to_string()),
                },
            };
            send_reply(tx, &reply);
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP read surface
// ---------------------------------------------------------------------------

async fn handle_status(State(state): State<GatewayState>) -> impl IntoResponse {
    let tabs = state.world.lock().await.tab_summaries();
    let agents = state.agents.lock().await.len();
    let controllers = state.controllers.lock().await.len();
    let policy = state.policy.lock().await;
    let (per_second, per_minute) = policy.window_counts(now_ms());

    Json(serde_json::json!({
        "agents": agents,
        "controllers": controllers,
        "tabs": tabs,
        "policy": policy.config(),
        "rateLimit": {
            "lastSecond": per_second,
            "lastMinute": per_minute,
        },
    }))
}

async fn handle_tabs(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(state.world.lock().await.tab_summaries())
}

async fn handle_candidates(
    State(state): State<GatewayState>,
    AxumPath(tab_id): AxumPath<u64>,
) -> Response {
    match state.world.lock().await.candidates(tab_id) {
        Some(candidates) => Json(candidates).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("Unknown tab: {}", tab_id) })),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
    role: Option<String>,
    tag: Option<String>,
}

async fn handle_search(
    State(state): State<GatewayState>,
    AxumPath(tab_id): AxumPath<u64>,
    Query(params): Query<SearchParams>,
) -> Response {
    let filters = SearchFilters {
        role: params.role,
        tag: params.tag,
        ..Default::default()
    };
    match state
        .world
        .lock()
        .await
        .search(tab_id, &params.q, Some(&filters))
    {
        Some(matches) => Json(matches).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("Unknown tab: {}", tab_id) })),
        )
            .into_response(),
    }
}

/// Equivalent to a controller `act`, answered with the resolved ack.
async fn handle_command(
    State(state): State<GatewayState>,
    Json(cmd): Json<CommandEnvelope>,
) -> Response {
    let (ack_tx, ack_rx) = oneshot::channel();
    submit_act(&state, AckWaiter::Oneshot(ack_tx), cmd).await;

    // The pipeline resolves every waiter, so the extra grace here only
    // covers task scheduling.
    let wait = state.command_timeout + Duration::from_secs(5);
    match tokio::time::timeout(wait, ack_rx).await {
        Ok(Ok(frame)) => Json(frame).into_response(),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": "command resolution lost" })),
        )
            .into_response(),
    }
}

async fn handle_policy_get(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(state.policy.lock().await.config().clone())
}

async fn handle_policy_set(
    State(state): State<GatewayState>,
    Json(config): Json<PolicyConfig>,
) -> impl IntoResponse {
    state.policy.lock().await.set_config(config.clone());
    info!("policy updated at runtime");
    Json(serde_json::json!({ "status": "ok", "policy": config }))
}
