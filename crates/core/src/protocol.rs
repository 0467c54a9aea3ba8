//! Wire protocol: every message is UTF-8 JSON, one message per websocket
//! frame, tagged by a `type` discriminator.
//!
//! Three vocabularies share this module: agent telemetry (agent → gateway),
//! commands (gateway → agent), and the controller request/event pair. Acks
//! are tagged by `status` and flattened into their carrier frames so the
//! wire shape stays `{"type":"ack","status":"verify",...}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::search::SearchFilters;
use crate::types::{
    ActionCandidate, CandidateUpdate, PointerState, Rect, TabSummary, Viewport,
};

// ---------------------------------------------------------------------------
// Agent → Gateway telemetry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AgentMessage {
    /// Announces a tab. Sent once on watcher start and again after
    /// reconnects; the gateway refreshes rather than resets existing state.
    Hello {
        tab_id: u64,
        url: String,
        viewport: Viewport,
        user_agent: String,
    },
    /// Full replacement of a tab's candidate set.
    Snapshot {
        tab_id: u64,
        url: String,
        viewport: Viewport,
        candidates: Vec<ActionCandidate>,
    },
    /// Incremental update: added full records, removed ids, per-id field
    /// updates.
    Delta {
        tab_id: u64,
        #[serde(default)]
        added: Vec<ActionCandidate>,
        #[serde(default)]
        removed: Vec<String>,
        #[serde(default)]
        updated: Vec<CandidateUpdate>,
    },
    Pointer {
        tab_id: u64,
        x: i32,
        y: i32,
        buttons: u32,
    },
    /// Page-level happenings (modal_opened, menu_closed, unload, ...).
    Event {
        tab_id: u64,
        name: String,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        data: Value,
    },
    Heartbeat {
        #[serde(default)]
        tab_id: u64,
        timestamp: i64,
    },
    /// Response to a previously delivered command.
    Ack {
        tab_id: u64,
        command_id: String,
        #[serde(flatten)]
        ack: CommandAck,
    },
}

impl AgentMessage {
    /// Stamp the sending tab's id into the message. The transport applies
    /// this to every outbound frame.
    pub fn set_tab_id(&mut self, id: u64) {
        match self {
            AgentMessage::Hello { tab_id, .. }
            | AgentMessage::Snapshot { tab_id, .. }
            | AgentMessage::Delta { tab_id, .. }
            | AgentMessage::Pointer { tab_id, .. }
            | AgentMessage::Event { tab_id, .. }
            | AgentMessage::Heartbeat { tab_id, .. }
            | AgentMessage::Ack { tab_id, .. } => *tab_id = id,
        }
    }

    pub fn tab_id(&self) -> u64 {
        match self {
            AgentMessage::Hello { tab_id, .. }
            | AgentMessage::Snapshot { tab_id, .. }
            | AgentMessage::Delta { tab_id, .. }
            | AgentMessage::Pointer { tab_id, .. }
            | AgentMessage::Event { tab_id, .. }
            | AgentMessage::Heartbeat { tab_id, .. }
            | AgentMessage::Ack { tab_id, .. } => *tab_id,
        }
    }

    /// True for the message kinds worth keeping when the offline queue
    /// overflows: full-state frames that let the gateway resynchronize.
    pub fn is_resync(&self) -> bool {
        matches!(
            self,
            AgentMessage::Hello { .. } | AgentMessage::Snapshot { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Gateway → Agent commands
// ---------------------------------------------------------------------------

/// Outbound command frame. `command_id` is absent only on control messages
/// (`request_snapshot`); anything carrying one is dispatched to the
/// executor and must be acknowledged exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_id: Option<String>,
    #[serde(default)]
    pub tab_id: u64,
    #[serde(flatten)]
    pub op: CommandOp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum CommandOp {
    Click {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        button: Option<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        modifiers: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        click_count: Option<u32>,
    },
    Type {
        id: String,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<TypeMode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        clear_first: Option<bool>,
        /// Milliseconds to wait between characters.
        #[serde(default, rename = "delay", skip_serializing_if = "Option::is_none")]
        delay_ms: Option<u64>,
    },
    Hover {
        id: String,
        /// Milliseconds to linger after the hover sequence.
        #[serde(default, rename = "duration", skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    Scroll {
        dx: i32,
        dy: i32,
        /// Candidate id to scroll, or `"viewport"`/absent for the window.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
    Focus {
        id: String,
    },
    Select {
        id: String,
        value: SelectValue,
    },
    MoveMouse {
        x: i32,
        y: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        steps: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        curve: Option<MouseCurve>,
        #[serde(default, rename = "duration", skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    Query {
        search: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filters: Option<SearchFilters>,
    },
    RequestSnapshot,
}

impl CommandOp {
    /// Name used in audit records and policy decisions.
    pub fn kind(&self) -> &'static str {
        match self {
            CommandOp::Click { .. } => "click",
            CommandOp::Type { .. } => "type",
            CommandOp::Hover { .. } => "hover",
            CommandOp::Scroll { .. } => "scroll",
            CommandOp::Focus { .. } => "focus",
            CommandOp::Select { .. } => "select",
            CommandOp::MoveMouse { .. } => "move_mouse",
            CommandOp::Query { .. } => "query",
            CommandOp::RequestSnapshot => "request_snapshot",
        }
    }

    /// The candidate id this command targets, when it targets one.
    pub fn target_id(&self) -> Option<&str> {
        match self {
            CommandOp::Click { id, .. }
            | CommandOp::Type { id, .. }
            | CommandOp::Hover { id, .. }
            | CommandOp::Focus { id }
            | CommandOp::Select { id, .. } => Some(id),
            CommandOp::Scroll { target, .. } => {
                target.as_deref().filter(|t| *t != "viewport")
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeMode {
    Append,
    Replace,
    Prepend,
}

/// Select accepts a single value or a list (for multi-select controls).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectValue {
    One(String),
    Many(Vec<String>),
}

impl SelectValue {
    pub fn values(&self) -> Vec<&str> {
        match self {
            SelectValue::One(v) => vec![v.as_str()],
            SelectValue::Many(vs) => vs.iter().map(|s| s.as_str()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MouseCurve {
    Linear,
    EaseInOut,
    Smoothstep,
}

// ---------------------------------------------------------------------------
// Command acknowledgments
// ---------------------------------------------------------------------------

/// Post-execution re-read of the target element, carried by `verify` acks
/// in lieu of a success/fail boolean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    pub id: String,
    pub still_visible: bool,
    pub hit_test_ok: bool,
    pub rect_changed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_rect: Option<Rect>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommandAck {
    Ok {
        #[serde(flatten)]
        data: serde_json::Map<String, Value>,
    },
    Fail {
        reason: String,
    },
    Verify {
        verification: Verification,
    },
}

impl CommandAck {
    pub fn ok() -> Self {
        CommandAck::Ok {
            data: serde_json::Map::new(),
        }
    }

    /// `ok` with extra fields, e.g. `ok_with(json!({"value": v}))`.
    pub fn ok_with(data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        CommandAck::Ok { data }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        CommandAck::Fail {
            reason: reason.into(),
        }
    }

    pub fn verify(verification: Verification) -> Self {
        CommandAck::Verify { verification }
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, CommandAck::Fail { .. })
    }
}

// ---------------------------------------------------------------------------
// Controller → Gateway requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ControllerRequest {
    /// Restrict telemetry fan-out to one tab; absent id clears the filter.
    Subscribe {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tab_id: Option<u64>,
    },
    ListTabs,
    Query {
        tab_id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        search: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filters: Option<SearchFilters>,
    },
    Act {
        command: CommandEnvelope,
    },
    Navigate {
        url: String,
    },
    CdpStatus,
    CdpType {
        text: String,
    },
    CdpKey {
        key: String,
    },
    CdpEval {
        expression: String,
    },
}

// ---------------------------------------------------------------------------
// Gateway → Controller events
// ---------------------------------------------------------------------------

/// Replies the gateway originates itself (as opposed to mirrored agent
/// telemetry).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum GatewayReply {
    Tabs {
        tabs: Vec<TabSummary>,
    },
    Candidates {
        tab_id: u64,
        matches: Vec<ActionCandidate>,
    },
    Subscribed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tab_id: Option<u64>,
    },
    NavigateResult {
        ok: bool,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    CdpStatus {
        connected: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        browser: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    CdpTypeResult {
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    CdpKeyResult {
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    CdpEvalResult {
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Error {
        message: String,
    },
}

/// Everything a controller connection can receive. The two halves have
/// disjoint `type` tags, so the untagged split is unambiguous.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControllerEvent {
    Reply(GatewayReply),
    Telemetry(AgentMessage),
}

impl ControllerEvent {
    /// Tab id used by the per-subscriber broadcast filter. Gateway replies
    /// are request/response traffic and are never filtered.
    pub fn filter_tab_id(&self) -> Option<u64> {
        match self {
            ControllerEvent::Telemetry(m) => Some(m.tab_id()),
            ControllerEvent::Reply(_) => None,
        }
    }
}

/// Convenience for the gateway: the last pointer update as telemetry.
impl From<PointerState> for AgentMessage {
    fn from(p: PointerState) -> Self {
        AgentMessage::Pointer {
            tab_id: 0,
            x: p.x,
            y: p.y,
            buttons: p.buttons,
        }
    }
}
