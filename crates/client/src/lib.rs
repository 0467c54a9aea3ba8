//! Controller client: request/response over the gateway websocket, an
//! event subscription stream, and high-level convenience operations.
//!
//! The gateway answers non-act requests in submission order on each
//! connection, so replies correlate FIFO by expected kind. Acks correlate
//! by command id; everything else (mirrored telemetry, acks for other
//! controllers' commands) flows out the event stream untouched.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use tabsense_core::ids;
use tabsense_core::protocol::{
    AgentMessage, CommandAck, CommandEnvelope, CommandOp, ControllerEvent,
    ControllerRequest, GatewayReply,
};
use tabsense_core::search::SearchFilters;
use tabsense_core::types::{ActionCandidate, TabSummary};
use tabsense_core::{Error, Result};

/// How long a non-act request may wait for its reply.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Acks are guaranteed within the gateway's 30 s command timeout; the
/// margin covers transit.
const ACK_TIMEOUT: Duration = Duration::from_secs(35);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyKind {
    Tabs,
    Candidates,
    Subscribed,
    NavigateResult,
    CdpStatus,
    CdpTypeResult,
    CdpKeyResult,
    CdpEvalResult,
}

fn kind_of(reply: &GatewayReply) -> Option<ReplyKind> {
    match reply {
        GatewayReply::Tabs { .. } => Some(ReplyKind::Tabs),
        GatewayReply::Candidates { .. } => Some(ReplyKind::Candidates),
        GatewayReply::Subscribed { .. } => Some(ReplyKind::Subscribed),
        GatewayReply::NavigateResult { .. } => Some(ReplyKind::NavigateResult),
        GatewayReply::CdpStatus { .. } => Some(ReplyKind::CdpStatus),
        GatewayReply::CdpTypeResult { .. } => Some(ReplyKind::CdpTypeResult),
        GatewayReply::CdpKeyResult { .. } => Some(ReplyKind::CdpKeyResult),
        GatewayReply::CdpEvalResult { .. } => Some(ReplyKind::CdpEvalResult),
        GatewayReply::Error { .. } => None,
    }
}

type ReplyWaiter = (
    ReplyKind,
    oneshot::Sender<std::result::Result<GatewayReply, String>>,
);

struct Shared {
    reply_waiters: Mutex<VecDeque<ReplyWaiter>>,
    ack_waiters: Mutex<HashMap<String, oneshot::Sender<AgentMessage>>>,
}

pub struct ControllerClient {
    out_tx: mpsc::UnboundedSender<String>,
    shared: Arc<Shared>,
}

impl ControllerClient {
    /// Connect and return the client plus the event stream carrying
    /// everything that is not the answer to one of this client's calls.
    pub async fn connect(
        url: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ControllerEvent>)> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| Error::Transport(format!("connect {}: {}", url, e)))?;
        let (mut sink, mut stream) = ws.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<ControllerEvent>();
        let shared = Arc::new(Shared {
            reply_waiters: Mutex::new(VecDeque::new()),
            ack_waiters: Mutex::new(HashMap::new()),
        });

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        let reader_shared = shared.clone();
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        route_frame(&reader_shared, &event_tx, &text).await;
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            debug!("controller connection closed");
        });

        Ok((Self { out_tx, shared }, event_rx))
    }

    fn send_raw(&self, request: &ControllerRequest) -> Result<()> {
        let text = serde_json::to_string(request)?;
        self.out_tx
            .send(text)
            .map_err(|_| Error::Transport("connection closed".into()))
    }

    async fn request(
        &self,
        kind: ReplyKind,
        request: ControllerRequest,
    ) -> Result<GatewayReply> {
        let (tx, rx) = oneshot::channel();
        self.shared.reply_waiters.lock().await.push_back((kind, tx));
        self.send_raw(&request)?;

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(Ok(reply))) => Ok(reply),
            Ok(Ok(Err(message))) => Err(Error::Other(message)),
            Ok(Err(_)) => Err(Error::Transport("connection closed".into())),
            Err(_) => Err(Error::Timeout(format!("{:?} request", kind))),
        }
    }

    // ── Protocol operations ───────────────────────────────────────────

    /// Restrict the event stream to one tab (or clear with `None`).
    pub async fn subscribe(&self, tab_id: Option<u64>) -> Result<Option<u64>> {
        match self
            .request(ReplyKind::Subscribed, ControllerRequest::Subscribe { tab_id })
            .await?
        {
            GatewayReply::Subscribed { tab_id } => Ok(tab_id),
            other => Err(unexpected(other)),
        }
    }

    pub async fn list_tabs(&self) -> Result<Vec<TabSummary>> {
        match self
            .request(ReplyKind::Tabs, ControllerRequest::ListTabs)
            .await?
        {
            GatewayReply::Tabs { tabs } => Ok(tabs),
            other => Err(unexpected(other)),
        }
    }

    pub async fn query(
        &self,
        tab_id: u64,
        search: Option<&str>,
        filters: Option<SearchFilters>,
    ) -> Result<Vec<ActionCandidate>> {
        match self
            .request(
                ReplyKind::Candidates,
                ControllerRequest::Query {
                    tab_id,
                    search: search.map(|s| s.to_string()),
                    filters,
                },
            )
            .await?
        {
            GatewayReply::Candidates { matches, .. } => Ok(matches),
            other => Err(unexpected(other)),
        }
    }

    /// Submit a command and await its single ack. A missing command id is
    /// assigned here so the ack can be correlated.
    pub async fn act(&self, mut command: CommandEnvelope) -> Result<(String, CommandAck)> {
        let command_id = command
            .command_id
            .get_or_insert_with(ids::command_id)
            .clone();

        let (tx, rx) = oneshot::channel();
        self.shared
            .ack_waiters
            .lock()
            .await
            .insert(command_id.clone(), tx);
        if let Err(e) = self.send_raw(&ControllerRequest::Act { command }) {
            self.shared.ack_waiters.lock().await.remove(&command_id);
            return Err(e);
        }

        let frame = match tokio::time::timeout(ACK_TIMEOUT, rx).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(_)) => return Err(Error::Transport("connection closed".into())),
            Err(_) => {
                self.shared.ack_waiters.lock().await.remove(&command_id);
                return Err(Error::Timeout(format!("ack for {}", command_id)));
            }
        };
        match frame {
            AgentMessage::Ack { ack, .. } => Ok((command_id, ack)),
            other => Err(Error::MalformedMessage(format!(
                "expected ack frame, got {:?}",
                other
            ))),
        }
    }

    pub async fn navigate(&self, url: &str) -> Result<()> {
        match self
            .request(
                ReplyKind::NavigateResult,
                ControllerRequest::Navigate {
                    url: url.to_string(),
                },
            )
            .await?
        {
            GatewayReply::NavigateResult { ok: true, .. } => Ok(()),
            GatewayReply::NavigateResult { error, .. } => Err(Error::Other(
                error.unwrap_or_else(|| "navigate failed".into()),
            )),
            other => Err(unexpected(other)),
        }
    }

    pub async fn cdp_status(&self) -> Result<GatewayReply> {
        self.request(ReplyKind::CdpStatus, ControllerRequest::CdpStatus)
            .await
    }

    pub async fn cdp_type(&self, text: &str) -> Result<GatewayReply> {
        self.request(
            ReplyKind::CdpTypeResult,
            ControllerRequest::CdpType {
                text: text.to_string(),
            },
        )
        .await
    }

    pub async fn cdp_key(&self, key: &str) -> Result<GatewayReply> {
        self.request(
            ReplyKind::CdpKeyResult,
            ControllerRequest::CdpKey {
                key: key.to_string(),
            },
        )
        .await
    }

    pub async fn cdp_eval(&self, expression: &str) -> Result<GatewayReply> {
        self.request(
            ReplyKind::CdpEvalResult,
            ControllerRequest::CdpEval {
                expression: expression.to_string(),
            },
        )
        .await
    }

    // ── Convenience operations ────────────────────────────────────────

    pub async fn click(&self, tab_id: u64, id: &str) -> Result<CommandAck> {
        self.simple_act(
            tab_id,
            CommandOp::Click {
                id: id.to_string(),
                button: None,
                modifiers: None,
                click_count: None,
            },
        )
        .await
    }

    pub async fn type_text(&self, tab_id: u64, id: &str, text: &str) -> Result<CommandAck> {
        self.simple_act(
            tab_id,
            CommandOp::Type {
                id: id.to_string(),
                text: text.to_string(),
                mode: None,
                clear_first: None,
                delay_ms: None,
            },
        )
        .await
    }

    pub async fn hover(&self, tab_id: u64, id: &str) -> Result<CommandAck> {
        self.simple_act(
            tab_id,
            CommandOp::Hover {
                id: id.to_string(),
                duration_ms: None,
            },
        )
        .await
    }

    pub async fn focus(&self, tab_id: u64, id: &str) -> Result<CommandAck> {
        self.simple_act(tab_id, CommandOp::Focus { id: id.to_string() })
            .await
    }

    pub async fn scroll(&self, tab_id: u64, dx: i32, dy: i32) -> Result<CommandAck> {
        self.simple_act(
            tab_id,
            CommandOp::Scroll {
                dx,
                dy,
                target: None,
            },
        )
        .await
    }

    /// Query and pick the best text match.
    pub async fn find(&self, tab_id: u64, text: &str) -> Result<Option<ActionCandidate>> {
        let matches = self.query(tab_id, Some(text), None).await?;
        Ok(tabsense_core::search::best_match(&matches, text, None).cloned())
    }

    async fn simple_act(&self, tab_id: u64, op: CommandOp) -> Result<CommandAck> {
        let (_, ack) = self
            .act(CommandEnvelope {
                command_id: None,
                tab_id,
                op,
            })
            .await?;
        Ok(ack)
    }
}

fn unexpected(reply: GatewayReply) -> Error {
    Error::MalformedMessage(format!("unexpected reply: {:?}", reply))
}

async fn route_frame(
    shared: &Arc<Shared>,
    event_tx: &mpsc::UnboundedSender<ControllerEvent>,
    text: &str,
) {
    let event: ControllerEvent = match serde_json::from_str(text) {
        Ok(ev) => ev,
        Err(e) => {
            warn!(error = %e, "dropping malformed gateway frame");
            return;
        }
    };

    match event {
        ControllerEvent::Reply(reply) => {
            let mut waiters = shared.reply_waiters.lock().await;
            match kind_of(&reply) {
                // Replies answer requests in order; an error answers the
                // oldest outstanding request.
                None => {
                    let message = match &reply {
                        GatewayReply::Error { message } => message.clone(),
                        _ => unreachable!("kind_of returns None only for Error"),
                    };
                    if let Some((_, tx)) = waiters.pop_front() {
                        let _ = tx.send(Err(message));
                    } else {
                        drop(waiters);
                        let _ = event_tx.send(ControllerEvent::Reply(reply));
                    }
                }
                Some(kind) => {
                    if waiters.front().map(|(k, _)| *k == kind).unwrap_or(false) {
                        let (_, tx) = waiters.pop_front().expect("front just checked");
                        let _ = tx.send(Ok(reply));
                    } else {
                        drop(waiters);
                        let _ = event_tx.send(ControllerEvent::Reply(reply));
                    }
                }
            }
        }
        ControllerEvent::Telemetry(msg) => {
            if let AgentMessage::Ack { command_id, .. } = &msg {
                let waiter = shared.ack_waiters.lock().await.remove(command_id);
                if let Some(tx) = waiter {
                    let _ = tx.send(msg);
                    return;
                }
            }
            let _ = event_tx.send(ControllerEvent::Telemetry(msg));
        }
    }
}
