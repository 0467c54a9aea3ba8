//! Remote debugging collaborator.
//!
//! The gateway consumes four operations from the browser's debugging
//! endpoint (navigate, raw text, raw key, evaluate) and surfaces them to
//! controllers. This module defines that seam as a trait plus the CDP
//! implementation: target discovery over `/json/list`, then commands over
//! the page target's websocket with id-correlated responses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use tabsense_core::{Error, Result};

/// Overall reachability of the debugging endpoint.
#[derive(Debug, Clone, Default)]
pub struct DebugStatus {
    pub connected: bool,
    pub browser: Option<String>,
    pub error: Option<String>,
}

#[async_trait]
pub trait RemoteDebug: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;
    /// Synthesize raw keystrokes, bypassing any element targeting.
    async fn type_text(&self, text: &str) -> Result<()>;
    async fn press_key(&self, key: &str) -> Result<()>;
    async fn evaluate(&self, expression: &str) -> Result<Value>;
    async fn status(&self) -> DebugStatus;
}

/// One live CDP connection to a page target.
struct CdpChannel {
    ws_tx: mpsc::Sender<String>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>,
    next_id: AtomicU64,
    reader: tokio::task::JoinHandle<()>,
    writer: tokio::task::JoinHandle<()>,
}

impl Drop for CdpChannel {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

impl CdpChannel {
    async fn connect(ws_url: &str) -> Result<Self> {
        let (ws, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| Error::Transport(format!("CDP connect to {}: {}", ws_url, e)))?;
        let (mut sink, mut stream) = ws.split();

        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(64);
        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let pending_reader = pending.clone();

        let writer = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if sink
                    .send(tokio_tungstenite::tungstenite::Message::Text(msg))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(tokio_tungstenite::tungstenite::Message::Text(text)) => {
                        if let Ok(val) = serde_json::from_str::<Value>(&text) {
                            if let Some(id) = val.get("id").and_then(|v| v.as_u64()) {
                                let mut pending = pending_reader.lock().await;
                                if let Some(tx) = pending.remove(&id) {
                                    let _ = tx.send(val);
                                }
                            }
                        }
                    }
                    Ok(tokio_tungstenite::tungstenite::Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            debug!("CDP reader ended");
        });

        Ok(Self {
            ws_tx,
            pending,
            next_id: AtomicU64::new(1),
            reader,
            writer,
        })
    }

    async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let msg = json!({ "id": id, "method": method, "params": params });

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        self.ws_tx
            .send(msg.to_string())
            .await
            .map_err(|e| Error::Transport(format!("CDP send: {}", e)))?;

        match tokio::time::timeout(Duration::from_secs(10), rx).await {
            Ok(Ok(response)) => {
                if let Some(err) = response.get("error") {
                    Err(Error::Transport(format!("CDP error: {}", err)))
                } else {
                    Ok(response.get("result").cloned().unwrap_or(Value::Null))
                }
            }
            Ok(Err(_)) => Err(Error::Transport("CDP response channel closed".into())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::Timeout(format!("CDP command '{}'", method)))
            }
        }
    }
}

/// CDP-backed [`RemoteDebug`] against a local browser's debugging port.
pub struct CdpRemote {
    port: u16,
    channel: Mutex<Option<CdpChannel>>,
}

impl CdpRemote {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            channel: Mutex::new(None),
        }
    }

    /// Find the first page target's websocket url via `/json/list`.
    async fn discover_page_ws(&self) -> Result<String> {
        let url = format!("http://127.0.0.1:{}/json/list", self.port);
        let resp = reqwest::get(&url)
            .await
            .map_err(|e| Error::Transport(format!("CDP endpoint unreachable: {}", e)))?;
        let targets: Vec<Value> = resp
            .json()
            .await
            .map_err(|e| Error::MalformedMessage(format!("CDP target list: {}", e)))?;

        targets
            .iter()
            .find(|t| t.get("type").and_then(|v| v.as_str()) == Some("page"))
            .and_then(|t| t.get("webSocketDebuggerUrl").and_then(|v| v.as_str()))
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Transport("no page target found".into()))
    }

    /// Ensure a channel and run one command through it. Commands are
    /// short, so the connection slot stays locked for the duration; a
    /// transport failure clears the slot so the next call rediscovers.
    async fn command(&self, method: &str, params: Value) -> Result<Value> {
        let mut guard = self.channel.lock().await;
        if guard.is_none() {
            let ws_url = self.discover_page_ws().await?;
            *guard = Some(CdpChannel::connect(&ws_url).await?);
            debug!(ws_url = %ws_url, "CDP page channel established");
        }
        let channel = guard.as_ref().expect("channel just ensured");
        let result = channel.send_command(method, params).await;
        if matches!(result, Err(Error::Transport(_)) | Err(Error::Timeout(_))) {
            warn!("CDP channel errored, will reconnect");
            *guard = None;
        }
        result
    }
}

#[async_trait]
impl RemoteDebug for CdpRemote {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.command("Page.navigate", json!({ "url": url })).await?;
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        self.command("Input.insertText", json!({ "text": text }))
            .await?;
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        let mut down = json!({
            "type": "keyDown",
            "key": key,
            "code": key,
        });
        if key.chars().count() == 1 {
            down["text"] = json!(key);
        }
        self.command("Input.dispatchKeyEvent", down).await?;
        self.command(
            "Input.dispatchKeyEvent",
            json!({ "type": "keyUp", "key": key, "code": key }),
        )
        .await?;
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        let result = self
            .command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        if let Some(exception) = result.get("exceptionDetails") {
            return Err(Error::Other(format!("evaluate threw: {}", exception)));
        }
        Ok(result
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn status(&self) -> DebugStatus {
        let url = format!("http://127.0.0.1:{}/json/version", self.port);
        match reqwest::get(&url).await {
            Ok(resp) => match resp.json::<Value>().await {
                Ok(body) => DebugStatus {
                    connected: true,
                    browser: body
                        .get("Browser")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string()),
                    error: None,
                },
                Err(e) => DebugStatus {
                    connected: false,
                    browser: None,
                    error: Some(format!("bad version payload: {}", e)),
                },
            },
            Err(e) => DebugStatus {
                connected: false,
                browser: None,
                error: Some(format!("{}", e)),
            },
        }
    }
}
