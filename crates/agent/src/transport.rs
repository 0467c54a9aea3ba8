//! Gateway link for the in-page agent.
//!
//! One websocket, kept alive with bounded reconnects and heartbeats.
//! Telemetry produced while the socket is down queues FIFO and drains on
//! the next open; past the backpressure threshold the queue collapses to
//! the most recent resync frames (hello/snapshot), since a fresh full
//! state makes the dropped deltas moot. Inbound frames are parsed in
//! isolation and forwarded to the runtime; a malformed frame is logged and
//! dropped, never fatal.

use std::collections::VecDeque;
use std::time::Duration;

use futures::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use tabsense_core::config::TransportConfig;
use tabsense_core::protocol::{AgentMessage, CommandEnvelope};

/// How many resync frames survive a queue collapse.
const RESYNC_KEEP: usize = 10;

/// Cloneable sender the agent runtime uses for all outbound telemetry.
#[derive(Clone)]
pub struct AgentHandle {
    tx: mpsc::UnboundedSender<AgentMessage>,
}

impl AgentHandle {
    pub fn send(&self, msg: AgentMessage) {
        let _ = self.tx.send(msg);
    }
}

/// Offline telemetry queue with the backpressure collapse rule.
pub(crate) struct OfflineQueue {
    items: VecDeque<AgentMessage>,
    threshold: usize,
}

impl OfflineQueue {
    pub(crate) fn new(threshold: usize) -> Self {
        Self {
            items: VecDeque::new(),
            threshold,
        }
    }

    pub(crate) fn push(&mut self, msg: AgentMessage) {
        self.items.push_back(msg);
        if self.items.len() > self.threshold {
            let resync: Vec<AgentMessage> = self
                .items
                .drain(..)
                .filter(|m| m.is_resync())
                .collect();
            let skip = resync.len().saturating_sub(RESYNC_KEEP);
            self.items = resync.into_iter().skip(skip).collect();
            debug!(kept = self.items.len(), "offline queue collapsed to resync frames");
        }
    }

    pub(crate) fn pop_front(&mut self) -> Option<AgentMessage> {
        self.items.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }
}

enum PumpEnd {
    /// Socket closed or errored; reconnect.
    Closed,
    /// The runtime dropped its handle; stop for good.
    Shutdown,
}

pub struct AgentTransport {
    cfg: TransportConfig,
    tab_id: u64,
    gateway_url: String,
    outbound_rx: mpsc::UnboundedReceiver<AgentMessage>,
    queue: OfflineQueue,
    inbound_tx: mpsc::UnboundedSender<CommandEnvelope>,
}

impl AgentTransport {
    /// Returns the transport plus the outbound handle and the inbound
    /// command stream for the runtime.
    pub fn new(
        gateway_url: &str,
        tab_id: u64,
        cfg: TransportConfig,
    ) -> (
        Self,
        AgentHandle,
        mpsc::UnboundedReceiver<CommandEnvelope>,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let queue = OfflineQueue::new(cfg.backpressure_threshold);
        (
            Self {
                cfg,
                tab_id,
                gateway_url: gateway_url.to_string(),
                outbound_rx: out_rx,
                queue,
                inbound_tx: in_tx,
            },
            AgentHandle { tx: out_tx },
            in_rx,
        )
    }

    /// Connection loop: connect, pump until close, wait, retry. Attempts
    /// reset on every successful open.
    pub async fn run(mut self) {
        let mut attempts: u32 = 0;
        loop {
            match connect_async(&self.gateway_url).await {
                Ok((ws, _)) => {
                    info!(url = %self.gateway_url, tab_id = self.tab_id, "agent connected to gateway");
                    attempts = 0;
                    match self.pump(ws).await {
                        PumpEnd::Shutdown => return,
                        PumpEnd::Closed => {
                            warn!("gateway connection closed");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "gateway connect failed");
                }
            }

            attempts += 1;
            if attempts >= self.cfg.max_reconnect_attempts {
                error!(attempts, "giving up on gateway reconnect");
                return;
            }
            if !self
                .sleep_and_enqueue(Duration::from_millis(self.cfg.reconnect_interval_ms))
                .await
            {
                return;
            }
        }
    }

    /// Queue outbound traffic while waiting out the reconnect interval.
    /// Returns false when the runtime has shut down.
    async fn sleep_and_enqueue(&mut self, dur: Duration) -> bool {
        let deadline = tokio::time::sleep(dur);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => return true,
                m = self.outbound_rx.recv() => match m {
                    Some(m) => self.queue.push(m),
                    None => return false,
                },
            }
        }
    }

    async fn pump(
        &mut self,
        ws: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) -> PumpEnd {
        let (mut sink, mut stream) = ws.split();

        // Drain the offline queue first, FIFO.
        while let Some(mut msg) = self.queue.pop_front() {
            msg.set_tab_id(self.tab_id);
            if !send_frame(&mut sink, &msg).await {
                self.queue.push(msg);
                return PumpEnd::Closed;
            }
        }

        let mut heartbeat =
            tokio::time::interval(Duration::from_millis(self.cfg.heartbeat_interval_ms));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    let beat = AgentMessage::Heartbeat {
                        tab_id: self.tab_id,
                        timestamp: chrono::Utc::now().timestamp_millis(),
                    };
                    if !send_frame(&mut sink, &beat).await {
                        return PumpEnd::Closed;
                    }
                }
                out = self.outbound_rx.recv() => match out {
                    Some(mut msg) => {
                        msg.set_tab_id(self.tab_id);
                        if !send_frame(&mut sink, &msg).await {
                            self.queue.push(msg);
                            return PumpEnd::Closed;
                        }
                    }
                    None => return PumpEnd::Shutdown,
                },
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_inbound(&text),
                    Some(Ok(Message::Close(_))) | None => return PumpEnd::Closed,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket read error");
                        return PumpEnd::Closed;
                    }
                },
            }
        }
    }

    fn handle_inbound(&self, text: &str) {
        match serde_json::from_str::<CommandEnvelope>(text) {
            Ok(cmd) => {
                if self.inbound_tx.send(cmd).is_err() {
                    debug!("runtime dropped inbound receiver");
                }
            }
            Err(e) => {
                warn!(error = %e, "dropping malformed inbound frame");
            }
        }
    }
}

async fn send_frame<S>(sink: &mut S, msg: &AgentMessage) -> bool
where
    S: Sink<Message> + Unpin,
{
    let text = match serde_json::to_string(msg) {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "failed to serialize outbound message");
            return true;
        }
    };
    sink.send(Message::Text(text)).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabsense_core::types::Viewport;

    fn hello(n: u64) -> AgentMessage {
        AgentMessage::Hello {
            tab_id: n,
            url: format!("https://x/{n}"),
            viewport: Viewport::default(),
            user_agent: "test".into(),
        }
    }

    fn delta(n: u64) -> AgentMessage {
        AgentMessage::Delta {
            tab_id: n,
            added: vec![],
            removed: vec![format!("a_{n}")],
            updated: vec![],
        }
    }

    #[test]
    fn queue_keeps_fifo_under_threshold() {
        let mut q = OfflineQueue::new(100);
        q.push(hello(1));
        q.push(delta(2));
        assert_eq!(q.len(), 2);
        assert!(matches!(q.pop_front(), Some(AgentMessage::Hello { .. })));
        assert!(matches!(q.pop_front(), Some(AgentMessage::Delta { .. })));
    }

    #[test]
    fn overflow_collapses_to_last_ten_resync_frames() {
        let mut q = OfflineQueue::new(100);
        // 85 deltas, then 15 hellos, then deltas up to the 101st push.
        for i in 0..85 {
            q.push(delta(i));
        }
        for i in 0..15 {
            q.push(hello(i));
        }
        assert_eq!(q.len(), 100);
        q.push(delta(999));

        assert_eq!(q.len(), RESYNC_KEEP);
        let mut tab_ids = Vec::new();
        while let Some(m) = q.pop_front() {
            match m {
                AgentMessage::Hello { tab_id, .. } => tab_ids.push(tab_id),
                other => panic!("expected only hello frames, got {other:?}"),
            }
        }
        // The *last* ten of the fifteen hellos survive.
        assert_eq!(tab_ids, (5..15).collect::<Vec<u64>>());
    }

    #[test]
    fn overflow_with_no_resync_frames_empties_the_queue() {
        let mut q = OfflineQueue::new(5);
        for i in 0..6 {
            q.push(delta(i));
        }
        assert_eq!(q.len(), 0);
    }
}
