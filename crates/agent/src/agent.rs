//! The agent runtime: wires the perception engine, executor, and transport
//! for one tab.
//!
//! On start it announces the tab (`hello`), sends the initial snapshot,
//! then streams engine deltas and page events. Inbound `request_snapshot`
//! frames force a fresh full snapshot; anything
//! carrying a `commandId` goes to the executor and its ack is sent back.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use tabsense_core::config::TransportConfig;
use tabsense_core::protocol::{AgentMessage, CommandEnvelope, CommandOp};
use tabsense_dom::Document;

use crate::engine::{EngineEvent, PerceptionEngine, SharedDocument, SharedIdentity};
use crate::executor::Executor;
use crate::identity::IdentityMap;
use crate::transport::{AgentHandle, AgentTransport};

pub struct Agent {
    doc: SharedDocument,
    identity: SharedIdentity,
    tab_id: u64,
    page_url: String,
    user_agent: String,
    gateway_url: String,
    transport_cfg: TransportConfig,
}

impl Agent {
    pub fn new(
        doc: Arc<Mutex<Document>>,
        tab_id: u64,
        page_url: &str,
        user_agent: &str,
        gateway_url: &str,
        transport_cfg: TransportConfig,
    ) -> Self {
        Self {
            doc,
            identity: Arc::new(Mutex::new(IdentityMap::new())),
            tab_id,
            page_url: page_url.to_string(),
            user_agent: user_agent.to_string(),
            gateway_url: gateway_url.to_string(),
            transport_cfg,
        }
    }

    /// Run until the transport gives up or the process ends.
    pub async fn run(self) {
        let (transport, handle, inbound_rx) =
            AgentTransport::new(&self.gateway_url, self.tab_id, self.transport_cfg.clone());
        tokio::spawn(transport.run());

        let (mut engine, events_rx) =
            PerceptionEngine::new(self.doc.clone(), self.identity.clone());
        let initial = engine.start().await;
        let viewport = self.doc.lock().await.viewport();

        handle.send(AgentMessage::Hello {
            tab_id: self.tab_id,
            url: self.page_url.clone(),
            viewport,
            user_agent: self.user_agent.clone(),
        });
        handle.send(AgentMessage::Snapshot {
            tab_id: self.tab_id,
            url: self.page_url.clone(),
            viewport,
            candidates: initial,
        });
        info!(tab_id = self.tab_id, url = %self.page_url, "agent watcher started");

        let executor = Executor::new(self.doc.clone(), self.identity.clone());
        self.event_loop(engine, executor, handle, events_rx, inbound_rx)
            .await;
    }

    async fn event_loop(
        &self,
        engine: PerceptionEngine,
        executor: Executor,
        handle: AgentHandle,
        mut events_rx: mpsc::UnboundedReceiver<EngineEvent>,
        mut inbound_rx: mpsc::UnboundedReceiver<CommandEnvelope>,
    ) {
        loop {
            tokio::select! {
                ev = events_rx.recv() => match ev {
                    Some(EngineEvent::Delta(diff)) => {
                        handle.send(AgentMessage::Delta {
                            tab_id: self.tab_id,
                            added: diff.added,
                            removed: diff.removed,
                            updated: diff.updated,
                        });
                    }
                    Some(EngineEvent::PageEvent { name }) => {
                        handle.send(AgentMessage::Event {
                            tab_id: self.tab_id,
                            name,
                            data: serde_json::Value::Null,
                        });
                    }
                    None => break,
                },
                cmd = inbound_rx.recv() => match cmd {
                    Some(cmd) => {
                        self.handle_command(&engine, &executor, &handle, cmd).await;
                    }
                    None => break,
                },
            }
        }
    }

    async fn handle_command(
        &self,
        engine: &PerceptionEngine,
        executor: &Executor,
        handle: &AgentHandle,
        cmd: CommandEnvelope,
    ) {
        if matches!(cmd.op, CommandOp::RequestSnapshot) {
            let candidates = engine.snapshot().await;
            let viewport = self.doc.lock().await.viewport();
            handle.send(AgentMessage::Snapshot {
                tab_id: self.tab_id,
                url: self.page_url.clone(),
                viewport,
                candidates,
            });
            return;
        }

        let command_id = match cmd.command_id.clone() {
            Some(id) => id,
            None => {
                warn!(kind = cmd.op.kind(), "dropping command without commandId");
                return;
            }
        };

        let pointer_target = match &cmd.op {
            CommandOp::MoveMouse { x, y, .. } => Some((*x, *y)),
            _ => None,
        };

        let ack = executor.execute(&cmd).await;
        let failed = ack.is_fail();
        handle.send(AgentMessage::Ack {
            tab_id: self.tab_id,
            command_id,
            ack,
        });

        // Pointer telemetry tracks where move_mouse left the cursor.
        if let (Some((x, y)), false) = (pointer_target, failed) {
            handle.send(AgentMessage::Pointer {
                tab_id: self.tab_id,
                x,
                y,
                buttons: 0,
            });
        }
    }
}
