//! Full-stack test: a real agent runtime watching a document, the gateway,
//! and the controller client, all over live websockets.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Mutex;

use tabsense_agent::Agent;
use tabsense_client::ControllerClient;
use tabsense_core::config::{Config, TransportConfig};
use tabsense_core::protocol::{AgentMessage, CommandAck, ControllerEvent};
use tabsense_core::types::{Rect, Viewport};
use tabsense_dom::{Document, NodeId};
use tabsense_gateway::Gateway;

async fn wait_for_tab(client: &ControllerClient, tab_id: u64, count: usize) {
    for _ in 0..150 {
        let tabs = client.list_tabs().await.unwrap();
        if tabs
            .iter()
            .any(|t| t.tab_id == tab_id && t.candidate_count == count)
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("tab {tab_id} never reached {count} candidates");
}

struct Stack {
    doc: Arc<Mutex<Document>>,
    button: NodeId,
    input: NodeId,
    client: ControllerClient,
    events: tokio::sync::mpsc::UnboundedReceiver<ControllerEvent>,
}

async fn build_stack() -> Stack {
    let gateway = Gateway::new(Config::default());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(gateway.serve(listener));

    let doc = Arc::new(Mutex::new(Document::new(Viewport {
        width: 1024,
        height: 768,
    })));
    let (button, input) = {
        let mut d = doc.lock().await;
        let button = d.create_element("button");
        d.set_text(button, "Sign in");
        let root = d.root();
        d.append_child(root, button);
        d.set_rect(button, Rect::new(10, 10, 100, 30));
        let input = d.create_element("input");
        d.set_attr(input, "placeholder", "Email");
        d.append_child(root, input);
        d.set_rect(input, Rect::new(10, 60, 200, 24));
        (button, input)
    };

    let agent = Agent::new(
        doc.clone(),
        7,
        "https://demo.local/",
        "tabsense-test",
        &format!("ws://{}/agent", addr),
        TransportConfig::default(),
    );
    tokio::spawn(agent.run());

    let (client, events) = ControllerClient::connect(&format!("ws://{}/controller", addr))
        .await
        .unwrap();
    wait_for_tab(&client, 7, 2).await;

    Stack {
        doc,
        button,
        input,
        client,
        events,
    }
}

#[tokio::test]
async fn click_executes_against_the_document() {
    let stack = build_stack().await;

    let candidates = stack.client.query(7, Some("sign in"), None).await.unwrap();
    assert_eq!(candidates.len(), 1);
    let id = candidates[0].id.clone();

    let ack = stack.client.click(7, &id).await.unwrap();
    match ack {
        CommandAck::Verify { verification } => {
            assert!(verification.still_visible);
            assert!(verification.hit_test_ok);
        }
        other => panic!("expected verify, got {other:?}"),
    }

    let d = stack.doc.lock().await;
    assert!(d
        .events()
        .iter()
        .any(|e| e.kind == tabsense_dom::EventKind::Click && e.target == stack.button));
}

#[tokio::test]
async fn type_flows_end_to_end() {
    let stack = build_stack().await;

    let candidates = stack.client.query(7, Some("email"), None).await.unwrap();
    assert_eq!(candidates.len(), 1);
    let id = candidates[0].id.clone();

    let ack = stack
        .client
        .type_text(7, &id, "user@example.com")
        .await
        .unwrap();
    match ack {
        CommandAck::Ok { data } => assert_eq!(data["value"], "user@example.com"),
        other => panic!("expected ok, got {other:?}"),
    }

    let d = stack.doc.lock().await;
    assert_eq!(d.get(stack.input).unwrap().value, "user@example.com");
}

#[tokio::test]
async fn document_mutation_reaches_subscribed_controllers_as_delta() {
    let mut stack = build_stack().await;
    stack.client.subscribe(Some(7)).await.unwrap();
    // Let the subscribe-triggered snapshot refresh settle so the mutation
    // below diffs against a stable baseline.
    tokio::time::sleep(Duration::from_millis(300)).await;

    {
        let mut d = stack.doc.lock().await;
        d.set_attr(stack.button, "disabled", "true");
    }

    // The subscriber sees the change, either as a field update in a delta or
    // inside a full snapshot if one was in flight.
    let mut saw_disabled = false;
    for _ in 0..50 {
        let ev = tokio::time::timeout(Duration::from_secs(5), stack.events.recv())
            .await
            .expect("no telemetry arrived")
            .expect("event stream closed");
        match ev {
            ControllerEvent::Telemetry(AgentMessage::Delta { updated, .. }) => {
                if updated
                    .iter()
                    .any(|u| u.state.map(|s| s.disabled).unwrap_or(false))
                {
                    saw_disabled = true;
                    break;
                }
            }
            ControllerEvent::Telemetry(AgentMessage::Snapshot { candidates, .. }) => {
                if candidates.iter().any(|c| c.state.disabled) {
                    saw_disabled = true;
                    break;
                }
            }
            _ => {}
        }
    }
    assert!(saw_disabled, "disabled state never reached the subscriber");

    // The gateway's stored candidate reflects the merge.
    let candidates = stack.client.query(7, Some("sign in"), None).await.unwrap();
    assert!(candidates[0].state.disabled);
}
