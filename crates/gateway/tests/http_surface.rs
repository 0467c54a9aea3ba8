//! HTTP read-surface tests.

use std::net::SocketAddr;
use std::time::Duration;

use futures::SinkExt;
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use tabsense_core::config::Config;
use tabsense_core::protocol::AgentMessage;
use tabsense_core::types::{
    ActionCandidate, ElementContext, ElementState, HitPoint, Rect, RectN, StyleHint,
    Viewport,
};
use tabsense_gateway::Gateway;

fn candidate(id: &str, name: &str) -> ActionCandidate {
    let rect = Rect::new(10, 10, 100, 30);
    ActionCandidate {
        id: id.into(),
        rect,
        rect_n: RectN::default(),
        hit: rect.hit_point(),
        role: "button".into(),
        tag: "button".into(),
        name: name.into(),
        aria: String::new(),
        placeholder: None,
        value: None,
        href: None,
        state: ElementState::default(),
        ctx: ElementContext::default(),
        style_hint: StyleHint::default(),
        occluded: false,
    }
}

async fn spawn_with_seed() -> SocketAddr {
    let gateway =
        Gateway::new(Config::default()).with_command_timeout(Duration::from_millis(500));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(gateway.serve(listener));

    let (mut ws, _) = connect_async(format!("ws://{}/agent", addr)).await.unwrap();
    for msg in [
        AgentMessage::Hello {
            tab_id: 1,
            url: "https://shop.example/".into(),
            viewport: Viewport {
                width: 1024,
                height: 768,
            },
            user_agent: "test".into(),
        },
        AgentMessage::Snapshot {
            tab_id: 1,
            url: "https://shop.example/".into(),
            viewport: Viewport {
                width: 1024,
                height: 768,
            },
            candidates: vec![candidate("a_0", "Sign in"), candidate("a_1", "Help")],
        },
    ] {
        ws.send(Message::Text(serde_json::to_string(&msg).unwrap()))
            .await
            .unwrap();
    }
    // Keep the agent socket open for the duration of the test.
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(60)).await;
        drop(ws);
    });

    // Wait for the telemetry to land.
    let base = format!("http://{}", addr);
    for _ in 0..100 {
        let tabs: serde_json::Value = reqwest::get(format!("{base}/tabs"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if tabs.as_array().map(|a| !a.is_empty()).unwrap_or(false) {
            return addr;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("seeded tab never appeared");
}

#[tokio::test]
async fn status_reports_counts_and_policy() {
    let addr = spawn_with_seed().await;
    let status: serde_json::Value = reqwest::get(format!("http://{}/status", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(status["agents"], 1);
    assert_eq!(status["tabs"][0]["tabId"], 1);
    assert_eq!(status["tabs"][0]["candidateCount"], 2);
    assert_eq!(status["policy"]["domainMode"], "all");
    assert!(status["rateLimit"]["lastMinute"].is_number());
}

#[tokio::test]
async fn candidates_and_search_endpoints() {
    let addr = spawn_with_seed().await;
    let base = format!("http://{}", addr);

    let candidates: serde_json::Value = reqwest::get(format!("{base}/tabs/1/candidates"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(candidates.as_array().unwrap().len(), 2);

    let hits: serde_json::Value =
        reqwest::get(format!("{base}/tabs/1/search?q=sign%20in&role=button"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
    assert_eq!(hits.as_array().unwrap().len(), 1);
    assert_eq!(hits[0]["id"], "a_0");

    let missing = reqwest::get(format!("{base}/tabs/99/candidates"))
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
}

#[tokio::test]
async fn post_command_resolves_like_an_act() {
    let addr = spawn_with_seed().await;
    let client = reqwest::Client::new();

    // The seeded agent never answers, so the short timeout resolves it.
    let ack: serde_json::Value = client
        .post(format!("http://{}/command", addr))
        .json(&serde_json::json!({
            "type": "click",
            "tabId": 1,
            "id": "a_0",
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(ack["type"], "ack");
    assert_eq!(ack["status"], "fail");
    assert_eq!(ack["reason"], "Command timeout");
    assert!(ack["commandId"].as_str().unwrap().starts_with("cmd_"));
}

#[tokio::test]
async fn policy_endpoint_is_runtime_mutable() {
    let addr = spawn_with_seed().await;
    let base = format!("http://{}", addr);
    let client = reqwest::Client::new();

    let before: serde_json::Value = reqwest::get(format!("{base}/policy"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(before["domainMode"], "all");

    let updated: serde_json::Value = client
        .post(format!("{base}/policy"))
        .json(&serde_json::json!({
            "domainMode": "allowlist",
            "domainList": ["example.com"],
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(updated["status"], "ok");

    let after: serde_json::Value = reqwest::get(format!("{base}/policy"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(after["domainMode"], "allowlist");
    assert_eq!(after["domainList"][0], "example.com");

    // The new policy bites immediately: the seeded tab is not allowlisted.
    let ack: serde_json::Value = client
        .post(format!("{base}/command"))
        .json(&serde_json::json!({
            "type": "click",
            "tabId": 1,
            "id": "a_0",
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ack["status"], "fail");
    assert_eq!(ack["reason"], "Domain not allowed: https://shop.example/");
}
