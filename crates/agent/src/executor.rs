//! Command execution: resolve a candidate id, synthesize the appropriate
//! input event sequence against the document, and produce an ack.

use std::time::Duration;

use serde_json::json;
use tracing::debug;

use tabsense_core::protocol::{
    CommandAck, CommandEnvelope, CommandOp, MouseCurve, SelectValue, TypeMode,
    Verification,
};
use tabsense_core::search;
use tabsense_dom::{Document, EventKind, NodeId, SyntheticEvent};

use crate::engine::{SharedDocument, SharedIdentity};
use crate::extract::extract_candidates;
use crate::identity::IdentityMap;

/// How long a smooth scroll is given to settle before the ack reads back
/// the offsets.
const SCROLL_SETTLE_MS: u64 = 300;

const DEFAULT_MOVE_STEPS: u32 = 10;

pub struct Executor {
    doc: SharedDocument,
    identity: SharedIdentity,
}

impl Executor {
    pub fn new(doc: SharedDocument, identity: SharedIdentity) -> Self {
        Self { doc, identity }
    }

    pub async fn execute(&self, cmd: &CommandEnvelope) -> CommandAck {
        debug!(kind = cmd.op.kind(), command_id = ?cmd.command_id, "executing command");
        match cmd.op.clone() {
            CommandOp::Click {
                id,
                button,
                modifiers,
                click_count,
            } => {
                self.click(
                    &id,
                    button.unwrap_or(0),
                    modifiers.unwrap_or_default(),
                    click_count.unwrap_or(1).max(1),
                )
                .await
            }
            CommandOp::Type {
                id,
                text,
                mode,
                clear_first,
                delay_ms,
            } => {
                self.type_text(
                    &id,
                    &text,
                    mode.unwrap_or(TypeMode::Append),
                    clear_first.unwrap_or(false),
                    delay_ms,
                )
                .await
            }
            CommandOp::Hover { id, duration_ms } => self.hover(&id, duration_ms).await,
            CommandOp::Scroll { dx, dy, target } => {
                self.scroll(dx, dy, target.as_deref()).await
            }
            CommandOp::Focus { id } => self.focus(&id).await,
            CommandOp::Select { id, value } => self.select(&id, &value).await,
            CommandOp::MoveMouse {
                x,
                y,
                steps,
                curve,
                duration_ms,
            } => {
                self.move_mouse(
                    x,
                    y,
                    steps.unwrap_or(DEFAULT_MOVE_STEPS).max(1),
                    curve.unwrap_or(MouseCurve::Linear),
                    duration_ms.unwrap_or(0),
                )
                .await
            }
            CommandOp::Query { search, filters } => {
                let doc = self.doc.lock().await;
                let mut ids = self.identity.lock().await;
                let candidates = extract_candidates(&doc, &mut ids);
                let matches: Vec<_> =
                    search::search(&candidates, &search, filters.as_ref())
                        .into_iter()
                        .cloned()
                        .collect();
                CommandAck::ok_with(json!({ "matches": matches }))
            }
            CommandOp::RequestSnapshot => {
                // Handled by the agent runtime, never routed here.
                CommandAck::fail("request_snapshot is not an executable command")
            }
        }
    }

    async fn click(
        &self,
        id: &str,
        button: u8,
        modifiers: Vec<String>,
        count: u32,
    ) -> CommandAck {
        let mut doc = self.doc.lock().await;
        let ids = self.identity.lock().await;
        let node = match resolve(&doc, &ids, id) {
            Ok(n) => n,
            Err(ack) => return ack,
        };

        let hit = doc.get(node).map(|el| el.rect.hit_point()).unwrap_or_default();
        for n in 1..=count {
            for kind in [EventKind::MouseDown, EventKind::MouseUp, EventKind::Click] {
                doc.dispatch(
                    SyntheticEvent::new(kind, node)
                        .at(hit.cx, hit.cy)
                        .button(button)
                        .detail(n)
                        .modifiers(&modifiers),
                );
            }
        }
        if is_focusable(&doc, node) {
            doc.dispatch(SyntheticEvent::new(EventKind::Focus, node));
        }

        CommandAck::verify(verification(&doc, id, node))
    }

    async fn type_text(
        &self,
        id: &str,
        text: &str,
        mode: TypeMode,
        clear_first: bool,
        delay_ms: Option<u64>,
    ) -> CommandAck {
        let (node, editable) = {
            let doc = self.doc.lock().await;
            let ids = self.identity.lock().await;
            let node = match resolve(&doc, &ids, id) {
                Ok(n) => n,
                Err(ack) => return ack,
            };
            (node, editable_kind(&doc, node))
        };
        let editable = match editable {
            Some(kind) => kind,
            None => {
                return CommandAck::fail(format!(
                    "Invalid target: {} is not a text input, textarea, or contenteditable",
                    id
                ))
            }
        };

        {
            let mut doc = self.doc.lock().await;
            doc.dispatch(SyntheticEvent::new(EventKind::Focus, node));
            if clear_first || mode == TypeMode::Replace {
                write_content(&mut doc, node, editable, "");
            }
        }

        // Track where typed characters land: prepend inserts keep their
        // own order at the front, append goes to the end.
        let mut inserted = 0usize;
        let chars: Vec<char> = text.chars().collect();
        for (i, ch) in chars.iter().enumerate() {
            {
                let mut doc = self.doc.lock().await;
                doc.dispatch(
                    SyntheticEvent::new(EventKind::KeyDown, node).key(&ch.to_string()),
                );
                let mut current = read_content(&doc, node, editable);
                match mode {
                    TypeMode::Prepend => {
                        let mut out: String =
                            current.chars().take(inserted).collect();
                        out.push(*ch);
                        out.extend(current.chars().skip(inserted));
                        current = out;
                        inserted += 1;
                    }
                    TypeMode::Append | TypeMode::Replace => current.push(*ch),
                }
                write_content(&mut doc, node, editable, &current);
                doc.dispatch(SyntheticEvent::new(EventKind::Input, node));
                doc.dispatch(
                    SyntheticEvent::new(EventKind::KeyUp, node).key(&ch.to_string()),
                );
            }
            if let Some(delay) = delay_ms {
                if delay > 0 && i + 1 < chars.len() {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
            }
        }

        let mut doc = self.doc.lock().await;
        doc.dispatch(SyntheticEvent::new(EventKind::Change, node));
        let value = read_content(&doc, node, editable);
        CommandAck::ok_with(json!({ "value": value }))
    }

    async fn hover(&self, id: &str, duration_ms: Option<u64>) -> CommandAck {
        let node = {
            let mut doc = self.doc.lock().await;
            let ids = self.identity.lock().await;
            let node = match resolve(&doc, &ids, id) {
                Ok(n) => n,
                Err(ack) => return ack,
            };
            let hit = doc.get(node).map(|el| el.rect.hit_point()).unwrap_or_default();
            for kind in [
                EventKind::MouseEnter,
                EventKind::MouseOver,
                EventKind::MouseMove,
            ] {
                doc.dispatch(SyntheticEvent::new(kind, node).at(hit.cx, hit.cy));
            }
            node
        };
        if let Some(ms) = duration_ms {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        let doc = self.doc.lock().await;
        CommandAck::verify(verification(&doc, id, node))
    }

    async fn scroll(&self, dx: i32, dy: i32, target: Option<&str>) -> CommandAck {
        let element_target = match target {
            Some(t) if t != "viewport" => Some(t.to_string()),
            _ => None,
        };

        let scrolled_node = {
            let mut doc = self.doc.lock().await;
            let ids = self.identity.lock().await;
            match element_target.as_deref() {
                Some(id) => {
                    let node = match resolve(&doc, &ids, id) {
                        Ok(n) => n,
                        Err(ack) => return ack,
                    };
                    doc.scroll_element_by(node, dx, dy);
                    Some(node)
                }
                None => {
                    doc.scroll_by(dx, dy);
                    None
                }
            }
        };

        // Smooth behavior: give the scroll animation window time to land.
        tokio::time::sleep(Duration::from_millis(SCROLL_SETTLE_MS)).await;

        let doc = self.doc.lock().await;
        let (sx, sy) = match scrolled_node {
            Some(node) => doc
                .get(node)
                .map(|el| (el.scroll_x, el.scroll_y))
                .unwrap_or((0, 0)),
            None => doc.scroll_offset(),
        };
        CommandAck::ok_with(json!({ "scrollX": sx, "scrollY": sy }))
    }

    async fn focus(&self, id: &str) -> CommandAck {
        let mut doc = self.doc.lock().await;
        let ids = self.identity.lock().await;
        let node = match resolve(&doc, &ids, id) {
            Ok(n) => n,
            Err(ack) => return ack,
        };
        if !is_focusable(&doc, node) {
            return CommandAck::fail(format!("Invalid target: {} is not focusable", id));
        }
        doc.dispatch(SyntheticEvent::new(EventKind::Focus, node));
        CommandAck::ok()
    }

    async fn select(&self, id: &str, value: &SelectValue) -> CommandAck {
        let mut doc = self.doc.lock().await;
        let ids = self.identity.lock().await;
        let node = match resolve(&doc, &ids, id) {
            Ok(n) => n,
            Err(ack) => return ack,
        };
        let is_select = doc.get(node).map(|el| el.tag == "select").unwrap_or(false);
        if !is_select {
            return CommandAck::fail(format!(
                "Invalid target: {} is not a multi-option control",
                id
            ));
        }

        let multiple = doc.get(node).map(|el| el.has_attr("multiple")).unwrap_or(false);
        let options: Vec<NodeId> = doc
            .children(node)
            .iter()
            .copied()
            .filter(|c| doc.get(*c).map(|el| el.tag == "option").unwrap_or(false))
            .collect();

        if multiple {
            for opt in &options {
                doc.remove_attr(*opt, "selected");
            }
        }

        let wanted = value.values();
        let mut selected = Vec::new();
        for opt in &options {
            let (opt_value, opt_text) = match doc.get(*opt) {
                Some(el) => (
                    el.attr("value").unwrap_or("").to_string(),
                    el.text.trim().to_string(),
                ),
                None => continue,
            };
            let hit = wanted
                .iter()
                .any(|w| *w == opt_value || *w == opt_text);
            if hit {
                doc.set_attr(*opt, "selected", "true");
                selected.push(if opt_value.is_empty() {
                    opt_text
                } else {
                    opt_value
                });
                if !multiple {
                    break;
                }
            }
        }

        if let Some(first) = selected.first() {
            doc.set_value(node, first);
        }
        doc.dispatch(SyntheticEvent::new(EventKind::Change, node));

        let value = if multiple {
            json!(selected)
        } else {
            json!(selected.first().cloned().unwrap_or_default())
        };
        CommandAck::ok_with(json!({ "value": value }))
    }

    async fn move_mouse(
        &self,
        x: i32,
        y: i32,
        steps: u32,
        curve: MouseCurve,
        duration_ms: u64,
    ) -> CommandAck {
        let (start_x, start_y) = {
            let doc = self.doc.lock().await;
            let vp = doc.viewport();
            (vp.width / 2, vp.height / 2)
        };

        let step_delay = if duration_ms > 0 {
            Some(Duration::from_millis(duration_ms / steps as u64))
        } else {
            None
        };

        for i in 1..=steps {
            let t = i as f64 / steps as f64;
            let eased = ease(curve, t);
            let px = start_x + ((x - start_x) as f64 * eased).round() as i32;
            let py = start_y + ((y - start_y) as f64 * eased).round() as i32;
            {
                let mut doc = self.doc.lock().await;
                let target = doc.element_at(px, py).unwrap_or_else(|| doc.root());
                doc.dispatch(SyntheticEvent::new(EventKind::MouseMove, target).at(px, py));
            }
            if let Some(delay) = step_delay {
                tokio::time::sleep(delay).await;
            }
        }
        CommandAck::ok()
    }
}

fn ease(curve: MouseCurve, t: f64) -> f64 {
    match curve {
        MouseCurve::Linear => t,
        MouseCurve::EaseInOut => 0.5 * (1.0 - (std::f64::consts::PI * t).cos()),
        MouseCurve::Smoothstep => t * t * (3.0 - 2.0 * t),
    }
}

fn resolve(
    doc: &Document,
    ids: &IdentityMap,
    id: &str,
) -> Result<NodeId, CommandAck> {
    match ids.node_for(id) {
        Some(node) if doc.is_attached(node) => Ok(node),
        _ => Err(CommandAck::fail(format!("Unknown element: {}", id))),
    }
}

fn is_focusable(doc: &Document, node: NodeId) -> bool {
    let el = match doc.get(node) {
        Some(el) => el,
        None => return false,
    };
    matches!(el.tag.as_str(), "button" | "input" | "select" | "textarea")
        || (el.tag == "a" && el.has_attr("href"))
        || el.attr("tabindex").map(|t| t.parse::<i32>().is_ok()).unwrap_or(false)
        || el.attr("contenteditable") == Some("true")
}

#[derive(Clone, Copy, PartialEq)]
enum EditableKind {
    Value,
    Text,
}

/// Text-editable check: text-flavored inputs and textareas edit `value`,
/// contenteditable elements edit their text content.
fn editable_kind(doc: &Document, node: NodeId) -> Option<EditableKind> {
    let el = doc.get(node)?;
    if el.tag == "textarea" {
        return Some(EditableKind::Value);
    }
    if el.tag == "input" {
        let ty = el.attr("type").unwrap_or("text").to_lowercase();
        let textish = matches!(
            ty.as_str(),
            "text" | "search" | "email" | "password" | "url" | "tel" | "number" | ""
        );
        return textish.then_some(EditableKind::Value);
    }
    (el.attr("contenteditable") == Some("true")).then_some(EditableKind::Text)
}

fn read_content(doc: &Document, node: NodeId, kind: EditableKind) -> String {
    doc.get(node)
        .map(|el| match kind {
            EditableKind::Value => el.value.clone(),
            EditableKind::Text => el.text.clone(),
        })
        .unwrap_or_default()
}

fn write_content(doc: &mut Document, node: NodeId, kind: EditableKind, content: &str) {
    match kind {
        EditableKind::Value => doc.set_value(node, content),
        EditableKind::Text => doc.set_text(node, content),
    }
}

/// Post-execution re-read of the target element.
fn verification(doc: &Document, id: &str, node: NodeId) -> Verification {
    let still_visible = doc.is_attached(node);
    let rect = doc.get(node).map(|el| el.rect);
    let hit_test_ok = match rect {
        Some(rect) if still_visible && !rect.is_empty() => {
            let hit = rect.hit_point();
            match doc.element_at(hit.cx, hit.cy) {
                Some(top) => doc.is_ancestor_or_descendant(top, node),
                None => false,
            }
        }
        _ => false,
    };
    Verification {
        id: id.to_string(),
        still_visible,
        hit_test_ok,
        // Carried but not computed here; the engine's deltas own geometry
        // change tracking.
        rect_changed: false,
        new_rect: rect,
    }
}
