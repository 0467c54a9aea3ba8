//! The arena document: element storage, tree edits, hit testing, and the
//! mutation journal.
//!
//! The document is the page substrate the perception engine observes and
//! the executor acts on. The embedding process keeps it in sync with the
//! live page; tests construct documents directly. Detaching a node removes
//! it from the tree but keeps it in the arena (a held reference), so a
//! re-attached element is the same node; [`Document::forget`] is the
//! garbage-collection analogue that actually drops it.

use std::collections::HashMap;

use tokio::sync::mpsc;

use tabsense_core::types::{Rect, Viewport};

use crate::events::{EventKind, Mutation, SyntheticEvent};
use crate::node::{Element, NodeId, StyleFlags};

pub struct Document {
    nodes: HashMap<NodeId, Element>,
    root: NodeId,
    next_id: u64,
    viewport: Viewport,
    scroll_x: i32,
    scroll_y: i32,
    focused: Option<NodeId>,
    watchers: Vec<mpsc::UnboundedSender<Mutation>>,
    event_log: Vec<SyntheticEvent>,
}

impl Document {
    pub fn new(viewport: Viewport) -> Self {
        let root_id = NodeId(0);
        let mut nodes = HashMap::new();
        let mut body = Element::new("body");
        body.rect = Rect::new(0, 0, viewport.width, viewport.height);
        nodes.insert(root_id, body);
        Self {
            nodes,
            root: root_id,
            next_id: 1,
            viewport,
            scroll_x: 0,
            scroll_y: 0,
            focused: None,
            watchers: Vec::new(),
            event_log: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        if let Some(body) = self.nodes.get_mut(&self.root) {
            body.rect = Rect::new(0, 0, viewport.width, viewport.height);
        }
        let root = self.root;
        self.notify(Mutation::Resized { target: root });
    }

    pub fn scroll_offset(&self) -> (i32, i32) {
        (self.scroll_x, self.scroll_y)
    }

    // ── Node construction and tree edits ──────────────────────────────

    /// Create a detached element. Attach it with [`Document::append_child`].
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, Element::new(tag));
        id
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        if child == self.root {
            return;
        }
        if let Some(el) = self.nodes.get_mut(&child) {
            el.parent = Some(parent);
        } else {
            return;
        }
        if let Some(p) = self.nodes.get_mut(&parent) {
            if !p.children.contains(&child) {
                p.children.push(child);
            }
        }
        self.notify(Mutation::ChildAdded {
            target: child,
            parent,
        });
    }

    /// Detach a node (and its subtree) from the tree. The node stays in
    /// the arena and keeps its id; re-appending it later is the same
    /// element coming back.
    pub fn remove_child(&mut self, child: NodeId) {
        let parent = match self.nodes.get(&child).and_then(|el| el.parent) {
            Some(p) => p,
            None => return,
        };
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.retain(|c| *c != child);
        }
        if let Some(el) = self.nodes.get_mut(&child) {
            el.parent = None;
        }
        self.notify(Mutation::ChildRemoved {
            target: child,
            parent,
        });
    }

    /// Drop a detached node from the arena entirely (the GC analogue).
    /// Attached nodes must be detached first.
    pub fn forget(&mut self, node: NodeId) {
        if node == self.root {
            return;
        }
        if self
            .nodes
            .get(&node)
            .map(|el| el.parent.is_none())
            .unwrap_or(false)
        {
            let children: Vec<NodeId> = self
                .nodes
                .get(&node)
                .map(|el| el.children.clone())
                .unwrap_or_default();
            for c in children {
                if let Some(el) = self.nodes.get_mut(&c) {
                    el.parent = None;
                }
                self.forget(c);
            }
            self.nodes.remove(&node);
        }
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(&node)
    }

    /// True when the node is reachable from the root.
    pub fn is_attached(&self, node: NodeId) -> bool {
        let mut cur = Some(node);
        while let Some(id) = cur {
            if id == self.root {
                return true;
            }
            cur = self.nodes.get(&id).and_then(|el| el.parent);
        }
        false
    }

    // ── Accessors ─────────────────────────────────────────────────────

    pub fn get(&self, node: NodeId) -> Option<&Element> {
        self.nodes.get(&node)
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(&node).and_then(|el| el.parent)
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(&node)
            .map(|el| el.children.as_slice())
            .unwrap_or(&[])
    }

    /// Ancestors from the immediate parent up to (and including) the root.
    pub fn ancestors(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cur = self.parent(node);
        while let Some(id) = cur {
            out.push(id);
            cur = self.parent(id);
        }
        out
    }

    pub fn is_ancestor_or_descendant(&self, a: NodeId, b: NodeId) -> bool {
        a == b || self.ancestors(a).contains(&b) || self.ancestors(b).contains(&a)
    }

    /// All attached nodes in document order (depth-first from the root).
    pub fn iter_tree(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some(el) = self.nodes.get(&id) {
                for child in el.children.iter().rev() {
                    stack.push(*child);
                }
            }
        }
        out
    }

    /// Subtree of `node` in document order, including `node` itself.
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some(el) = self.nodes.get(&id) {
                for child in el.children.iter().rev() {
                    stack.push(*child);
                }
            }
        }
        out
    }

    /// First attached element with `attr == value`.
    pub fn by_attr(&self, attr: &str, value: &str) -> Option<NodeId> {
        self.iter_tree()
            .into_iter()
            .find(|id| self.get(*id).and_then(|el| el.attr(attr)) == Some(value))
    }

    /// Number of attached elements with `attr == value`.
    pub fn count_attr(&self, attr: &str, value: &str) -> usize {
        self.iter_tree()
            .iter()
            .filter(|id| self.get(**id).and_then(|el| el.attr(attr)) == Some(value))
            .count()
    }

    /// Concatenated text of a subtree, document order.
    pub fn subtree_text(&self, node: NodeId) -> String {
        let mut out = String::new();
        for id in self.descendants(node) {
            if let Some(el) = self.get(id) {
                if !el.text.is_empty() {
                    if !out.is_empty() {
                        out.push(' ');
                    }
                    out.push_str(el.text.trim());
                }
            }
        }
        out
    }

    // ── Mutators (all journaled) ──────────────────────────────────────

    pub fn set_attr(&mut self, node: NodeId, name: &str, value: &str) {
        if let Some(el) = self.nodes.get_mut(&node) {
            el.attrs.insert(name.to_string(), value.to_string());
            self.notify(Mutation::Attribute {
                target: node,
                attr: name.to_string(),
            });
        }
    }

    pub fn remove_attr(&mut self, node: NodeId, name: &str) {
        if let Some(el) = self.nodes.get_mut(&node) {
            if el.attrs.remove(name).is_some() {
                self.notify(Mutation::Attribute {
                    target: node,
                    attr: name.to_string(),
                });
            }
        }
    }

    pub fn set_text(&mut self, node: NodeId, text: &str) {
        if let Some(el) = self.nodes.get_mut(&node) {
            el.text = text.to_string();
            self.notify(Mutation::Text { target: node });
        }
    }

    /// Set the form value. Journaled under the `value` attribute name so
    /// watchers using the observed-attribute filter pick it up.
    pub fn set_value(&mut self, node: NodeId, value: &str) {
        if let Some(el) = self.nodes.get_mut(&node) {
            el.value = value.to_string();
            self.notify(Mutation::Attribute {
                target: node,
                attr: "value".to_string(),
            });
        }
    }

    pub fn set_rect(&mut self, node: NodeId, rect: Rect) {
        if let Some(el) = self.nodes.get_mut(&node) {
            el.rect = rect;
            self.notify(Mutation::Resized { target: node });
        }
    }

    pub fn set_style(&mut self, node: NodeId, style: StyleFlags) {
        if let Some(el) = self.nodes.get_mut(&node) {
            el.style = style;
            self.notify(Mutation::Attribute {
                target: node,
                attr: "style".to_string(),
            });
        }
    }

    pub fn scroll_by(&mut self, dx: i32, dy: i32) {
        self.scroll_x += dx;
        self.scroll_y += dy;
        self.notify(Mutation::Scrolled { target: None });
    }

    pub fn scroll_element_by(&mut self, node: NodeId, dx: i32, dy: i32) {
        if let Some(el) = self.nodes.get_mut(&node) {
            el.scroll_x += dx;
            el.scroll_y += dy;
            self.notify(Mutation::Scrolled { target: Some(node) });
        }
    }

    // ── Focus ─────────────────────────────────────────────────────────

    pub fn focused(&self) -> Option<NodeId> {
        self.focused
    }

    pub fn focus(&mut self, node: NodeId) {
        if self.contains(node) {
            self.focused = Some(node);
        }
    }

    pub fn blur(&mut self) {
        self.focused = None;
    }

    // ── Hit testing ───────────────────────────────────────────────────

    /// Topmost visible element at a viewport point: the last element in
    /// document order whose rect contains the point (later nodes paint
    /// above earlier ones).
    pub fn element_at(&self, x: i32, y: i32) -> Option<NodeId> {
        let mut hit = None;
        for id in self.iter_tree() {
            if let Some(el) = self.get(id) {
                if !el.hidden_by_style() && !el.rect.is_empty() && el.rect.contains(x, y) {
                    hit = Some(id);
                }
            }
        }
        hit
    }

    // ── Mutation journal ──────────────────────────────────────────────

    /// Subscribe to the mutation feed.
    pub fn watch(&mut self) -> mpsc::UnboundedReceiver<Mutation> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.watchers.push(tx);
        rx
    }

    fn notify(&mut self, mutation: Mutation) {
        self.watchers
            .retain(|tx| tx.send(mutation.clone()).is_ok());
    }

    // ── Synthetic input ───────────────────────────────────────────────

    /// Dispatch a synthetic input event: append to the log and apply
    /// native activation semantics.
    pub fn dispatch(&mut self, event: SyntheticEvent) {
        let target = event.target;
        let kind = event.kind;
        self.event_log.push(event);

        match kind {
            EventKind::Focus => {
                self.focus(target);
            }
            EventKind::Click => {
                self.activate(target);
            }
            _ => {}
        }
    }

    /// Native activation for a full click: checkboxes toggle, radios set,
    /// summary toggles its details' `open` attribute.
    fn activate(&mut self, node: NodeId) {
        let (tag, input_type, checked) = match self.get(node) {
            Some(el) => (
                el.tag.clone(),
                el.attr("type").unwrap_or("").to_lowercase(),
                el.attr_bool("checked"),
            ),
            None => return,
        };
        match (tag.as_str(), input_type.as_str()) {
            ("input", "checkbox") => {
                let next = if checked { "false" } else { "true" };
                self.set_attr(node, "checked", next);
            }
            ("input", "radio") => {
                self.set_attr(node, "checked", "true");
            }
            ("summary", _) => {
                if let Some(parent) = self.parent(node) {
                    let is_details =
                        self.get(parent).map(|el| el.tag == "details").unwrap_or(false);
                    if is_details {
                        let open = self
                            .get(parent)
                            .map(|el| el.attr_bool("open"))
                            .unwrap_or(false);
                        let next = if open { "false" } else { "true" };
                        self.set_attr(parent, "open", next);
                    }
                }
            }
            _ => {}
        }
    }

    pub fn events(&self) -> &[SyntheticEvent] {
        &self.event_log
    }

    pub fn clear_events(&mut self) {
        self.event_log.clear();
    }
}
