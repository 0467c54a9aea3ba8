//! Mutation records and synthetic input events.
//!
//! Every structural or attribute change to a [`crate::Document`] is
//! journaled as a [`Mutation`] and fanned out to watchers, the analogue of
//! a MutationObserver feed. Input synthesized by the executor lands in the
//! document's event log as [`SyntheticEvent`]s so callers can assert exact
//! sequences.

use crate::node::NodeId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    ChildAdded { target: NodeId, parent: NodeId },
    ChildRemoved { target: NodeId, parent: NodeId },
    Attribute { target: NodeId, attr: String },
    /// Own-text change. Not part of the observed attribute set; watchers
    /// that mirror the perception engine ignore it.
    Text { target: NodeId },
    /// Element scroll, or window scroll when `target` is `None`.
    Scrolled { target: Option<NodeId> },
    /// Element resize; the document root stands in for the window.
    Resized { target: NodeId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    MouseDown,
    MouseUp,
    Click,
    MouseEnter,
    MouseOver,
    MouseMove,
    KeyDown,
    KeyUp,
    Input,
    Change,
    Focus,
}

/// One synthesized DOM input event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticEvent {
    pub kind: EventKind,
    pub target: NodeId,
    /// Mouse button (0 left, 1 middle, 2 right) for mouse events.
    pub button: u8,
    /// Cumulative click count for click sequences.
    pub detail: u32,
    pub modifiers: Vec<String>,
    /// Key name for keyboard events.
    pub key: Option<String>,
    /// Pointer position for mouse events.
    pub x: i32,
    pub y: i32,
}

impl SyntheticEvent {
    pub fn new(kind: EventKind, target: NodeId) -> Self {
        Self {
            kind,
            target,
            button: 0,
            detail: 0,
            modifiers: Vec::new(),
            key: None,
            x: 0,
            y: 0,
        }
    }

    pub fn at(mut self, x: i32, y: i32) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    pub fn button(mut self, button: u8) -> Self {
        self.button = button;
        self
    }

    pub fn detail(mut self, detail: u32) -> Self {
        self.detail = detail;
        self
    }

    pub fn modifiers(mut self, modifiers: &[String]) -> Self {
        self.modifiers = modifiers.to_vec();
        self
    }

    pub fn key(mut self, key: &str) -> Self {
        self.key = Some(key.to_string());
        self
    }
}
