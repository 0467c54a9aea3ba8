//! Element nodes of the in-memory page model.

use std::collections::BTreeMap;

use tabsense_core::types::Rect;

/// Opaque node handle. Ids are never reused within a document, so a
/// `NodeId` held across a detach/re-attach cycle still names the same
/// element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u64);

impl NodeId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// The slice of computed style the perception layer cares about.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StyleFlags {
    pub display_none: bool,
    pub visibility_hidden: bool,
    pub opacity_zero: bool,
    pub cursor_pointer: bool,
    pub background_color: Option<String>,
    pub text_color: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Element {
    /// Lowercased tag name.
    pub tag: String,
    pub(crate) attrs: BTreeMap<String, String>,
    /// The element's own text content (not the subtree's).
    pub text: String,
    /// Current form value.
    pub value: String,
    pub rect: Rect,
    pub style: StyleFlags,
    pub scroll_x: i32,
    pub scroll_y: i32,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
}

impl Element {
    pub(crate) fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_lowercase(),
            attrs: BTreeMap::new(),
            text: String::new(),
            value: String::new(),
            rect: Rect::default(),
            style: StyleFlags::default(),
            scroll_x: 0,
            scroll_y: 0,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(|s| s.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    /// Attribute interpreted as a boolean: present and not `"false"`.
    pub fn attr_bool(&self, name: &str) -> bool {
        match self.attrs.get(name) {
            Some(v) => v != "false",
            None => false,
        }
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Hidden by computed style or zero area.
    pub fn hidden_by_style(&self) -> bool {
        self.style.display_none
            || self.style.visibility_hidden
            || self.style.opacity_zero
            || self.attr_bool("hidden")
    }
}
