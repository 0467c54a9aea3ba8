//! Stable element identity.
//!
//! Candidate ids must survive attribute, class, and position churn but die
//! with the element itself. The map is keyed by node identity, never by
//! content: the same node always yields the same id. Entries for nodes the
//! document has dropped are reclaimed by [`IdentityMap::prune`], the
//! disposer this runtime uses in place of a weak map.

use std::collections::HashMap;

use tabsense_core::ids::base36;
use tabsense_dom::{Document, NodeId};

#[derive(Default)]
pub struct IdentityMap {
    by_node: HashMap<NodeId, String>,
    by_id: HashMap<String, NodeId>,
    counter: u64,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// The id for a node, minting one on first encounter: `e_<htmlId>`
    /// when the element carries a DOM id unique in the document, otherwise
    /// `a_<base36 counter>`.
    pub fn id_for(&mut self, doc: &Document, node: NodeId) -> String {
        if let Some(id) = self.by_node.get(&node) {
            return id.clone();
        }
        let id = match doc.get(node).and_then(|el| el.attr("id")) {
            Some(dom_id)
                if !dom_id.is_empty()
                    && doc.count_attr("id", dom_id) == 1
                    && !self.by_id.contains_key(&format!("e_{}", dom_id)) =>
            {
                format!("e_{}", dom_id)
            }
            _ => {
                let id = format!("a_{}", base36(self.counter));
                self.counter += 1;
                id
            }
        };
        self.by_node.insert(node, id.clone());
        self.by_id.insert(id.clone(), node);
        id
    }

    pub fn node_for(&self, id: &str) -> Option<NodeId> {
        self.by_id.get(id).copied()
    }

    /// Drop associations for nodes the document no longer holds.
    pub fn prune(&mut self, doc: &Document) {
        let dead: Vec<NodeId> = self
            .by_node
            .keys()
            .copied()
            .filter(|n| !doc.contains(*n))
            .collect();
        for node in dead {
            if let Some(id) = self.by_node.remove(&node) {
                self.by_id.remove(&id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.by_node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_node.is_empty()
    }
}
