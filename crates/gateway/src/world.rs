//! Per-tab world state.
//!
//! The gateway's in-memory view of every connected tab: candidate maps
//! maintained by snapshot/delta telemetry, plus a bounded delta history
//! for inspection. All handlers are synchronous and idempotent: replaying
//! a delta is harmless (adds become overwrites, removals of absent ids are
//! no-ops).

use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use tracing::{debug, warn};

use tabsense_core::protocol::AgentMessage;
use tabsense_core::search::{self, SearchFilters};
use tabsense_core::types::{
    ActionCandidate, CandidateUpdate, PointerState, TabSummary, Viewport,
};

/// Delta history entries kept per tab; older entries are evicted from the
/// head.
pub const DELTA_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaRecord {
    pub timestamp: i64,
    pub added: Vec<ActionCandidate>,
    pub removed: Vec<String>,
    pub updated: Vec<CandidateUpdate>,
}

#[derive(Debug)]
pub struct TabState {
    pub tab_id: u64,
    pub url: String,
    pub viewport: Viewport,
    pub user_agent: String,
    pub connected_at: i64,
    pub last_update: i64,
    pub candidates: HashMap<String, ActionCandidate>,
    pub delta_history: VecDeque<DeltaRecord>,
}

impl TabState {
    fn new(tab_id: u64, now: i64) -> Self {
        Self {
            tab_id,
            url: String::new(),
            viewport: Viewport::default(),
            user_agent: String::new(),
            connected_at: now,
            last_update: now,
            candidates: HashMap::new(),
            delta_history: VecDeque::new(),
        }
    }

    pub fn summary(&self) -> TabSummary {
        TabSummary {
            tab_id: self.tab_id,
            url: self.url.clone(),
            candidate_count: self.candidates.len(),
            viewport: self.viewport,
            last_update: self.last_update,
        }
    }
}

#[derive(Default)]
pub struct WorldState {
    tabs: HashMap<u64, TabState>,
    pointer: PointerState,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route one telemetry message into the store. Acks never reach this
    /// path. Returns false when the message was dropped.
    pub fn apply(&mut self, msg: &AgentMessage, now: i64) -> bool {
        match msg {
            AgentMessage::Hello {
                tab_id,
                url,
                viewport,
                user_agent,
            } => {
                self.apply_hello(*tab_id, url, *viewport, user_agent, now);
                true
            }
            AgentMessage::Snapshot {
                tab_id,
                url,
                viewport,
                candidates,
            } => {
                self.apply_snapshot(*tab_id, url, *viewport, candidates.clone(), now);
                true
            }
            AgentMessage::Delta {
                tab_id,
                added,
                removed,
                updated,
            } => self.apply_delta(*tab_id, added.clone(), removed.clone(), updated.clone(), now),
            AgentMessage::Pointer { x, y, buttons, .. } => {
                self.update_pointer(*x, *y, *buttons);
                true
            }
            AgentMessage::Event { tab_id, name, .. } => {
                if name == "unload" {
                    self.disconnect(*tab_id);
                }
                true
            }
            AgentMessage::Heartbeat { .. } => true,
            AgentMessage::Ack { .. } => false,
        }
    }

    /// Create or refresh a tab. Existing candidate state and history are
    /// preserved; only the descriptive fields refresh.
    pub fn apply_hello(
        &mut self,
        tab_id: u64,
        url: &str,
        viewport: Viewport,
        user_agent: &str,
        now: i64,
    ) {
        let tab = self
            .tabs
            .entry(tab_id)
            .or_insert_with(|| TabState::new(tab_id, now));
        tab.url = url.to_string();
        tab.viewport = viewport;
        tab.user_agent = user_agent.to_string();
        tab.last_update = now;
    }

    /// Full replacement of a tab's candidate map; clears the delta history.
    pub fn apply_snapshot(
        &mut self,
        tab_id: u64,
        url: &str,
        viewport: Viewport,
        candidates: Vec<ActionCandidate>,
        now: i64,
    ) {
        let tab = self
            .tabs
            .entry(tab_id)
            .or_insert_with(|| TabState::new(tab_id, now));
        tab.url = url.to_string();
        tab.viewport = viewport;
        tab.last_update = now;
        tab.candidates = candidates.into_iter().map(|c| (c.id.clone(), c)).collect();
        tab.delta_history.clear();
    }

    /// Incremental update. A delta for an unknown tab is logged and
    /// dropped; the next snapshot resynchronizes.
    pub fn apply_delta(
        &mut self,
        tab_id: u64,
        added: Vec<ActionCandidate>,
        removed: Vec<String>,
        updated: Vec<CandidateUpdate>,
        now: i64,
    ) -> bool {
        let tab = match self.tabs.get_mut(&tab_id) {
            Some(tab) => tab,
            None => {
                warn!(tab_id, "delta for unknown tab dropped");
                return false;
            }
        };

        for id in &removed {
            tab.candidates.remove(id);
        }
        for c in &added {
            tab.candidates.insert(c.id.clone(), c.clone());
        }
        for up in &updated {
            if let Some(candidate) = tab.candidates.get_mut(&up.id) {
                up.merge_into(candidate);
            } else {
                debug!(tab_id, id = %up.id, "update for unknown candidate ignored");
            }
        }

        tab.last_update = now;
        tab.delta_history.push_back(DeltaRecord {
            timestamp: now,
            added,
            removed,
            updated,
        });
        while tab.delta_history.len() > DELTA_HISTORY_LIMIT {
            tab.delta_history.pop_front();
        }
        true
    }

    /// Erase a tab entirely.
    pub fn disconnect(&mut self, tab_id: u64) {
        if self.tabs.remove(&tab_id).is_some() {
            debug!(tab_id, "tab state erased");
        }
    }

    /// Pointer state is one global last-value, not per tab. Under
    /// multi-tab operation the last writer wins.
    pub fn update_pointer(&mut self, x: i32, y: i32, buttons: u32) {
        self.pointer = PointerState { x, y, buttons };
    }

    pub fn pointer(&self) -> PointerState {
        self.pointer
    }

    pub fn tab(&self, tab_id: u64) -> Option<&TabState> {
        self.tabs.get(&tab_id)
    }

    pub fn tab_count(&self) -> usize {
        self.tabs.len()
    }

    pub fn tab_summaries(&self) -> Vec<TabSummary> {
        let mut out: Vec<TabSummary> = self.tabs.values().map(|t| t.summary()).collect();
        out.sort_by_key(|t| t.tab_id);
        out
    }

    /// A tab's candidates in stable (id) order.
    pub fn candidates(&self, tab_id: u64) -> Option<Vec<ActionCandidate>> {
        let tab = self.tabs.get(&tab_id)?;
        let mut out: Vec<ActionCandidate> = tab.candidates.values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Some(out)
    }

    /// One candidate by id.
    pub fn candidate(&self, tab_id: u64, id: &str) -> Option<&ActionCandidate> {
        self.tabs.get(&tab_id)?.candidates.get(id)
    }

    /// Search a tab with the shared matcher semantics.
    pub fn search(
        &self,
        tab_id: u64,
        q: &str,
        filters: Option<&SearchFilters>,
    ) -> Option<Vec<ActionCandidate>> {
        let all = self.candidates(tab_id)?;
        Some(
            search::search(&all, q, filters)
                .into_iter()
                .cloned()
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabsense_core::types::{
        ElementContext, ElementState, HitPoint, Rect, RectN, StyleHint,
    };

    fn candidate(id: &str, name: &str) -> ActionCandidate {
        ActionCandidate {
            id: id.into(),
            rect: Rect::new(10, 10, 100, 30),
            rect_n: RectN::default(),
            hit: HitPoint { cx: 60, cy: 25 },
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

    fn seeded() -> WorldState {
        let mut w = WorldState::new();
        w.apply_hello(1, "https://a/", Viewport::default(), "ua", 1000);
        w.apply_snapshot(
            1,
            "https://a/",
            Viewport::default(),
            vec![candidate("a_0", "Sign in"), candidate("a_2", "Cancel")],
            1001,
        );
        w
    }

    #[test]
    fn snapshot_replaces_candidates_and_clears_history() {
        let mut w = seeded();
        w.apply_delta(1, vec![candidate("a_9", "X")], vec![], vec![], 1002);
        assert_eq!(w.tab(1).unwrap().delta_history.len(), 1);

        w.apply_snapshot(
            1,
            "https://a/next",
            Viewport::default(),
            vec![candidate("a_1", "Only")],
            1003,
        );
        let tab = w.tab(1).unwrap();
        assert_eq!(tab.candidates.len(), 1);
        assert!(tab.candidates.contains_key("a_1"));
        assert!(tab.delta_history.is_empty());
        assert_eq!(tab.url, "https://a/next");
    }

    #[test]
    fn hello_refresh_preserves_existing_state() {
        let mut w = seeded();
        let connected_at = w.tab(1).unwrap().connected_at;
        w.apply_hello(1, "https://a/again", Viewport::default(), "ua2", 2000);
        let tab = w.tab(1).unwrap();
        assert_eq!(tab.connected_at, connected_at);
        assert_eq!(tab.candidates.len(), 2);
        assert_eq!(tab.url, "https://a/again");
    }

    #[test]
    fn delta_applies_removed_added_updated() {
        let mut w = seeded();
        let mut update = CandidateUpdate::new("a_2");
        update.state = Some(ElementState {
            disabled: true,
            ..Default::default()
        });
        let ok = w.apply_delta(
            1,
            vec![candidate("a_1", "New")],
            vec!["a_0".into()],
            vec![update],
            1002,
        );
        assert!(ok);

        let tab = w.tab(1).unwrap();
        assert!(!tab.candidates.contains_key("a_0"));
        assert_eq!(tab.candidates["a_1"].name, "New");
        assert!(tab.candidates["a_2"].state.disabled);
        assert_eq!(tab.candidates.len(), 2);
    }

    #[test]
    fn delta_for_unknown_tab_is_dropped() {
        let mut w = WorldState::new();
        let ok = w.apply_delta(7, vec![candidate("a_0", "X")], vec![], vec![], 1000);
        assert!(!ok);
        assert!(w.tab(7).is_none());
    }

    #[test]
    fn replaying_a_delta_is_idempotent() {
        let mut w = seeded();
        let added = vec![candidate("a_1", "New")];
        let removed = vec!["a_0".to_string()];
        w.apply_delta(1, added.clone(), removed.clone(), vec![], 1002);
        let first: Vec<ActionCandidate> = w.candidates(1).unwrap();
        w.apply_delta(1, added, removed, vec![], 1003);
        assert_eq!(w.candidates(1).unwrap(), first);
    }

    #[test]
    fn removing_all_ids_empties_the_map() {
        let mut w = seeded();
        w.apply_delta(1, vec![], vec!["a_0".into(), "a_2".into()], vec![], 1002);
        assert!(w.tab(1).unwrap().candidates.is_empty());
    }

    #[test]
    fn delta_history_is_bounded() {
        let mut w = seeded();
        for i in 0..60 {
            w.apply_delta(1, vec![], vec![format!("ghost_{i}")], vec![], 2000 + i);
        }
        let tab = w.tab(1).unwrap();
        assert_eq!(tab.delta_history.len(), DELTA_HISTORY_LIMIT);
        // Head evicted: the earliest surviving record is number 10.
        assert_eq!(tab.delta_history[0].removed, vec!["ghost_10".to_string()]);
    }

    #[test]
    fn unload_event_erases_the_tab() {
        let mut w = seeded();
        let msg = AgentMessage::Event {
            tab_id: 1,
            name: "unload".into(),
            data: serde_json::Value::Null,
        };
        w.apply(&msg, 3000);
        assert!(w.tab(1).is_none());
    }

    #[test]
    fn search_uses_shared_matcher() {
        let w = seeded();
        let hits = w
            .search(
                1,
                "sign in",
                Some(&SearchFilters {
                    role: Some("button".into()),
                    ..Default::default()
                }),
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a_0");
    }

    #[test]
    fn pointer_is_global_last_value() {
        let mut w = seeded();
        w.update_pointer(10, 20, 1);
        w.update_pointer(30, 40, 0);
        assert_eq!(
            w.pointer(),
            PointerState {
                x: 30,
                y: 40,
                buttons: 0
            }
        );
    }
}
