//! Candidate-set diffing.
//!
//! Emits minimal-information deltas: full records for additions, ids for
//! removals, and per-id updates carrying only the changed fields. Rects
//! tolerate sub-pixel churn: a coordinate must move more than
//! [`RECT_TOLERANCE_PX`] to count as changed.

use std::collections::HashMap;

use tabsense_core::types::{ActionCandidate, CandidateUpdate};

/// Pixels a rect coordinate may drift without being reported.
pub const RECT_TOLERANCE_PX: i32 = 2;

#[derive(Debug, Clone, Default)]
pub struct CandidateDiff {
    pub added: Vec<ActionCandidate>,
    pub removed: Vec<String>,
    pub updated: Vec<CandidateUpdate>,
}

impl CandidateDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

fn rect_changed(old: &ActionCandidate, new: &ActionCandidate) -> bool {
    (old.rect.x - new.rect.x).abs() > RECT_TOLERANCE_PX
        || (old.rect.y - new.rect.y).abs() > RECT_TOLERANCE_PX
        || (old.rect.w - new.rect.w).abs() > RECT_TOLERANCE_PX
        || (old.rect.h - new.rect.h).abs() > RECT_TOLERANCE_PX
}

/// Diff two extractions of the same tab.
pub fn diff_candidates(old: &[ActionCandidate], new: &[ActionCandidate]) -> CandidateDiff {
    let old_by_id: HashMap<&str, &ActionCandidate> =
        old.iter().map(|c| (c.id.as_str(), c)).collect();
    let new_ids: HashMap<&str, ()> = new.iter().map(|c| (c.id.as_str(), ())).collect();

    let mut diff = CandidateDiff::default();

    for c in old {
        if !new_ids.contains_key(c.id.as_str()) {
            diff.removed.push(c.id.clone());
        }
    }

    for c in new {
        let prev = match old_by_id.get(c.id.as_str()) {
            Some(prev) => *prev,
            None => {
                diff.added.push(c.clone());
                continue;
            }
        };

        let mut update = CandidateUpdate::new(&c.id);
        if rect_changed(prev, c) {
            update.rect = Some(c.rect);
            update.rect_n = Some(c.rect_n);
            update.hit = Some(c.hit);
        }
        if prev.state != c.state {
            update.state = Some(c.state);
        }
        if prev.name != c.name {
            update.name = Some(c.name.clone());
        }
        if prev.value != c.value {
            update.value = c.value.clone().or_else(|| Some(String::new()));
        }
        if prev.occluded != c.occluded {
            update.occluded = Some(c.occluded);
        }
        if prev.ctx.in_modal != c.ctx.in_modal || prev.ctx.in_nav != c.ctx.in_nav {
            update.ctx = Some(c.ctx.clone());
        }
        if !update.is_empty() {
            diff.updated.push(update);
        }
    }

    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabsense_core::types::{
        ElementContext, ElementState, HitPoint, Rect, RectN, StyleHint, Viewport,
    };

    fn candidate(id: &str, rect: Rect) -> ActionCandidate {
        ActionCandidate {
            id: id.into(),
            rect,
            rect_n: rect.normalized(Viewport::default()),
            hit: rect.hit_point(),
            role: "button".into(),
            tag: "button".into(),
            name: "Go".into(),
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

    #[test]
    fn identical_sets_produce_empty_diff() {
        let a = vec![candidate("a_0", Rect::new(10, 10, 100, 30))];
        let d = diff_candidates(&a, &a);
        assert!(d.is_empty());
    }

    #[test]
    fn rect_drift_within_tolerance_is_ignored() {
        let old = vec![candidate("a_0", Rect::new(10, 10, 100, 30))];
        let new = vec![candidate("a_0", Rect::new(12, 8, 101, 31))];
        assert!(diff_candidates(&old, &new).is_empty());

        let moved = vec![candidate("a_0", Rect::new(13, 10, 100, 30))];
        let d = diff_candidates(&old, &moved);
        assert_eq!(d.updated.len(), 1);
        let up = &d.updated[0];
        assert!(up.rect.is_some());
        assert!(up.rect_n.is_some());
        assert_eq!(up.hit, Some(Rect::new(13, 10, 100, 30).hit_point()));
        assert!(up.state.is_none());
    }

    #[test]
    fn state_change_emits_full_state() {
        let old = vec![candidate("a_0", Rect::new(10, 10, 100, 30))];
        let mut new = old.clone();
        new[0].state.disabled = true;
        let d = diff_candidates(&old, &new);
        assert_eq!(
            d.updated[0].state,
            Some(ElementState {
                disabled: true,
                ..Default::default()
            })
        );
        assert!(d.updated[0].rect.is_none());
    }

    #[test]
    fn added_and_removed_are_tracked_by_id() {
        let old = vec![candidate("a_0", Rect::new(0, 0, 10, 10))];
        let new = vec![candidate("a_1", Rect::new(0, 0, 10, 10))];
        let d = diff_candidates(&old, &new);
        assert_eq!(d.removed, vec!["a_0".to_string()]);
        assert_eq!(d.added.len(), 1);
        assert_eq!(d.added[0].id, "a_1");
    }

    #[test]
    fn ctx_only_fires_on_modal_or_nav() {
        let old = vec![candidate("a_0", Rect::new(0, 0, 10, 10))];
        let mut depth_changed = old.clone();
        depth_changed[0].ctx.depth = 7;
        assert!(diff_candidates(&old, &depth_changed).is_empty());

        let mut modal = old.clone();
        modal[0].ctx.in_modal = true;
        let d = diff_candidates(&old, &modal);
        assert_eq!(d.updated.len(), 1);
        assert!(d.updated[0].ctx.as_ref().unwrap().in_modal);
    }

    #[test]
    fn name_value_occluded_emit_individually() {
        let old = vec![candidate("a_0", Rect::new(0, 0, 10, 10))];
        let mut new = old.clone();
        new[0].name = "Stop".into();
        new[0].value = Some("x".into());
        new[0].occluded = true;
        let d = diff_candidates(&old, &new);
        let up = &d.updated[0];
        assert_eq!(up.name.as_deref(), Some("Stop"));
        assert_eq!(up.value.as_deref(), Some("x"));
        assert_eq!(up.occluded, Some(true));
        assert!(up.state.is_none());
    }
}
