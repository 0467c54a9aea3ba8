//! Candidate search and filtering.
//!
//! The same semantics run in two places: in-page for `query` commands and
//! gateway-side for controller `query` requests, so the matcher lives here
//! as pure functions over candidate slices.
//!
//! Text matching is case-insensitive and tiered: exact match on name or
//! aria beats partial (substring) match in name, aria, or id, which beats
//! the `"<role> <text>"` pattern (role equality plus partial text match).

use serde::{Deserialize, Serialize};

use crate::types::ActionCandidate;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// `true` requires `!occluded`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
    /// `true` requires `!state.disabled`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl SearchFilters {
    /// Role and tag filters are exact string equality; candidates carry
    /// them already lowercased.
    pub fn matches(&self, c: &ActionCandidate) -> bool {
        if let Some(ref role) = self.role {
            if c.role != *role {
                return false;
            }
        }
        if let Some(ref tag) = self.tag {
            if c.tag != *tag {
                return false;
            }
        }
        if self.visible == Some(true) && c.occluded {
            return false;
        }
        if self.enabled == Some(true) && c.state.disabled {
            return false;
        }
        true
    }
}

/// Match quality, best first. Ordering is the tie-break for [`best_match`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchTier {
    ExactName,
    ExactAria,
    PartialName,
    PartialAria,
    PartialId,
    RoleText,
}

/// Classify how well `q` matches a candidate. `None` means no match.
pub fn match_tier(c: &ActionCandidate, q: &str) -> Option<MatchTier> {
    let q = q.trim().to_lowercase();
    if q.is_empty() {
        return None;
    }
    let name = c.name.to_lowercase();
    let aria = c.aria.to_lowercase();

    if !name.is_empty() && name == q {
        return Some(MatchTier::ExactName);
    }
    if !aria.is_empty() && aria == q {
        return Some(MatchTier::ExactAria);
    }
    if !name.is_empty() && name.contains(&q) {
        return Some(MatchTier::PartialName);
    }
    if !aria.is_empty() && aria.contains(&q) {
        return Some(MatchTier::PartialAria);
    }
    if c.id.to_lowercase().contains(&q) {
        return Some(MatchTier::PartialId);
    }

    // "<role> <text>": role must equal the first token, remainder is a
    // partial text match.
    if let Some((role, text)) = q.split_once(char::is_whitespace) {
        let text = text.trim();
        if !text.is_empty()
            && c.role.to_lowercase() == role
            && (name.contains(text) || aria.contains(text))
        {
            return Some(MatchTier::RoleText);
        }
    }
    None
}

/// All candidates passing the text match (if `q` is non-empty) and the
/// filters, in input order.
pub fn search<'a>(
    candidates: impl IntoIterator<Item = &'a ActionCandidate>,
    q: &str,
    filters: Option<&SearchFilters>,
) -> Vec<&'a ActionCandidate> {
    candidates
        .into_iter()
        .filter(|c| q.trim().is_empty() || match_tier(c, q).is_some())
        .filter(|c| filters.map(|f| f.matches(c)).unwrap_or(true))
        .collect()
}

/// The unique "best" match: first by tier, input order within a tier.
pub fn best_match<'a>(
    candidates: impl IntoIterator<Item = &'a ActionCandidate>,
    q: &str,
    filters: Option<&SearchFilters>,
) -> Option<&'a ActionCandidate> {
    candidates
        .into_iter()
        .filter(|c| filters.map(|f| f.matches(c)).unwrap_or(true))
        .filter_map(|c| match_tier(c, q).map(|t| (t, c)))
        .min_by_key(|(t, _)| *t)
        .map(|(_, c)| c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        ElementContext, ElementState, HitPoint, Rect, RectN, StyleHint,
    };

    fn candidate(id: &str, role: &str, name: &str, aria: &str) -> ActionCandidate {
        ActionCandidate {
            id: id.into(),
            rect: Rect::new(0, 0, 10, 10),
            rect_n: RectN::default(),
            hit: HitPoint::default(),
            role: role.into(),
            tag: "button".into(),
            name: name.into(),
            aria: aria.into(),
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
    fn exact_name_beats_partial() {
        let cands = vec![
            candidate("a_0", "button", "Sign in with Google", ""),
            candidate("a_1", "button", "Sign in", ""),
        ];
        let best = best_match(&cands, "sign in", None).unwrap();
        assert_eq!(best.id, "a_1");
    }

    #[test]
    fn partial_match_covers_name_aria_and_id() {
        let cands = vec![
            candidate("a_0", "button", "Submit", ""),
            candidate("a_1", "button", "", "close dialog"),
            candidate("e_login-box", "textbox", "", ""),
        ];
        assert_eq!(search(&cands, "submit", None).len(), 1);
        assert_eq!(search(&cands, "close", None).len(), 1);
        assert_eq!(search(&cands, "login", None).len(), 1);
    }

    #[test]
    fn role_text_pattern_requires_role_equality() {
        let cands = vec![
            candidate("a_0", "button", "Save changes", ""),
            candidate("a_1", "link", "Save changes", ""),
        ];
        // Plain substring matches both; the role-text pattern is only
        // reached by queries that fail the earlier tiers.
        let hits = search(&cands, "button changes x", None);
        assert!(hits.is_empty());
        let c = candidate("a_2", "button", "Discard edits", "");
        assert_eq!(match_tier(&c, "button discard"), Some(MatchTier::RoleText));
        assert_eq!(match_tier(&c, "link discard"), None);
    }

    #[test]
    fn filters_apply_exact_role_and_visibility() {
        let mut occluded = candidate("a_0", "button", "Sign in", "");
        occluded.occluded = true;
        let mut disabled = candidate("a_1", "button", "Sign in", "");
        disabled.state.disabled = true;
        let plain = candidate("a_2", "link", "Sign in", "");
        let cands = vec![occluded, disabled, plain];

        let only_buttons = SearchFilters {
            role: Some("button".into()),
            ..Default::default()
        };
        assert_eq!(search(&cands, "sign in", Some(&only_buttons)).len(), 2);

        // Exact equality: candidates carry lowercased roles, so a cased
        // filter matches nothing.
        let cased = SearchFilters {
            role: Some("Button".into()),
            ..Default::default()
        };
        assert!(search(&cands, "sign in", Some(&cased)).is_empty());

        let visible_enabled = SearchFilters {
            role: Some("button".into()),
            visible: Some(true),
            enabled: Some(true),
            ..Default::default()
        };
        assert!(search(&cands, "sign in", Some(&visible_enabled)).is_empty());
    }

    #[test]
    fn empty_query_with_filters_lists_by_filter() {
        let cands = vec![
            candidate("a_0", "button", "Sign in", ""),
            candidate("a_1", "link", "Docs", ""),
        ];
        let f = SearchFilters {
            role: Some("link".into()),
            ..Default::default()
        };
        let hits = search(&cands, "", Some(&f));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a_1");
    }
}
