//! Shared data model: geometry, action candidates, and per-tab summaries.
//!
//! An [`ActionCandidate`] is the unit of perception: one structured record
//! per currently-interactive page element. Candidates cross the wire in
//! camelCase JSON, so every struct here carries serde renames.

use serde::{Deserialize, Serialize};

/// Integer pixel rectangle in viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    /// Default click point: the integer center of the rect.
    pub fn hit_point(&self) -> HitPoint {
        HitPoint {
            cx: (self.x as f64 + self.w as f64 / 2.0).round() as i32,
            cy: (self.y as f64 + self.h as f64 / 2.0).round() as i32,
        }
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.x + self.w && y >= self.y && y < self.y + self.h
    }

    pub fn is_empty(&self) -> bool {
        self.w <= 0 || self.h <= 0
    }

    /// Viewport-normalized copy, clamped to [0, 1].
    pub fn normalized(&self, viewport: Viewport) -> RectN {
        let vw = viewport.width.max(1) as f64;
        let vh = viewport.height.max(1) as f64;
        RectN {
            x: (self.x as f64 / vw).clamp(0.0, 1.0),
            y: (self.y as f64 / vh).clamp(0.0, 1.0),
            w: (self.w as f64 / vw).clamp(0.0, 1.0),
            h: (self.h as f64 / vh).clamp(0.0, 1.0),
        }
    }

    /// True when the rect lies entirely outside the viewport.
    pub fn outside(&self, viewport: Viewport) -> bool {
        self.x + self.w <= 0
            || self.y + self.h <= 0
            || self.x >= viewport.width
            || self.y >= viewport.height
    }
}

/// Viewport-normalized rectangle, floats in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RectN {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

/// Default click point for a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HitPoint {
    pub cx: i32,
    pub cy: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: i32,
    pub height: i32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Interaction-relevant booleans derived from DOM properties and aria
/// attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ElementState {
    pub disabled: bool,
    pub expanded: bool,
    pub checked: bool,
    pub selected: bool,
    pub focused: bool,
}

/// Structural ancestry flags. `depth` counts element ancestors up to the
/// document body.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementContext {
    pub in_modal: bool,
    pub in_nav: bool,
    pub in_form: bool,
    pub depth: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_id: Option<String>,
}

/// Heuristic visual classification from class names, data attributes, and
/// computed style.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleHint {
    pub is_primary: bool,
    pub is_danger: bool,
    pub cursor_pointer: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_color: Option<String>,
}

/// One currently-interactive page element, as the controller sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionCandidate {
    /// Stable identity, scoped to a tab. Survives attribute and position
    /// changes for as long as the underlying element persists.
    pub id: String,
    pub rect: Rect,
    pub rect_n: RectN,
    pub hit: HitPoint,
    pub role: String,
    pub tag: String,
    pub name: String,
    pub aria: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    pub state: ElementState,
    pub ctx: ElementContext,
    pub style_hint: StyleHint,
    /// True when the element at the hit point is neither the candidate nor
    /// one of its ancestors/descendants.
    pub occluded: bool,
}

/// A per-candidate delta entry: `id` plus only the fields that changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateUpdate {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rect: Option<Rect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rect_n: Option<RectN>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hit: Option<HitPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ElementState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occluded: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctx: Option<ElementContext>,
}

impl CandidateUpdate {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Default::default()
        }
    }

    /// True when the update carries nothing beyond the id.
    pub fn is_empty(&self) -> bool {
        self.rect.is_none()
            && self.rect_n.is_none()
            && self.hit.is_none()
            && self.state.is_none()
            && self.name.is_none()
            && self.value.is_none()
            && self.occluded.is_none()
            && self.ctx.is_none()
    }

    /// Merge the carried fields into an existing candidate.
    pub fn merge_into(&self, candidate: &mut ActionCandidate) {
        if let Some(rect) = self.rect {
            candidate.rect = rect;
        }
        if let Some(rect_n) = self.rect_n {
            candidate.rect_n = rect_n;
        }
        if let Some(hit) = self.hit {
            candidate.hit = hit;
        }
        if let Some(state) = self.state {
            candidate.state = state;
        }
        if let Some(ref name) = self.name {
            candidate.name = name.clone();
        }
        if let Some(ref value) = self.value {
            candidate.value = Some(value.clone());
        }
        if let Some(occluded) = self.occluded {
            candidate.occluded = occluded;
        }
        if let Some(ref ctx) = self.ctx {
            candidate.ctx = ctx.clone();
        }
    }
}

/// Last-observed pointer position and button mask. Stored globally on the
/// gateway, not per tab.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PointerState {
    pub x: i32,
    pub y: i32,
    pub buttons: u32,
}

/// Tab summary for status listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabSummary {
    pub tab_id: u64,
    pub url: String,
    pub candidate_count: usize,
    pub viewport: Viewport,
    pub last_update: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_point_is_rounded_center() {
        let r = Rect::new(10, 10, 100, 30);
        assert_eq!(r.hit_point(), HitPoint { cx: 60, cy: 25 });

        // Odd sizes round the half-pixel up.
        let r = Rect::new(0, 0, 5, 5);
        assert_eq!(r.hit_point(), HitPoint { cx: 3, cy: 3 });
    }

    #[test]
    fn rect_outside_viewport() {
        let vp = Viewport {
            width: 100,
            height: 100,
        };
        assert!(Rect::new(-50, 0, 40, 40).outside(vp));
        assert!(Rect::new(100, 0, 40, 40).outside(vp));
        assert!(!Rect::new(90, 90, 40, 40).outside(vp));
    }

    #[test]
    fn normalized_clamps_to_unit_range() {
        let vp = Viewport {
            width: 200,
            height: 100,
        };
        let n = Rect::new(50, 50, 400, 10).normalized(vp);
        assert_eq!(n.x, 0.25);
        assert_eq!(n.y, 0.5);
        assert_eq!(n.w, 1.0);
        assert_eq!(n.h, 0.1);
    }

    #[test]
    fn update_merge_only_touches_carried_fields() {
        let mut c = ActionCandidate {
            id: "a_0".into(),
            rect: Rect::new(0, 0, 10, 10),
            rect_n: RectN::default(),
            hit: HitPoint::default(),
            role: "button".into(),
            tag: "button".into(),
            name: "Save".into(),
            aria: String::new(),
            placeholder: None,
            value: None,
            href: None,
            state: ElementState::default(),
            ctx: ElementContext::default(),
            style_hint: StyleHint::default(),
            occluded: false,
        };
        let mut up = CandidateUpdate::new("a_0");
        up.state = Some(ElementState {
            disabled: true,
            ..Default::default()
        });
        up.merge_into(&mut c);
        assert!(c.state.disabled);
        assert_eq!(c.name, "Save");
        assert_eq!(c.rect, Rect::new(0, 0, 10, 10));
    }

    #[test]
    fn candidate_wire_names_are_camel_case() {
        let c = ActionCandidate {
            id: "a_1".into(),
            rect: Rect::new(1, 2, 3, 4),
            rect_n: RectN::default(),
            hit: HitPoint { cx: 2, cy: 4 },
            role: "link".into(),
            tag: "a".into(),
            name: "Docs".into(),
            aria: String::new(),
            placeholder: None,
            value: None,
            href: Some("/docs".into()),
            state: ElementState::default(),
            ctx: ElementContext::default(),
            style_hint: StyleHint::default(),
            occluded: false,
        };
        let v = serde_json::to_value(&c).unwrap();
        assert!(v.get("rectN").is_some());
        assert!(v.get("styleHint").is_some());
        assert!(v.get("rect_n").is_none());
    }
}
