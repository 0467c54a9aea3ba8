//! Candidate extraction: which elements are actionable and what the
//! controller should know about each one.

use tabsense_core::types::{
    ActionCandidate, ElementContext, ElementState, StyleHint, Viewport,
};
use tabsense_dom::{Document, Element, NodeId};

use crate::identity::IdentityMap;

/// ARIA roles that make an element interactive regardless of tag.
pub const INTERACTIVE_ROLES: &[&str] = &[
    "button",
    "link",
    "menuitem",
    "menuitemcheckbox",
    "menuitemradio",
    "option",
    "tab",
    "switch",
    "checkbox",
    "radio",
    "combobox",
    "listbox",
    "slider",
    "spinbutton",
    "searchbox",
    "textbox",
];

const NATIVE_CONTROLS: &[&str] = &["button", "input", "select", "textarea"];

/// Maximum accessible-name length taken from raw text content.
const NAME_TEXT_LIMIT: usize = 80;

/// An element is interactive when any of the selection rules match.
pub fn is_interactive(el: &Element) -> bool {
    if el.tag == "a" && el.has_attr("href") {
        return true;
    }
    if NATIVE_CONTROLS.contains(&el.tag.as_str()) {
        return true;
    }
    if el.tag == "summary" || el.tag == "details" {
        return true;
    }
    if el.tag == "label" && el.has_attr("for") {
        return true;
    }
    if let Some(ti) = el.attr("tabindex") {
        if ti.parse::<i32>().map(|v| v > 0).unwrap_or(false) {
            return true;
        }
    }
    if el.has_attr("onclick") {
        return true;
    }
    if el.attr("contenteditable") == Some("true") {
        return true;
    }
    if let Some(role) = el.attr("role") {
        if INTERACTIVE_ROLES.contains(&role.to_lowercase().as_str()) {
            return true;
        }
    }
    false
}

/// Visibility filter. Occlusion is computed separately and never excludes.
pub fn is_visible(el: &Element, viewport: Viewport) -> bool {
    !el.rect.is_empty() && !el.hidden_by_style() && !el.rect.outside(viewport)
}

/// True when the element at the candidate's hit point is neither the
/// candidate nor one of its ancestors/descendants.
pub fn is_occluded(doc: &Document, node: NodeId) -> bool {
    let rect = match doc.get(node) {
        Some(el) => el.rect,
        None => return false,
    };
    let hit = rect.hit_point();
    match doc.element_at(hit.cx, hit.cy) {
        Some(top) => !doc.is_ancestor_or_descendant(top, node),
        None => false,
    }
}

/// ARIA role: explicit `role` wins, then the tag/type table, landmarks,
/// fallback `generic`.
pub fn derive_role(el: &Element) -> String {
    if let Some(role) = el.attr("role") {
        if !role.is_empty() {
            return role.to_lowercase();
        }
    }
    match el.tag.as_str() {
        "a" if el.has_attr("href") => "link".into(),
        "button" => "button".into(),
        "input" => match el.attr("type").unwrap_or("text").to_lowercase().as_str() {
            "button" | "submit" | "reset" | "image" => "button".into(),
            "checkbox" => "checkbox".into(),
            "radio" => "radio".into(),
            "range" => "slider".into(),
            "search" => "searchbox".into(),
            _ => "textbox".into(),
        },
        "select" => {
            if el.has_attr("multiple") {
                "listbox".into()
            } else {
                "combobox".into()
            }
        }
        "textarea" => "textbox".into(),
        "summary" => "button".into(),
        "nav" => "navigation".into(),
        "main" => "main".into(),
        "header" => "banner".into(),
        "footer" => "contentinfo".into(),
        "aside" => "complementary".into(),
        "form" => "form".into(),
        _ => "generic".into(),
    }
}

/// Accessible name, in priority order: aria-label, aria-labelledby target
/// text, associated label text, title, placeholder, truncated text content.
pub fn accessible_name(doc: &Document, node: NodeId) -> String {
    let el = match doc.get(node) {
        Some(el) => el,
        None => return String::new(),
    };

    if let Some(label) = el.attr("aria-label") {
        if !label.trim().is_empty() {
            return label.trim().to_string();
        }
    }

    if let Some(labelledby) = el.attr("aria-labelledby") {
        if let Some(target) = doc.by_attr("id", labelledby) {
            let text = doc.subtree_text(target);
            if !text.is_empty() {
                return text;
            }
        }
    }

    if let Some(text) = associated_label_text(doc, node) {
        if !text.is_empty() {
            return text;
        }
    }

    if let Some(title) = el.attr("title") {
        if !title.trim().is_empty() {
            return title.trim().to_string();
        }
    }

    if let Some(placeholder) = el.attr("placeholder") {
        if !placeholder.trim().is_empty() {
            return placeholder.trim().to_string();
        }
    }

    truncate(&doc.subtree_text(node), NAME_TEXT_LIMIT)
}

/// Text of a `label[for]` pointing at this element, or of a wrapping label.
fn associated_label_text(doc: &Document, node: NodeId) -> Option<String> {
    if let Some(dom_id) = doc.get(node).and_then(|el| el.attr("id")) {
        for candidate in doc.iter_tree() {
            let el = doc.get(candidate)?;
            if el.tag == "label" && el.attr("for") == Some(dom_id) {
                return Some(doc.subtree_text(candidate));
            }
        }
    }
    doc.ancestors(node)
        .into_iter()
        .find(|a| doc.get(*a).map(|el| el.tag == "label").unwrap_or(false))
        .map(|label| {
            // Exclude the control's own value from the label text.
            doc.subtree_text(label)
        })
}

fn truncate(s: &str, limit: usize) -> String {
    if s.chars().count() <= limit {
        s.to_string()
    } else {
        s.chars().take(limit).collect()
    }
}

pub fn element_state(doc: &Document, node: NodeId) -> ElementState {
    let el = match doc.get(node) {
        Some(el) => el,
        None => return ElementState::default(),
    };
    ElementState {
        disabled: el.attr_bool("disabled") || el.attr("aria-disabled") == Some("true"),
        expanded: el.attr("aria-expanded") == Some("true")
            || (el.tag == "details" && el.attr_bool("open")),
        checked: el.attr_bool("checked") || el.attr("aria-checked") == Some("true"),
        selected: el.attr_bool("selected") || el.attr("aria-selected") == Some("true"),
        focused: doc.focused() == Some(node),
    }
}

pub fn element_context(doc: &Document, node: NodeId) -> ElementContext {
    let ancestors = doc.ancestors(node);
    let mut ctx = ElementContext {
        depth: ancestors.len() as u32,
        ..Default::default()
    };
    for a in &ancestors {
        let el = match doc.get(*a) {
            Some(el) => el,
            None => continue,
        };
        let role = el.attr("role").unwrap_or("");
        if role == "dialog" || role == "alertdialog" || el.attr_bool("aria-modal") {
            ctx.in_modal = true;
        }
        if el.tag == "nav" || role == "navigation" {
            ctx.in_nav = true;
        }
        if el.tag == "form" && !ctx.in_form {
            ctx.in_form = true;
            ctx.form_id = el.attr("id").map(|s| s.to_string());
        }
    }
    ctx
}

pub fn style_hint(el: &Element) -> StyleHint {
    let class = el.attr("class").unwrap_or("").to_lowercase();
    let variant = el.attr("data-variant").unwrap_or("").to_lowercase();
    let is_primary = class.contains("primary")
        || class.contains("submit")
        || class.contains("cta")
        || variant == "primary";
    let is_danger = class.contains("danger")
        || class.contains("destructive")
        || class.contains("delete")
        || variant == "danger";
    StyleHint {
        is_primary,
        is_danger,
        cursor_pointer: el.style.cursor_pointer,
        background_color: el.style.background_color.clone(),
        text_color: el.style.text_color.clone(),
    }
}

/// Tags whose candidates carry a `value` field.
fn carries_value(tag: &str) -> bool {
    matches!(tag, "input" | "textarea" | "select")
}

/// Materialize the current candidate set: every interactive, visible
/// element in document order, with stable ids.
pub fn extract_candidates(doc: &Document, ids: &mut IdentityMap) -> Vec<ActionCandidate> {
    let viewport = doc.viewport();
    let mut out = Vec::new();

    for node in doc.iter_tree() {
        let el = match doc.get(node) {
            Some(el) => el,
            None => continue,
        };
        if !is_interactive(el) || !is_visible(el, viewport) {
            continue;
        }

        let rect = el.rect;
        out.push(ActionCandidate {
            id: ids.id_for(doc, node),
            rect,
            rect_n: rect.normalized(viewport),
            hit: rect.hit_point(),
            role: derive_role(el),
            tag: el.tag.clone(),
            name: accessible_name(doc, node),
            aria: el.attr("aria-label").unwrap_or("").to_string(),
            placeholder: el.attr("placeholder").map(|s| s.to_string()),
            value: carries_value(&el.tag).then(|| el.value.clone()),
            href: el.attr("href").map(|s| s.to_string()),
            state: element_state(doc, node),
            ctx: element_context(doc, node),
            style_hint: style_hint(el),
            occluded: is_occluded(doc, node),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabsense_core::types::Rect;
    use tabsense_dom::StyleFlags;

    fn doc() -> Document {
        Document::new(Viewport {
            width: 1024,
            height: 768,
        })
    }

    fn visible(d: &mut Document, node: NodeId) {
        d.set_rect(node, Rect::new(10, 10, 100, 30));
    }

    #[test]
    fn selection_rules_cover_the_fixed_list() {
        let mut d = doc();
        let anchor = d.create_element("a");
        d.set_attr(anchor, "href", "/x");
        let plain_anchor = d.create_element("a");
        let div_tabindex = d.create_element("div");
        d.set_attr(div_tabindex, "tabindex", "1");
        let div_zero = d.create_element("div");
        d.set_attr(div_zero, "tabindex", "0");
        let div_onclick = d.create_element("div");
        d.set_attr(div_onclick, "onclick", "go()");
        let editable = d.create_element("div");
        d.set_attr(editable, "contenteditable", "true");
        let aria_button = d.create_element("span");
        d.set_attr(aria_button, "role", "menuitem");

        assert!(is_interactive(d.get(anchor).unwrap()));
        assert!(!is_interactive(d.get(plain_anchor).unwrap()));
        assert!(is_interactive(d.get(div_tabindex).unwrap()));
        assert!(!is_interactive(d.get(div_zero).unwrap()));
        assert!(is_interactive(d.get(div_onclick).unwrap()));
        assert!(is_interactive(d.get(editable).unwrap()));
        assert!(is_interactive(d.get(aria_button).unwrap()));
    }

    #[test]
    fn visibility_filter_excludes_hidden_and_offscreen() {
        let mut d = doc();
        let vp = d.viewport();

        let ok = d.create_element("button");
        visible(&mut d, ok);
        assert!(is_visible(d.get(ok).unwrap(), vp));

        let zero = d.create_element("button");
        d.set_rect(zero, Rect::new(10, 10, 0, 30));
        assert!(!is_visible(d.get(zero).unwrap(), vp));

        let styled = d.create_element("button");
        visible(&mut d, styled);
        let mut flags = StyleFlags::default();
        flags.opacity_zero = true;
        d.set_style(styled, flags);
        assert!(!is_visible(d.get(styled).unwrap(), vp));

        let offscreen = d.create_element("button");
        d.set_rect(offscreen, Rect::new(-200, 10, 100, 30));
        assert!(!is_visible(d.get(offscreen).unwrap(), vp));
    }

    #[test]
    fn role_table_matches_input_types() {
        let mut d = doc();
        let cases = [
            ("checkbox", "checkbox"),
            ("radio", "radio"),
            ("range", "slider"),
            ("search", "searchbox"),
            ("submit", "button"),
            ("email", "textbox"),
        ];
        for (ty, role) in cases {
            let el = d.create_element("input");
            d.set_attr(el, "type", ty);
            assert_eq!(derive_role(d.get(el).unwrap()), role, "type={ty}");
        }

        let multi = d.create_element("select");
        d.set_attr(multi, "multiple", "true");
        assert_eq!(derive_role(d.get(multi).unwrap()), "listbox");
        let single = d.create_element("select");
        assert_eq!(derive_role(d.get(single).unwrap()), "combobox");

        let explicit = d.create_element("div");
        d.set_attr(explicit, "role", "Tab");
        assert_eq!(derive_role(d.get(explicit).unwrap()), "tab");
    }

    #[test]
    fn accessible_name_priority_chain() {
        let mut d = doc();

        // aria-label beats everything.
        let el = d.create_element("button");
        d.set_attr(el, "aria-label", "Close");
        d.set_text(el, "X");
        d.append_child(d.root(), el);
        assert_eq!(accessible_name(&d, el), "Close");

        // aria-labelledby resolves the target's text.
        let labelled = d.create_element("input");
        d.set_attr(labelled, "aria-labelledby", "lbl");
        let lbl = d.create_element("span");
        d.set_attr(lbl, "id", "lbl");
        d.set_text(lbl, "Email address");
        d.append_child(d.root(), labelled);
        d.append_child(d.root(), lbl);
        assert_eq!(accessible_name(&d, labelled), "Email address");

        // label[for] association.
        let input = d.create_element("input");
        d.set_attr(input, "id", "user");
        let label = d.create_element("label");
        d.set_attr(label, "for", "user");
        d.set_text(label, "Username");
        d.append_child(d.root(), input);
        d.append_child(d.root(), label);
        assert_eq!(accessible_name(&d, input), "Username");

        // Fall through title, then placeholder, then text.
        let titled = d.create_element("input");
        d.set_attr(titled, "title", "Search");
        d.append_child(d.root(), titled);
        assert_eq!(accessible_name(&d, titled), "Search");

        let placeholder = d.create_element("input");
        d.set_attr(placeholder, "placeholder", "Type here");
        d.append_child(d.root(), placeholder);
        assert_eq!(accessible_name(&d, placeholder), "Type here");

        let texty = d.create_element("button");
        d.set_text(texty, "Long button text");
        d.append_child(d.root(), texty);
        assert_eq!(accessible_name(&d, texty), "Long button text");
    }

    #[test]
    fn context_flags_from_ancestry() {
        let mut d = doc();
        let dialog = d.create_element("div");
        d.set_attr(dialog, "role", "dialog");
        let form = d.create_element("form");
        d.set_attr(form, "id", "checkout");
        let btn = d.create_element("button");
        d.append_child(d.root(), dialog);
        d.append_child(dialog, form);
        d.append_child(form, btn);

        let ctx = element_context(&d, btn);
        assert!(ctx.in_modal);
        assert!(ctx.in_form);
        assert!(!ctx.in_nav);
        assert_eq!(ctx.form_id.as_deref(), Some("checkout"));
        assert_eq!(ctx.depth, 3);
    }

    #[test]
    fn occlusion_annotates_covered_candidates() {
        let mut d = doc();
        let btn = d.create_element("button");
        d.append_child(d.root(), btn);
        visible(&mut d, btn);
        assert!(!is_occluded(&d, btn));

        let overlay = d.create_element("div");
        d.append_child(d.root(), overlay);
        d.set_rect(overlay, Rect::new(0, 0, 500, 500));
        assert!(is_occluded(&d, btn));

        // A child of the candidate at the hit point is not occlusion.
        d.remove_child(overlay);
        let icon = d.create_element("span");
        d.append_child(btn, icon);
        d.set_rect(icon, Rect::new(10, 10, 100, 30));
        assert!(!is_occluded(&d, btn));
    }

    #[test]
    fn extraction_is_deterministic() {
        let mut d = doc();
        let btn = d.create_element("button");
        d.set_text(btn, "Sign in");
        d.append_child(d.root(), btn);
        visible(&mut d, btn);
        let input = d.create_element("input");
        d.set_attr(input, "placeholder", "email");
        d.append_child(d.root(), input);
        d.set_rect(input, Rect::new(10, 60, 200, 24));

        let mut ids = IdentityMap::new();
        let first = extract_candidates(&d, &mut ids);
        let second = extract_candidates(&d, &mut ids);
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
        assert_eq!(first[0].hit, first[0].rect.hit_point());
    }
}
