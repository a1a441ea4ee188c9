//! Style sanitizer: ordered correction passes over the style map.
//!
//! Each pass has a single responsibility, reads the `VisibleTree` for
//! structure, and only adds or replaces declarations. Running a pass twice
//! over the same tree yields the same map.

use crate::id::NodeId;
use crate::model::LayoutDirection;
use crate::options::format_num;
use crate::tokens::StyleMap;
use crate::tree::VisibleTree;

/// Run every pass in order.
pub fn sanitize(styles: &mut StyleMap, tree: &VisibleTree) {
    compensate_negative_gap(styles, tree);
    enforce_relative_parent(styles, tree);
    assign_stacking_order(styles, tree);
}

fn decls<'a>(
    styles: &'a mut StyleMap,
    id: NodeId,
) -> &'a mut std::collections::BTreeMap<String, String> {
    styles.entry(id).or_default()
}

// ─── Negative gap ─────────────────────────────────────────────────────────

/// Replace negative auto-layout spacing with per-child negative margins.
///
/// The container's `gap` becomes `0`; every in-flow child after the first
/// gets a `margin-left` (horizontal) or `margin-top` (vertical) equal to
/// the original spacing, preserving the overlap. Absolutely positioned
/// children take no part in the flow and are left alone.
pub fn compensate_negative_gap(styles: &mut StyleMap, tree: &VisibleTree) {
    for id in &tree.order {
        let Some(node) = tree.get(*id) else {
            continue;
        };
        let Some(layout) = node.auto_layout else {
            continue;
        };
        let in_flow: Vec<NodeId> = node
            .children
            .iter()
            .copied()
            .filter(|c| !matches!(position_of(styles, *c), Some("absolute" | "fixed")))
            .collect();
        if layout.item_spacing >= 0.0 || in_flow.len() < 2 {
            continue;
        }
        let spacing = format!("{}px", format_num(layout.item_spacing));
        let margin = match layout.direction {
            LayoutDirection::Horizontal => "margin-left",
            LayoutDirection::Vertical => "margin-top",
        };
        decls(styles, *id).insert("gap".into(), "0".into());
        for child in in_flow.iter().skip(1) {
            decls(styles, *child).insert(margin.into(), spacing.clone());
        }
        log::debug!("sanitize: compensated negative gap {spacing} on {id}");
    }
}

// ─── Relative parent ──────────────────────────────────────────────────────

fn position_of(styles: &StyleMap, id: NodeId) -> Option<&str> {
    styles
        .get(&id)
        .and_then(|d| d.get("position"))
        .map(|p| p.trim())
}

fn is_positioned(styles: &StyleMap, id: NodeId) -> bool {
    matches!(
        position_of(styles, id),
        Some("absolute" | "fixed" | "relative" | "sticky")
    )
}

/// Give every parent of an absolutely positioned child a containing block.
pub fn enforce_relative_parent(styles: &mut StyleMap, tree: &VisibleTree) {
    for id in &tree.order {
        let Some(node) = tree.get(*id) else {
            continue;
        };
        let has_absolute_child = node
            .children
            .iter()
            .any(|c| position_of(styles, *c) == Some("absolute"));
        if !has_absolute_child {
            continue;
        }
        if matches!(position_of(styles, *id), None | Some("static")) {
            decls(styles, *id).insert("position".into(), "relative".into());
        }
    }
}

// ─── Stacking order ───────────────────────────────────────────────────────

/// Pin overlapping positioned siblings to their paint order with `z-index`.
///
/// Among a parent's positioned children, those whose boxes overlap at least
/// one other positioned sibling get a 1-based rank in paint order. An
/// existing `z-index` is left alone.
pub fn assign_stacking_order(styles: &mut StyleMap, tree: &VisibleTree) {
    for id in &tree.order {
        let Some(node) = tree.get(*id) else {
            continue;
        };
        let positioned: Vec<NodeId> = node
            .children
            .iter()
            .copied()
            .filter(|c| is_positioned(styles, *c))
            .collect();
        if positioned.len() < 2 {
            continue;
        }

        let bounds = |c: NodeId| tree.get(c).map(|n| n.render_bounds.unwrap_or(n.bounds));
        let overlapping: Vec<NodeId> = positioned
            .iter()
            .copied()
            .filter(|a| {
                positioned.iter().any(|b| {
                    a != b
                        && match (bounds(*a), bounds(*b)) {
                            (Some(ra), Some(rb)) => ra.intersects(&rb),
                            _ => false,
                        }
                })
            })
            .collect();

        for (rank, child) in overlapping.iter().enumerate() {
            decls(styles, *child)
                .entry("z-index".into())
                .or_insert_with(|| (rank + 1).to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AutoLayout, NodeType, Rect, SceneGraph, SceneNode};
    use crate::options::DepthPolicy;
    use crate::tree::build_visible_tree;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn scene_with_children(layout: Option<AutoLayout>, boxes: &[Rect]) -> (SceneGraph, Vec<NodeId>) {
        let mut sg = SceneGraph::new();
        let mut parent = SceneNode::new(NodeId::intern("s:parent"), NodeType::Frame);
        parent.layout = layout;
        let p = sg.add_root(parent);
        let mut ids = Vec::new();
        for (i, b) in boxes.iter().enumerate() {
            let id = NodeId::intern(&format!("s:child{i}"));
            let mut child = SceneNode::new(id, NodeType::Rectangle);
            child.bounds = *b;
            sg.add_node(p, child);
            ids.push(id);
        }
        (sg, ids)
    }

    fn set(styles: &mut StyleMap, id: NodeId, prop: &str, value: &str) {
        styles
            .entry(id)
            .or_default()
            .insert(prop.to_string(), value.to_string());
    }

    fn get<'a>(styles: &'a StyleMap, id: NodeId, prop: &str) -> Option<&'a str> {
        styles.get(&id)?.get(prop).map(String::as_str)
    }

    #[test]
    fn negative_gap_becomes_margins() {
        let layout = AutoLayout {
            direction: LayoutDirection::Vertical,
            item_spacing: -8.0,
            wrap: false,
        };
        let r = Rect::new(0.0, 0.0, 10.0, 10.0);
        let (sg, ids) = scene_with_children(Some(layout), &[r, r, r]);
        let tree = build_visible_tree(&sg, &sg.root_ids(), DepthPolicy::default());
        let parent = NodeId::intern("s:parent");

        let mut styles = StyleMap::new();
        set(&mut styles, parent, "gap", "-8px");
        sanitize(&mut styles, &tree);
        let once = styles.clone();
        sanitize(&mut styles, &tree);

        assert_eq!(styles, once);
        assert_eq!(get(&styles, parent, "gap"), Some("0"));
        assert_eq!(get(&styles, ids[0], "margin-top"), None);
        assert_eq!(get(&styles, ids[1], "margin-top"), Some("-8px"));
        assert_eq!(get(&styles, ids[2], "margin-top"), Some("-8px"));
    }

    #[test]
    fn negative_gap_skips_absolute_children() {
        let layout = AutoLayout {
            direction: LayoutDirection::Horizontal,
            item_spacing: -4.0,
            wrap: false,
        };
        let r = Rect::new(0.0, 0.0, 10.0, 10.0);
        let (sg, ids) = scene_with_children(Some(layout), &[r, r, r]);
        let tree = build_visible_tree(&sg, &sg.root_ids(), DepthPolicy::default());

        let mut styles = StyleMap::new();
        set(&mut styles, ids[1], "position", "absolute");
        sanitize(&mut styles, &tree);

        assert_eq!(get(&styles, ids[0], "margin-left"), None);
        assert_eq!(get(&styles, ids[1], "margin-left"), None);
        assert_eq!(get(&styles, ids[2], "margin-left"), Some("-4px"));
    }

    #[test]
    fn absolute_child_forces_relative_parent() {
        let r = Rect::new(0.0, 0.0, 10.0, 10.0);
        let (sg, ids) = scene_with_children(None, &[r]);
        let tree = build_visible_tree(&sg, &sg.root_ids(), DepthPolicy::default());
        let parent = NodeId::intern("s:parent");

        let mut styles = StyleMap::new();
        set(&mut styles, ids[0], "position", "absolute");
        sanitize(&mut styles, &tree);
        assert_eq!(get(&styles, parent, "position"), Some("relative"));

        let mut fixed = StyleMap::new();
        set(&mut fixed, ids[0], "position", "absolute");
        set(&mut fixed, parent, "position", "fixed");
        sanitize(&mut fixed, &tree);
        assert_eq!(get(&fixed, parent, "position"), Some("fixed"));
    }

    #[test]
    fn overlapping_positioned_siblings_get_paint_rank() {
        let (sg, ids) = scene_with_children(
            None,
            &[
                Rect::new(0.0, 0.0, 20.0, 20.0),
                Rect::new(10.0, 10.0, 20.0, 20.0),
                Rect::new(100.0, 100.0, 5.0, 5.0),
                Rect::new(15.0, 15.0, 2.0, 2.0),
            ],
        );
        let tree = build_visible_tree(&sg, &sg.root_ids(), DepthPolicy::default());

        let mut styles = StyleMap::new();
        for id in &ids {
            set(&mut styles, *id, "position", "absolute");
        }
        set(&mut styles, ids[3], "z-index", "9");
        sanitize(&mut styles, &tree);
        let once = styles.clone();
        sanitize(&mut styles, &tree);
        assert_eq!(styles, once);

        let z: BTreeMap<usize, Option<&str>> =
            ids.iter().enumerate().map(|(i, id)| (i, get(&styles, *id, "z-index"))).collect();
        assert_eq!(z[&0], Some("1"));
        assert_eq!(z[&1], Some("2"));
        assert_eq!(z[&2], None);
        assert_eq!(z[&3], Some("9"));
    }
}
