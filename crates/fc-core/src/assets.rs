//! Asset planning: which subtrees collapse into one vector asset, which
//! nodes export as rasters. Also normalizes exported SVG root tags.
//!
//! Planning reads the `VisibleTree` for structure but re-checks every node
//! against the scene graph, since the host may drop nodes between stages.
//! Missing data never promotes.

use crate::id::NodeId;
use crate::model::{NodeType, SceneGraph};
use crate::options::{Unit, format_num};
use crate::syntax::parse_svg_root;
use crate::tree::{AssetKind, VisibleTree};
use serde::Serialize;
use std::collections::HashSet;

/// Result of planning. `vector_roots` and `skipped_ids` are disjoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AssetPlan {
    /// Vector asset roots in document order.
    pub vector_roots: Vec<NodeId>,
    /// Descendants subsumed by a promoted root.
    pub skipped_ids: Vec<NodeId>,
    /// Nodes exported through their image fills.
    pub image_nodes: Vec<NodeId>,
}

impl AssetPlan {
    pub fn is_vector_root(&self, id: NodeId) -> bool {
        self.vector_roots.contains(&id)
    }

    pub fn is_skipped(&self, id: NodeId) -> bool {
        self.skipped_ids.contains(&id)
    }
}

/// Plan assets for the whole tree.
pub fn plan_assets(scene: &SceneGraph, tree: &VisibleTree) -> AssetPlan {
    let mut plan = AssetPlan::default();
    let mut skipped: HashSet<NodeId> = HashSet::new();
    let capped: HashSet<NodeId> = tree.stats.capped_node_ids.iter().copied().collect();

    for id in &tree.order {
        if skipped.contains(id) {
            continue;
        }
        let Some(node) = tree.get(*id) else {
            continue;
        };
        let Some(scene_node) = scene.get_by_id(*id) else {
            log::debug!("assets: {id} vanished before planning");
            continue;
        };

        let promoted = !capped.contains(id) && is_promotable(scene, tree, *id);
        let vector_leaf = node.asset_kind == Some(AssetKind::Vector) && !scene_node.is_mask;

        if promoted || vector_leaf {
            plan.vector_roots.push(*id);
            for d in tree.descendants(*id) {
                if skipped.insert(d) {
                    plan.skipped_ids.push(d);
                }
            }
        } else if node.asset_kind == Some(AssetKind::Image) {
            plan.image_nodes.push(*id);
        }
    }

    log::debug!(
        "assets: {} vector roots, {} skipped, {} images",
        plan.vector_roots.len(),
        plan.skipped_ids.len(),
        plan.image_nodes.len()
    );
    plan
}

/// A `GROUP` or `FRAME` whose every non-mask descendant is vector geometry
/// or a nested plain container, with at least one vector leaf.
fn is_promotable(scene: &SceneGraph, tree: &VisibleTree, id: NodeId) -> bool {
    let Some(node) = scene.get_by_id(id) else {
        return false;
    };
    if !matches!(node.node_type, NodeType::Group | NodeType::Frame) || node.has_visible_image_fill() {
        return false;
    }

    let mut vector_leaves = 0;
    for d in tree.descendants(id) {
        let Some(desc) = scene.get_by_id(d) else {
            return false;
        };
        if desc.is_mask {
            continue;
        }
        if desc.has_visible_image_fill() {
            return false;
        }
        match desc.node_type {
            t if t.is_vector_geometry() => vector_leaves += 1,
            NodeType::Group | NodeType::Frame => {
                if tree.stats.capped_node_ids.contains(&d) {
                    return false;
                }
            }
            _ => return false,
        }
    }
    vector_leaves > 0
}

// ─── SVG normalization ────────────────────────────────────────────────────

/// Rewrite the root tag's `width`/`height` into `unit` and add a `viewBox`
/// when missing. Markup without a recognizable root comes back unchanged.
pub fn normalize_svg(markup: &str, width: f32, height: f32, unit: Unit) -> String {
    let Some(root) = parse_svg_root(markup) else {
        log::warn!("assets: exported markup has no <svg> root");
        return markup.to_string();
    };

    let numeric = |name: &str| -> Option<f32> {
        let v = root.attr(name)?.trim();
        v.strip_suffix("px").unwrap_or(v).parse().ok()
    };
    let view_w = numeric("width").unwrap_or(width);
    let view_h = numeric("height").unwrap_or(height);

    let mut attrs: Vec<(String, String)> = Vec::with_capacity(root.attrs.len() + 3);
    let mut has_width = false;
    let mut has_height = false;
    for (name, value) in &root.attrs {
        match name.as_str() {
            "width" => {
                has_width = true;
                attrs.push((name.clone(), unit.format_length(width)));
            }
            "height" => {
                has_height = true;
                attrs.push((name.clone(), unit.format_length(height)));
            }
            _ => attrs.push((name.clone(), value.clone())),
        }
    }
    if !has_width {
        attrs.push(("width".into(), unit.format_length(width)));
    }
    if !has_height {
        attrs.push(("height".into(), unit.format_length(height)));
    }
    if root.attr("viewBox").is_none() {
        attrs.push((
            "viewBox".into(),
            format!("0 0 {} {}", format_num(view_w), format_num(view_h)),
        ));
    }

    let mut tag = String::from("<svg");
    for (name, value) in &attrs {
        let quote = if value.contains('"') { '\'' } else { '"' };
        tag.push_str(&format!(" {name}={quote}{value}{quote}"));
    }
    tag.push_str(if root.self_closing { "/>" } else { ">" });

    let mut out = String::with_capacity(markup.len() + 32);
    out.push_str(&markup[..root.start]);
    out.push_str(&tag);
    out.push_str(&markup[root.end..]);
    out
}
