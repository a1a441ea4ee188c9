//! Compact structure outline for a selection.
//!
//! The outline is sized for a transport with tight payload limits: depth
//! bounded, total node count capped, long names shortened and coordinates
//! rounded to one decimal.

use crate::id::NodeId;
use crate::model::{SceneGraph, round_to};
use crate::options::Limits;
use serde::Serialize;

const ELLIPSIS: char = '…';

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructureNode {
    pub id: NodeId,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<StructureNode>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StructureOutline {
    pub nodes: Vec<StructureNode>,
    /// Number of nodes in the outline.
    pub node_count: usize,
    /// Set when the node cap or depth limit dropped visible nodes.
    pub truncated: bool,
}

/// Shorten `name` to at most `max_chars` characters, ellipsis included.
pub fn truncate_name(name: &str, max_chars: usize) -> String {
    if name.chars().count() <= max_chars {
        return name.to_string();
    }
    let mut out: String = name.chars().take(max_chars.saturating_sub(1)).collect();
    out.push(ELLIPSIS);
    out
}

/// Build the outline for `roots`. `depth` counts levels below each root;
/// `None` uses the configured default.
pub fn build_structure(
    scene: &SceneGraph,
    roots: &[NodeId],
    depth: Option<usize>,
    limits: &Limits,
) -> StructureOutline {
    let max_depth = depth.unwrap_or(limits.structure_default_depth);
    let mut outline = StructureOutline::default();
    let mut budget = limits.structure_max_nodes;

    for root in roots {
        if budget == 0 {
            outline.truncated = true;
            break;
        }
        if let Some(node) = outline_node(scene, *root, 0, max_depth, limits, &mut budget, &mut outline.truncated) {
            outline.nodes.push(node);
        }
    }
    outline.node_count = limits.structure_max_nodes - budget;
    log::debug!(
        "structure: {} nodes (truncated: {})",
        outline.node_count,
        outline.truncated
    );
    outline
}

fn outline_node(
    scene: &SceneGraph,
    id: NodeId,
    depth: usize,
    max_depth: usize,
    limits: &Limits,
    budget: &mut usize,
    truncated: &mut bool,
) -> Option<StructureNode> {
    let node = scene.get_by_id(id).filter(|n| n.visible)?;
    *budget = budget.checked_sub(1)?;

    let visible_children: Vec<NodeId> = scene
        .child_ids(id)
        .into_iter()
        .filter(|c| scene.get_by_id(*c).is_some_and(|n| n.visible))
        .collect();

    let children = if visible_children.is_empty() {
        None
    } else if depth >= max_depth {
        *truncated = true;
        None
    } else {
        let mut kids = Vec::new();
        for child in visible_children {
            if *budget == 0 {
                *truncated = true;
                break;
            }
            if let Some(kid) = outline_node(scene, child, depth + 1, max_depth, limits, budget, truncated) {
                kids.push(kid);
            }
        }
        Some(kids)
    };

    let b = node.bounds;
    Some(StructureNode {
        id,
        name: truncate_name(&node.name, limits.structure_max_name_chars),
        node_type: node.node_type.as_str().to_string(),
        x: round_to(b.x, 1),
        y: round_to(b.y, 1),
        width: round_to(b.width, 1),
        height: round_to(b.height, 1),
        children,
    })
}
