//! Tree builder: scene snapshot → `VisibleTree`.
//!
//! Walks the selected roots in pre-order, skipping invisible nodes, and
//! records an inferred semantic tag plus structural hints for every visited
//! node. Oversized selections get a depth cap so downstream stages see a
//! bounded prefix of the tree instead of the whole document.

use crate::id::NodeId;
use crate::model::{
    AutoLayout, ComponentInfo, PropertyKind, PropertyValue, Rect, SceneGraph, SceneNode, NodeType,
};
use crate::options::DepthPolicy;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Hint keys attached to `VisibleNode::data_hint`.
pub const HINT_COMPONENT: &str = "component";
pub const HINT_AUTO_LAYOUT: &str = "auto-layout";
pub const HINT_VARIABLE_MODES: &str = "variable-modes";

/// Inferred output element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tag {
    Div,
    Span,
    P,
    Img,
    Svg,
}

impl Tag {
    pub fn as_str(self) -> &'static str {
        match self {
            Tag::Div => "div",
            Tag::Span => "span",
            Tag::P => "p",
            Tag::Img => "img",
            Tag::Svg => "svg",
        }
    }
}

/// Which kind of exported asset a node stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Vector,
    Image,
}

#[derive(Debug, Clone, Serialize)]
pub struct VisibleNode {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub tag: Tag,
    pub name: String,
    pub visible: bool,
    pub depth: usize,
    /// Position among visible siblings.
    pub index: usize,
    pub bounds: Rect,
    pub render_bounds: Option<Rect>,
    pub children: Vec<NodeId>,
    pub data_hint: Option<BTreeMap<String, String>>,
    pub auto_layout: Option<AutoLayout>,
    pub asset_kind: Option<AssetKind>,
}

impl VisibleNode {
    pub fn hint(&self, key: &str) -> Option<&str> {
        self.data_hint.as_ref()?.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TreeStats {
    pub total_nodes: usize,
    pub max_depth: usize,
    pub depth_limit: Option<usize>,
    pub capped: bool,
    pub capped_node_ids: Vec<NodeId>,
}

/// Flattened, order-stable view of the visible part of a selection.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VisibleTree {
    pub root_ids: Vec<NodeId>,
    /// Pre-order traversal of every kept node.
    pub order: Vec<NodeId>,
    pub nodes: HashMap<NodeId, VisibleNode>,
    pub stats: TreeStats,
}

impl VisibleTree {
    pub fn get(&self, id: NodeId) -> Option<&VisibleNode> {
        self.nodes.get(&id)
    }

    /// Parent of `id` inside the tree, if any.
    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.order
            .iter()
            .copied()
            .find(|p| self.nodes.get(p).is_some_and(|n| n.children.contains(&id)))
    }

    /// Every kept descendant of `id` in pre-order (excluding `id`).
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = match self.nodes.get(&id) {
            Some(node) => node.children.iter().rev().copied().collect(),
            None => return out,
        };
        while let Some(next) = stack.pop() {
            out.push(next);
            if let Some(node) = self.nodes.get(&next) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }
}

// ─── Builder ──────────────────────────────────────────────────────────────

/// Build the visible tree for `roots`. Never fails: missing or invisible
/// roots are skipped and oversized trees come back capped.
pub fn build_visible_tree(scene: &SceneGraph, roots: &[NodeId], policy: DepthPolicy) -> VisibleTree {
    let mut seen = HashSet::new();
    let root_ids: Vec<NodeId> = roots
        .iter()
        .copied()
        .filter(|id| seen.insert(*id))
        .filter(|id| scene.get_by_id(*id).is_some_and(|n| n.visible))
        .collect();

    let histogram = depth_histogram(scene, &root_ids);
    let depth_limit = choose_depth_limit(&histogram, policy);
    if let Some(limit) = depth_limit {
        log::debug!(
            "tree: {} visible nodes exceed {}, capping at depth {limit}",
            histogram.iter().sum::<usize>(),
            policy.cap_threshold
        );
    }

    let mut tree = VisibleTree {
        root_ids: root_ids.clone(),
        ..Default::default()
    };
    tree.stats.depth_limit = depth_limit;

    // Explicit stack: (id, depth, sibling index).
    let mut stack: Vec<(NodeId, usize, usize)> = root_ids
        .iter()
        .enumerate()
        .rev()
        .map(|(i, id)| (*id, 0, i))
        .collect();

    while let Some((id, depth, index)) = stack.pop() {
        let Some(node) = scene.get_by_id(id) else {
            continue;
        };
        let visible_children = visible_child_ids(scene, id);
        let capped = depth_limit.is_some_and(|limit| depth >= limit) && !visible_children.is_empty();

        let children = if capped {
            tree.stats.capped_node_ids.push(id);
            Vec::new()
        } else {
            visible_children
        };

        for (i, child) in children.iter().enumerate().rev() {
            stack.push((*child, depth + 1, i));
        }

        tree.stats.max_depth = tree.stats.max_depth.max(depth);
        tree.order.push(id);
        tree.nodes
            .insert(id, visible_node(node, depth, index, children, scene));
    }

    tree.stats.total_nodes = tree.order.len();
    tree.stats.capped = !tree.stats.capped_node_ids.is_empty();
    tree
}

fn visible_child_ids(scene: &SceneGraph, id: NodeId) -> Vec<NodeId> {
    scene
        .child_ids(id)
        .into_iter()
        .filter(|c| scene.get_by_id(*c).is_some_and(|n| n.visible))
        .collect()
}

/// Count visible nodes per depth across all roots.
fn depth_histogram(scene: &SceneGraph, roots: &[NodeId]) -> Vec<usize> {
    let mut histogram: Vec<usize> = Vec::new();
    let mut stack: Vec<(NodeId, usize)> = roots.iter().map(|id| (*id, 0)).collect();
    while let Some((id, depth)) = stack.pop() {
        if histogram.len() <= depth {
            histogram.resize(depth + 1, 0);
        }
        histogram[depth] += 1;
        for child in visible_child_ids(scene, id) {
            stack.push((child, depth + 1));
        }
    }
    histogram
}

/// Deepest level whose cumulative node count stays within the target budget.
/// `None` when the whole tree fits under the cap threshold.
pub fn choose_depth_limit(histogram: &[usize], policy: DepthPolicy) -> Option<usize> {
    let total: usize = histogram.iter().sum();
    if total <= policy.cap_threshold {
        return None;
    }
    let mut cumulative = 0;
    let mut limit = 0;
    for (depth, count) in histogram.iter().enumerate() {
        cumulative += count;
        if cumulative > policy.target_budget {
            break;
        }
        limit = depth;
    }
    Some(limit)
}

fn visible_node(
    node: &SceneNode,
    depth: usize,
    index: usize,
    children: Vec<NodeId>,
    scene: &SceneGraph,
) -> VisibleNode {
    let (tag, asset_kind) = infer_tag(node);
    let has_children = !scene.child_ids(node.id).is_empty();
    VisibleNode {
        id: node.id,
        node_type: node.node_type,
        tag,
        name: node.name.clone(),
        visible: node.visible,
        depth,
        index,
        bounds: node.bounds.rounded(3),
        render_bounds: node.render_bounds.map(|r| r.rounded(3)),
        children,
        data_hint: compute_hints(node, has_children),
        auto_layout: node.layout.or(node.inferred_layout),
        asset_kind,
    }
}

// ─── Tag inference ────────────────────────────────────────────────────────

/// Infer the output tag from node type plus content signals.
pub fn infer_tag(node: &SceneNode) -> (Tag, Option<AssetKind>) {
    if node.has_visible_image_fill() {
        return (Tag::Img, Some(AssetKind::Image));
    }
    match node.node_type {
        NodeType::Text => {
            let has_text = node
                .text
                .as_ref()
                .is_some_and(|t| t.segments.iter().any(|s| !s.characters.is_empty()));
            if has_text {
                (Tag::P, None)
            } else {
                (Tag::Span, None)
            }
        }
        t if t.is_vector_geometry() => (Tag::Svg, Some(AssetKind::Vector)),
        _ => (Tag::Div, None),
    }
}

// ─── Hints ────────────────────────────────────────────────────────────────

fn compute_hints(node: &SceneNode, has_children: bool) -> Option<BTreeMap<String, String>> {
    let mut hints = BTreeMap::new();

    if let Some(info) = &node.component {
        hints.insert(HINT_COMPONENT.to_string(), component_identity(info));
    }

    if node.node_type.is_container() && has_children {
        match (node.layout, node.inferred_layout) {
            (Some(_), _) => {}
            (None, Some(_)) => {
                hints.insert(HINT_AUTO_LAYOUT.to_string(), "inferred".to_string());
            }
            (None, None) => {
                hints.insert(HINT_AUTO_LAYOUT.to_string(), "none".to_string());
            }
        }
    }

    if !node.variable_modes.is_empty() {
        let modes: Vec<String> = node
            .variable_modes
            .iter()
            .map(|(collection, mode)| format!("{collection}={mode}"))
            .collect();
        hints.insert(HINT_VARIABLE_MODES.to_string(), modes.join(", "));
    }

    if hints.is_empty() { None } else { Some(hints) }
}

/// Human-readable identity: `Button [Size=Large] [Disabled=off]`.
///
/// Instance-swap properties are omitted; host `#id` suffixes on property
/// names are stripped.
pub fn component_identity(info: &ComponentInfo) -> String {
    let base = info.set_name.as_deref().unwrap_or(&info.name);
    let props: Vec<String> = info
        .properties
        .iter()
        .filter_map(|prop| {
            let name = prop.name.split('#').next().unwrap_or(&prop.name).trim();
            let value = match (prop.kind, &prop.value) {
                (PropertyKind::InstanceSwap, _) => return None,
                (_, PropertyValue::Bool(true)) => "on".to_string(),
                (_, PropertyValue::Bool(false)) => "off".to_string(),
                (_, PropertyValue::Text(text)) => text.clone(),
            };
            Some(format!("[{name}={value}]"))
        })
        .collect();

    if props.is_empty() {
        base.to_string()
    } else {
        format!("{base} {}", props.join(" "))
    }
}
