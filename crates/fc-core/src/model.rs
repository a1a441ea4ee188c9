//! Scene snapshot consumed by the compiler.
//!
//! The host design tool hands over a read-only tree of visual nodes (frames,
//! groups, text, vectors, component instances). It is stored as a stable
//! directed graph where edges go parent → child in paint order, so stages can
//! re-check node existence after the host invalidates part of the tree.
//! Nothing in the pipeline mutates this graph.

use crate::id::{NodeId, VariableId};
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableDiGraph;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashMap};

// ─── Colors & Geometry ───────────────────────────────────────────────────

/// RGBA color. Stored as 4 × f32 [0.0, 1.0].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    #[serde(default = "opaque")]
    pub a: f32,
}

fn opaque() -> f32 {
    1.0
}

impl Color {
    /// Emit as `#RRGGBB`, or `#RRGGBBAA` when not fully opaque.
    pub fn to_hex(&self) -> String {
        let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        let (r, g, b, a) = (to_u8(self.r), to_u8(self.g), to_u8(self.b), to_u8(self.a));
        if a == 255 {
            format!("#{r:02X}{g:02X}{b:02X}")
        } else {
            format!("#{r:02X}{g:02X}{b:02X}{a:02X}")
        }
    }
}

/// Axis-aligned box in canvas coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Strict AABB overlap; touching edges do not count.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.x + other.width
            && self.x + self.width > other.x
            && self.y < other.y + other.height
            && self.y + self.height > other.y
    }

    /// Round every component to `decimals` places.
    pub fn rounded(&self, decimals: i32) -> Rect {
        Rect {
            x: round_to(self.x, decimals),
            y: round_to(self.y, decimals),
            width: round_to(self.width, decimals),
            height: round_to(self.height, decimals),
        }
    }
}

/// Round half away from zero to a fixed number of decimals.
pub fn round_to(v: f32, decimals: i32) -> f32 {
    let factor = 10f64.powi(decimals);
    ((v as f64 * factor).round() / factor) as f32
}

// ─── Paint ───────────────────────────────────────────────────────────────

/// A gradient stop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientStop {
    pub offset: f32, // 0.0 .. 1.0
    pub color: Color,
}

/// A fill or stroke paint as reported by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Fill {
    Solid {
        color: Color,
        #[serde(default = "yes")]
        visible: bool,
    },
    Gradient {
        stops: Vec<GradientStop>,
        #[serde(default = "yes")]
        visible: bool,
    },
    Image {
        /// Host-side image hash, `None` when the bytes are not available.
        #[serde(default)]
        image_hash: Option<String>,
        #[serde(default = "yes")]
        visible: bool,
    },
}

fn yes() -> bool {
    true
}

impl Fill {
    pub fn is_visible(&self) -> bool {
        match self {
            Fill::Solid { visible, .. } | Fill::Gradient { visible, .. } | Fill::Image { visible, .. } => {
                *visible
            }
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Fill::Image { .. })
    }
}

// ─── Node kinds ──────────────────────────────────────────────────────────

/// Host node types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    Frame,
    Group,
    Section,
    Component,
    ComponentSet,
    Instance,
    Text,
    Rectangle,
    Ellipse,
    Vector,
    Line,
    Polygon,
    Star,
    BooleanOperation,
    Slice,
}

impl NodeType {
    /// Types that hold children and map to a block container.
    pub fn is_container(self) -> bool {
        matches!(
            self,
            NodeType::Frame
                | NodeType::Group
                | NodeType::Section
                | NodeType::Component
                | NodeType::ComponentSet
                | NodeType::Instance
        )
    }

    /// Pure vector geometry (exportable as a single path-based asset).
    pub fn is_vector_geometry(self) -> bool {
        matches!(
            self,
            NodeType::Vector
                | NodeType::Line
                | NodeType::Polygon
                | NodeType::Star
                | NodeType::Ellipse
                | NodeType::BooleanOperation
        )
    }

    /// Host-facing upper-case name, as used in outlines.
    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Frame => "FRAME",
            NodeType::Group => "GROUP",
            NodeType::Section => "SECTION",
            NodeType::Component => "COMPONENT",
            NodeType::ComponentSet => "COMPONENT_SET",
            NodeType::Instance => "INSTANCE",
            NodeType::Text => "TEXT",
            NodeType::Rectangle => "RECTANGLE",
            NodeType::Ellipse => "ELLIPSE",
            NodeType::Vector => "VECTOR",
            NodeType::Line => "LINE",
            NodeType::Polygon => "POLYGON",
            NodeType::Star => "STAR",
            NodeType::BooleanOperation => "BOOLEAN_OPERATION",
            NodeType::Slice => "SLICE",
        }
    }
}

// ─── Components ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PropertyKind {
    Variant,
    Boolean,
    Text,
    InstanceSwap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Text(String),
}

/// One component property as exposed on an instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentProperty {
    /// Property name; non-variant props carry a `#id` suffix from the host.
    pub name: String,
    pub kind: PropertyKind,
    pub value: PropertyValue,
}

/// Instance / variant metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentInfo {
    /// Main component name (for variants, e.g. `Size=Large, State=Hover`).
    pub name: String,
    /// Owning component-set name, when the main component is a variant.
    #[serde(default)]
    pub set_name: Option<String>,
    #[serde(default)]
    pub properties: Vec<ComponentProperty>,
}

// ─── Auto layout ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LayoutDirection {
    #[default]
    Horizontal,
    Vertical,
}

/// Auto-layout descriptor (explicit or heuristically inferred).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AutoLayout {
    #[serde(default)]
    pub direction: LayoutDirection,
    #[serde(default)]
    pub item_spacing: f32,
    #[serde(default)]
    pub wrap: bool,
}

// ─── Text ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TextDecoration {
    #[default]
    None,
    Underline,
    Strikethrough,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListType {
    #[default]
    None,
    Ordered,
    Unordered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TextCase {
    Original,
    Upper,
    Lower,
    Title,
}

/// A run of characters sharing one set of text properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyledSegment {
    pub characters: String,
    #[serde(default = "default_family")]
    pub font_family: String,
    /// Host style name, e.g. `Bold Italic`.
    #[serde(default)]
    pub font_style: String,
    #[serde(default = "default_weight")]
    pub font_weight: u16,
    #[serde(default = "default_size")]
    pub font_size: f32,
    #[serde(default)]
    pub text_decoration: TextDecoration,
    #[serde(default)]
    pub fill: Option<Color>,
    #[serde(default)]
    pub letter_spacing: Option<f32>,
    #[serde(default)]
    pub line_height: Option<f32>,
    #[serde(default)]
    pub text_case: Option<TextCase>,
    #[serde(default)]
    pub text_align: Option<String>,
    #[serde(default)]
    pub hyperlink: Option<String>,
    #[serde(default)]
    pub list_type: ListType,
    #[serde(default)]
    pub indentation: u32,
    #[serde(default)]
    pub list_spacing: f32,
    #[serde(default)]
    pub paragraph_spacing: f32,
}

fn default_family() -> String {
    "Inter".into()
}

fn default_weight() -> u16 {
    400
}

fn default_size() -> f32 {
    14.0
}

impl StyledSegment {
    /// Plain segment with default typography.
    pub fn plain(characters: &str) -> Self {
        Self {
            characters: characters.to_string(),
            font_family: default_family(),
            font_style: String::new(),
            font_weight: default_weight(),
            font_size: default_size(),
            text_decoration: TextDecoration::None,
            fill: None,
            letter_spacing: None,
            line_height: None,
            text_case: None,
            text_align: None,
            hyperlink: None,
            list_type: ListType::None,
            indentation: 0,
            list_spacing: 0.0,
            paragraph_spacing: 0.0,
        }
    }

    pub fn is_italic(&self) -> bool {
        let style = self.font_style.to_ascii_lowercase();
        style.contains("italic") || style.contains("oblique")
    }
}

/// Styled text content of a `TEXT` node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextContent {
    pub segments: Vec<StyledSegment>,
}

// ─── Variables ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VariableType {
    #[default]
    Color,
    Float,
    String,
    Boolean,
}

/// Value of a variable in one mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum VariableValue {
    Color(Color),
    Float(f32),
    Str(String),
    Bool(bool),
    Alias(VariableId),
}

/// A design variable (token) declared in the host document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    pub id: VariableId,
    /// Display name, e.g. `Colors/Primary 500`.
    pub name: String,
    #[serde(default)]
    pub collection: String,
    /// Declared code syntax for web output, e.g. `var(--color-primary)`.
    #[serde(default)]
    pub code_syntax: Option<String>,
    #[serde(default)]
    pub resolved_type: VariableType,
    pub default_mode: String,
    pub values_by_mode: BTreeMap<String, VariableValue>,
}

// ─── Scene Graph Nodes ───────────────────────────────────────────────────

/// A single node of the host scene.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneNode {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub name: String,
    #[serde(default = "yes")]
    pub visible: bool,
    #[serde(default)]
    pub bounds: Rect,
    #[serde(default)]
    pub render_bounds: Option<Rect>,
    #[serde(default)]
    pub fills: Vec<Fill>,
    #[serde(default)]
    pub strokes: Vec<Fill>,
    /// Clips following siblings instead of rendering its own geometry.
    #[serde(default)]
    pub is_mask: bool,
    #[serde(default)]
    pub component: Option<ComponentInfo>,
    /// Explicit auto-layout.
    #[serde(default)]
    pub layout: Option<AutoLayout>,
    /// Heuristically inferred layout, reported when no explicit layout exists.
    #[serde(default)]
    pub inferred_layout: Option<AutoLayout>,
    /// Explicitly set variable modes: collection → mode.
    #[serde(default)]
    pub variable_modes: BTreeMap<String, String>,
    /// Variables bound anywhere on this node (fills, spacing, radii...).
    #[serde(default)]
    pub bound_variables: SmallVec<[VariableId; 2]>,
    /// Cached style snapshot (property → value); hosts may serve it lazily instead.
    #[serde(default)]
    pub style: BTreeMap<String, String>,
    #[serde(default)]
    pub text: Option<TextContent>,
}

impl SceneNode {
    pub fn new(id: NodeId, node_type: NodeType) -> Self {
        Self {
            id,
            node_type,
            name: String::new(),
            visible: true,
            bounds: Rect::default(),
            render_bounds: None,
            fills: Vec::new(),
            strokes: Vec::new(),
            is_mask: false,
            component: None,
            layout: None,
            inferred_layout: None,
            variable_modes: BTreeMap::new(),
            bound_variables: SmallVec::new(),
            style: BTreeMap::new(),
            text: None,
        }
    }

    pub fn has_visible_image_fill(&self) -> bool {
        self.fills.iter().any(|f| f.is_image() && f.is_visible())
    }

    /// Image fills that are visible and point at host bytes.
    pub fn usable_image_hashes(&self) -> Vec<&str> {
        self.fills
            .iter()
            .filter_map(|f| match f {
                Fill::Image {
                    image_hash: Some(hash),
                    visible: true,
                } => Some(hash.as_str()),
                _ => None,
            })
            .collect()
    }
}

// ─── Scene Graph ─────────────────────────────────────────────────────────

/// The complete host snapshot: a forest of `SceneNode` values.
#[derive(Debug, Clone, Default)]
pub struct SceneGraph {
    /// The underlying directed graph; edges go parent → child.
    pub graph: StableDiGraph<SceneNode, ()>,

    /// Top-level nodes (pages' direct children), in paint order.
    pub roots: Vec<NodeIndex>,

    /// Index from NodeId → NodeIndex for fast lookup.
    pub id_index: HashMap<NodeId, NodeIndex>,

    /// Variable table for token resolution.
    pub variables: HashMap<VariableId, Variable>,

    /// The host's current interactive selection.
    pub selection: Vec<NodeId>,
}

impl SceneGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a top-level node. Returns the new node's index.
    pub fn add_root(&mut self, node: SceneNode) -> NodeIndex {
        let id = node.id;
        let idx = self.graph.add_node(node);
        self.roots.push(idx);
        self.id_index.insert(id, idx);
        idx
    }

    /// Add a node as a child of `parent`. Returns the new node's index.
    pub fn add_node(&mut self, parent: NodeIndex, node: SceneNode) -> NodeIndex {
        let id = node.id;
        let idx = self.graph.add_node(node);
        self.graph.add_edge(parent, idx, ());
        self.id_index.insert(id, idx);
        idx
    }

    /// Remove a node and its whole subtree, keeping the `id_index` synchronized.
    pub fn remove_node(&mut self, idx: NodeIndex) -> Option<SceneNode> {
        for child in self.children(idx) {
            self.remove_node(child);
        }
        self.roots.retain(|r| *r != idx);
        let removed = self.graph.remove_node(idx);
        if let Some(removed_node) = &removed {
            self.id_index.remove(&removed_node.id);
        }
        removed
    }

    pub fn define_variable(&mut self, variable: Variable) {
        self.variables.insert(variable.id, variable);
    }

    /// Look up a node by its host id.
    pub fn get_by_id(&self, id: NodeId) -> Option<&SceneNode> {
        self.id_index
            .get(&id)
            .and_then(|idx| self.graph.node_weight(*idx))
    }

    /// Get the index for a NodeId.
    pub fn index_of(&self, id: NodeId) -> Option<NodeIndex> {
        self.id_index.get(&id).copied()
    }

    /// Get the parent index of a node.
    pub fn parent(&self, idx: NodeIndex) -> Option<NodeIndex> {
        self.graph
            .neighbors_directed(idx, petgraph::Direction::Incoming)
            .next()
    }

    /// Children of a node in paint (insertion) order.
    ///
    /// Sorts by `NodeIndex` so the result is deterministic regardless of
    /// how `petgraph` iterates its adjacency list.
    pub fn children(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut children: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(idx, petgraph::Direction::Outgoing)
            .collect();
        children.sort();
        children
    }

    /// Child ids of `id`, or an empty list when the node is gone.
    pub fn child_ids(&self, id: NodeId) -> Vec<NodeId> {
        match self.index_of(id) {
            Some(idx) => self
                .children(idx)
                .into_iter()
                .filter_map(|c| self.graph.node_weight(c).map(|n| n.id))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn root_ids(&self) -> Vec<NodeId> {
        self.roots
            .iter()
            .filter_map(|idx| self.graph.node_weight(*idx).map(|n| n.id))
            .collect()
    }

    /// Whether the node and all of its ancestors are visible.
    pub fn is_effectively_visible(&self, id: NodeId) -> bool {
        let Some(start) = self.index_of(id) else {
            return false;
        };
        let mut current = Some(start);
        while let Some(idx) = current {
            match self.graph.node_weight(idx) {
                Some(node) if node.visible => current = self.parent(idx),
                _ => return false,
            }
        }
        true
    }

    // ─── JSON snapshot loading ───────────────────────────────────────────

    /// Parse a JSON scene snapshot (`{ roots, variables, selection }` with
    /// nested `children` arrays) into a `SceneGraph`.
    pub fn from_json(input: &str) -> Result<SceneGraph, String> {
        let doc: SceneDocument =
            serde_json::from_str(input).map_err(|e| format!("Scene parse error: {e}"))?;

        let mut graph = SceneGraph::new();
        for root in doc.roots {
            insert_node_recursive(&mut graph, None, root);
        }
        for variable in doc.variables {
            graph.define_variable(variable);
        }
        graph.selection = doc.selection;
        Ok(graph)
    }
}

#[derive(Deserialize)]
struct SceneDocument {
    roots: Vec<NodeDocument>,
    #[serde(default)]
    variables: Vec<Variable>,
    #[serde(default)]
    selection: Vec<NodeId>,
}

#[derive(Deserialize)]
struct NodeDocument {
    #[serde(flatten)]
    node: SceneNode,
    #[serde(default)]
    children: Vec<NodeDocument>,
}

fn insert_node_recursive(graph: &mut SceneGraph, parent: Option<NodeIndex>, doc: NodeDocument) {
    let idx = match parent {
        Some(parent) => graph.add_node(parent, doc.node),
        None => graph.add_root(doc.node),
    };
    for child in doc.children {
        insert_node_recursive(graph, Some(idx), child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_graph_basics() {
        let mut sg = SceneGraph::new();
        let frame = sg.add_root(SceneNode::new(NodeId::intern("m:1"), NodeType::Frame));
        let rect = sg.add_node(frame, SceneNode::new(NodeId::intern("m:2"), NodeType::Rectangle));

        assert!(sg.get_by_id(NodeId::intern("m:2")).is_some());
        assert_eq!(sg.children(frame), vec![rect]);
        assert_eq!(sg.root_ids(), vec![NodeId::intern("m:1")]);
    }

    #[test]
    fn remove_node_drops_subtree_from_index() {
        let mut sg = SceneGraph::new();
        let frame = sg.add_root(SceneNode::new(NodeId::intern("rm:1"), NodeType::Frame));
        let group = sg.add_node(frame, SceneNode::new(NodeId::intern("rm:2"), NodeType::Group));
        sg.add_node(group, SceneNode::new(NodeId::intern("rm:3"), NodeType::Vector));

        sg.remove_node(group);
        assert!(sg.get_by_id(NodeId::intern("rm:2")).is_none());
        assert!(sg.get_by_id(NodeId::intern("rm:3")).is_none());
        assert!(sg.child_ids(NodeId::intern("rm:1")).is_empty());
    }

    #[test]
    fn color_hex_output() {
        assert_eq!(Color { r: 0.2, g: 0.4, b: 1.0, a: 1.0 }.to_hex(), "#3366FF");
        assert_eq!(Color { r: 1.0, g: 0.0, b: 0.0, a: 0.5 }.to_hex(), "#FF000080");
    }

    #[test]
    fn from_json_builds_nested_nodes() {
        let input = r#"{
            "roots": [{
                "id": "j:1", "type": "FRAME", "name": "Card",
                "bounds": {"x": 0, "y": 0, "width": 100, "height": 50},
                "children": [
                    {"id": "j:2", "type": "TEXT", "name": "Title",
                     "text": {"segments": [{"characters": "Hi"}]}},
                    {"id": "j:3", "type": "VECTOR", "visible": false}
                ]
            }],
            "selection": ["j:1"]
        }"#;
        let sg = SceneGraph::from_json(input).unwrap();
        assert_eq!(sg.child_ids(NodeId::intern("j:1")).len(), 2);
        assert_eq!(sg.selection, vec![NodeId::intern("j:1")]);
        let text = sg.get_by_id(NodeId::intern("j:2")).unwrap();
        assert_eq!(text.text.as_ref().unwrap().segments[0].characters, "Hi");
        assert!(!sg.is_effectively_visible(NodeId::intern("j:3")));
    }

    #[test]
    fn rect_rounding_and_overlap() {
        let a = Rect::new(0.12345, 0.0, 10.0, 10.0).rounded(3);
        assert_eq!(a.x, 0.123);
        let b = Rect::new(10.0, 0.0, 5.0, 5.0);
        assert!(Rect::new(5.0, 5.0, 10.0, 10.0).intersects(&Rect::new(0.0, 0.0, 10.0, 10.0)));
        assert!(!Rect::new(0.0, 0.0, 10.0, 10.0).intersects(&b));
    }
}
