pub mod assets;
pub mod emitter;
pub mod id;
pub mod model;
pub mod options;
pub mod sanitize;
pub mod structure;
pub mod syntax;
pub mod text;
pub mod tokens;
pub mod tree;

pub use assets::{AssetPlan, normalize_svg, plan_assets};
pub use emitter::{AssetRef, ComponentTree, render_component};
pub use id::{NodeId, VariableId};
pub use model::*;
pub use options::{CompileOptions, DepthPolicy, Limits, Unit};
pub use sanitize::sanitize;
pub use structure::{StructureNode, StructureOutline, build_structure};
pub use text::{TextBlock, TextLine, TextRun, merge_text};
pub use tokens::{StyleMap, TokenIndex, UNRESOLVED};
pub use tree::{AssetKind, Tag, VisibleNode, VisibleTree, build_visible_tree};

// Re-export petgraph types so downstream crates don't need a direct dependency
pub use petgraph::graph::NodeIndex;
