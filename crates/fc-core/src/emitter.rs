//! Emitter: visible tree + style map → markup and CSS.
//!
//! Markup goes through an intermediate `ComponentTree` so a component hook
//! can inspect or replace it before rendering. Output is deterministic for
//! a fixed input: classes follow tree order and declarations are sorted.

use crate::assets::AssetPlan;
use crate::id::NodeId;
use crate::syntax::px_literals;
use crate::text::{BlockKind, TextBlock, TextLine, TextRun};
use crate::tokens::StyleMap;
use crate::tree::{Tag, VisibleTree};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt::Write;

/// Run attribute carrying a favicon URL for link runs.
pub const FAVICON_ATTR: &str = "favicon";

const INLINE_TAGS: &[&str] = &["a", "strong", "em", "u", "s", "code", "span", "br"];
const VOID_TAGS: &[&str] = &["img", "br"];

/// How an exported asset is referenced from markup.
#[derive(Debug, Clone, PartialEq)]
pub enum AssetRef {
    Url(String),
    /// Upload failed; the raw markup is inlined instead.
    Inline(String),
}

// ─── Component tree ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ComponentNode {
    Text(String),
    Element(ComponentElement),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentElement {
    pub tag: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    #[serde(default)]
    pub children: Vec<ComponentNode>,
    /// Verbatim markup rendered in place of children (inlined SVG).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl ComponentElement {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            ..Default::default()
        }
    }

    fn with_attr(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attrs.insert(key.to_string(), value.into());
        self
    }

    fn is_inline(&self) -> bool {
        INLINE_TAGS.contains(&self.tag.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentTree {
    pub name: String,
    pub roots: Vec<ComponentNode>,
}

/// Everything the markup builder reads.
pub struct MarkupInput<'a> {
    pub tree: &'a VisibleTree,
    pub classes: &'a HashMap<NodeId, String>,
    pub plan: &'a AssetPlan,
    pub assets: &'a HashMap<NodeId, AssetRef>,
    pub text: &'a HashMap<NodeId, Vec<TextBlock>>,
}

/// Build the component tree for every root of the visible tree.
pub fn build_component_tree(input: &MarkupInput<'_>) -> ComponentTree {
    let name = input
        .tree
        .root_ids
        .first()
        .and_then(|id| input.tree.get(*id))
        .map(|n| n.name.clone())
        .unwrap_or_default();
    let roots = input
        .tree
        .root_ids
        .iter()
        .filter_map(|id| element_for(input, *id))
        .map(ComponentNode::Element)
        .collect();
    ComponentTree { name, roots }
}

fn element_for(input: &MarkupInput<'_>, id: NodeId) -> Option<ComponentElement> {
    if input.plan.is_skipped(id) {
        return None;
    }
    let node = input.tree.get(id)?;
    let class = input.classes.get(&id).cloned().unwrap_or_default();

    if input.plan.is_vector_root(id) {
        let el = match input.assets.get(&id) {
            Some(AssetRef::Url(url)) => ComponentElement::new("img")
                .with_attr("src", url.clone())
                .with_attr("alt", node.name.clone()),
            Some(AssetRef::Inline(markup)) => ComponentElement {
                raw: Some(markup.clone()),
                ..ComponentElement::new("div")
            },
            None => ComponentElement::new("div"),
        };
        return Some(el.with_attr("class", class));
    }

    let mut el = match node.tag {
        Tag::Img if node.children.is_empty() => {
            let mut img = ComponentElement::new("img").with_attr("alt", node.name.clone());
            if let Some(AssetRef::Url(url)) = input.assets.get(&id) {
                img = img.with_attr("src", url.clone());
            }
            img
        }
        Tag::P | Tag::Span => text_element(node.tag, input.text.get(&id)),
        _ => ComponentElement::new("div"),
    };
    el.attrs.insert("class".to_string(), class);
    for hint in node.data_hint.iter().flatten() {
        el.attrs.insert(format!("data-{}", hint.0), hint.1.clone());
    }
    for child in &node.children {
        if let Some(c) = element_for(input, *child) {
            el.children.push(ComponentNode::Element(c));
        }
    }
    Some(el)
}

fn text_element(tag: Tag, blocks: Option<&Vec<TextBlock>>) -> ComponentElement {
    let Some(blocks) = blocks.filter(|b| !b.is_empty()) else {
        return ComponentElement::new(tag.as_str());
    };
    let base = base_attrs(blocks);

    if let [only] = blocks.as_slice()
        && only.kind == BlockKind::Paragraph
    {
        let mut el = ComponentElement::new(tag.as_str());
        el.children = paragraph_children(&only.lines, &base);
        return el;
    }

    let mut wrapper = ComponentElement::new("div");
    for block in blocks {
        let child = match block.kind {
            BlockKind::Paragraph => {
                let mut p = ComponentElement::new("p");
                p.children = paragraph_children(&block.lines, &base);
                p
            }
            BlockKind::OrderedList | BlockKind::UnorderedList => {
                let tag = if block.kind == BlockKind::OrderedList { "ol" } else { "ul" };
                let mut list = ComponentElement::new(tag);
                for line in &block.lines {
                    let mut li = ComponentElement::new("li");
                    li.children = line_children(line, &base);
                    list.children.push(ComponentNode::Element(li));
                }
                list
            }
        };
        wrapper.children.push(ComponentNode::Element(child));
    }
    wrapper
}

/// Attributes of the first non-whitespace run; other runs style the difference.
fn base_attrs(blocks: &[TextBlock]) -> BTreeMap<String, String> {
    blocks
        .iter()
        .flat_map(|b| &b.lines)
        .flat_map(|l| &l.runs)
        .find(|r| !r.is_whitespace())
        .map(|r| r.attrs.clone())
        .unwrap_or_default()
}

fn paragraph_children(lines: &[TextLine], base: &BTreeMap<String, String>) -> Vec<ComponentNode> {
    let mut out = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            out.push(ComponentNode::Element(ComponentElement::new("br")));
        }
        out.extend(line_children(line, base));
    }
    out
}

fn line_children(line: &TextLine, base: &BTreeMap<String, String>) -> Vec<ComponentNode> {
    line.runs.iter().map(|run| run_node(run, base)).collect()
}

fn run_node(run: &TextRun, base: &BTreeMap<String, String>) -> ComponentNode {
    let mut node = ComponentNode::Text(run.text.clone());
    let wrap = |tag: &str, inner: ComponentNode| {
        let mut el = ComponentElement::new(tag);
        el.children.push(inner);
        ComponentNode::Element(el)
    };
    let marks = run.marks;
    if marks.code {
        node = wrap("code", node);
    }
    if marks.strike {
        node = wrap("s", node);
    }
    if marks.underline {
        node = wrap("u", node);
    }
    if marks.italic {
        node = wrap("em", node);
    }
    if marks.bold {
        node = wrap("strong", node);
    }

    let diff: Vec<String> = run
        .attrs
        .iter()
        .filter(|(k, v)| k.as_str() != FAVICON_ATTR && base.get(*k) != Some(*v))
        .map(|(k, v)| format!("{k}: {v}"))
        .collect();
    if !diff.is_empty() && !run.is_whitespace() {
        let mut span = ComponentElement::new("span").with_attr("style", diff.join("; "));
        span.children.push(node);
        node = ComponentNode::Element(span);
    }

    if let Some(href) = &run.link {
        let mut a = ComponentElement::new("a").with_attr("href", href.clone());
        if let Some(icon) = run.attrs.get(FAVICON_ATTR) {
            a.attrs.insert("data-favicon".to_string(), icon.clone());
        }
        a.children.push(node);
        node = ComponentNode::Element(a);
    }
    node
}

// ─── Rendering ────────────────────────────────────────────────────────────

/// Render a component tree as indented markup.
pub fn render_component(tree: &ComponentTree) -> String {
    let mut out = String::with_capacity(1024);
    for root in &tree.roots {
        render_node(&mut out, root, 0);
    }
    out
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn render_node(out: &mut String, node: &ComponentNode, depth: usize) {
    indent(out, depth);
    match node {
        ComponentNode::Text(text) => out.push_str(&escape_html(text)),
        ComponentNode::Element(el) => render_element(out, el, depth),
    }
    out.push('\n');
}

fn open_tag(out: &mut String, el: &ComponentElement) {
    let _ = write!(out, "<{}", el.tag);
    for (k, v) in &el.attrs {
        let _ = write!(out, " {k}=\"{}\"", escape_html(v));
    }
    out.push('>');
}

fn render_element(out: &mut String, el: &ComponentElement, depth: usize) {
    open_tag(out, el);
    if VOID_TAGS.contains(&el.tag.as_str()) {
        return;
    }
    if let Some(raw) = &el.raw {
        out.push('\n');
        for line in raw.lines() {
            indent(out, depth + 1);
            out.push_str(line);
            out.push('\n');
        }
        indent(out, depth);
    } else if el.children.iter().all(is_inline_node) {
        for child in &el.children {
            render_inline(out, child);
        }
    } else {
        out.push('\n');
        for child in &el.children {
            render_node(out, child, depth + 1);
        }
        indent(out, depth);
    }
    let _ = write!(out, "</{}>", el.tag);
}

fn is_inline_node(node: &ComponentNode) -> bool {
    match node {
        ComponentNode::Text(_) => true,
        ComponentNode::Element(el) => el.is_inline() && el.raw.is_none(),
    }
}

fn render_inline(out: &mut String, node: &ComponentNode) {
    match node {
        ComponentNode::Text(text) => out.push_str(&escape_html(text)),
        ComponentNode::Element(el) => {
            open_tag(out, el);
            if VOID_TAGS.contains(&el.tag.as_str()) {
                return;
            }
            for child in &el.children {
                render_inline(out, child);
            }
            let _ = write!(out, "</{}>", el.tag);
        }
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

// ─── Class names ──────────────────────────────────────────────────────────

fn kebab(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if dash && !out.is_empty() {
                out.push('-');
            }
            dash = false;
            out.push(c.to_ascii_lowercase());
        } else {
            dash = true;
        }
    }
    out
}

/// Kebab-case class per node in tree order; repeats get `-2`, `-3`, ...
pub fn class_names(tree: &VisibleTree) -> HashMap<NodeId, String> {
    let mut used: HashSet<String> = HashSet::new();
    let mut out = HashMap::new();
    for id in &tree.order {
        let Some(node) = tree.get(*id) else {
            continue;
        };
        let mut base = kebab(&node.name);
        if base.is_empty() {
            base = node.tag.as_str().to_string();
        }
        if base.starts_with(|c: char| c.is_ascii_digit()) {
            base = format!("n-{base}");
        }
        let mut candidate = base.clone();
        let mut n = 2;
        while !used.insert(candidate.clone()) {
            candidate = format!("{base}-{n}");
            n += 1;
        }
        out.insert(*id, candidate);
    }
    out
}

// ─── CSS ──────────────────────────────────────────────────────────────────

/// Declaration lines of one rule, two-space indented.
pub fn css_rule_body(decls: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (prop, value) in decls {
        let _ = writeln!(out, "  {prop}: {value};");
    }
    out
}

/// One rule per node with a non-empty body, in tree order.
pub fn emit_stylesheet(
    tree: &VisibleTree,
    classes: &HashMap<NodeId, String>,
    bodies: &HashMap<NodeId, String>,
) -> String {
    let mut out = String::with_capacity(1024);
    for id in &tree.order {
        let (Some(class), Some(body)) = (classes.get(id), bodies.get(id)) else {
            continue;
        };
        if body.trim().is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        let _ = write!(out, ".{class} {{\n{body}");
        if !body.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("}\n");
    }
    out
}

/// `:root` block defining every token.
pub fn emit_token_block(defs: &BTreeMap<String, String>) -> String {
    if defs.is_empty() {
        return String::new();
    }
    let mut out = String::from(":root {\n");
    for (name, value) in defs {
        let _ = writeln!(out, "  --{name}: {value};");
    }
    out.push_str("}\n");
    out
}

// ─── Px literals ──────────────────────────────────────────────────────────

/// Every distinct px literal across the styles, sorted.
pub fn distinct_px_literals(styles: &StyleMap) -> Vec<String> {
    let mut found = BTreeSet::new();
    for decls in styles.values() {
        for value in decls.values() {
            for (start, end) in px_literals(value) {
                found.insert(value[start..end].to_string());
            }
        }
    }
    found.into_iter().collect()
}

/// Replace px literals using `replacements` (literal → new text).
pub fn replace_px_literals(styles: &mut StyleMap, replacements: &HashMap<String, String>) {
    if replacements.is_empty() {
        return;
    }
    for decls in styles.values_mut() {
        for value in decls.values_mut() {
            let ranges = px_literals(value);
            if ranges.is_empty() {
                continue;
            }
            let mut out = String::with_capacity(value.len());
            let mut last = 0;
            for (start, end) in ranges {
                out.push_str(&value[last..start]);
                let literal = &value[start..end];
                out.push_str(replacements.get(literal).map_or(literal, String::as_str));
                last = end;
            }
            out.push_str(&value[last..]);
            *value = out;
        }
    }
}

/// Cut `code` to at most `max_bytes` on a char boundary.
/// Returns the (possibly shortened) text and whether it was cut.
pub fn truncate_code(code: &str, max_bytes: usize) -> (String, bool) {
    if code.len() <= max_bytes {
        return (code.to_string(), false);
    }
    let mut cut = max_bytes;
    while !code.is_char_boundary(cut) {
        cut -= 1;
    }
    (code[..cut].to_string(), true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NodeType, SceneGraph, SceneNode, StyledSegment, TextContent};
    use crate::options::DepthPolicy;
    use crate::text::merge_text;
    use crate::tree::build_visible_tree;
    use pretty_assertions::assert_eq;

    fn named(id: &str, name: &str, t: NodeType) -> SceneNode {
        let mut n = SceneNode::new(NodeId::intern(id), t);
        n.name = name.to_string();
        n
    }

    #[test]
    fn class_names_are_unique_kebab_case() {
        let mut sg = SceneGraph::new();
        let root = sg.add_root(named("e:root", "Card / Main", NodeType::Frame));
        sg.add_node(root, named("e:a", "Title", NodeType::Rectangle));
        sg.add_node(root, named("e:b", "Title", NodeType::Rectangle));
        sg.add_node(root, named("e:c", "42", NodeType::Rectangle));
        sg.add_node(root, named("e:d", "", NodeType::Rectangle));
        let tree = build_visible_tree(&sg, &sg.root_ids(), DepthPolicy::default());
        let classes = class_names(&tree);
        let c = |id: &str| classes[&NodeId::intern(id)].as_str();
        assert_eq!(c("e:root"), "card-main");
        assert_eq!(c("e:a"), "title");
        assert_eq!(c("e:b"), "title-2");
        assert_eq!(c("e:c"), "n-42");
        assert_eq!(c("e:d"), "div");
    }

    #[test]
    fn renders_nested_markup_with_text() {
        let mut sg = SceneGraph::new();
        let root = sg.add_root(named("m:root", "Card", NodeType::Frame));
        let mut title = named("m:title", "Title", NodeType::Text);
        let mut bold = StyledSegment::plain("Hi");
        bold.font_weight = 700;
        let content = TextContent {
            segments: vec![bold, StyledSegment::plain(" & bye")],
        };
        title.text = Some(content.clone());
        sg.add_node(root, title);
        let tree = build_visible_tree(&sg, &sg.root_ids(), DepthPolicy::default());

        let classes = class_names(&tree);
        let text = HashMap::from([(NodeId::intern("m:title"), merge_text(&content))]);
        let plan = AssetPlan::default();
        let assets = HashMap::new();
        let input = MarkupInput {
            tree: &tree,
            classes: &classes,
            plan: &plan,
            assets: &assets,
            text: &text,
        };
        let markup = render_component(&build_component_tree(&input));
        assert_eq!(
            markup,
            "<div class=\"card\" data-auto-layout=\"none\">\n  <p class=\"title\"><strong>Hi</strong> &amp; bye</p>\n</div>\n"
        );
    }

    #[test]
    fn stylesheet_and_tokens() {
        let mut sg = SceneGraph::new();
        sg.add_root(named("css:a", "Box", NodeType::Rectangle));
        let tree = build_visible_tree(&sg, &sg.root_ids(), DepthPolicy::default());
        let classes = class_names(&tree);
        let decls = BTreeMap::from([
            ("width".to_string(), "10px".to_string()),
            ("color".to_string(), "var(--brand)".to_string()),
        ]);
        let bodies = HashMap::from([(NodeId::intern("css:a"), css_rule_body(&decls))]);
        assert_eq!(
            emit_stylesheet(&tree, &classes, &bodies),
            ".box {\n  color: var(--brand);\n  width: 10px;\n}\n"
        );
        let defs = BTreeMap::from([("brand".to_string(), "#FF0000".to_string())]);
        assert_eq!(emit_token_block(&defs), ":root {\n  --brand: #FF0000;\n}\n");
    }

    #[test]
    fn px_literals_replaced_by_table() {
        let id = NodeId::intern("px:a");
        let mut styles = StyleMap::new();
        styles.insert(
            id,
            BTreeMap::from([("padding".to_string(), "4px 8px 4px 0".to_string())]),
        );
        assert_eq!(distinct_px_literals(&styles), vec!["4px", "8px"]);
        let table = HashMap::from([("4px".to_string(), "0.25rem".to_string())]);
        replace_px_literals(&mut styles, &table);
        assert_eq!(styles[&id]["padding"], "0.25rem 8px 0.25rem 0");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_code("héllo", 2), ("h".to_string(), true));
        assert_eq!(truncate_code("abc", 10), ("abc".to_string(), false));
    }
}
