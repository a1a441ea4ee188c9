//! Emission orchestrator.
//!
//! `compile` is an explicit pull: the caller hands in a scene snapshot plus
//! an immutable request (roots, options, plugin code) and gets a result
//! back. Stages run strictly in order:
//!
//! 1. tree builder
//! 2. host style snapshots
//! 3. token index + rewrite (`transformVariable`)
//! 4. sanitizer
//! 5. px literals (`transformPx`)
//! 6. asset planning and export
//! 7. text runs (+ favicons for links)
//! 8. CSS rules (`transform`) and markup (`transformComponent`)
//!
//! Hook failures are logged and that one value keeps its default.

use crate::error::{SessionError, TransformError};
use crate::exporter::{export_raster, export_vector};
use crate::host::AssetDescriptor;
use crate::plugin::{HookKind, PluginChannel, expect_string};
use crate::session::{CacheKey, Session};
use fc_core::assets::plan_assets;
use fc_core::emitter::{
    AssetRef, ComponentTree, FAVICON_ATTR, MarkupInput, build_component_tree, class_names, css_rule_body,
    distinct_px_literals, emit_stylesheet, emit_token_block, render_component, replace_px_literals,
    truncate_code,
};
use fc_core::id::NodeId;
use fc_core::model::SceneGraph;
use fc_core::options::CompileOptions;
use fc_core::sanitize::sanitize;
use fc_core::text::{TextBlock, link_domain, merge_text};
use fc_core::tokens::{
    StyleMap, TokenCandidate, TokenIndex, normalize_name, referenced_tokens, rewrite_styles, token_candidates,
};
use fc_core::tree::{HINT_AUTO_LAYOUT, Tag, VisibleTree, build_visible_tree};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Immutable input of one compilation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileRequest {
    pub roots: Vec<NodeId>,
    pub options: CompileOptions,
    pub plugin_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeBlock {
    pub name: String,
    pub title: String,
    pub language: String,
    pub code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WarningKind {
    Truncated,
    AutoLayout,
    DepthCap,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Warning {
    #[serde(rename = "type")]
    pub kind: WarningKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompileResult {
    pub blocks: Vec<CodeBlock>,
    pub warnings: Vec<Warning>,
    pub assets: Vec<AssetDescriptor>,
    /// Canonical token name → resolved value, for every referenced token.
    pub tokens: BTreeMap<String, String>,
}

/// Run the whole pipeline over `scene` for `request`.
pub async fn compile(
    session: &Session,
    scene: &SceneGraph,
    request: &CompileRequest,
) -> Result<CompileResult, SessionError> {
    let options = &request.options;
    let tree = build_visible_tree(scene, &request.roots, options.depth_policy);
    if tree.root_ids.is_empty() {
        return Err(SessionError::Selection("no visible root to compile".into()));
    }
    log::debug!("compile: {} nodes, depth {}", tree.order.len(), tree.stats.max_depth);

    let plugin = match &request.plugin_code {
        Some(code) if !code.trim().is_empty() => Some(session.plugin(code, options.scale).await?),
        _ => None,
    };
    let plugin = plugin.as_deref();

    let mut styles = collect_styles(session, scene, &tree).await;

    let index = token_index(session, scene, &tree, plugin, options).await;
    rewrite_styles(&mut styles, &index.rewrite_table());

    sanitize(&mut styles, &tree);
    transform_px(plugin, &mut styles).await;

    let plan = plan_assets(scene, &tree);
    let mut assets: HashMap<NodeId, AssetRef> = HashMap::new();
    let mut descriptors: Vec<AssetDescriptor> = Vec::new();
    for id in &plan.vector_roots {
        let Some(node) = tree.get(*id) else {
            continue;
        };
        if let Some(exported) = export_vector(session, *id, node.bounds, options).await {
            assets.insert(*id, exported.reference);
            descriptors.extend(exported.descriptors);
        }
    }
    for id in &plan.image_nodes {
        let (Some(node), Some(scene_node)) = (tree.get(*id), scene.get_by_id(*id)) else {
            continue;
        };
        let exported = export_raster(session, scene_node, options).await;
        if !node.children.is_empty()
            && let AssetRef::Url(url) = &exported.reference
        {
            let decls = styles.entry(*id).or_default();
            decls.insert("background-image".into(), format!("url(\"{url}\")"));
            decls
                .entry("background-size".into())
                .or_insert_with(|| "cover".into());
        }
        assets.insert(*id, exported.reference);
        descriptors.extend(exported.descriptors);
    }

    let text = collect_text(session, scene, &tree).await;

    let classes = class_names(&tree);
    let bodies = css_bodies(plugin, &tree, &styles).await;
    let tokens: BTreeMap<String, String> = referenced_tokens(&styles, &index)
        .into_iter()
        .map(|name| {
            let value = index.resolve_name(&scene.variables, &name, None);
            (name, value)
        })
        .collect();

    let mut css = String::new();
    if options.emit_tokens {
        css.push_str(&emit_token_block(&tokens));
    }
    let sheet = emit_stylesheet(&tree, &classes, &bodies);
    if !css.is_empty() && !sheet.is_empty() {
        css.push('\n');
    }
    css.push_str(&sheet);

    let component = build_component_tree(&MarkupInput {
        tree: &tree,
        classes: &classes,
        plan: &plan,
        assets: &assets,
        text: &text,
    });
    let title = component.name.clone();
    let markup = transform_component(plugin, component).await;

    let mut warnings = Vec::new();
    let mut blocks = Vec::new();
    for (name, title, language, code) in [
        ("component", title, options.language.clone(), markup),
        ("styles", "Styles".to_string(), "css".to_string(), css),
    ] {
        let (code, cut) = truncate_code(&code, options.max_code_bytes);
        if cut {
            warnings.push(Warning {
                kind: WarningKind::Truncated,
                data: Some(json!({ "block": name, "limit": options.max_code_bytes })),
            });
        }
        blocks.push(CodeBlock {
            name: name.to_string(),
            title,
            language,
            code,
        });
    }
    warnings.extend(structural_warnings(&tree));

    Ok(CompileResult {
        blocks,
        warnings,
        assets: descriptors,
        tokens,
    })
}

// ─── Stages ───────────────────────────────────────────────────────────────

async fn collect_styles(session: &Session, scene: &SceneGraph, tree: &VisibleTree) -> StyleMap {
    let mut styles = StyleMap::new();
    for id in &tree.order {
        let decls = match session.host.style_snapshot(*id).await {
            Ok(decls) => decls,
            Err(e) => {
                log::debug!("compile: style snapshot for {id} failed ({e}), using cached style");
                scene.get_by_id(*id).map(|n| n.style.clone()).unwrap_or_default()
            }
        };
        styles.insert(*id, decls);
    }
    styles
}

fn log_failure(err: &TransformError) {
    log::warn!("plugin: {err}; keeping default output");
}

/// Cached index for (scale, plugin), extended with any new variables.
async fn token_index(
    session: &Session,
    scene: &SceneGraph,
    tree: &VisibleTree,
    plugin: Option<&PluginChannel>,
    options: &CompileOptions,
) -> Arc<TokenIndex> {
    let key = CacheKey::new(options.scale, plugin.map(PluginChannel::fingerprint));
    let candidates = token_candidates(scene, tree);
    let cached = session.token_index(&key);
    let mut index = cached.as_deref().cloned().unwrap_or_default();
    let missing: Vec<_> = index.missing(&candidates).into_iter().cloned().collect();
    if missing.is_empty()
        && let Some(cached) = cached
    {
        return cached;
    }

    let transformed: Vec<Option<String>> = match plugin {
        Some(channel) if channel.has_hook(HookKind::TransformVariable) => {
            let payloads = missing.iter().map(|c| variable_payload(c, options)).collect();
            channel
                .call_batch(HookKind::TransformVariable, payloads)
                .await
                .into_iter()
                .map(|r| {
                    r.and_then(|v| expect_string(HookKind::TransformVariable, v))
                        .inspect_err(log_failure)
                        .ok()
                })
                .collect()
        }
        _ => Vec::new(),
    };
    index.extend(&missing, &transformed);
    session.store_token_index(key, index)
}

/// `transformVariable` input. `code` is always a valid `var(--…)` expression.
fn variable_payload(candidate: &TokenCandidate, options: &CompileOptions) -> Value {
    json!({
        "code": format!("var(--{})", normalize_name(&candidate.raw_name)),
        "name": candidate.raw_name,
        "value": candidate.value,
        "options": { "scale": options.scale, "unit": options.unit },
    })
}

async fn transform_px(plugin: Option<&PluginChannel>, styles: &mut StyleMap) {
    let Some(channel) = plugin.filter(|p| p.has_hook(HookKind::TransformPx)) else {
        return;
    };
    let literals = distinct_px_literals(styles);
    if literals.is_empty() {
        return;
    }
    let payloads = literals.iter().map(|l| json!({ "value": l })).collect();
    let results = channel.call_batch(HookKind::TransformPx, payloads).await;
    let replacements: HashMap<String, String> = literals
        .into_iter()
        .zip(results)
        .filter_map(|(literal, r)| {
            r.and_then(|v| expect_string(HookKind::TransformPx, v))
                .inspect_err(log_failure)
                .ok()
                .map(|out| (literal, out))
        })
        .collect();
    replace_px_literals(styles, &replacements);
}

async fn collect_text(
    session: &Session,
    scene: &SceneGraph,
    tree: &VisibleTree,
) -> HashMap<NodeId, Vec<TextBlock>> {
    let mut text = HashMap::new();
    for id in &tree.order {
        let Some(node) = tree.get(*id).filter(|n| matches!(n.tag, Tag::P | Tag::Span)) else {
            continue;
        };
        let Some(content) = scene.get_by_id(node.id).and_then(|n| n.text.as_ref()) else {
            continue;
        };
        let mut blocks = merge_text(content);
        if session.has_favicon_source() {
            for run in blocks
                .iter_mut()
                .flat_map(|b| b.lines.iter_mut())
                .flat_map(|l| l.runs.iter_mut())
            {
                let Some(domain) = run.link.as_deref().and_then(link_domain) else {
                    continue;
                };
                if let Some(icon) = session.favicon(&domain).await {
                    run.attrs.insert(FAVICON_ATTR.to_string(), icon);
                }
            }
        }
        text.insert(*id, blocks);
    }
    text
}

async fn css_bodies(
    plugin: Option<&PluginChannel>,
    tree: &VisibleTree,
    styles: &StyleMap,
) -> HashMap<NodeId, String> {
    let empty = BTreeMap::new();
    let defaults: Vec<(NodeId, String)> = tree
        .order
        .iter()
        .map(|id| (*id, css_rule_body(styles.get(id).unwrap_or(&empty))))
        .collect();

    let Some(channel) = plugin.filter(|p| p.has_hook(HookKind::Transform)) else {
        return defaults.into_iter().collect();
    };
    let payloads = defaults
        .iter()
        .map(|(id, body)| json!({ "code": body, "style": styles.get(id).unwrap_or(&empty) }))
        .collect();
    let results = channel.call_batch(HookKind::Transform, payloads).await;
    defaults
        .into_iter()
        .zip(results)
        .map(|((id, body), r)| {
            let out = r
                .and_then(|v| expect_string(HookKind::Transform, v))
                .inspect_err(log_failure)
                .unwrap_or(body);
            (id, out)
        })
        .collect()
}

/// Hook output for the component block: a replacement string or a tree.
#[derive(Deserialize)]
#[serde(untagged)]
enum ComponentOutput {
    Code(String),
    Tree(ComponentTree),
}

async fn transform_component(plugin: Option<&PluginChannel>, component: ComponentTree) -> String {
    let Some(channel) = plugin.filter(|p| p.has_hook(HookKind::TransformComponent)) else {
        return render_component(&component);
    };
    let payload = json!({ "component": component });
    let output = channel
        .call(HookKind::TransformComponent, payload)
        .await
        .and_then(|v| {
            serde_json::from_value::<ComponentOutput>(v)
                .map_err(|_| TransformError::BadOutput(HookKind::TransformComponent.as_str()))
        });
    match output {
        Ok(ComponentOutput::Code(code)) => code,
        Ok(ComponentOutput::Tree(tree)) => render_component(&tree),
        Err(e) => {
            log_failure(&e);
            render_component(&component)
        }
    }
}

fn structural_warnings(tree: &VisibleTree) -> Vec<Warning> {
    let mut warnings = Vec::new();
    let uncertain: Vec<Value> = tree
        .order
        .iter()
        .filter_map(|id| tree.get(*id))
        .filter_map(|n| {
            n.hint(HINT_AUTO_LAYOUT)
                .map(|c| json!({ "id": n.id, "name": n.name, "layout": c }))
        })
        .collect();
    if !uncertain.is_empty() {
        warnings.push(Warning {
            kind: WarningKind::AutoLayout,
            data: Some(Value::Array(uncertain)),
        });
    }
    if tree.stats.capped {
        warnings.push(Warning {
            kind: WarningKind::DepthCap,
            data: Some(json!({
                "depthLimit": tree.stats.depth_limit,
                "cappedNodes": tree.stats.capped_node_ids.len(),
            })),
        });
    }
    warnings
}
