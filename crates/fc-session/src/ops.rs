//! The four request/response operations exposed to a transport.
//!
//! Every operation pulls a fresh scene snapshot from the host, resolves
//! the selector against it and delegates to the compiler stages.

use crate::compile::{CompileRequest, CompileResult, compile};
use crate::error::SessionError;
use crate::exporter::content_hash;
use crate::host::AssetDescriptor;
use crate::session::Session;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use fc_core::id::NodeId;
use fc_core::model::SceneGraph;
use fc_core::options::CompileOptions;
use fc_core::structure::{StructureOutline, build_structure};
use fc_core::syntax::parse_token_expression;
use fc_core::tokens::{UNRESOLVED, document_candidates};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

const PNG_MIME: &str = "image/png";
const SCREENSHOT_SCALE: f32 = 2.0;

/// Explicit ids that still exist and are visible; otherwise the host's
/// interactive selection.
pub fn resolve_selection(scene: &SceneGraph, selector: Option<&[NodeId]>) -> Result<Vec<NodeId>, SessionError> {
    let usable = |ids: &[NodeId]| -> Vec<NodeId> {
        ids.iter()
            .copied()
            .filter(|id| scene.is_effectively_visible(*id))
            .collect()
    };
    if let Some(ids) = selector.filter(|ids| !ids.is_empty()) {
        let found = usable(ids);
        if !found.is_empty() {
            return Ok(found);
        }
        log::debug!("selection: none of {} requested ids usable, using host selection", ids.len());
    }
    let found = usable(&scene.selection);
    if found.is_empty() {
        return Err(SessionError::Selection(
            "select a visible layer or pass its id".into(),
        ));
    }
    Ok(found)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CodeRequest {
    pub selector: Option<Vec<NodeId>>,
    pub options: CompileOptions,
    pub plugin_code: Option<String>,
}

/// Value of one token: a single literal, or one literal per mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TokenDef {
    Value(String),
    ByMode(BTreeMap<String, String>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Screenshot {
    /// Uploaded URL, or a base64 `data:` URI when the upload failed.
    pub url: String,
    pub scale: f32,
    pub size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset: Option<AssetDescriptor>,
}

async fn snapshot(session: &Session) -> Result<Arc<SceneGraph>, SessionError> {
    session
        .host
        .scene()
        .await
        .map_err(|e| SessionError::Selection(format!("scene unavailable: {e}")))
}

/// `var(--x)`, `--x` and `x` all name the token `x`.
fn token_name(requested: &str) -> String {
    parse_token_expression(requested)
        .map(|expr| expr.name.trim_start_matches('-').to_string())
        .unwrap_or_else(|| requested.trim().to_string())
}

impl Session {
    pub async fn get_code(&self, request: CodeRequest) -> Result<CompileResult, SessionError> {
        let scene = snapshot(self).await?;
        let roots = resolve_selection(&scene, request.selector.as_deref())?;
        let request = CompileRequest {
            roots,
            options: request.options,
            plugin_code: request.plugin_code,
        };
        compile(self, &scene, &request).await
    }

    /// Definitions for canonical token names. Unknown names map to the
    /// unresolved sentinel.
    pub async fn get_token_defs(
        &self,
        names: &[String],
        include_all_modes: bool,
    ) -> Result<BTreeMap<String, TokenDef>, SessionError> {
        let scene = snapshot(self).await?;
        // Names from the last compile win; every other document variable
        // falls back to its default name.
        let mut index = self.latest_token_index().as_deref().cloned().unwrap_or_default();
        index.extend(&document_candidates(&scene), &[]);

        let mut defs = BTreeMap::new();
        for requested in names {
            let name = token_name(requested);
            let def = if include_all_modes {
                let modes = index.values_by_mode(&scene.variables, &name);
                if modes.is_empty() {
                    TokenDef::Value(UNRESOLVED.to_string())
                } else {
                    TokenDef::ByMode(modes)
                }
            } else {
                TokenDef::Value(index.resolve_name(&scene.variables, &name, None))
            };
            defs.insert(name, def);
        }
        Ok(defs)
    }

    /// PNG of the first selected node, downscaled until it fits the byte
    /// limit or the minimum scale is reached.
    pub async fn get_screenshot(&self, selector: Option<&[NodeId]>) -> Result<Screenshot, SessionError> {
        let scene = snapshot(self).await?;
        let roots = resolve_selection(&scene, selector)?;
        let id = roots[0];

        let mut scale = SCREENSHOT_SCALE;
        let bytes = loop {
            let bytes = self
                .host
                .export_png(id, scale)
                .await
                .map_err(|e| SessionError::Selection(format!("cannot export {id}: {e}")))?;
            let next = scale / 2.0;
            if bytes.len() <= self.limits.max_screenshot_bytes || next < self.limits.min_screenshot_scale {
                break bytes;
            }
            log::debug!("screenshot: {} bytes at {scale}x, retrying at {next}x", bytes.len());
            scale = next;
        };

        let hash = content_hash(&bytes);
        let size = bytes.len();
        let Some(url) = self.upload(&hash, PNG_MIME, bytes.clone()).await else {
            log::warn!("screenshot: upload failed, returning a data URI");
            return Ok(Screenshot {
                url: format!("data:{PNG_MIME};base64,{}", STANDARD.encode(&bytes)),
                scale,
                size,
                asset: None,
            });
        };
        let bounds = scene.get_by_id(id).map(|n| n.bounds);
        Ok(Screenshot {
            asset: Some(AssetDescriptor {
                resource_uri: AssetDescriptor::resource_uri_for(&hash),
                hash,
                mime_type: PNG_MIME.to_string(),
                size,
                url: url.clone(),
                width: bounds.map(|b| b.width * scale),
                height: bounds.map(|b| b.height * scale),
            }),
            url,
            scale,
            size,
        })
    }

    pub async fn get_structure(
        &self,
        selector: Option<&[NodeId]>,
        depth: Option<usize>,
    ) -> Result<StructureOutline, SessionError> {
        let scene = snapshot(self).await?;
        let roots = resolve_selection(&scene, selector)?;
        Ok(build_structure(&scene, &roots, depth, &self.limits))
    }
}
