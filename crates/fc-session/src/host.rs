//! Collaborator traits the session talks to: the host design tool, the
//! asset store and an optional favicon resolver.

use async_trait::async_trait;
use fc_core::id::NodeId;
use fc_core::model::SceneGraph;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Read-only access to the host document.
#[async_trait]
pub trait SceneHost: Send + Sync {
    /// Current scene snapshot, including the interactive selection.
    async fn scene(&self) -> Result<Arc<SceneGraph>, String>;

    /// Raw CSS-like style declarations for one node.
    async fn style_snapshot(&self, id: NodeId) -> Result<BTreeMap<String, String>, String>;

    /// Native vector export of a node as SVG markup.
    async fn export_svg(&self, id: NodeId) -> Result<String, String>;

    /// Raster export of a node as PNG bytes.
    async fn export_png(&self, id: NodeId, scale: f32) -> Result<Vec<u8>, String>;

    /// Bytes behind an image fill, `None` when the host no longer has them.
    async fn image_bytes(&self, image_hash: &str) -> Result<Option<Vec<u8>>, String>;
}

/// Content-addressed upload target.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Upload `bytes` under `hash` and return the public URL.
    async fn upload(&self, hash: &str, mime_type: &str, bytes: Vec<u8>) -> Result<String, String>;
}

/// Resolves a site favicon for link runs.
#[async_trait]
pub trait FaviconSource: Send + Sync {
    async fn lookup(&self, domain: &str) -> Result<Option<String>, String>;
}

/// Description of one uploaded asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetDescriptor {
    pub hash: String,
    pub mime_type: String,
    pub size: usize,
    pub resource_uri: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f32>,
}

impl AssetDescriptor {
    pub fn resource_uri_for(hash: &str) -> String {
        format!("asset://{hash}")
    }
}
