//! Asset exporter: planned roots → uploaded, content-addressed assets.
//!
//! Failures never abort a compilation. A vector whose upload fails is
//! inlined as markup; a raster with no resolvable fill becomes a
//! placeholder URL sized from the node box.

use crate::error::AssetError;
use crate::host::AssetDescriptor;
use crate::session::Session;
use fc_core::assets::normalize_svg;
use fc_core::emitter::AssetRef;
use fc_core::id::NodeId;
use fc_core::model::{Rect, SceneNode};
use fc_core::options::CompileOptions;
use sha2::{Digest, Sha256};

pub const SVG_MIME: &str = "image/svg+xml";

/// Lowercase hex SHA-256 content address.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Best-effort MIME type from magic bytes.
pub fn sniff_mime(bytes: &[u8]) -> &'static str {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => "application/octet-stream",
    }
}

/// `{base}/{w}x{h}` with the box scaled and rounded, at least 1×1.
pub fn placeholder_url(base: &str, bounds: Rect, scale: f32) -> String {
    let dim = |v: f32| ((v * scale).round() as i64).max(1);
    format!(
        "{}/{}x{}",
        base.trim_end_matches('/'),
        dim(bounds.width),
        dim(bounds.height)
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportedAsset {
    pub reference: AssetRef,
    pub descriptors: Vec<AssetDescriptor>,
}

fn descriptor(hash: String, mime: &str, size: usize, url: String, bounds: Rect) -> AssetDescriptor {
    AssetDescriptor {
        resource_uri: AssetDescriptor::resource_uri_for(&hash),
        hash,
        mime_type: mime.to_string(),
        size,
        url,
        width: Some(bounds.width),
        height: Some(bounds.height),
    }
}

/// Export one vector root. `None` only when the host cannot serialize it.
pub async fn export_vector(
    session: &Session,
    id: NodeId,
    bounds: Rect,
    options: &CompileOptions,
) -> Option<ExportedAsset> {
    let markup = match session.host.export_svg(id).await {
        Ok(markup) => markup,
        Err(e) => {
            log::warn!("{}", AssetError::Export(id.to_string(), e));
            return None;
        }
    };
    let markup = normalize_svg(&markup, bounds.width, bounds.height, options.unit);
    let hash = content_hash(markup.as_bytes());
    let size = markup.len();

    match session.upload(&hash, SVG_MIME, markup.clone().into_bytes()).await {
        Some(url) => Some(ExportedAsset {
            reference: AssetRef::Url(url.clone()),
            descriptors: vec![descriptor(hash, SVG_MIME, size, url, bounds)],
        }),
        None => {
            log::debug!("assets: inlining {id} after failed upload");
            Some(ExportedAsset {
                reference: AssetRef::Inline(markup),
                descriptors: Vec::new(),
            })
        }
    }
}

/// Export every usable image fill of `node`. The first uploaded URL is the
/// reference; with none, a placeholder stands in.
pub async fn export_raster(session: &Session, node: &SceneNode, options: &CompileOptions) -> ExportedAsset {
    let mut descriptors = Vec::new();
    for image_hash in node.usable_image_hashes() {
        let Some(bytes) = session.image_bytes(image_hash).await else {
            continue;
        };
        let hash = content_hash(&bytes);
        let mime = sniff_mime(&bytes);
        let size = bytes.len();
        if let Some(url) = session.upload(&hash, mime, bytes.to_vec()).await
            && !descriptors.iter().any(|d: &AssetDescriptor| d.hash == hash)
        {
            descriptors.push(descriptor(hash, mime, size, url, node.bounds));
        }
    }

    let reference = match descriptors.first() {
        Some(d) => AssetRef::Url(d.url.clone()),
        None => {
            let url = placeholder_url(&options.placeholder_base, node.bounds, options.scale);
            log::debug!("assets: placeholder {url} for {}", node.id);
            AssetRef::Url(url)
        }
    };
    ExportedAsset {
        reference,
        descriptors,
    }
}
