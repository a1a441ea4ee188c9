//! Session registry: every cache that outlives one compilation.
//!
//! The registry is an explicit object passed into each operation. Nothing
//! is global, and every cache can be evicted on demand.

use crate::dedup::InFlight;
use crate::error::{AssetError, SessionError};
use crate::host::{AssetStore, FaviconSource, SceneHost};
use crate::plugin::{IsolateFactory, PluginChannel};
use fc_core::options::Limits;
use fc_core::tokens::TokenIndex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Token indexes and loaded plugins are reused per scale and plugin code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    scale_bits: u32,
    /// Plugin fingerprint; empty without a plugin.
    fingerprint: String,
}

impl CacheKey {
    pub fn new(scale: f32, fingerprint: Option<&str>) -> Self {
        Self {
            scale_bits: scale.to_bits(),
            fingerprint: fingerprint.unwrap_or_default().to_string(),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Session {
    pub(crate) host: Arc<dyn SceneHost>,
    store: Arc<dyn AssetStore>,
    favicon_source: Option<Arc<dyn FaviconSource>>,
    isolates: Option<Arc<dyn IsolateFactory>>,
    pub(crate) limits: Limits,

    plugins: tokio::sync::Mutex<HashMap<CacheKey, Arc<PluginChannel>>>,
    token_indexes: Mutex<HashMap<CacheKey, Arc<TokenIndex>>>,
    last_token_key: Mutex<Option<CacheKey>>,
    uploads: InFlight<String, Option<String>>,
    images: InFlight<String, Option<Arc<Vec<u8>>>>,
    favicons: InFlight<String, Option<String>>,
}

impl Session {
    pub fn new(host: Arc<dyn SceneHost>, store: Arc<dyn AssetStore>) -> Self {
        Self {
            host,
            store,
            favicon_source: None,
            isolates: None,
            limits: Limits::default(),
            plugins: tokio::sync::Mutex::new(HashMap::new()),
            token_indexes: Mutex::new(HashMap::new()),
            last_token_key: Mutex::new(None),
            uploads: InFlight::new(),
            images: InFlight::new(),
            favicons: InFlight::new(),
        }
    }

    #[must_use]
    pub fn with_favicons(mut self, source: Arc<dyn FaviconSource>) -> Self {
        self.favicon_source = Some(source);
        self
    }

    #[must_use]
    pub fn with_isolates(mut self, factory: Arc<dyn IsolateFactory>) -> Self {
        self.isolates = Some(factory);
        self
    }

    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn has_favicon_source(&self) -> bool {
        self.favicon_source.is_some()
    }

    // ─── Plugins ─────────────────────────────────────────────────────────

    /// Loaded plugin for `code` at `scale`, loading it on first use.
    pub async fn plugin(&self, code: &str, scale: f32) -> Result<Arc<PluginChannel>, SessionError> {
        let key = CacheKey::new(scale, Some(&crate::plugin::fingerprint(code)));
        let mut plugins = self.plugins.lock().await;
        if let Some(channel) = plugins.get(&key) {
            return Ok(channel.clone());
        }
        let factory = self
            .isolates
            .as_ref()
            .ok_or_else(|| SessionError::PluginLoad("no isolate runner configured".into()))?;
        let isolate = factory.spawn().map_err(SessionError::PluginLoad)?;
        let channel = Arc::new(PluginChannel::load(isolate, code).await?);
        plugins.insert(key, channel.clone());
        Ok(channel)
    }

    pub async fn evict_plugins(&self) {
        self.plugins.lock().await.clear();
    }

    // ─── Token indexes ───────────────────────────────────────────────────

    pub fn token_index(&self, key: &CacheKey) -> Option<Arc<TokenIndex>> {
        lock(&self.token_indexes).get(key).cloned()
    }

    pub fn store_token_index(&self, key: CacheKey, index: TokenIndex) -> Arc<TokenIndex> {
        let index = Arc::new(index);
        *lock(&self.last_token_key) = Some(key.clone());
        lock(&self.token_indexes).insert(key, index.clone());
        index
    }

    /// Most recently stored index, if it is still cached.
    pub fn latest_token_index(&self) -> Option<Arc<TokenIndex>> {
        let key = lock(&self.last_token_key).clone()?;
        self.token_index(&key)
    }

    pub fn evict_token_indexes(&self) {
        lock(&self.token_indexes).clear();
        *lock(&self.last_token_key) = None;
    }

    // ─── Bytes, uploads, favicons ────────────────────────────────────────

    /// Image bytes by host hash. Missing bytes are cached as `None`.
    pub async fn image_bytes(&self, image_hash: &str) -> Option<Arc<Vec<u8>>> {
        let host = self.host.clone();
        let hash = image_hash.to_string();
        self.images
            .get_or_run(hash.clone(), || async move {
                match host.image_bytes(&hash).await {
                    Ok(Some(bytes)) => Some(Arc::new(bytes)),
                    Ok(None) => {
                        log::warn!("{}", AssetError::MissingBytes(hash));
                        None
                    }
                    Err(e) => {
                        log::warn!("assets: image {hash}: {e}");
                        None
                    }
                }
            })
            .await
    }

    /// Upload content-addressed bytes. Successful uploads are cached;
    /// failures are not, so a later call retries.
    pub async fn upload(&self, hash: &str, mime_type: &str, bytes: Vec<u8>) -> Option<String> {
        let store = self.store.clone();
        let key = hash.to_string();
        let mime = mime_type.to_string();
        let url = self
            .uploads
            .get_or_run(key.clone(), || async move {
                match store.upload(&key, &mime, bytes).await {
                    Ok(url) => Some(url),
                    Err(e) => {
                        log::warn!("{}", AssetError::Upload(key, e));
                        None
                    }
                }
            })
            .await;
        if url.is_none() {
            self.uploads.evict(&hash.to_string());
        }
        url
    }

    /// Favicon URL for a domain. "No favicon" is cached too.
    pub async fn favicon(&self, domain: &str) -> Option<String> {
        let source = self.favicon_source.clone()?;
        let domain = domain.to_string();
        self.favicons
            .get_or_run(domain.clone(), || async move {
                source.lookup(&domain).await.unwrap_or_else(|e| {
                    log::debug!("favicon: {domain}: {e}");
                    None
                })
            })
            .await
    }

    pub fn evict_image(&self, image_hash: &str) -> bool {
        self.images.evict(&image_hash.to_string())
    }

    /// Drop every cached value.
    pub async fn clear(&self) {
        self.evict_plugins().await;
        self.evict_token_indexes();
        self.uploads.clear();
        self.images.clear();
        self.favicons.clear();
        log::debug!("session: caches cleared");
    }
}
