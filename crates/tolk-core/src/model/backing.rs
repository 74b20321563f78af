//! The shared backing store: registry, asset cache, and kernel lifecycle.

use std::sync::Arc;

use crate::config::TranslatorConfig;
use crate::engine::kernel::KernelFactory;
use crate::error::{Error, Result};
use crate::model::assets::{AssetStore, AssetTransport, HttpAssetTransport, ModelAssetSet};
use crate::model::registry::{
    HttpRegistrySource, ModelBundle, ModelRegistry, ModelRoute, RegistrySource,
};

/// Everything the translators share: route resolution, asset caching, and
/// the factory that builds a kernel for every new worker.
///
/// A backing is passed by `Arc` into translator constructors, so several
/// translators can share one set of caches, or use separate backings to
/// keep them isolated.
pub struct ModelBacking {
    config: TranslatorConfig,
    registry: ModelRegistry,
    assets: AssetStore,
    factory: Arc<dyn KernelFactory>,
}

impl ModelBacking {
    /// Backing with the HTTP registry source and asset transport from the
    /// configuration.
    pub fn new(config: TranslatorConfig, factory: Arc<dyn KernelFactory>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("tolk/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| Error::Other(format!("failed to initialize HTTP client: {err}")))?;

        let source = Arc::new(HttpRegistrySource::new(client.clone(), &config.registry_url));
        let transport = Arc::new(HttpAssetTransport::new(client));
        Ok(Self::with_sources(config, source, transport, factory))
    }

    /// Backing with caller-supplied registry source and asset transport.
    /// Lets embedders with their own distribution channel, and tests,
    /// replace the HTTP stack while keeping the cache behavior.
    pub fn with_sources(
        config: TranslatorConfig,
        source: Arc<dyn RegistrySource>,
        transport: Arc<dyn AssetTransport>,
        factory: Arc<dyn KernelFactory>,
    ) -> Self {
        let registry = ModelRegistry::new(source, config.pivot_language.clone());
        let assets = AssetStore::new(transport, &config.registry_url, config.download_timeout());
        Self {
            config,
            registry,
            assets,
            factory,
        }
    }

    pub fn config(&self) -> &TranslatorConfig {
        &self.config
    }

    pub(crate) fn kernel_factory(&self) -> Arc<dyn KernelFactory> {
        self.factory.clone()
    }

    /// Resolve the bundles needed to translate `from` into `to`. Memoized;
    /// see [`ModelRegistry::resolve`].
    pub async fn resolve_route(&self, from: &str, to: &str) -> Result<ModelRoute> {
        self.registry.resolve(from, to).await
    }

    /// Fetch and cache the contents of `bundle`. Memoized; see
    /// [`AssetStore::fetch`].
    pub async fn fetch_bundle(&self, bundle: &ModelBundle) -> Result<Arc<ModelAssetSet>> {
        self.assets.fetch(bundle).await
    }
}
