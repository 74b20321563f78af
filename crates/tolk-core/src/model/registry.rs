//! Model registry loading and language-pair route resolution.
//!
//! The registry is a fetchable JSON document mapping 4-letter pair keys
//! (`"deen"`) to the set of files that make up the model for that pair.
//! Resolution turns a requested pair into an ordered list of one or two
//! bundles, pivoting through an intermediate language when no direct
//! model exists.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Directed language pair, the identity of a model bundle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LanguagePair {
    pub from: String,
    pub to: String,
}

impl LanguagePair {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl fmt::Display for LanguagePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.from, self.to)
    }
}

/// One downloadable file of a model bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(rename = "expectedSha256Hash")]
    pub expected_sha256: String,
}

/// The named file roles a bundle consists of. A bundle carries either one
/// shared vocabulary or separate source/target vocabularies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleFiles {
    pub model: FileDescriptor,
    pub lex: FileDescriptor,
    #[serde(default)]
    pub vocab: Option<FileDescriptor>,
    #[serde(default)]
    pub srcvocab: Option<FileDescriptor>,
    #[serde(default)]
    pub trgvocab: Option<FileDescriptor>,
    #[serde(default, rename = "qualityModel")]
    pub quality_model: Option<FileDescriptor>,
}

/// One registry entry: a language pair and the files of its model.
/// Immutable once parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBundle {
    pub pair: LanguagePair,
    pub files: BundleFiles,
}

/// Ordered bundles needed to translate one pair. Length two means the
/// translation pivots through an intermediate language.
pub type ModelRoute = Vec<Arc<ModelBundle>>;

/// Where the registry document comes from.
#[async_trait]
pub trait RegistrySource: Send + Sync {
    async fn fetch_registry(&self) -> Result<Vec<ModelBundle>>;
}

/// Production source: fetches and parses the JSON registry over HTTP.
pub struct HttpRegistrySource {
    client: reqwest::Client,
    url: String,
}

impl HttpRegistrySource {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl RegistrySource for HttpRegistrySource {
    async fn fetch_registry(&self) -> Result<Vec<ModelBundle>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| Error::RegistryUnavailable(err.to_string()))?;

        let document: HashMap<String, BundleFiles> = response
            .json()
            .await
            .map_err(|err| Error::RegistryUnavailable(err.to_string()))?;

        Ok(parse_registry(document))
    }
}

/// Splits the registry's 4-letter pair keys into from/to. Keys that do not
/// follow the convention are dropped with a warning.
pub fn parse_registry(document: HashMap<String, BundleFiles>) -> Vec<ModelBundle> {
    document
        .into_iter()
        .filter_map(|(key, files)| {
            if key.len() != 4 || !key.is_ascii() {
                warn!("Skipping registry entry with unrecognized key '{key}'");
                return None;
            }
            Some(ModelBundle {
                pair: LanguagePair::new(&key[..2], &key[2..]),
                files,
            })
        })
        .collect()
}

/// Resolves language pairs to model routes.
///
/// The registry document is fetched at most once; every resolved pair is
/// memoized, and concurrent lookups for the same pair share a single
/// resolution. A failed load or resolution leaves its cache slot empty so
/// a later call can retry.
pub struct ModelRegistry {
    source: Arc<dyn RegistrySource>,
    pivot_language: Option<String>,
    bundles: OnceCell<Arc<Vec<Arc<ModelBundle>>>>,
    routes: RwLock<HashMap<LanguagePair, Arc<OnceCell<ModelRoute>>>>,
}

impl ModelRegistry {
    pub fn new(source: Arc<dyn RegistrySource>, pivot_language: Option<String>) -> Self {
        Self {
            source,
            pivot_language,
            bundles: OnceCell::new(),
            routes: RwLock::new(HashMap::new()),
        }
    }

    async fn bundles(&self) -> Result<Arc<Vec<Arc<ModelBundle>>>> {
        self.bundles
            .get_or_try_init(|| async {
                let bundles = self.source.fetch_registry().await?;
                info!("Loaded model registry with {} bundles", bundles.len());
                Ok(Arc::new(bundles.into_iter().map(Arc::new).collect()))
            })
            .await
            .map(Arc::clone)
    }

    /// Resolve the bundles needed to translate `from` into `to`.
    ///
    /// A direct model always wins over a pivot route. With no direct model
    /// and a configured pivot language, an outbound plus an inbound bundle
    /// through the pivot make up the route.
    pub async fn resolve(&self, from: &str, to: &str) -> Result<ModelRoute> {
        let pair = LanguagePair::new(from, to);

        let cell = {
            let mut routes = self.routes.write().await;
            routes
                .entry(pair.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        cell.get_or_try_init(|| self.find_route(pair.clone()))
            .await
            .map(|route| route.clone())
    }

    async fn find_route(&self, pair: LanguagePair) -> Result<ModelRoute> {
        let bundles = self.bundles().await?;

        // The registry is assumed to hold at most one bundle per ordered
        // pair; the first candidate of each category wins.
        let mut direct = None;
        let mut outbound = None;
        let mut inbound = None;

        for bundle in bundles.iter() {
            if bundle.pair == pair {
                direct.get_or_insert_with(|| bundle.clone());
            } else if let Some(pivot) = &self.pivot_language {
                if bundle.pair.from == pair.from && &bundle.pair.to == pivot {
                    outbound.get_or_insert_with(|| bundle.clone());
                } else if &bundle.pair.from == pivot && bundle.pair.to == pair.to {
                    inbound.get_or_insert_with(|| bundle.clone());
                }
            }
        }

        if let Some(bundle) = direct {
            debug!("Resolved direct route for {pair}");
            return Ok(vec![bundle]);
        }

        if let (Some(outbound), Some(inbound)) = (outbound, inbound) {
            debug!("Resolved pivot route for {pair}");
            return Ok(vec![outbound, inbound]);
        }

        Err(Error::NoRoute {
            from: pair.from,
            to: pair.to,
        })
    }
}
