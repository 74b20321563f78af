//! Model asset download, verification, and in-memory caching.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::registry::{BundleFiles, FileDescriptor, LanguagePair, ModelBundle};

/// Kernel configuration overrides derived from bundle file naming. Opaque
/// passthrough for the compute engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOverrides {
    /// Numeric precision mode for the kernel's matrix multiplication.
    pub gemm_precision: Option<String>,
    /// Whether the kernel's cost-skipping shortcut stays enabled.
    pub skip_cost: Option<bool>,
}

/// The realized in-memory contents of one model bundle, ready to be
/// loaded into a worker.
#[derive(Debug, Clone)]
pub struct ModelAssetSet {
    pub model: Bytes,
    /// One or two vocabularies, source before target.
    pub vocabs: Vec<Bytes>,
    pub shortlist: Bytes,
    pub quality_model: Option<Bytes>,
    pub overrides: EngineOverrides,
}

/// How a single download attempt failed. The store maps these onto the
/// crate error taxonomy together with the file role that failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("timed out")]
    Timeout,
    #[error("checksum mismatch (expected {expected}, got {actual})")]
    IntegrityMismatch { expected: String, actual: String },
    #[error("{0}")]
    Transport(String),
}

/// Downloads one file and verifies it against its expected checksum
/// before handing it over.
#[async_trait]
pub trait AssetTransport: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        expected_sha256: &str,
        timeout: Option<Duration>,
    ) -> std::result::Result<Bytes, TransportError>;
}

/// Checks `bytes` against a hex-encoded sha256 checksum.
pub fn verify_checksum(bytes: &[u8], expected: &str) -> std::result::Result<(), TransportError> {
    let actual = hex::encode(Sha256::digest(bytes));
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(TransportError::IntegrityMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

/// reqwest-backed transport used in production.
pub struct HttpAssetTransport {
    client: reqwest::Client,
}

impl HttpAssetTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AssetTransport for HttpAssetTransport {
    async fn fetch(
        &self,
        url: &str,
        expected_sha256: &str,
        timeout: Option<Duration>,
    ) -> std::result::Result<Bytes, TransportError> {
        let download = async {
            self.client
                .get(url)
                .send()
                .await
                .and_then(|response| response.error_for_status())
                .map_err(|err| TransportError::Transport(err.to_string()))?
                .bytes()
                .await
                .map_err(|err| TransportError::Transport(err.to_string()))
        };

        let bytes = match timeout {
            Some(limit) => tokio::time::timeout(limit, download)
                .await
                .map_err(|_| TransportError::Timeout)??,
            None => download.await?,
        };

        verify_checksum(&bytes, expected_sha256)?;
        Ok(bytes)
    }
}

/// Process-lifetime cache of downloaded bundles.
///
/// Concurrent and repeated requests for the same bundle share a single
/// download sequence; a failed download leaves the cache slot empty so a
/// later request can retry. Nothing is ever evicted: the bundle count is
/// bounded by the language pairs actually used.
pub struct AssetStore {
    transport: Arc<dyn AssetTransport>,
    base_url: String,
    download_timeout: Option<Duration>,
    bundles: RwLock<HashMap<LanguagePair, Arc<OnceCell<Arc<ModelAssetSet>>>>>,
}

impl AssetStore {
    /// Files are fetched relative to the registry document's directory.
    pub fn new(
        transport: Arc<dyn AssetTransport>,
        registry_url: &str,
        download_timeout: Option<Duration>,
    ) -> Self {
        let base_url = registry_url
            .rsplit_once('/')
            .map(|(base, _)| base.to_string())
            .unwrap_or_else(|| registry_url.to_string());

        Self {
            transport,
            base_url,
            download_timeout,
            bundles: RwLock::new(HashMap::new()),
        }
    }

    /// Fetches, verifies, and caches the contents of `bundle`.
    pub async fn fetch(&self, bundle: &ModelBundle) -> Result<Arc<ModelAssetSet>> {
        let cell = {
            let mut bundles = self.bundles.write().await;
            bundles
                .entry(bundle.pair.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        cell.get_or_try_init(|| async {
            info!("Downloading model bundle {}", bundle.pair);
            self.load(bundle).await.map(Arc::new)
        })
        .await
        .map(Arc::clone)
    }

    async fn load(&self, bundle: &ModelBundle) -> Result<ModelAssetSet> {
        let files = &bundle.files;
        let pair = &bundle.pair;

        let (model, shortlist, quality_model, vocabs) = tokio::try_join!(
            self.fetch_role("model", &files.model, pair),
            self.fetch_role("lex", &files.lex, pair),
            self.fetch_optional("qualityModel", files.quality_model.as_ref(), pair),
            self.fetch_vocabs(files, pair),
        )?;

        let mut overrides = EngineOverrides::default();
        // Models shipped with 8-bit gemm weights need the matching
        // precision mode in the kernel.
        if files.model.name.ends_with("intgemm8.bin") {
            overrides.gemm_precision = Some("int8shiftAll".to_string());
        }
        // Quality estimation needs the full cost computation.
        if quality_model.is_some() {
            overrides.skip_cost = Some(false);
        }

        Ok(ModelAssetSet {
            model,
            vocabs,
            shortlist,
            quality_model,
            overrides,
        })
    }

    /// Normalizes the two vocabulary shapes a bundle can ship with into an
    /// ordered list, source before target.
    async fn fetch_vocabs(&self, files: &BundleFiles, pair: &LanguagePair) -> Result<Vec<Bytes>> {
        if let Some(vocab) = &files.vocab {
            Ok(vec![self.fetch_role("vocab", vocab, pair).await?])
        } else if let (Some(src), Some(trg)) = (&files.srcvocab, &files.trgvocab) {
            let (src, trg) = tokio::try_join!(
                self.fetch_role("srcvocab", src, pair),
                self.fetch_role("trgvocab", trg, pair),
            )?;
            Ok(vec![src, trg])
        } else {
            Err(Error::InvalidInput(format!(
                "no vocabulary files listed for {pair}"
            )))
        }
    }

    async fn fetch_role(
        &self,
        role: &'static str,
        file: &FileDescriptor,
        pair: &LanguagePair,
    ) -> Result<Bytes> {
        let url = format!(
            "{}/{}{}/{}",
            self.base_url, pair.from, pair.to, file.name
        );
        debug!("Fetching {role} for {pair} from {url}");

        self.transport
            .fetch(&url, &file.expected_sha256, self.download_timeout)
            .await
            .map_err(|err| match err {
                TransportError::Timeout => Error::AssetTimeout {
                    role,
                    pair: pair.clone(),
                },
                TransportError::IntegrityMismatch { .. } => Error::AssetIntegrity {
                    role,
                    pair: pair.clone(),
                },
                TransportError::Transport(reason) => Error::AssetFetch {
                    role,
                    pair: pair.clone(),
                    reason,
                },
            })
    }

    async fn fetch_optional(
        &self,
        role: &'static str,
        file: Option<&FileDescriptor>,
        pair: &LanguagePair,
    ) -> Result<Option<Bytes>> {
        match file {
            Some(file) => Ok(Some(self.fetch_role(role, file, pair).await?)),
            None => Ok(None),
        }
    }
}
