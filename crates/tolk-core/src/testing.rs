//! Shared test doubles: a canned registry, a URL-echoing transport, and a
//! kernel that records what the schedulers feed it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::{KernelOptions, TranslatorConfig};
use crate::engine::kernel::{BatchItem, ItemOutput, KernelFactory, TranslationKernel};
use crate::error::{Error, Result};
use crate::model::assets::{AssetTransport, ModelAssetSet, TransportError};
use crate::model::backing::ModelBacking;
use crate::model::registry::{
    BundleFiles, FileDescriptor, LanguagePair, ModelBundle, RegistrySource,
};

fn descriptor(name: &str) -> FileDescriptor {
    FileDescriptor {
        name: name.to_string(),
        size: 0,
        expected_sha256: "00".repeat(32),
    }
}

/// Registry entry with a shared vocabulary, the common case.
pub(crate) fn bundle(from: &str, to: &str) -> ModelBundle {
    ModelBundle {
        pair: LanguagePair::new(from, to),
        files: BundleFiles {
            model: descriptor(&format!("model.{from}{to}.intgemm.alphas.bin")),
            lex: descriptor(&format!("lex.50.50.{from}{to}.s2t.bin")),
            vocab: Some(descriptor(&format!("vocab.{from}{to}.spm"))),
            srcvocab: None,
            trgvocab: None,
            quality_model: None,
        },
    }
}

/// Registry entry with separate source and target vocabularies.
pub(crate) fn bundle_with_split_vocab(from: &str, to: &str) -> ModelBundle {
    let mut bundle = bundle(from, to);
    bundle.files.vocab = None;
    bundle.files.srcvocab = Some(descriptor(&format!("srcvocab.{from}{to}.spm")));
    bundle.files.trgvocab = Some(descriptor(&format!("trgvocab.{from}{to}.spm")));
    bundle
}

/// Registry entry with 8-bit gemm weights and a quality model.
pub(crate) fn bundle_with_quality(from: &str, to: &str) -> ModelBundle {
    let mut bundle = bundle(from, to);
    bundle.files.model = descriptor(&format!("model.{from}{to}.intgemm8.bin"));
    bundle.files.quality_model = Some(descriptor(&format!("qualityModel.{from}{to}.bin")));
    bundle
}

/// Registry source backed by a fixed bundle list, counting fetches.
pub(crate) struct StaticRegistrySource {
    bundles: Vec<ModelBundle>,
    pub(crate) calls: AtomicUsize,
}

impl StaticRegistrySource {
    pub(crate) fn new(bundles: Vec<ModelBundle>) -> Self {
        Self {
            bundles,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RegistrySource for StaticRegistrySource {
    async fn fetch_registry(&self) -> Result<Vec<ModelBundle>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.bundles.clone())
    }
}

/// Transport that echoes the URL as file content, with optional scripted
/// failures, counting downloads per URL.
pub(crate) struct MapTransport {
    pub(crate) calls: Mutex<HashMap<String, usize>>,
    failure: Option<TransportError>,
    fail_first: AtomicBool,
}

impl MapTransport {
    pub(crate) fn ok() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
            failure: None,
            fail_first: AtomicBool::new(false),
        }
    }

    /// Fails the first download with a transport error, then recovers.
    pub(crate) fn fail_first() -> Self {
        Self {
            fail_first: AtomicBool::new(true),
            ..Self::ok()
        }
    }

    /// Fails every download with the given error.
    pub(crate) fn fail_with(error: TransportError) -> Self {
        Self {
            failure: Some(error),
            ..Self::ok()
        }
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub(crate) fn max_calls_per_url(&self) -> usize {
        self.calls.lock().unwrap().values().copied().max().unwrap_or(0)
    }
}

#[async_trait]
impl AssetTransport for MapTransport {
    async fn fetch(
        &self,
        url: &str,
        _expected_sha256: &str,
        _timeout: Option<Duration>,
    ) -> std::result::Result<Bytes, TransportError> {
        {
            let mut calls = self.calls.lock().unwrap();
            *calls.entry(url.to_string()).or_insert(0) += 1;
        }

        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        if self.fail_first.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Transport("connection reset".to_string()));
        }

        Ok(Bytes::from(url.to_string()))
    }
}

/// What the kernels observed, shared across all workers of a factory.
#[derive(Default)]
pub(crate) struct KernelProbe {
    pub(crate) loads: Mutex<Vec<LanguagePair>>,
    pub(crate) routes: Mutex<Vec<Vec<LanguagePair>>>,
    pub(crate) batch_sizes: Mutex<Vec<usize>>,
    texts: Mutex<Vec<Vec<String>>>,
    delay: Mutex<Duration>,
    fail_marker: Mutex<Option<String>>,
}

impl KernelProbe {
    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Items whose text contains `marker` come back with a per-item error.
    pub(crate) fn fail_texts_containing(&self, marker: &str) {
        *self.fail_marker.lock().unwrap() = Some(marker.to_string());
    }

    /// Every translated text, in execution order.
    pub(crate) fn executed_texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().iter().flatten().cloned().collect()
    }
}

/// Kernel that marks text as translated and records everything.
pub(crate) struct EchoKernel {
    loaded: HashSet<LanguagePair>,
    probe: Arc<KernelProbe>,
}

impl TranslationKernel for EchoKernel {
    fn has_bundle(&self, pair: &LanguagePair) -> bool {
        self.loaded.contains(pair)
    }

    fn load_bundle(&mut self, pair: LanguagePair, _assets: Arc<ModelAssetSet>) -> Result<()> {
        self.probe.loads.lock().unwrap().push(pair.clone());
        self.loaded.insert(pair);
        Ok(())
    }

    fn execute(&mut self, route: &[LanguagePair], items: &[BatchItem]) -> Result<Vec<ItemOutput>> {
        let delay = *self.probe.delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        self.probe.routes.lock().unwrap().push(route.to_vec());
        self.probe.batch_sizes.lock().unwrap().push(items.len());
        self.probe
            .texts
            .lock()
            .unwrap()
            .push(items.iter().map(|item| item.text.clone()).collect());

        let marker = self.probe.fail_marker.lock().unwrap().clone();
        Ok(items
            .iter()
            .map(|item| {
                if let Some(marker) = &marker {
                    if item.text.contains(marker.as_str()) {
                        return ItemOutput {
                            text: String::new(),
                            alignment: None,
                            quality: None,
                            error: Some(format!("cannot translate '{}'", item.text)),
                        };
                    }
                }
                ItemOutput::text(format!("{} (translated)", item.text))
            })
            .collect())
    }
}

/// Factory producing [`EchoKernel`]s, with a scripted failure budget.
pub(crate) struct EchoFactory {
    pub(crate) probe: Arc<KernelProbe>,
    /// Successful kernel creations.
    pub(crate) created: AtomicUsize,
    /// Number of creations to fail first; `usize::MAX` fails forever.
    pub(crate) failures: AtomicUsize,
}

impl EchoFactory {
    pub(crate) fn shared() -> Arc<Self> {
        Arc::new(Self {
            probe: Arc::new(KernelProbe::default()),
            created: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        })
    }

    fn take_failure(&self) -> bool {
        let mut current = self.failures.load(Ordering::SeqCst);
        loop {
            if current == 0 {
                return false;
            }
            if current == usize::MAX {
                return true;
            }
            match self.failures.compare_exchange(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

impl KernelFactory for EchoFactory {
    fn create(&self, _options: &KernelOptions) -> Result<Box<dyn TranslationKernel>> {
        if self.take_failure() {
            return Err(Error::WorkerInit("simulated startup failure".to_string()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(EchoKernel {
            loaded: HashSet::new(),
            probe: self.probe.clone(),
        }))
    }
}

/// A backing plus handles to its mock collaborators.
pub(crate) struct Harness {
    pub(crate) backing: Arc<ModelBacking>,
    pub(crate) source: Arc<StaticRegistrySource>,
    pub(crate) transport: Arc<MapTransport>,
}

pub(crate) fn harness(
    config: TranslatorConfig,
    bundles: Vec<ModelBundle>,
    factory: &Arc<EchoFactory>,
) -> Harness {
    let source = Arc::new(StaticRegistrySource::new(bundles));
    let transport = Arc::new(MapTransport::ok());
    let backing = Arc::new(ModelBacking::with_sources(
        config,
        source.clone(),
        transport.clone(),
        factory.clone(),
    ));
    Harness {
        backing,
        source,
        transport,
    }
}

pub(crate) fn backing_with_config(
    config: TranslatorConfig,
    bundles: Vec<ModelBundle>,
    factory: &Arc<EchoFactory>,
) -> Arc<ModelBacking> {
    harness(config, bundles, factory).backing
}

pub(crate) fn backing_for(
    bundles: Vec<ModelBundle>,
    factory: &Arc<EchoFactory>,
) -> Arc<ModelBacking> {
    backing_with_config(TranslatorConfig::default(), bundles, factory)
}
