//! Scheduling and model management for machine translation workers.
//!
//! tolk accepts translation requests, groups them into batches by
//! language pair and priority, and dispatches those batches to a bounded
//! pool of isolated worker contexts, downloading and verifying the model
//! bundles each worker needs along the way. The translation itself is
//! delegated to an embedder-provided [`TranslationKernel`].
//!
//! Two front-ends cover the two ends of the throughput/latency trade-off:
//!
//! - [`Translator`] batches aggressively and scales to several workers.
//! - [`RealtimeTranslator`] holds a single pending request and supersedes
//!   it on every new submission.
//!
//! Both share a [`ModelBacking`], which owns the registry, the resolved
//! route cache, and the downloaded asset cache.

pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod request;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{KernelOptions, TranslatorConfig};
pub use engine::{
    BatchItem, ItemOutput, KernelFactory, RealtimeTranslator, TranslationKernel, Translator,
};
pub use error::{Error, Result};
pub use model::{LanguagePair, ModelAssetSet, ModelBacking, ModelBundle, ModelRoute};
pub use request::{TranslationRequest, TranslationResponse};
