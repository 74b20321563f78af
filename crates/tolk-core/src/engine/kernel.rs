//! The seam to the translation compute engine.
//!
//! This crate schedules work; it does not translate. A
//! [`TranslationKernel`] wraps whatever inference engine actually consumes
//! model bytes and text, and a [`KernelFactory`] builds one for every
//! worker execution context.

use std::sync::Arc;

use serde_json::Value;

use crate::config::KernelOptions;
use crate::error::Result;
use crate::model::assets::ModelAssetSet;
use crate::model::registry::LanguagePair;

/// One unit of text inside a batch call.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub text: String,
    pub html: bool,
    pub quality_scores: bool,
}

/// Kernel output for one batch item. Outputs come back in item order.
#[derive(Debug, Clone)]
pub struct ItemOutput {
    pub text: String,
    pub alignment: Option<Value>,
    pub quality: Option<Value>,
    /// Set when this item failed while the batch call itself succeeded.
    pub error: Option<String>,
}

impl ItemOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            alignment: None,
            quality: None,
            error: None,
        }
    }
}

/// The opaque compute engine living inside one worker execution context.
///
/// Calls arrive from the worker's own task, one at a time. `execute` must
/// return exactly one output per item, in item order; it may be
/// compute-bound and block its thread.
pub trait TranslationKernel: Send {
    /// Whether `pair`'s bundle is already resident in this kernel.
    fn has_bundle(&self, pair: &LanguagePair) -> bool;

    /// Load a bundle's assets into the kernel.
    fn load_bundle(&mut self, pair: LanguagePair, assets: Arc<ModelAssetSet>) -> Result<()>;

    /// Translate a batch of items through the given route of resident
    /// bundles.
    fn execute(&mut self, route: &[LanguagePair], items: &[BatchItem]) -> Result<Vec<ItemOutput>>;
}

/// Builds a kernel for every new worker. Creation can be slow (it runs on
/// the blocking thread pool) and can fail without poisoning the pool.
pub trait KernelFactory: Send + Sync {
    fn create(&self, options: &KernelOptions) -> Result<Box<dyn TranslationKernel>>;
}
