//! Translator configuration types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Opaque initialization options handed to the translation kernel when a
/// worker is created. Not interpreted here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KernelOptions {
    /// Size of the kernel's translation cache, zero to disable.
    #[serde(default)]
    pub cache_size: usize,

    /// Prefer the platform's native integer gemm implementation.
    #[serde(default)]
    pub use_native_intgemm: bool,
}

/// Configuration shared by the translators and the model backing store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslatorConfig {
    /// URL of the model registry document.
    #[serde(default = "default_registry_url")]
    pub registry_url: String,

    /// Intermediate language used for two-hop routes when no direct model
    /// exists. `None` disables pivoting.
    #[serde(default = "default_pivot_language")]
    pub pivot_language: Option<String>,

    /// Per-file download timeout in milliseconds, zero to disable.
    #[serde(default = "default_download_timeout_ms")]
    pub download_timeout_ms: u64,

    /// Number of requests batched into a single kernel call. Bigger is
    /// better for throughput, worse for the latency of the first result.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum number of translation workers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Options forwarded to the kernel of every new worker.
    #[serde(default)]
    pub kernel: KernelOptions,
}

fn default_registry_url() -> String {
    "https://models.tolk.dev/v1/registry.json".to_string()
}
fn default_pivot_language() -> Option<String> {
    Some("en".to_string())
}
fn default_download_timeout_ms() -> u64 {
    60_000
}
fn default_batch_size() -> usize {
    8
}
fn default_workers() -> usize {
    1
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            registry_url: default_registry_url(),
            pivot_language: default_pivot_language(),
            download_timeout_ms: default_download_timeout_ms(),
            batch_size: default_batch_size(),
            workers: default_workers(),
            kernel: KernelOptions::default(),
        }
    }
}

impl TranslatorConfig {
    /// Effective batch capacity, at least one request per batch.
    pub fn batch_capacity(&self) -> usize {
        self.batch_size.max(1)
    }

    /// Effective worker limit, at least one worker.
    pub fn worker_limit(&self) -> usize {
        self.workers.max(1)
    }

    /// Download timeout, `None` when disabled.
    pub fn download_timeout(&self) -> Option<Duration> {
        (self.download_timeout_ms > 0).then(|| Duration::from_millis(self.download_timeout_ms))
    }
}
