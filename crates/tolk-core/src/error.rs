//! Error types shared across the crate.

use thiserror::Error;

use crate::model::registry::LanguagePair;

pub type Result<T> = std::result::Result<T, Error>;

/// All the ways a translation request can fail.
///
/// The enum is `Clone` because a single failure (a bad download, a dead
/// worker) has to be delivered to every request of the batch that needed
/// that resource.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The model registry could not be fetched or parsed.
    #[error("failed to load model registry: {0}")]
    RegistryUnavailable(String),

    /// No direct model and no pivot path exists for the requested pair.
    #[error("no models available to translate from '{from}' to '{to}'")]
    NoRoute { from: String, to: String },

    /// A model file could not be downloaded.
    #[error("failed to download {role} for {pair}: {reason}")]
    AssetFetch {
        role: &'static str,
        pair: LanguagePair,
        reason: String,
    },

    /// A model file download exceeded the configured timeout.
    #[error("download of {role} for {pair} timed out")]
    AssetTimeout {
        role: &'static str,
        pair: LanguagePair,
    },

    /// A downloaded model file did not match its expected checksum.
    #[error("checksum mismatch for {role} of {pair}")]
    AssetIntegrity {
        role: &'static str,
        pair: LanguagePair,
    },

    /// A worker execution context failed to come up.
    #[error("failed to start translation worker: {0}")]
    WorkerInit(String),

    /// The translation kernel reported a failure.
    #[error("translation engine error: {0}")]
    Engine(String),

    /// A pending translation was replaced by a newer one before it ran.
    #[error("translation superseded by a newer request")]
    Superseded,

    /// The translation was removed from the queue or the scheduler shut down.
    #[error("translation cancelled")]
    Cancelled,

    /// Malformed caller input or registry data.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Anything that does not fit the categories above.
    #[error("{0}")]
    Other(String),
}
