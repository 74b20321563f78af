//! Model registry, routes, and the asset backing store.

pub mod assets;
pub mod backing;
pub mod registry;

pub use assets::{
    AssetStore, AssetTransport, EngineOverrides, HttpAssetTransport, ModelAssetSet, TransportError,
};
pub use backing::ModelBacking;
pub use registry::{
    BundleFiles, FileDescriptor, HttpRegistrySource, LanguagePair, ModelBundle, ModelRegistry,
    ModelRoute, RegistrySource,
};
