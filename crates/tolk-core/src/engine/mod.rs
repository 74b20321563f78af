//! Scheduling and execution: batches, the worker pool, and the two
//! translator front-ends.

pub(crate) mod batch;
pub mod kernel;
pub(crate) mod pool;
pub mod realtime;
pub mod scheduler;
pub(crate) mod worker;

pub use kernel::{BatchItem, ItemOutput, KernelFactory, TranslationKernel};
pub use realtime::RealtimeTranslator;
pub use scheduler::Translator;
