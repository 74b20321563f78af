//! A single isolated worker execution context.
//!
//! Each worker is a spawned task that owns one kernel and serves the
//! closed set of [`WorkerCommand`] operations over a message channel.
//! Nothing else touches the kernel, so the scheduler and the workers
//! share no mutable state.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::KernelOptions;
use crate::engine::kernel::{BatchItem, ItemOutput, KernelFactory};
use crate::error::{Error, Result};
use crate::model::assets::ModelAssetSet;
use crate::model::registry::LanguagePair;

/// The operations a worker supports, each with a typed reply channel.
pub(crate) enum WorkerCommand {
    HasBundle {
        pair: LanguagePair,
        reply: oneshot::Sender<bool>,
    },
    LoadBundle {
        pair: LanguagePair,
        assets: Arc<ModelAssetSet>,
        reply: oneshot::Sender<Result<()>>,
    },
    Execute {
        route: Vec<LanguagePair>,
        items: Vec<BatchItem>,
        reply: oneshot::Sender<Result<Vec<ItemOutput>>>,
    },
}

/// Handle to one worker: its command channel, the bundles known to be
/// resident, and the task that owns its kernel.
pub(crate) struct WorkerHandle {
    commands: mpsc::Sender<WorkerCommand>,
    resident: HashSet<LanguagePair>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub(crate) fn commands(&self) -> mpsc::Sender<WorkerCommand> {
        self.commands.clone()
    }

    pub(crate) fn is_resident(&self, pair: &LanguagePair) -> bool {
        self.resident.contains(pair)
    }

    pub(crate) fn mark_resident(&mut self, pair: LanguagePair) {
        self.resident.insert(pair);
    }

    /// Tears the execution context down, idle or not. Replies for any
    /// in-flight command are dropped, which the waiting side observes as
    /// `Cancelled`.
    pub(crate) fn terminate(&self) {
        self.task.abort();
    }
}

/// Starts a worker task and waits for its kernel to come up.
pub(crate) async fn spawn_worker(
    factory: Arc<dyn KernelFactory>,
    options: KernelOptions,
) -> Result<WorkerHandle> {
    let (commands, mut inbox) = mpsc::channel::<WorkerCommand>(32);
    let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();

    let task = tokio::spawn(async move {
        let created = tokio::task::spawn_blocking(move || factory.create(&options))
            .await
            .map_err(|err| Error::WorkerInit(err.to_string()))
            .and_then(|created| created);

        let mut kernel = match created {
            Ok(kernel) => {
                let _ = ready_tx.send(Ok(()));
                kernel
            }
            Err(err) => {
                let _ = ready_tx.send(Err(err));
                return;
            }
        };

        while let Some(command) = inbox.recv().await {
            match command {
                WorkerCommand::HasBundle { pair, reply } => {
                    let _ = reply.send(kernel.has_bundle(&pair));
                }
                WorkerCommand::LoadBundle {
                    pair,
                    assets,
                    reply,
                } => {
                    let _ = reply.send(kernel.load_bundle(pair, assets));
                }
                WorkerCommand::Execute {
                    route,
                    items,
                    reply,
                } => {
                    let _ = reply.send(kernel.execute(&route, &items));
                }
            }
        }

        debug!("Worker command channel closed, stopping");
    });

    match ready_rx.await {
        Ok(Ok(())) => {
            debug!("Translation worker initialized");
            Ok(WorkerHandle {
                commands,
                resident: HashSet::new(),
                task,
            })
        }
        Ok(Err(err)) => Err(err),
        Err(_) => Err(Error::WorkerInit(
            "worker exited during initialization".to_string(),
        )),
    }
}
