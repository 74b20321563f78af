//! Bounded pool of translation workers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::config::KernelOptions;
use crate::engine::kernel::{BatchItem, ItemOutput, KernelFactory};
use crate::engine::worker::{spawn_worker, WorkerCommand, WorkerHandle};
use crate::error::{Error, Result};
use crate::model::backing::ModelBacking;
use crate::model::registry::{LanguagePair, ModelBundle};

struct WorkerSlot {
    id: u64,
    busy: bool,
    /// `None` while the worker for this slot is still being created.
    worker: Option<WorkerHandle>,
}

/// Claim on one worker. The holder has exclusive use of the worker until
/// [`WorkerPool::release`]; the busy flag is the only mutual exclusion,
/// which is sound because claims only change while the slot lock is held.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WorkerClaim {
    slot: u64,
}

pub(crate) struct WorkerPool {
    limit: usize,
    factory: Arc<dyn KernelFactory>,
    options: KernelOptions,
    slots: Mutex<Vec<WorkerSlot>>,
    next_slot: AtomicU64,
    closed: AtomicBool,
}

impl WorkerPool {
    pub(crate) fn new(
        limit: usize,
        factory: Arc<dyn KernelFactory>,
        options: KernelOptions,
    ) -> Self {
        Self {
            limit: limit.max(1),
            factory,
            options,
            slots: Mutex::new(Vec::new()),
            next_slot: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Claims an idle worker, or creates one if the pool has room.
    ///
    /// Never waits for a busy worker: `Ok(None)` means every worker is
    /// occupied and the pool is at its limit. The slot for a new worker is
    /// claimed before its creation is awaited, so concurrent acquires can
    /// never overshoot the limit. A creation failure frees the slot again
    /// and leaves the rest of the pool untouched.
    pub(crate) async fn acquire(&self) -> Result<Option<WorkerClaim>> {
        let slot = {
            let mut slots = self.lock_slots();
            if self.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }
            if let Some(slot) = slots.iter_mut().find(|s| !s.busy && s.worker.is_some()) {
                slot.busy = true;
                return Ok(Some(WorkerClaim { slot: slot.id }));
            }
            if slots.len() >= self.limit {
                return Ok(None);
            }
            let id = self.next_slot.fetch_add(1, Ordering::Relaxed);
            slots.push(WorkerSlot {
                id,
                busy: true,
                worker: None,
            });
            id
        };

        info!("Starting translation worker {slot}");
        match spawn_worker(self.factory.clone(), self.options.clone()).await {
            Ok(worker) => {
                let mut slots = self.lock_slots();
                match slots.iter_mut().find(|s| s.id == slot) {
                    Some(entry) => {
                        entry.worker = Some(worker);
                        Ok(Some(WorkerClaim { slot }))
                    }
                    None => {
                        // The pool shut down while the worker was starting.
                        worker.terminate();
                        Ok(None)
                    }
                }
            }
            Err(err) => {
                let mut slots = self.lock_slots();
                slots.retain(|s| s.id != slot);
                Err(err)
            }
        }
    }

    /// Marks a claimed worker idle again.
    pub(crate) fn release(&self, claim: WorkerClaim) {
        let mut slots = self.lock_slots();
        if let Some(slot) = slots.iter_mut().find(|s| s.id == claim.slot) {
            slot.busy = false;
        }
    }

    /// Makes sure the claimed worker has `bundle` resident, fetching its
    /// assets through the backing store on a miss.
    pub(crate) async fn ensure_loaded(
        &self,
        claim: WorkerClaim,
        bundle: &ModelBundle,
        backing: &ModelBacking,
    ) -> Result<()> {
        let pair = bundle.pair.clone();

        let (resident, commands) = {
            let slots = self.lock_slots();
            let Some(worker) = claimed_worker(&slots, claim) else {
                return Err(Error::Cancelled);
            };
            (worker.is_resident(&pair), worker.commands())
        };
        if resident {
            return Ok(());
        }

        let loaded = request(&commands, |reply| WorkerCommand::HasBundle {
            pair: pair.clone(),
            reply,
        })
        .await?;

        if !loaded {
            let assets = backing.fetch_bundle(bundle).await?;
            debug!("Loading bundle {pair} into worker");
            request(&commands, |reply| WorkerCommand::LoadBundle {
                pair: pair.clone(),
                assets,
                reply,
            })
            .await??;
        }

        let mut slots = self.lock_slots();
        if let Some(worker) = claimed_worker_mut(&mut slots, claim) {
            worker.mark_resident(pair);
        }
        Ok(())
    }

    /// Runs one batch on the claimed worker.
    pub(crate) async fn execute(
        &self,
        claim: WorkerClaim,
        route: Vec<LanguagePair>,
        items: Vec<BatchItem>,
    ) -> Result<Vec<ItemOutput>> {
        let commands = {
            let slots = self.lock_slots();
            let Some(worker) = claimed_worker(&slots, claim) else {
                return Err(Error::Cancelled);
            };
            worker.commands()
        };

        request(&commands, |reply| WorkerCommand::Execute {
            route,
            items,
            reply,
        })
        .await?
    }

    /// Tears down every worker, idle or busy, and refuses further
    /// acquires. In-flight work settles as `Cancelled`.
    pub(crate) fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut slots = self.lock_slots();
        for slot in slots.drain(..) {
            if let Some(worker) = slot.worker {
                worker.terminate();
            }
        }
    }

    fn lock_slots(&self) -> MutexGuard<'_, Vec<WorkerSlot>> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Sends one command to a worker and awaits its reply. A closed channel in
/// either direction means the worker was torn down under us.
async fn request<T>(
    commands: &mpsc::Sender<WorkerCommand>,
    command: impl FnOnce(oneshot::Sender<T>) -> WorkerCommand,
) -> Result<T> {
    let (reply, answer) = oneshot::channel();
    commands
        .send(command(reply))
        .await
        .map_err(|_| Error::Cancelled)?;
    answer.await.map_err(|_| Error::Cancelled)
}

fn claimed_worker(slots: &[WorkerSlot], claim: WorkerClaim) -> Option<&WorkerHandle> {
    slots
        .iter()
        .find(|s| s.id == claim.slot)
        .and_then(|s| s.worker.as_ref())
}

fn claimed_worker_mut(slots: &mut [WorkerSlot], claim: WorkerClaim) -> Option<&mut WorkerHandle> {
    slots
        .iter_mut()
        .find(|s| s.id == claim.slot)
        .and_then(|s| s.worker.as_mut())
}
