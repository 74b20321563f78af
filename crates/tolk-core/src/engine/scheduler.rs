//! Throughput-oriented translator.
//!
//! Requests sharing a language pair and priority are grouped into batches
//! up to the configured capacity and executed in one kernel call, which
//! amortizes per-call overhead at the cost of first-result latency. The
//! worker pool grows lazily up to its limit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::engine::batch::{Batch, BatchQueue, QueuedRequest};
use crate::engine::kernel::{BatchItem, ItemOutput};
use crate::engine::pool::{WorkerClaim, WorkerPool};
use crate::error::{Error, Result};
use crate::model::backing::ModelBacking;
use crate::model::registry::LanguagePair;
use crate::request::{TranslationRequest, TranslationResponse};

/// Batching translator balancing throughput against latency. Clones share
/// the same queue and workers.
#[derive(Clone)]
pub struct Translator {
    inner: Arc<TranslatorInner>,
}

struct TranslatorInner {
    backing: Arc<ModelBacking>,
    pool: WorkerPool,
    queue: Mutex<BatchQueue>,
    closed: AtomicBool,
}

impl Translator {
    pub fn new(backing: Arc<ModelBacking>) -> Self {
        let config = backing.config();
        let pool = WorkerPool::new(
            config.worker_limit(),
            backing.kernel_factory(),
            config.kernel.clone(),
        );
        let queue = Mutex::new(BatchQueue::new(config.batch_capacity()));

        Self {
            inner: Arc::new(TranslatorInner {
                backing,
                pool,
                queue,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Translates one request.
    ///
    /// The request's route is resolved first so it can be grouped with
    /// compatible work; it then joins a batch and runs when a worker is
    /// available. The returned future settles exactly once, with the
    /// response or with the error that stopped it.
    pub async fn translate(&self, request: TranslationRequest) -> Result<TranslationResponse> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }

        let route = self
            .inner
            .backing
            .resolve_route(&request.from, &request.to)
            .await?;

        let (reply, response) = oneshot::channel();
        {
            let mut queue = self.inner.lock_queue();
            // Re-checked under the queue lock so a request cannot slip in
            // behind the shutdown sweep and hang.
            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(Error::Cancelled);
            }
            let key = LanguagePair::new(&request.from, &request.to);
            let priority = request.priority;
            queue.enqueue(key, priority, route, QueuedRequest { request, reply });
        }

        self.inner.clone().schedule_dispatch();

        response.await.unwrap_or(Err(Error::Cancelled))
    }

    /// Fails every still-queued request matching `predicate` with
    /// `Cancelled`. Everything else is requeued with its original key,
    /// priority, and route. Requests already handed to a worker are not
    /// affected.
    pub fn cancel_pending<F>(&self, predicate: F)
    where
        F: Fn(&TranslationRequest) -> bool,
    {
        let mut queue = self.inner.lock_queue();
        for batch in queue.drain() {
            for queued in batch.requests {
                if predicate(&queued.request) {
                    queued.settle(Err(Error::Cancelled));
                } else {
                    queue.enqueue(
                        batch.key.clone(),
                        batch.priority,
                        batch.route.clone(),
                        queued,
                    );
                }
            }
        }
    }

    /// Cancels all queued work, closes submission, and tears down the
    /// workers. In-flight batches settle as `Cancelled` when their worker
    /// dies.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.cancel_pending(|_| true);
        self.inner.pool.shutdown();
    }
}

impl TranslatorInner {
    fn lock_queue(&self) -> MutexGuard<'_, BatchQueue> {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Defers a dispatch attempt. Submission never runs one inline, so
    /// callers get their future back immediately and batches get a chance
    /// to fill.
    fn schedule_dispatch(self: Arc<Self>) {
        tokio::spawn(async move {
            self.dispatch().await;
        });
    }

    /// One dispatch attempt: claim a worker, pop the head batch, run it,
    /// settle its requests.
    ///
    /// The worker claim and the batch pop both happen under locks that are
    /// never held across an await, so concurrent attempts cannot claim the
    /// same worker or the same batch; everything that can suspend comes
    /// after both claims are recorded.
    async fn dispatch(self: Arc<Self>) {
        if self.lock_queue().is_empty() {
            return;
        }

        let claim = match self.pool.acquire().await {
            Ok(Some(claim)) => claim,
            // Every worker busy and the pool full: the attempt that owns a
            // worker re-triggers when it finishes.
            Ok(None) => return,
            Err(err) => {
                // Transient. Queued requests stay eligible for the next trigger.
                warn!("Could not start translation worker: {err}");
                return;
            }
        };

        let Some(batch) = self.lock_queue().pop() else {
            self.pool.release(claim);
            return;
        };

        debug!(
            "Dispatching batch {} ({} requests, {})",
            batch.id,
            batch.requests.len(),
            batch.key
        );

        let outputs = self.run_batch(claim, &batch).await;
        deliver(batch, outputs);

        self.pool.release(claim);

        if !self.lock_queue().is_empty() {
            self.clone().schedule_dispatch();
        }
    }

    async fn run_batch(&self, claim: WorkerClaim, batch: &Batch) -> Result<Vec<ItemOutput>> {
        for bundle in &batch.route {
            self.pool
                .ensure_loaded(claim, bundle, &self.backing)
                .await?;
        }

        let route: Vec<LanguagePair> = batch.route.iter().map(|b| b.pair.clone()).collect();
        let items: Vec<BatchItem> = batch
            .requests
            .iter()
            .map(|queued| BatchItem {
                text: queued.request.text.clone(),
                html: queued.request.html,
                quality_scores: queued.request.quality_scores,
            })
            .collect();

        let outputs = self.pool.execute(claim, route, items).await?;
        if outputs.len() != batch.requests.len() {
            return Err(Error::Engine(format!(
                "kernel returned {} outputs for {} requests",
                outputs.len(),
                batch.requests.len()
            )));
        }
        Ok(outputs)
    }
}

/// Pairs kernel outputs back to their requests by position, or fails the
/// whole batch with the one error that stopped it.
fn deliver(batch: Batch, outputs: Result<Vec<ItemOutput>>) {
    match outputs {
        Ok(outputs) => {
            for (queued, output) in batch.requests.into_iter().zip(outputs) {
                match output.error {
                    Some(message) => queued.settle(Err(Error::Engine(message))),
                    None => {
                        let QueuedRequest { request, reply } = queued;
                        let _ = reply.send(Ok(TranslationResponse {
                            request,
                            text: output.text,
                            alignment: output.alignment,
                            quality: output.quality,
                        }));
                    }
                }
            }
        }
        Err(err) => {
            for queued in batch.requests {
                queued.settle(Err(err.clone()));
            }
        }
    }
}
