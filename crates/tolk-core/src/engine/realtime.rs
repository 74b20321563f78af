//! Latency-oriented translator.
//!
//! Interactive use cases (translate-as-you-type) care about freshness,
//! not throughput: a result for text the user has already changed is
//! worthless. This translator therefore holds at most one pending request
//! and a single lazily-created worker; a newer submission displaces an
//! older one that has not started yet.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tracing::warn;

use crate::engine::kernel::BatchItem;
use crate::engine::pool::{WorkerClaim, WorkerPool};
use crate::error::{Error, Result};
use crate::model::backing::ModelBacking;
use crate::model::registry::LanguagePair;
use crate::request::{TranslationRequest, TranslationResponse};

/// Translator optimized for interactive use. Clones share the same
/// pending slot and worker.
#[derive(Clone)]
pub struct RealtimeTranslator {
    inner: Arc<RealtimeInner>,
}

struct PendingTranslation {
    request: TranslationRequest,
    reply: oneshot::Sender<Result<TranslationResponse>>,
}

struct RealtimeInner {
    backing: Arc<ModelBacking>,
    pool: WorkerPool,
    pending: Mutex<Option<PendingTranslation>>,
    closed: AtomicBool,
}

impl RealtimeTranslator {
    pub fn new(backing: Arc<ModelBacking>) -> Self {
        let kernel = backing.config().kernel.clone();
        let pool = WorkerPool::new(1, backing.kernel_factory(), kernel);

        Self {
            inner: Arc::new(RealtimeInner {
                backing,
                pool,
                pending: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Makes `request` the next translation to run.
    ///
    /// A previous request still waiting for the worker is rejected with
    /// `Superseded`. The returned future settles exactly once.
    pub async fn translate(&self, request: TranslationRequest) -> Result<TranslationResponse> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }

        let (reply, response) = oneshot::channel();
        {
            let mut pending = self.inner.lock_pending();
            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(Error::Cancelled);
            }
            if let Some(previous) = pending.take() {
                let _ = previous.reply.send(Err(Error::Superseded));
            }
            *pending = Some(PendingTranslation { request, reply });
        }

        self.inner.clone().schedule_dispatch();

        response.await.unwrap_or(Err(Error::Cancelled))
    }

    /// Rejects any pending request with `Cancelled` and tears the worker
    /// down.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        if let Some(pending) = self.inner.lock_pending().take() {
            let _ = pending.reply.send(Err(Error::Cancelled));
        }
        self.inner.pool.shutdown();
    }
}

impl RealtimeInner {
    fn lock_pending(&self) -> MutexGuard<'_, Option<PendingTranslation>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn schedule_dispatch(self: Arc<Self>) {
        tokio::spawn(async move {
            self.dispatch().await;
        });
    }

    /// One dispatch attempt: claim the worker, claim the pending request,
    /// run it. Claims happen under non-suspending locks, so a concurrent
    /// attempt can own at most one of the two.
    async fn dispatch(self: Arc<Self>) {
        if self.lock_pending().is_none() {
            return;
        }

        let claim = match self.pool.acquire().await {
            Ok(Some(claim)) => claim,
            // The worker is busy; the attempt that owns it re-triggers
            // when it finishes.
            Ok(None) => return,
            Err(err) => {
                // The pending request stays put for the next trigger.
                warn!("Could not start translation worker: {err}");
                return;
            }
        };

        let Some(task) = self.lock_pending().take() else {
            self.pool.release(claim);
            return;
        };

        let PendingTranslation { request, reply } = task;
        let result = self.run(claim, request).await;
        let _ = reply.send(result);

        self.pool.release(claim);

        // A new request may have arrived while this one was running.
        if self.lock_pending().is_some() {
            self.clone().schedule_dispatch();
        }
    }

    async fn run(
        &self,
        claim: WorkerClaim,
        request: TranslationRequest,
    ) -> Result<TranslationResponse> {
        let route = self
            .backing
            .resolve_route(&request.from, &request.to)
            .await?;

        for bundle in &route {
            self.pool.ensure_loaded(claim, bundle, &self.backing).await?;
        }

        let pairs: Vec<LanguagePair> = route.iter().map(|b| b.pair.clone()).collect();
        let item = BatchItem {
            text: request.text.clone(),
            html: request.html,
            quality_scores: request.quality_scores,
        };

        let mut outputs = self.pool.execute(claim, pairs, vec![item]).await?;
        if outputs.len() != 1 {
            return Err(Error::Engine(format!(
                "kernel returned {} outputs for 1 request",
                outputs.len()
            )));
        }

        let output = outputs.remove(0);
        if let Some(message) = output.error {
            return Err(Error::Engine(message));
        }

        Ok(TranslationResponse {
            request,
            text: output.text,
            alignment: output.alignment,
            quality: output.quality,
        })
    }
}
