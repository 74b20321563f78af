//! Request batches and the priority-ordered batch queue.

use tokio::sync::oneshot;

use crate::error::Result;
use crate::model::registry::{LanguagePair, ModelRoute};
use crate::request::{TranslationRequest, TranslationResponse};

/// A request waiting in a batch, together with the channel its caller is
/// awaiting.
pub(crate) struct QueuedRequest {
    pub(crate) request: TranslationRequest,
    pub(crate) reply: oneshot::Sender<Result<TranslationResponse>>,
}

impl QueuedRequest {
    /// Settles the caller's future. A caller that stopped waiting is fine.
    pub(crate) fn settle(self, result: Result<TranslationResponse>) {
        let _ = self.reply.send(result);
    }
}

/// A group of same-key, same-priority requests translated in one kernel
/// call. The route is fixed when the batch is opened and the batch is
/// never touched again once handed to a worker.
pub(crate) struct Batch {
    pub(crate) id: u64,
    pub(crate) key: LanguagePair,
    pub(crate) priority: i32,
    pub(crate) route: ModelRoute,
    pub(crate) requests: Vec<QueuedRequest>,
}

/// Priority-ordered queue of open batches.
///
/// Lower priority numbers are served first. Batches of equal priority stay
/// in arrival order: insertion appends and the sort is stable on priority
/// alone.
pub(crate) struct BatchQueue {
    batches: Vec<Batch>,
    capacity: usize,
    serial: u64,
}

impl BatchQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            batches: Vec::new(),
            capacity: capacity.max(1),
            serial: 0,
        }
    }

    /// Adds a request to an open batch with matching key and priority and
    /// free capacity, or opens a new batch whose route is fixed from this
    /// first member.
    pub(crate) fn enqueue(
        &mut self,
        key: LanguagePair,
        priority: i32,
        route: ModelRoute,
        request: QueuedRequest,
    ) {
        if let Some(batch) = self
            .batches
            .iter_mut()
            .find(|b| b.key == key && b.priority == priority && b.requests.len() < self.capacity)
        {
            batch.requests.push(request);
            return;
        }

        self.serial += 1;
        self.batches.push(Batch {
            id: self.serial,
            key,
            priority,
            route,
            requests: vec![request],
        });
        self.batches.sort_by_key(|b| b.priority);
    }

    /// Pops the head batch: lowest priority number, oldest among equals.
    pub(crate) fn pop(&mut self) -> Option<Batch> {
        if self.batches.is_empty() {
            None
        } else {
            Some(self.batches.remove(0))
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Removes every open batch, for cancellation sweeps.
    pub(crate) fn drain(&mut self) -> Vec<Batch> {
        std::mem::take(&mut self.batches)
    }

    #[cfg(test)]
    pub(crate) fn batch_sizes(&self) -> Vec<usize> {
        self.batches.iter().map(|b| b.requests.len()).collect()
    }
}
