//! Worker stages: fetch → validate → integrate.
//!
//! Every stage polls the run's cancellation token at its loop head and at
//! each blocking queue operation, so shutdown latency is bounded by one poll
//! timeout plus one in-flight external call.

pub(crate) mod fetcher;
pub(crate) mod integrator;
pub(crate) mod validator;

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use curator_shared::{Candidate, PipelineConfig, RunId, ScoredCandidate};

/// State scoped to one `start()` … stop cycle.
pub(crate) struct RunContext {
    pub run_id: RunId,
    /// Config captured at start; mutations only apply to the next run.
    pub config: PipelineConfig,
    pub cancel: CancellationToken,
    /// Output slots reserved or filled in this run.
    reserved: AtomicUsize,
    /// Records actually written in this run.
    stored: AtomicUsize,
    fetch_queue: flume::Receiver<Candidate>,
    accept_queue: flume::Receiver<ScoredCandidate>,
}

impl RunContext {
    pub fn new(
        config: PipelineConfig,
        fetch_queue: flume::Receiver<Candidate>,
        accept_queue: flume::Receiver<ScoredCandidate>,
    ) -> Self {
        Self {
            run_id: RunId::new(),
            config,
            cancel: CancellationToken::new(),
            reserved: AtomicUsize::new(0),
            stored: AtomicUsize::new(0),
            fetch_queue,
            accept_queue,
        }
    }

    /// Claim one of the run's `max_snippets_per_run` output slots.
    pub fn try_reserve_slot(&self) -> bool {
        let max = self.config.max_snippets_per_run;
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .is_ok()
    }

    pub fn release_slot(&self) {
        self.reserved.fetch_sub(1, Ordering::AcqRel);
    }

    /// Mark a reserved slot as written. Returns the number written so far.
    pub fn commit_slot(&self) -> usize {
        self.stored.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn stored(&self) -> usize {
        self.stored.load(Ordering::Acquire)
    }

    /// Take whatever is still waiting in the fetch queue.
    pub fn take_unvalidated(&self) -> Vec<Candidate> {
        self.fetch_queue.drain().collect()
    }

    /// Take whatever is still waiting in the accept queue.
    pub fn take_pending(&self) -> Vec<ScoredCandidate> {
        self.accept_queue.drain().collect()
    }

    pub fn queue_depths(&self) -> QueueDepths {
        QueueDepths {
            fetch: self.fetch_queue.len(),
            accept: self.accept_queue.len(),
        }
    }
}

/// Current occupancy of the two bounded queues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDepths {
    pub fetch: usize,
    pub accept: usize,
}

/// Park while the pipeline is paused. Returns `false` once the run is cancelled.
pub(crate) async fn wait_while_paused(
    paused: &watch::Sender<bool>,
    cancel: &CancellationToken,
) -> bool {
    let mut rx = paused.subscribe();
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        if !*rx.borrow_and_update() {
            return true;
        }
        tokio::select! {
            _ = cancel.cancelled() => return false,
            changed = rx.changed() => {
                if changed.is_err() {
                    return false;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Enqueue {
    Sent,
    /// Queue stayed full for the whole enqueue timeout; item dropped.
    TimedOut,
    Cancelled,
    Disconnected,
}

/// Queue-full policy: block up to `enqueue_timeout`, then drop the item.
pub(crate) async fn enqueue<T>(tx: &flume::Sender<T>, item: T, run: &RunContext) -> Enqueue {
    tokio::select! {
        biased;
        _ = run.cancel.cancelled() => Enqueue::Cancelled,
        sent = tokio::time::timeout(run.config.enqueue_timeout(), tx.send_async(item)) => {
            match sent {
                Ok(Ok(())) => Enqueue::Sent,
                Ok(Err(_)) => Enqueue::Disconnected,
                Err(_) => Enqueue::TimedOut,
            }
        }
    }
}

/// Split `tasks` into at most `workers` contiguous, disjoint slices.
pub(crate) fn partition<T: Clone>(tasks: &[T], workers: usize) -> Vec<Vec<T>> {
    if tasks.is_empty() {
        return Vec::new();
    }
    let chunk = tasks.len().div_ceil(workers.max(1));
    tasks.chunks(chunk).map(<[T]>::to_vec).collect()
}
