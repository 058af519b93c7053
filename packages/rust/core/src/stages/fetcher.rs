//! Fetcher pool: fans each task out to every configured source.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, instrument, warn};

use curator_shared::{Candidate, CuratorError, Task};

use super::{Enqueue, RunContext, enqueue, wait_while_paused};
use crate::pipeline::Shared;

/// Work through a static slice of tasks, then exit.
#[instrument(skip_all, fields(worker = worker, run_id = %run.run_id))]
pub(crate) async fn run_fetcher(
    worker: usize,
    tasks: Vec<Task>,
    shared: Arc<Shared>,
    run: Arc<RunContext>,
    tx: flume::Sender<Candidate>,
) {
    debug!(worker, tasks = tasks.len(), "fetcher started");

    'tasks: for (index, task) in tasks.iter().enumerate() {
        if !wait_while_paused(&shared.paused, &run.cancel).await {
            break;
        }

        let candidates = fetch_task(&shared, &run, task).await;
        debug!(
            query = %task.query,
            language = %task.language,
            candidates = candidates.len(),
            "task fetched"
        );

        for candidate in candidates {
            match enqueue(&tx, candidate, &run).await {
                Enqueue::Sent => {}
                Enqueue::TimedOut => {
                    debug!("fetch queue full, candidate dropped");
                    shared.metrics.record_dropped();
                }
                Enqueue::Cancelled | Enqueue::Disconnected => break 'tasks,
            }
        }

        if index + 1 < tasks.len() {
            tokio::select! {
                _ = run.cancel.cancelled() => break,
                _ = tokio::time::sleep(run.config.fetch_interval()) => {}
            }
        }
    }

    debug!(worker, "fetcher finished");
}

/// Query every source for one task. A failing source never aborts the task.
async fn fetch_task(shared: &Shared, run: &RunContext, task: &Task) -> Vec<Candidate> {
    let max_results = run.config.max_results_per_source;
    let mut batch = Vec::new();

    for source in &shared.sources {
        if run.cancel.is_cancelled() {
            break;
        }

        if !shared.rate_limiter.allow(source.name()) {
            debug!(source = source.name(), "rate limited, skipping source");
            continue;
        }

        let started = Instant::now();
        let fetched = tokio::select! {
            _ = run.cancel.cancelled() => break,
            fetched = tokio::time::timeout(
                run.config.fetch_timeout(),
                source.fetch(&task.query, &task.language, max_results),
            ) => fetched,
        };

        match fetched {
            Ok(Ok(mut candidates)) => {
                shared.metrics.record_fetch_latency(started.elapsed());
                candidates.truncate(max_results);
                let kind = source.kind();
                for candidate in &mut candidates {
                    candidate.source = source.name().to_string();
                    candidate.source_kind = kind;
                }
                batch.extend(candidates);
            }
            Ok(Err(e)) => {
                warn!(source = source.name(), query = %task.query, error = %e, "fetch failed");
                shared.record_error(source.name(), &e);
            }
            Err(_) => {
                let e = CuratorError::timeout(
                    format!("fetch from {}", source.name()),
                    run.config.fetch_timeout_ms,
                );
                warn!(source = source.name(), query = %task.query, error = %e, "fetch timed out");
                shared.record_error(source.name(), &e);
            }
        }
    }

    batch
}
