//! Per-run supervisor task: watches the worker pools, emits periodic status,
//! autosaves, and settles the lifecycle state when the run ends.

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, instrument, warn};

use curator_shared::PipelineState;

use crate::pipeline::Shared;
use crate::stages::RunContext;

/// Why the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    /// Explicit stop or output cap.
    Cancelled,
    /// Every worker returned on its own.
    Exhausted,
    /// A worker panicked or was aborted.
    Failed,
}

#[instrument(skip_all, fields(run_id = %run.run_id))]
pub(crate) async fn supervise(shared: Arc<Shared>, run: Arc<RunContext>, mut workers: JoinSet<()>) {
    let config = &run.config;

    let mut status = interval_at(
        Instant::now() + config.status_interval(),
        config.status_interval(),
    );
    status.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut autosave = interval_at(
        Instant::now() + config.auto_save_interval(),
        config.auto_save_interval(),
    );
    autosave.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let exit = loop {
        tokio::select! {
            _ = run.cancel.cancelled() => break Exit::Cancelled,
            joined = workers.join_next() => match joined {
                None => break Exit::Exhausted,
                Some(Ok(())) => {}
                Some(Err(e)) => {
                    error!(error = %e, "worker failed");
                    shared.record_error("supervisor", &e);
                    break Exit::Failed;
                }
            },
            _ = status.tick() => {
                if !*shared.paused.borrow() {
                    shared.report_status(&run);
                }
            }
            _ = autosave.tick(), if config.auto_save_path.is_some() => {
                autosave_to_configured_path(&shared, &run).await;
            }
        }
    };

    run.cancel.cancel();
    let failed = drain(&mut workers, &run).await || exit == Exit::Failed;

    discard_queued(&shared, &run);

    match exit {
        Exit::Exhausted => {
            info!("task list exhausted");
            shared.activity.info("Task list exhausted");
        }
        Exit::Cancelled => info!(stored = run.stored(), "run cancelled"),
        Exit::Failed => {}
    }

    shared.refresh_average_quality();
    let metrics = shared.metrics.snapshot();
    info!(
        fetched = metrics.total_fetched,
        validated = metrics.total_validated,
        rejected = metrics.total_rejected,
        duplicates = metrics.total_duplicates,
        integrated = metrics.total_integrated,
        dropped = metrics.total_dropped,
        errors = metrics.total_errors,
        average_quality = metrics.average_quality,
        "final metrics"
    );

    autosave_to_configured_path(&shared, &run).await;

    let target = if failed {
        PipelineState::Error
    } else {
        PipelineState::Stopped
    };
    shared.finish_run(&run, target);
}

/// Join remaining workers within the join timeout. Returns `true` if any
/// of them failed. Stragglers are logged and left to finish on their own.
async fn drain(workers: &mut JoinSet<()>, run: &RunContext) -> bool {
    let mut failed = false;
    let drained = tokio::time::timeout(run.config.join_timeout(), async {
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "worker failed during shutdown");
                failed = true;
            }
        }
    })
    .await;

    if drained.is_err() {
        warn!(
            stragglers = workers.len(),
            "workers did not exit within join timeout"
        );
        workers.detach_all();
    }
    failed
}

/// Count anything still queued once the workers are gone as dropped, and
/// release the dedup claims of accepted candidates that never reached the sink.
fn discard_queued(shared: &Shared, run: &RunContext) {
    let unvalidated = run.take_unvalidated();
    let pending = run.take_pending();
    if unvalidated.is_empty() && pending.is_empty() {
        return;
    }

    debug!(
        unvalidated = unvalidated.len(),
        pending = pending.len(),
        "discarding queued candidates"
    );
    for scored in &pending {
        shared.release_claim(&run.config, &scored.fingerprint);
    }
    shared
        .metrics
        .record_dropped_many(unvalidated.len() + pending.len());
}

async fn autosave_to_configured_path(shared: &Shared, run: &RunContext) {
    let Some(path) = run.config.auto_save_path.as_deref() else {
        return;
    };
    match shared.save_snapshot(path).await {
        Ok(()) => info!(path = %path.display(), "autosaved snapshot"),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "autosave failed");
            shared.record_error("autosave", &e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FixedScorer, StubSyntax, shared_with};
    use curator_shared::{
        Candidate, Complexity, PipelineConfig, QualityTier, ScoredCandidate, SourceKind,
    };

    fn candidate(content: &str) -> Candidate {
        Candidate::new(content, "stub", SourceKind::Manual, "rust")
    }

    #[test]
    fn queued_candidates_are_counted_as_dropped() {
        let shared = shared_with(StubSyntax::Valid, FixedScorer(5.0));
        let (fetch_tx, fetch_rx) = flume::bounded(4);
        let (accept_tx, accept_rx) = flume::bounded(4);
        let run = RunContext::new(PipelineConfig::default(), fetch_rx, accept_rx);

        fetch_tx.send(candidate("fn a() {}")).unwrap();
        fetch_tx.send(candidate("fn b() {}")).unwrap();

        let accepted = candidate("fn c() {}");
        let fingerprint = accepted.fingerprint();
        assert!(shared.dedup.insert(fingerprint.clone()));
        accept_tx
            .send(ScoredCandidate {
                candidate: accepted,
                fingerprint: fingerprint.clone(),
                quality_score: 5.0,
                quality_tier: QualityTier::from_score(5.0),
                complexity: Complexity::Simple,
                patterns: Vec::new(),
                validated: true,
            })
            .unwrap();

        discard_queued(&shared, &run);

        assert_eq!(shared.metrics.snapshot().total_dropped, 3);
        assert!(!shared.dedup.contains(&fingerprint));
        assert_eq!(run.queue_depths(), Default::default());
    }
}
