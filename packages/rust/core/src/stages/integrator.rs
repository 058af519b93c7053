//! Integrator pool: writes accepted candidates to the sink.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use curator_shared::{Record, ScoredCandidate, SourceKind};

use super::{RunContext, wait_while_paused};
use crate::pipeline::Shared;

/// Issues record keys of the form `{kind}_{language}_{micros}`.
///
/// The numeric suffix is strictly increasing for the lifetime of the
/// generator, so two integrators never collide inside one microsecond.
#[derive(Debug, Default)]
pub(crate) struct KeyGenerator {
    last: AtomicU64,
}

impl KeyGenerator {
    pub fn next(&self, kind: SourceKind, language: &str) -> String {
        let now = u64::try_from(Utc::now().timestamp_micros()).unwrap_or_default();
        let prev = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        let stamp = now.max(prev + 1);
        format!("{}_{}_{stamp}", kind.as_str(), sanitize_language(language))
    }
}

fn sanitize_language(language: &str) -> String {
    let cleaned: String = language
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Integration {
    Stored,
    /// Output cap already reserved by other integrators.
    CapReached,
    SinkFailed,
    Cancelled,
}

#[instrument(skip_all, fields(worker = worker, run_id = %run.run_id))]
pub(crate) async fn run_integrator(
    worker: usize,
    shared: Arc<Shared>,
    run: Arc<RunContext>,
    rx: flume::Receiver<ScoredCandidate>,
) {
    debug!(worker, "integrator started");

    loop {
        if !wait_while_paused(&shared.paused, &run.cancel).await {
            break;
        }

        let scored = tokio::select! {
            _ = run.cancel.cancelled() => break,
            next = tokio::time::timeout(run.config.poll_timeout(), rx.recv_async()) => match next {
                Err(_) => continue,
                Ok(Err(_)) => {
                    debug!("accept queue closed");
                    break;
                }
                Ok(Ok(scored)) => scored,
            },
        };

        if integrate(&shared, &run, scored).await == Integration::Cancelled {
            break;
        }
    }

    debug!(worker, "integrator finished");
}

/// Persist one accepted candidate.
///
/// The sink lock is held from the cancellation check through the dedup and
/// metrics updates, so once `stop()` has acquired and released it no further
/// record can reach the sink.
pub(crate) async fn integrate(
    shared: &Shared,
    run: &RunContext,
    scored: ScoredCandidate,
) -> Integration {
    if !run.try_reserve_slot() {
        debug!("output cap reached, candidate discarded");
        shared.release_claim(&run.config, &scored.fingerprint);
        return Integration::CapReached;
    }

    let started = Instant::now();
    let key = shared
        .keys
        .next(scored.candidate.source_kind, &scored.candidate.language);
    let record = Record::from_scored(key, scored);

    let _fence = shared.sink_lock.lock().await;
    if run.cancel.is_cancelled() {
        run.release_slot();
        shared.release_claim(&run.config, &record.metadata.fingerprint);
        return Integration::Cancelled;
    }

    if let Err(e) = shared.sink.put(&record.key, &record).await {
        warn!(key = %record.key, error = %e, "sink write failed");
        run.release_slot();
        shared.release_claim(&run.config, &record.metadata.fingerprint);
        shared.record_error("sink", &e);
        return Integration::SinkFailed;
    }

    shared.dedup.insert(record.metadata.fingerprint.clone());
    shared.metrics.record_integrated(&record, started.elapsed());
    debug!(
        key = %record.key,
        score = record.metadata.quality_score,
        tier = record.metadata.quality_tier.as_str(),
        "record integrated"
    );
    shared.remember(record);

    let stored = run.commit_slot();
    if stored >= run.config.max_snippets_per_run {
        info!(stored, "output cap reached, stopping run");
        shared
            .activity
            .info(format!("Output cap of {stored} records reached"));
        run.cancel.cancel();
    }

    Integration::Stored
}
