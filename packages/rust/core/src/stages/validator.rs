//! Validator pool: size bounds, dedup, syntax, quality gate.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, instrument, warn};

use curator_shared::{
    Candidate, DedupMode, Fingerprint, PipelineConfig, QualityTier, ScoredCandidate,
    ValidationFailurePolicy,
};

use super::{Enqueue, RunContext, enqueue, wait_while_paused};
use crate::pipeline::Shared;

/// Outcome of judging one candidate.
#[derive(Debug)]
pub(crate) enum Verdict {
    Accepted(Box<ScoredCandidate>),
    Duplicate,
    Rejected(RejectReason),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RejectReason {
    Length(usize),
    Syntax,
    /// Syntax collaborator failed and the policy is fail-closed.
    Unjudgeable,
    LowQuality(f64),
}

#[instrument(skip_all, fields(worker = worker, run_id = %run.run_id))]
pub(crate) async fn run_validator(
    worker: usize,
    shared: Arc<Shared>,
    run: Arc<RunContext>,
    rx: flume::Receiver<Candidate>,
    tx: flume::Sender<ScoredCandidate>,
) {
    debug!(worker, "validator started");

    loop {
        if !wait_while_paused(&shared.paused, &run.cancel).await {
            break;
        }

        let candidate = tokio::select! {
            _ = run.cancel.cancelled() => break,
            next = tokio::time::timeout(run.config.poll_timeout(), rx.recv_async()) => match next {
                Err(_) => continue,
                Ok(Err(_)) => {
                    debug!("fetch queue closed");
                    break;
                }
                Ok(Ok(candidate)) => candidate,
            },
        };

        let started = Instant::now();
        shared.metrics.record_fetched();

        let keep_going = match validate_candidate(&shared, &run.config, candidate) {
            Verdict::Accepted(scored) => {
                shared.metrics.record_validated();
                let fingerprint = scored.fingerprint.clone();
                match enqueue(&tx, *scored, &run).await {
                    Enqueue::Sent => true,
                    Enqueue::TimedOut => {
                        debug!("accept queue full, candidate dropped");
                        shared.metrics.record_dropped();
                        shared.release_claim(&run.config, &fingerprint);
                        true
                    }
                    Enqueue::Cancelled | Enqueue::Disconnected => {
                        shared.release_claim(&run.config, &fingerprint);
                        false
                    }
                }
            }
            Verdict::Duplicate => {
                shared.metrics.record_duplicate();
                true
            }
            Verdict::Rejected(reason) => {
                debug!(?reason, "candidate rejected");
                shared.metrics.record_rejected();
                true
            }
        };

        shared.metrics.record_validation_latency(started.elapsed());
        if !keep_going {
            break;
        }
    }

    debug!(worker, "validator finished");
}

/// Judge a single candidate against the run's config.
pub(crate) fn validate_candidate(
    shared: &Shared,
    config: &PipelineConfig,
    candidate: Candidate,
) -> Verdict {
    let len = candidate.content.len();
    if len < config.min_content_len || len > config.max_content_len {
        return Verdict::Rejected(RejectReason::Length(len));
    }

    let fingerprint = candidate.fingerprint();
    let unseen = match config.dedup_mode {
        DedupMode::TwoPhase => !shared.dedup.contains(&fingerprint),
        DedupMode::Atomic => shared.dedup.insert(fingerprint.clone()),
    };
    if !unseen {
        return Verdict::Duplicate;
    }

    let verdict = judge(shared, config, candidate, fingerprint.clone());
    if matches!(verdict, Verdict::Rejected(_)) {
        shared.release_claim(config, &fingerprint);
    }
    verdict
}

/// Syntax and quality gates for content that cleared the dedup check.
fn judge(
    shared: &Shared,
    config: &PipelineConfig,
    candidate: Candidate,
    fingerprint: Fingerprint,
) -> Verdict {
    match shared
        .syntax
        .is_syntax_valid(&candidate.content, &candidate.language)
    {
        Ok(true) => {}
        Ok(false) => return Verdict::Rejected(RejectReason::Syntax),
        Err(e) => {
            warn!(
                language = %candidate.language,
                error = %e,
                policy = ?config.validation_failure_policy,
                "syntax check failed"
            );
            shared.record_error("syntax", &e);
            if config.validation_failure_policy == ValidationFailurePolicy::FailClosed {
                return Verdict::Rejected(RejectReason::Unjudgeable);
            }
        }
    }

    let score = sanitize_score(shared.scorer.score(&candidate));
    if score < config.quality_threshold {
        return Verdict::Rejected(RejectReason::LowQuality(score));
    }

    let complexity = shared.scorer.complexity(&candidate.content);
    let patterns = shared.scorer.extract_patterns(&candidate);

    Verdict::Accepted(Box::new(ScoredCandidate {
        candidate,
        fingerprint,
        quality_score: score,
        quality_tier: QualityTier::from_score(score),
        complexity,
        patterns,
        validated: true,
    }))
}

/// Clamp collaborator output into `[0, 10]`; NaN counts as zero.
fn sanitize_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 10.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FixedScorer, StubSyntax, shared_with};
    use curator_shared::SourceKind;

    fn candidate(content: &str) -> Candidate {
        Candidate::new(content, "stub", SourceKind::Manual, "rust")
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            min_content_len: 5,
            max_content_len: 200,
            quality_threshold: 2.5,
            ..Default::default()
        }
    }

    #[test]
    fn accepts_and_assigns_tier() {
        let shared = shared_with(StubSyntax::Valid, FixedScorer(6.5));
        match validate_candidate(&shared, &config(), candidate("fn main() {}")) {
            Verdict::Accepted(scored) => {
                assert!(scored.validated);
                assert_eq!(scored.quality_tier, QualityTier::Good);
                assert_eq!(scored.fingerprint, Fingerprint::of("fn main() {}"));
            }
            other => panic!("expected acceptance, got {other:?}"),
        }
    }

    #[test]
    fn rejects_out_of_bounds_length() {
        let shared = shared_with(StubSyntax::Valid, FixedScorer(9.0));
        assert!(matches!(
            validate_candidate(&shared, &config(), candidate("ab")),
            Verdict::Rejected(RejectReason::Length(2))
        ));
        let long = "x".repeat(201);
        assert!(matches!(
            validate_candidate(&shared, &config(), candidate(&long)),
            Verdict::Rejected(RejectReason::Length(201))
        ));
    }

    #[test]
    fn rejects_below_threshold() {
        let shared = shared_with(StubSyntax::Valid, FixedScorer(2.0));
        assert!(matches!(
            validate_candidate(&shared, &config(), candidate("let x = 1;")),
            Verdict::Rejected(RejectReason::LowQuality(_))
        ));
    }

    #[test]
    fn rejects_invalid_syntax() {
        let shared = shared_with(StubSyntax::Invalid, FixedScorer(9.0));
        assert!(matches!(
            validate_candidate(&shared, &config(), candidate("fn main() {")),
            Verdict::Rejected(RejectReason::Syntax)
        ));
    }

    #[test]
    fn scores_are_clamped() {
        let shared = shared_with(StubSyntax::Valid, FixedScorer(42.0));
        let Verdict::Accepted(scored) = validate_candidate(&shared, &config(), candidate("let x = 1;"))
        else {
            panic!("expected acceptance");
        };
        assert_eq!(scored.quality_score, 10.0);

        let shared = shared_with(StubSyntax::Valid, FixedScorer(f64::NAN));
        assert!(matches!(
            validate_candidate(&shared, &config(), candidate("let x = 1;")),
            Verdict::Rejected(RejectReason::LowQuality(s)) if s == 0.0
        ));
    }

    #[test]
    fn syntax_failure_fails_open_by_default() {
        let shared = shared_with(StubSyntax::Failing, FixedScorer(5.0));
        assert!(matches!(
            validate_candidate(&shared, &config(), candidate("let x = 1;")),
            Verdict::Accepted(_)
        ));
        assert_eq!(shared.metrics.snapshot().total_errors, 1);
    }

    #[test]
    fn syntax_failure_fails_closed_when_configured() {
        let shared = shared_with(StubSyntax::Failing, FixedScorer(5.0));
        let config = PipelineConfig {
            validation_failure_policy: ValidationFailurePolicy::FailClosed,
            ..config()
        };
        assert!(matches!(
            validate_candidate(&shared, &config, candidate("let x = 1;")),
            Verdict::Rejected(RejectReason::Unjudgeable)
        ));
    }

    #[test]
    fn two_phase_mode_leaves_race_window_open() {
        let shared = shared_with(StubSyntax::Valid, FixedScorer(5.0));
        let config = PipelineConfig {
            dedup_mode: DedupMode::TwoPhase,
            ..config()
        };

        // Neither copy has been integrated yet, so both pass validation.
        let first = validate_candidate(&shared, &config, candidate("let same = 1;"));
        let second = validate_candidate(&shared, &config, candidate("let same = 1;"));
        assert!(matches!(first, Verdict::Accepted(_)));
        assert!(matches!(second, Verdict::Accepted(_)));

        // Once integration records the fingerprint, later copies are caught.
        shared.dedup.insert(Fingerprint::of("let same = 1;"));
        assert!(matches!(
            validate_candidate(&shared, &config, candidate("let same = 1;")),
            Verdict::Duplicate
        ));
    }

    #[test]
    fn atomic_mode_closes_race_window() {
        let shared = shared_with(StubSyntax::Valid, FixedScorer(5.0));
        let config = PipelineConfig {
            dedup_mode: DedupMode::Atomic,
            ..config()
        };

        let first = validate_candidate(&shared, &config, candidate("let same = 1;"));
        let second = validate_candidate(&shared, &config, candidate("let same = 1;"));
        assert!(matches!(first, Verdict::Accepted(_)));
        assert!(matches!(second, Verdict::Duplicate));
    }

    #[test]
    fn atomic_mode_releases_claim_on_rejection() {
        let shared = shared_with(StubSyntax::Invalid, FixedScorer(5.0));
        let config = PipelineConfig {
            dedup_mode: DedupMode::Atomic,
            ..config()
        };

        assert!(matches!(
            validate_candidate(&shared, &config, candidate("fn broken() {")),
            Verdict::Rejected(RejectReason::Syntax)
        ));
        assert!(shared.dedup.is_empty());
    }
}
