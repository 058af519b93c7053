//! The [`Pipeline`] control surface and the state its workers share.
//!
//! A `Pipeline` owns every piece of mutable pipeline state. Each `start()`
//! creates a fresh [`RunContext`] (queues, cancellation token, output-cap
//! counters) and spawns three worker pools plus a supervisor task; workers
//! reach shared state only through the `Arc<Shared>` they are handed.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{info, instrument, warn};

use curator_shared::{
    ConfigPatch, CuratorError, DedupMode, Fingerprint, LogEntry, PipelineConfig, PipelineState,
    QualityScorer, Record, Result, Sink, Source, SyntaxValidator, Task,
};

use crate::activity::ActivityLog;
use crate::dedup::DedupStore;
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::rate_limit::RateLimiter;
use crate::snapshot::Snapshot;
use crate::stages::integrator::KeyGenerator;
use crate::stages::{QueueDepths, RunContext, fetcher, integrator, partition, validator};
use crate::supervisor;

/// External collaborators the pipeline delegates to.
#[derive(Clone)]
pub struct Collaborators {
    pub sources: Vec<Arc<dyn Source>>,
    pub syntax: Arc<dyn SyntaxValidator>,
    pub scorer: Arc<dyn QualityScorer>,
    pub sink: Arc<dyn Sink>,
}

struct ActiveRun {
    run: Arc<RunContext>,
    supervisor: Option<JoinHandle<()>>,
}

pub(crate) struct Shared {
    config: RwLock<PipelineConfig>,
    pub state: watch::Sender<PipelineState>,
    pub paused: watch::Sender<bool>,
    pub rate_limiter: RateLimiter,
    pub dedup: DedupStore,
    pub metrics: MetricsCollector,
    pub activity: ActivityLog,
    cache: RwLock<HashMap<String, Record>>,
    pub sink: Arc<dyn Sink>,
    /// Serializes sink writes and fences them against `stop()`.
    pub sink_lock: tokio::sync::Mutex<()>,
    pub sources: Vec<Arc<dyn Source>>,
    pub syntax: Arc<dyn SyntaxValidator>,
    pub scorer: Arc<dyn QualityScorer>,
    pub keys: KeyGenerator,
    tasks: Vec<Task>,
    active: Mutex<Option<ActiveRun>>,
}

impl Shared {
    pub fn new(config: PipelineConfig, tasks: Vec<Task>, collaborators: Collaborators) -> Self {
        let Collaborators {
            sources,
            syntax,
            scorer,
            sink,
        } = collaborators;

        Self {
            rate_limiter: RateLimiter::new(config.rate_limit_per_source_per_minute),
            config: RwLock::new(config),
            state: watch::Sender::new(PipelineState::Idle),
            paused: watch::Sender::new(false),
            dedup: DedupStore::new(),
            metrics: MetricsCollector::new(),
            activity: ActivityLog::default(),
            cache: RwLock::new(HashMap::new()),
            sink,
            sink_lock: tokio::sync::Mutex::new(()),
            sources,
            syntax,
            scorer,
            keys: KeyGenerator::default(),
            tasks,
            active: Mutex::new(None),
        }
    }

    pub fn config(&self) -> PipelineConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_config(&self, config: PipelineConfig) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
    }

    fn active(&self) -> std::sync::MutexGuard<'_, Option<ActiveRun>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count an error in metrics and mirror it into the activity log.
    pub fn record_error(&self, context: &str, error: &impl Display) {
        let message = error.to_string();
        self.metrics.record_error(context, &message);
        self.activity.error(format!("{context}: {message}"));
    }

    /// Undo an atomic-mode dedup claim for content that was not integrated.
    pub fn release_claim(&self, config: &PipelineConfig, fingerprint: &Fingerprint) {
        if config.dedup_mode == DedupMode::Atomic {
            self.dedup.remove(fingerprint);
        }
    }

    /// Add an integrated record to the in-memory cache.
    pub fn remember(&self, record: Record) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.key.clone(), record);
    }

    pub fn record_count(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Recompute the mean quality score over the cache.
    pub fn refresh_average_quality(&self) {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        let average = if cache.is_empty() {
            0.0
        } else {
            cache
                .values()
                .map(|r| r.metadata.quality_score)
                .sum::<f64>()
                / cache.len() as f64
        };
        drop(cache);
        self.metrics.set_average_quality(average);
    }

    pub fn report_status(&self, run: &RunContext) {
        self.refresh_average_quality();
        let m = self.metrics.snapshot();
        let depths = run.queue_depths();
        let state = *self.state.borrow();
        info!(
            state = %state,
            fetched = m.total_fetched,
            validated = m.total_validated,
            integrated = m.total_integrated,
            run_stored = run.stored(),
            fetch_queue = depths.fetch,
            accept_queue = depths.accept,
            average_quality = m.average_quality,
            "pipeline status"
        );
        self.activity.info(format!(
            "Status: fetched {}, validated {}, integrated {}, queues {}/{}, avg quality {:.2}",
            m.total_fetched,
            m.total_validated,
            m.total_integrated,
            depths.fetch,
            depths.accept,
            m.average_quality
        ));
    }

    /// End `run` and move to `target`, unless a newer run has taken over.
    pub fn finish_run(&self, run: &Arc<RunContext>, target: PipelineState) {
        let mut active = self.active();
        let owns = active
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(&current.run, run));
        if !owns {
            return;
        }
        *active = None;
        self.paused.send_replace(false);
        self.state.send_replace(target);
        drop(active);

        match target {
            PipelineState::Error => self.activity.error("Pipeline entered ERROR state"),
            _ => self.activity.info(format!("Pipeline {target}")),
        }
    }

    /// Capture a consistent snapshot; integrators are held off meanwhile.
    pub async fn capture(&self) -> Snapshot {
        let _fence = self.sink_lock.lock().await;
        self.refresh_average_quality();
        let cache: BTreeMap<String, Record> = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Snapshot::new(
            self.metrics.snapshot(),
            cache,
            self.dedup.to_sorted(),
            self.config(),
        )
    }

    pub async fn save_snapshot(&self, path: &Path) -> Result<()> {
        let snapshot = self.capture().await;
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || snapshot.write_to(&path))
            .await
            .map_err(|e| CuratorError::Snapshot(format!("snapshot writer failed: {e}")))?
    }
}

/// A concurrent snippet curation pipeline.
///
/// ```no_run
/// # async fn demo(collaborators: curator_core::Collaborators) -> curator_shared::Result<()> {
/// use curator_core::Pipeline;
/// use curator_shared::{PipelineConfig, Task};
///
/// let pipeline = Pipeline::new(
///     PipelineConfig::default(),
///     vec![Task::new("binary search", "rust")],
///     collaborators,
/// )?;
/// assert!(pipeline.start());
/// pipeline.wait_until_settled().await;
/// println!("{:?}", pipeline.metrics());
/// # Ok(())
/// # }
/// ```
pub struct Pipeline {
    shared: Arc<Shared>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        tasks: Vec<Task>,
        collaborators: Collaborators,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared::new(config, tasks, collaborators)),
        })
    }

    /// Begin a run. Returns `false` if a run is already active or no Tokio
    /// runtime is available.
    #[instrument(skip_all)]
    pub fn start(&self) -> bool {
        if tokio::runtime::Handle::try_current().is_err() {
            warn!("start() called outside a Tokio runtime");
            return false;
        }

        let shared = &self.shared;
        let mut active = shared.active();
        let began = shared.state.send_if_modified(|state| {
            if state.is_active() {
                false
            } else {
                *state = PipelineState::Running;
                true
            }
        });
        if !began {
            warn!("start() ignored: pipeline already active");
            return false;
        }

        let config = shared.config();
        shared
            .rate_limiter
            .set_limit(config.rate_limit_per_source_per_minute);
        shared.paused.send_replace(false);

        let (fetch_tx, fetch_rx) = flume::bounded(config.fetch_queue_capacity);
        let (accept_tx, accept_rx) = flume::bounded(config.accept_queue_capacity);
        let run = Arc::new(RunContext::new(
            config.clone(),
            fetch_rx.clone(),
            accept_rx.clone(),
        ));
        shared.metrics.record_run_started();

        // Consumers first, so nothing produced is left without a reader.
        let mut workers = JoinSet::new();
        for worker in 0..config.validator_workers {
            workers.spawn(validator::run_validator(
                worker,
                Arc::clone(shared),
                Arc::clone(&run),
                fetch_rx.clone(),
                accept_tx.clone(),
            ));
        }
        for worker in 0..config.integrator_workers {
            workers.spawn(integrator::run_integrator(
                worker,
                Arc::clone(shared),
                Arc::clone(&run),
                accept_rx.clone(),
            ));
        }
        let slices = partition(&shared.tasks, config.fetcher_workers);
        let fetchers = slices.len();
        for (worker, tasks) in slices.into_iter().enumerate() {
            workers.spawn(fetcher::run_fetcher(
                worker,
                tasks,
                Arc::clone(shared),
                Arc::clone(&run),
                fetch_tx.clone(),
            ));
        }
        // Workers hold the only remaining senders; channels close as pools finish.
        drop(fetch_tx);
        drop(accept_tx);

        let supervisor = tokio::spawn(supervisor::supervise(
            Arc::clone(shared),
            Arc::clone(&run),
            workers,
        ));

        info!(
            run_id = %run.run_id,
            fetchers,
            validators = config.validator_workers,
            integrators = config.integrator_workers,
            tasks = shared.tasks.len(),
            "pipeline started"
        );
        shared
            .activity
            .info(format!("Pipeline started (run {})", run.run_id));

        *active = Some(ActiveRun {
            run,
            supervisor: Some(supervisor),
        });
        true
    }

    /// Cancel the active run and wait for it to wind down.
    ///
    /// Once this returns `true`, no further record reaches the sink.
    #[instrument(skip_all)]
    pub async fn stop(&self) -> bool {
        let shared = &self.shared;
        let (run, supervisor) = {
            let mut active = shared.active();
            match active.as_mut() {
                Some(current) if shared.state.borrow().is_active() => {
                    (Arc::clone(&current.run), current.supervisor.take())
                }
                _ => return false,
            }
        };

        info!(run_id = %run.run_id, "stopping pipeline");
        run.cancel.cancel();

        if let Some(handle) = supervisor {
            let grace =
                run.config.join_timeout() + run.config.poll_timeout() + Duration::from_secs(1);
            match tokio::time::timeout(grace, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, "supervisor task failed");
                    shared.record_error("supervisor", &e);
                }
                Err(_) => warn!("supervisor did not finish within grace period"),
            }
        }

        // Any integrator past its cancellation check finishes its write here.
        drop(shared.sink_lock.lock().await);

        shared.finish_run(&run, PipelineState::Stopped);
        true
    }

    pub fn pause(&self) -> bool {
        let paused = self.shared.state.send_if_modified(|state| {
            if *state == PipelineState::Running {
                *state = PipelineState::Paused;
                true
            } else {
                false
            }
        });
        if paused {
            self.shared.paused.send_replace(true);
            info!("pipeline paused");
            self.shared.activity.info("Pipeline paused");
        }
        paused
    }

    pub fn resume(&self) -> bool {
        let resumed = self.shared.state.send_if_modified(|state| {
            if *state == PipelineState::Paused {
                *state = PipelineState::Running;
                true
            } else {
                false
            }
        });
        if resumed {
            self.shared.paused.send_replace(false);
            info!("pipeline resumed");
            self.shared.activity.info("Pipeline resumed");
        }
        resumed
    }

    pub fn status(&self) -> PipelineState {
        *self.shared.state.borrow()
    }

    /// Subscribe to lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.shared.state.subscribe()
    }

    /// Resolve once the pipeline is neither running nor paused.
    pub async fn wait_until_settled(&self) -> PipelineState {
        let mut rx = self.shared.state.subscribe();
        match rx.wait_for(|state| !state.is_active()).await {
            Ok(state) => *state,
            Err(_) => self.status(),
        }
    }

    /// The newest `limit` activity entries, oldest first.
    pub fn log(&self, limit: usize) -> Vec<LogEntry> {
        self.shared.activity.recent(limit)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.refresh_average_quality();
        self.shared.metrics.snapshot()
    }

    pub fn config(&self) -> PipelineConfig {
        self.shared.config()
    }

    /// Apply a partial config. Rejected while a run is active.
    pub fn update_config(&self, patch: &ConfigPatch) -> Result<()> {
        let shared = &self.shared;
        let _active = shared.active();
        if shared.state.borrow().is_active() {
            return Err(CuratorError::State(
                "cannot update config while the pipeline is running".into(),
            ));
        }

        let next = patch.apply(&shared.config())?;
        shared
            .rate_limiter
            .set_limit(next.rate_limit_per_source_per_minute);
        shared.set_config(next);
        info!("pipeline config updated");
        shared.activity.info("Config updated");
        Ok(())
    }

    pub async fn save_snapshot(&self, path: &Path) -> Result<()> {
        self.shared.save_snapshot(path).await?;
        info!(path = %path.display(), "snapshot saved");
        self.shared
            .activity
            .info(format!("Snapshot saved to {}", path.display()));
        Ok(())
    }

    /// Replace metrics, cache, fingerprints, and config from a snapshot file.
    pub fn load_snapshot(&self, path: &Path) -> Result<()> {
        let shared = &self.shared;
        let _active = shared.active();
        if shared.state.borrow().is_active() {
            return Err(CuratorError::State(
                "cannot load a snapshot while the pipeline is running".into(),
            ));
        }

        let snapshot = Snapshot::read_from(path)?;
        snapshot.config.validate()?;

        let records = snapshot.cache.len();
        shared.metrics.restore(snapshot.metrics);
        shared.dedup.replace(snapshot.seen_fingerprints);
        *shared.cache.write().unwrap_or_else(PoisonError::into_inner) =
            snapshot.cache.into_iter().collect();
        shared
            .rate_limiter
            .set_limit(snapshot.config.rate_limit_per_source_per_minute);
        shared.set_config(snapshot.config);

        info!(path = %path.display(), records, "snapshot loaded");
        shared
            .activity
            .info(format!("Snapshot loaded from {} ({records} records)", path.display()));
        Ok(())
    }

    /// Highest-scoring cached records, optionally for one language.
    /// Ties are broken by key.
    pub fn best_records(&self, language: Option<&str>, top_n: usize) -> Vec<Record> {
        let cache = self
            .shared
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut records: Vec<&Record> = cache
            .values()
            .filter(|r| language.is_none_or(|l| r.metadata.language.eq_ignore_ascii_case(l)))
            .collect();
        records.sort_by(|a, b| {
            b.metadata
                .quality_score
                .total_cmp(&a.metadata.quality_score)
                .then_with(|| a.key.cmp(&b.key))
        });
        records.into_iter().take(top_n).cloned().collect()
    }

    /// Occupancy of the active run's queues; zero when idle.
    pub fn queue_depths(&self) -> QueueDepths {
        self.shared
            .active()
            .as_ref()
            .map(|current| current.run.queue_depths())
            .unwrap_or_default()
    }

    pub fn record_count(&self) -> usize {
        self.shared.record_count()
    }

    pub fn seen_count(&self) -> usize {
        self.shared.dedup.len()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Some(current) = self.shared.active().as_ref() {
            current.run.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use crate::testing::{
        FailingSource, FixedScorer, PanickingScorer, ScriptedSource, SlowSink, StubSyntax,
        UnboundedSource, collaborators, single,
    };
    use std::time::Duration;

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            fetcher_workers: 1,
            validator_workers: 1,
            integrator_workers: 1,
            fetch_interval_ms: 150,
            fetch_timeout_ms: 500,
            poll_timeout_ms: 20,
            enqueue_timeout_ms: 200,
            join_timeout_ms: 500,
            min_content_len: 5,
            quality_threshold: 2.5,
            ..Default::default()
        }
    }

    fn tasks(n: usize) -> Vec<Task> {
        (0..n).map(|i| Task::new(format!("query {i}"), "rust")).collect()
    }

    async fn settle(pipeline: &Pipeline) -> PipelineState {
        tokio::time::timeout(Duration::from_secs(10), pipeline.wait_until_settled())
            .await
            .expect("pipeline did not settle")
    }

    fn scenario_a_source() -> ScriptedSource {
        ScriptedSource::new(
            "scripted",
            [
                (
                    "query 0",
                    vec!["fn one() {}", "fn two() {}", "fn three() {}", "fn shared() {}"],
                ),
                (
                    "query 1",
                    vec!["fn four() {}", "fn five() {}", "fn six() {}", "fn shared() {}"],
                ),
            ],
        )
    }

    async fn run_scenario_a(mode: curator_shared::DedupMode) -> MetricsSnapshot {
        let config = PipelineConfig {
            dedup_mode: mode,
            ..fast_config()
        };
        let sink = Arc::new(MemorySink::new());
        let pipeline = Pipeline::new(
            config,
            tasks(2),
            collaborators(
                single(scenario_a_source()),
                StubSyntax::Valid,
                FixedScorer(5.0),
                sink.clone(),
            ),
        )
        .unwrap();

        assert!(pipeline.start());
        assert_eq!(settle(&pipeline).await, PipelineState::Stopped);
        assert_eq!(sink.len(), 7);
        pipeline.metrics()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn scenario_a_two_phase_integrates_first_occurrence() {
        let metrics = run_scenario_a(curator_shared::DedupMode::TwoPhase).await;
        assert_eq!(metrics.total_fetched, 8);
        assert_eq!(metrics.total_validated, 7);
        assert_eq!(metrics.total_duplicates, 1);
        assert_eq!(metrics.total_integrated, 7);
        assert_eq!(metrics.average_quality, 5.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn scenario_a_atomic_integrates_first_occurrence() {
        let metrics = run_scenario_a(curator_shared::DedupMode::Atomic).await;
        assert_eq!(metrics.total_fetched, 8);
        assert_eq!(metrics.total_duplicates, 1);
        assert_eq!(metrics.total_integrated, 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn scenario_b_output_cap_self_stops() {
        let config = PipelineConfig {
            max_snippets_per_run: 3,
            fetch_interval_ms: 10,
            ..fast_config()
        };
        let sink = Arc::new(MemorySink::new());
        let pipeline = Pipeline::new(
            config,
            tasks(50),
            collaborators(
                single(UnboundedSource::new("unbounded")),
                StubSyntax::Valid,
                FixedScorer(5.0),
                sink.clone(),
            ),
        )
        .unwrap();

        assert!(pipeline.start());
        assert_eq!(settle(&pipeline).await, PipelineState::Stopped);
        assert_eq!(pipeline.metrics().total_integrated, 3);
        assert_eq!(sink.len(), 3);
        assert!(pipeline.log(50).iter().any(|e| e.message.contains("Output cap")));
    }

    #[test]
    fn zero_output_cap_is_refused() {
        let config = PipelineConfig {
            max_snippets_per_run: 0,
            ..fast_config()
        };
        let built = Pipeline::new(
            config,
            tasks(10),
            collaborators(
                single(UnboundedSource::new("unbounded")),
                StubSyntax::Valid,
                FixedScorer(5.0),
                Arc::new(MemorySink::new()),
            ),
        );
        assert!(built.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn autosave_writes_snapshot_while_running() {
        let path = std::env::temp_dir()
            .join(format!("curator-autosave-{}", uuid::Uuid::now_v7()))
            .join("auto.snap");
        let config = PipelineConfig {
            auto_save_interval_secs: 1,
            auto_save_path: Some(path.clone()),
            fetch_interval_ms: 200,
            ..fast_config()
        };
        let pipeline = Pipeline::new(
            config,
            tasks(1_000),
            collaborators(
                single(UnboundedSource::new("unbounded")),
                StubSyntax::Valid,
                FixedScorer(5.0),
                Arc::new(MemorySink::new()),
            ),
        )
        .unwrap();

        assert!(pipeline.start());
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(pipeline.status(), PipelineState::Running);
        assert!(path.exists(), "autosave tick should have written {}", path.display());
        let saved = Snapshot::read_from(&path).unwrap();
        assert_eq!(saved.config.auto_save_path.as_deref(), Some(path.as_path()));

        assert!(pipeline.stop().await);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cap_holds_with_concurrent_integrators() {
        let config = PipelineConfig {
            fetcher_workers: 4,
            validator_workers: 4,
            integrator_workers: 4,
            max_snippets_per_run: 5,
            fetch_interval_ms: 1,
            ..fast_config()
        };
        let sink = Arc::new(MemorySink::new());
        let pipeline = Pipeline::new(
            config,
            tasks(40),
            collaborators(
                single(UnboundedSource::new("unbounded")),
                StubSyntax::Valid,
                FixedScorer(5.0),
                sink.clone(),
            ),
        )
        .unwrap();

        assert!(pipeline.start());
        settle(&pipeline).await;
        assert_eq!(pipeline.metrics().total_integrated, 5);
        assert_eq!(sink.len(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn scenario_c_failing_source_stops_cleanly() {
        let config = PipelineConfig {
            fetch_interval_ms: 200,
            ..fast_config()
        };
        let pipeline = Pipeline::new(
            config,
            tasks(100),
            collaborators(
                single(FailingSource),
                StubSyntax::Valid,
                FixedScorer(5.0),
                Arc::new(MemorySink::new()),
            ),
        )
        .unwrap();

        assert!(pipeline.start());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(pipeline.stop().await);
        assert_eq!(pipeline.status(), PipelineState::Stopped);

        let metrics = pipeline.metrics();
        assert_eq!(metrics.total_fetched, 0);
        assert!(!metrics.recent_errors.is_empty());
        assert_eq!(metrics.recent_errors[0].context, "failing");
        assert!(pipeline.log(10).iter().any(|e| e.level == curator_shared::LogLevel::Error));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn no_records_after_stop_returns() {
        let config = PipelineConfig {
            fetcher_workers: 2,
            validator_workers: 2,
            integrator_workers: 2,
            fetch_interval_ms: 5,
            ..fast_config()
        };
        let sink = Arc::new(MemorySink::new());
        let pipeline = Pipeline::new(
            config,
            tasks(1_000),
            collaborators(
                single(UnboundedSource::new("unbounded")),
                StubSyntax::Valid,
                FixedScorer(5.0),
                sink.clone(),
            ),
        )
        .unwrap();

        assert!(pipeline.start());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(pipeline.stop().await);

        let written = sink.len();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sink.len(), written);
        assert_eq!(pipeline.metrics().total_integrated as usize, written);
        assert_eq!(pipeline.seen_count(), written, "unintegrated claims released");
        assert!(!pipeline.stop().await, "second stop is a no-op");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn start_is_rejected_while_active() {
        let pipeline = Pipeline::new(
            fast_config(),
            tasks(100),
            collaborators(
                single(UnboundedSource::new("unbounded")),
                StubSyntax::Valid,
                FixedScorer(5.0),
                Arc::new(MemorySink::new()),
            ),
        )
        .unwrap();

        assert!(pipeline.start());
        assert!(!pipeline.start());
        assert!(pipeline.stop().await);
        assert!(pipeline.start(), "a stopped pipeline can run again");
        assert!(pipeline.stop().await);
        assert_eq!(pipeline.metrics().runs_started, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pause_holds_workers_until_resume() {
        let config = PipelineConfig {
            fetch_interval_ms: 20,
            ..fast_config()
        };
        let pipeline = Pipeline::new(
            config,
            tasks(1_000),
            collaborators(
                single(UnboundedSource::new("unbounded")),
                StubSyntax::Valid,
                FixedScorer(5.0),
                Arc::new(MemorySink::new()),
            ),
        )
        .unwrap();

        assert!(!pipeline.pause(), "cannot pause while idle");
        assert!(pipeline.start());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(pipeline.pause());
        assert_eq!(pipeline.status(), PipelineState::Paused);
        assert!(!pipeline.pause());
        // Let in-flight items settle before sampling.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let frozen = pipeline.metrics().total_integrated;
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(pipeline.metrics().total_integrated, frozen);

        assert!(pipeline.resume());
        assert_eq!(pipeline.status(), PipelineState::Running);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(pipeline.metrics().total_integrated > frozen);

        assert!(pipeline.pause());
        assert!(pipeline.stop().await, "stop works from PAUSED");
        assert_eq!(pipeline.status(), PipelineState::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn worker_panic_moves_to_error() {
        let pipeline = Pipeline::new(
            fast_config(),
            tasks(2),
            collaborators(
                single(UnboundedSource::new("unbounded")),
                StubSyntax::Valid,
                PanickingScorer,
                Arc::new(MemorySink::new()),
            ),
        )
        .unwrap();

        assert!(pipeline.start());
        assert_eq!(settle(&pipeline).await, PipelineState::Error);
        assert!(pipeline.metrics().recent_errors.iter().any(|e| e.context == "supervisor"));
        assert!(pipeline.start(), "ERROR is recoverable by a fresh start");
        settle(&pipeline).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn full_accept_queue_drops_and_counts() {
        let config = PipelineConfig {
            accept_queue_capacity: 1,
            enqueue_timeout_ms: 10,
            fetch_interval_ms: 1,
            ..fast_config()
        };
        let pipeline = Pipeline::new(
            config,
            tasks(3),
            collaborators(
                single(UnboundedSource::new("unbounded")),
                StubSyntax::Valid,
                FixedScorer(5.0),
                Arc::new(SlowSink::new(Duration::from_millis(100))),
            ),
        )
        .unwrap();

        assert!(pipeline.start());
        assert_eq!(settle(&pipeline).await, PipelineState::Stopped);

        let metrics = pipeline.metrics();
        assert!(metrics.total_dropped > 0);
        assert_eq!(metrics.total_fetched, 30);
        assert_eq!(
            metrics.total_validated,
            metrics.total_integrated + metrics.total_dropped
        );
        assert_eq!(pipeline.seen_count(), pipeline.record_count());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn snapshot_round_trip_into_fresh_pipeline() {
        let path = std::env::temp_dir()
            .join(format!("curator-pipeline-{}", uuid::Uuid::now_v7()))
            .join("state.snap");

        let pipeline = Pipeline::new(
            fast_config(),
            tasks(2),
            collaborators(
                single(scenario_a_source()),
                StubSyntax::Valid,
                FixedScorer(6.0),
                Arc::new(MemorySink::new()),
            ),
        )
        .unwrap();
        assert!(pipeline.start());
        settle(&pipeline).await;
        pipeline.save_snapshot(&path).await.unwrap();

        let fresh = Pipeline::new(
            PipelineConfig::default(),
            Vec::new(),
            collaborators(
                Vec::new(),
                StubSyntax::Valid,
                FixedScorer(0.0),
                Arc::new(MemorySink::new()),
            ),
        )
        .unwrap();
        fresh.load_snapshot(&path).unwrap();

        assert_eq!(fresh.metrics(), pipeline.metrics());
        assert_eq!(fresh.config(), pipeline.config());
        assert_eq!(fresh.record_count(), 7);
        assert_eq!(fresh.seen_count(), pipeline.seen_count());
        assert_eq!(fresh.best_records(None, 100), pipeline.best_records(None, 100));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn config_and_snapshot_changes_rejected_while_running() {
        let pipeline = Pipeline::new(
            fast_config(),
            tasks(1_000),
            collaborators(
                single(UnboundedSource::new("unbounded")),
                StubSyntax::Valid,
                FixedScorer(5.0),
                Arc::new(MemorySink::new()),
            ),
        )
        .unwrap();

        let patch = ConfigPatch {
            quality_threshold: Some(4.0),
            ..Default::default()
        };
        assert!(pipeline.start());
        assert!(matches!(
            pipeline.update_config(&patch),
            Err(CuratorError::State(_))
        ));
        assert!(matches!(
            pipeline.load_snapshot(Path::new("/nonexistent")),
            Err(CuratorError::State(_))
        ));
        assert!(pipeline.stop().await);

        pipeline.update_config(&patch).unwrap();
        assert_eq!(pipeline.config().quality_threshold, 4.0);

        let invalid = ConfigPatch {
            validator_workers: Some(0),
            ..Default::default()
        };
        assert!(pipeline.update_config(&invalid).is_err());
        assert_eq!(pipeline.config().validator_workers, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn best_records_orders_by_score_then_key() {
        let pipeline = Pipeline::new(
            fast_config(),
            Vec::new(),
            collaborators(
                Vec::new(),
                StubSyntax::Valid,
                FixedScorer(5.0),
                Arc::new(MemorySink::new()),
            ),
        )
        .unwrap();

        let make = |key: &str, language: &str, score: f64| {
            let candidate = curator_shared::Candidate::new(
                format!("fn {key}() {{}}"),
                "stub",
                curator_shared::SourceKind::Manual,
                language,
            );
            Record::from_scored(
                key.to_string(),
                curator_shared::ScoredCandidate {
                    fingerprint: candidate.fingerprint(),
                    candidate,
                    quality_score: score,
                    quality_tier: curator_shared::QualityTier::from_score(score),
                    complexity: curator_shared::Complexity::Simple,
                    patterns: Vec::new(),
                    validated: true,
                },
            )
        };
        for record in [
            make("b", "rust", 7.0),
            make("a", "rust", 7.0),
            make("c", "python", 9.0),
            make("d", "rust", 3.0),
        ] {
            pipeline.shared.remember(record);
        }

        let keys = |records: Vec<Record>| records.into_iter().map(|r| r.key).collect::<Vec<_>>();
        assert_eq!(keys(pipeline.best_records(None, 3)), vec!["c", "a", "b"]);
        assert_eq!(keys(pipeline.best_records(Some("RUST"), 10)), vec!["a", "b", "d"]);
        assert!(pipeline.best_records(Some("go"), 10).is_empty());
    }

    #[test]
    fn start_outside_runtime_fails() {
        let pipeline = Pipeline::new(
            PipelineConfig::default(),
            Vec::new(),
            collaborators(
                Vec::new(),
                StubSyntax::Valid,
                FixedScorer(5.0),
                Arc::new(MemorySink::new()),
            ),
        )
        .unwrap();
        assert!(!pipeline.start());
        assert_eq!(pipeline.status(), PipelineState::Idle);
    }
}
