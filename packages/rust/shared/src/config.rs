//! Application configuration for Curator.
//!
//! User config lives at `~/.curator/curator.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CuratorError, Result};
use crate::types::Task;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "curator.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".curator";

// ---------------------------------------------------------------------------
// Config structs (matching curator.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Pipeline tuning knobs.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Persistence locations.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Configured fetch sources.
    #[serde(default)]
    pub sources: Vec<SourceEntry>,

    /// Static task list for each run.
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// How duplicate content is detected between validation and integration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupMode {
    /// Validators check, integrators insert. Two concurrent validators can
    /// both pass the same content before either is integrated.
    TwoPhase,
    /// Validators check-and-insert in one step. The claim is released if
    /// the candidate never reaches the sink.
    #[default]
    Atomic,
}

/// What a validator does when the syntax collaborator returns an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationFailurePolicy {
    #[default]
    FailOpen,
    FailClosed,
}

/// `[pipeline]` section. Also the runtime configuration read by every pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_fetcher_workers")]
    pub fetcher_workers: usize,
    #[serde(default = "default_validator_workers")]
    pub validator_workers: usize,
    #[serde(default = "default_integrator_workers")]
    pub integrator_workers: usize,

    /// Pause between two tasks of one fetcher.
    #[serde(default = "default_fetch_interval_ms")]
    pub fetch_interval_ms: u64,
    /// Upper bound on a single source call.
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    /// How long a consumer waits on an empty queue before re-checking shutdown.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// How long a producer waits on a full queue before dropping the item.
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,
    /// Grace period for workers to exit after shutdown is signalled.
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,

    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,
    #[serde(default = "default_max_snippets_per_run")]
    pub max_snippets_per_run: usize,
    #[serde(default = "default_max_results_per_source")]
    pub max_results_per_source: usize,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_source_per_minute: u32,

    #[serde(default = "default_queue_capacity")]
    pub fetch_queue_capacity: usize,
    #[serde(default = "default_queue_capacity")]
    pub accept_queue_capacity: usize,

    /// Accepted content length range in bytes, inclusive.
    #[serde(default = "default_min_content_len")]
    pub min_content_len: usize,
    #[serde(default = "default_max_content_len")]
    pub max_content_len: usize,

    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,
    #[serde(default = "default_auto_save_interval_secs")]
    pub auto_save_interval_secs: u64,
    /// Snapshot target for periodic autosave; autosave is off when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_save_path: Option<PathBuf>,

    #[serde(default)]
    pub dedup_mode: DedupMode,
    #[serde(default)]
    pub validation_failure_policy: ValidationFailurePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetcher_workers: default_fetcher_workers(),
            validator_workers: default_validator_workers(),
            integrator_workers: default_integrator_workers(),
            fetch_interval_ms: default_fetch_interval_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
            join_timeout_ms: default_join_timeout_ms(),
            quality_threshold: default_quality_threshold(),
            max_snippets_per_run: default_max_snippets_per_run(),
            max_results_per_source: default_max_results_per_source(),
            rate_limit_per_source_per_minute: default_rate_limit(),
            fetch_queue_capacity: default_queue_capacity(),
            accept_queue_capacity: default_queue_capacity(),
            min_content_len: default_min_content_len(),
            max_content_len: default_max_content_len(),
            status_interval_secs: default_status_interval_secs(),
            auto_save_interval_secs: default_auto_save_interval_secs(),
            auto_save_path: None,
            dedup_mode: DedupMode::default(),
            validation_failure_policy: ValidationFailurePolicy::default(),
        }
    }
}

fn default_fetcher_workers() -> usize {
    2
}
fn default_validator_workers() -> usize {
    4
}
fn default_integrator_workers() -> usize {
    2
}
fn default_fetch_interval_ms() -> u64 {
    2_000
}
fn default_fetch_timeout_ms() -> u64 {
    5_000
}
fn default_poll_timeout_ms() -> u64 {
    1_000
}
fn default_enqueue_timeout_ms() -> u64 {
    2_000
}
fn default_join_timeout_ms() -> u64 {
    5_000
}
fn default_quality_threshold() -> f64 {
    2.5
}
fn default_max_snippets_per_run() -> usize {
    1_000
}
fn default_max_results_per_source() -> usize {
    10
}
fn default_rate_limit() -> u32 {
    30
}
fn default_queue_capacity() -> usize {
    100
}
fn default_min_content_len() -> usize {
    20
}
fn default_max_content_len() -> usize {
    10_000
}
fn default_status_interval_secs() -> u64 {
    10
}
fn default_auto_save_interval_secs() -> u64 {
    300
}

impl PipelineConfig {
    pub fn fetch_interval(&self) -> Duration {
        Duration::from_millis(self.fetch_interval_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs.max(1))
    }

    pub fn auto_save_interval(&self) -> Duration {
        Duration::from_secs(self.auto_save_interval_secs.max(1))
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("fetcher_workers", self.fetcher_workers),
            ("validator_workers", self.validator_workers),
            ("integrator_workers", self.integrator_workers),
            ("fetch_queue_capacity", self.fetch_queue_capacity),
            ("accept_queue_capacity", self.accept_queue_capacity),
            ("max_results_per_source", self.max_results_per_source),
            ("max_snippets_per_run", self.max_snippets_per_run),
        ] {
            if value == 0 {
                return Err(CuratorError::config(format!("{name} must be at least 1")));
            }
        }

        if !(0.0..=10.0).contains(&self.quality_threshold) {
            return Err(CuratorError::config(format!(
                "quality_threshold {} is outside [0, 10]",
                self.quality_threshold
            )));
        }

        if self.min_content_len > self.max_content_len {
            return Err(CuratorError::config(format!(
                "min_content_len {} exceeds max_content_len {}",
                self.min_content_len, self.max_content_len
            )));
        }

        if self.poll_timeout_ms == 0 {
            return Err(CuratorError::config("poll_timeout_ms must be positive"));
        }

        Ok(())
    }
}

/// Partial update for [`PipelineConfig`]; unset fields keep their value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigPatch {
    pub fetcher_workers: Option<usize>,
    pub validator_workers: Option<usize>,
    pub integrator_workers: Option<usize>,
    pub fetch_interval_ms: Option<u64>,
    pub fetch_timeout_ms: Option<u64>,
    pub poll_timeout_ms: Option<u64>,
    pub enqueue_timeout_ms: Option<u64>,
    pub join_timeout_ms: Option<u64>,
    pub quality_threshold: Option<f64>,
    pub max_snippets_per_run: Option<usize>,
    pub max_results_per_source: Option<usize>,
    pub rate_limit_per_source_per_minute: Option<u32>,
    pub fetch_queue_capacity: Option<usize>,
    pub accept_queue_capacity: Option<usize>,
    pub min_content_len: Option<usize>,
    pub max_content_len: Option<usize>,
    pub status_interval_secs: Option<u64>,
    pub auto_save_interval_secs: Option<u64>,
    pub auto_save_path: Option<PathBuf>,
    pub dedup_mode: Option<DedupMode>,
    pub validation_failure_policy: Option<ValidationFailurePolicy>,
}

impl ConfigPatch {
    /// Produce the patched config, validated. `base` is left untouched on error.
    pub fn apply(&self, base: &PipelineConfig) -> Result<PipelineConfig> {
        let mut next = base.clone();

        macro_rules! patch {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = &self.$field {
                    next.$field = value.clone();
                })*
            };
        }

        patch!(
            fetcher_workers,
            validator_workers,
            integrator_workers,
            fetch_interval_ms,
            fetch_timeout_ms,
            poll_timeout_ms,
            enqueue_timeout_ms,
            join_timeout_ms,
            quality_threshold,
            max_snippets_per_run,
            max_results_per_source,
            rate_limit_per_source_per_minute,
            fetch_queue_capacity,
            accept_queue_capacity,
            min_content_len,
            max_content_len,
            status_interval_secs,
            auto_save_interval_secs,
            dedup_mode,
            validation_failure_policy,
        );
        if let Some(path) = &self.auto_save_path {
            next.auto_save_path = Some(path.clone());
        }

        next.validate()?;
        Ok(next)
    }
}

/// `[storage]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// libSQL database used as the record sink. In-memory sink when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,

    /// Snapshot file loaded on start and written on exit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<String>,
}

/// Transport used by a configured source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceEntryKind {
    HttpJson,
    Html,
}

/// `[[sources]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntry {
    /// Unique name; also the rate-limit key.
    pub name: String,
    pub kind: SourceEntryKind,
    /// Endpoint queried with `q`, `language` and `limit` parameters.
    pub base_url: String,
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.curator/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| CuratorError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.curator/curator.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| CuratorError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content)
        .map_err(|e| CuratorError::config(format!("failed to parse {}: {e}", path.display())))?;
    config.pipeline.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| CuratorError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| CuratorError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| CuratorError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
