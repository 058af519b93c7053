//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use curator_core::{Collaborators, MemorySink, MetricsSnapshot, Pipeline, Snapshot};
use curator_quality::{DelimiterSyntaxChecker, HeuristicScorer};
use curator_shared::{
    AppConfig, ConfigPatch, PipelineState, RunId, Sink, init_config, load_config,
    load_config_from,
};
use curator_storage::Storage;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Curator: fetch, validate and keep the best code snippets.
#[derive(Parser)]
#[command(
    name = "curator",
    version,
    about = "Fetch code snippets from configured sources and keep the ones worth keeping.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the pipeline until the task list is exhausted, the output cap is
    /// reached, the duration elapses, or Ctrl-C.
    Run {
        /// Config file (defaults to ~/.curator/curator.toml).
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// libSQL database to store records in. In-memory when unset.
        #[arg(long)]
        db: Option<PathBuf>,

        /// Snapshot loaded before the run and written after it.
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Maximum records to integrate in this run.
        #[arg(long)]
        max: Option<usize>,

        /// Stop after this many seconds.
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Print the highest-scoring records in a snapshot.
    Best {
        #[arg(long)]
        snapshot: PathBuf,

        /// Only records in this language.
        #[arg(short, long)]
        language: Option<String>,

        #[arg(short, long, default_value = "10")]
        top: usize,
    },

    /// Print the metrics stored in a snapshot as JSON.
    Metrics {
        #[arg(long)]
        snapshot: PathBuf,
    },

    /// List recorded runs in a database.
    Runs {
        #[arg(long)]
        db: PathBuf,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

const CRATES: [&str; 6] = [
    "curator",
    "curator_core",
    "curator_shared",
    "curator_sources",
    "curator_quality",
    "curator_storage",
];

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = CRATES
        .iter()
        .map(|krate| format!("{krate}={level}"))
        .collect::<Vec<_>>()
        .join(",");

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            config,
            db,
            snapshot,
            max,
            duration,
        } => {
            let opts = RunOptions {
                config,
                db,
                snapshot,
                max,
                duration: duration.map(Duration::from_secs),
            };
            cmd_run(opts).await
        }
        Command::Best {
            snapshot,
            language,
            top,
        } => cmd_best(&snapshot, language.as_deref(), top),
        Command::Metrics { snapshot } => cmd_metrics(&snapshot),
        Command::Runs { db } => cmd_runs(&db).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show { config } => cmd_config_show(config.as_deref()),
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

/// Offline pipeline used by the reporting commands.
fn offline_pipeline() -> Result<Pipeline> {
    let collaborators = Collaborators {
        sources: Vec::new(),
        syntax: Arc::new(DelimiterSyntaxChecker::new()),
        scorer: Arc::new(HeuristicScorer::new()),
        sink: Arc::new(MemorySink::new()),
    };
    Ok(Pipeline::new(Default::default(), Vec::new(), collaborators)?)
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

struct RunOptions {
    config: Option<PathBuf>,
    db: Option<PathBuf>,
    snapshot: Option<PathBuf>,
    max: Option<usize>,
    duration: Option<Duration>,
}

async fn cmd_run(opts: RunOptions) -> Result<()> {
    let mut config = resolve_config(opts.config.as_deref())?;
    if let Some(max) = opts.max {
        config.pipeline.max_snippets_per_run = max;
    }
    let db_path = opts
        .db
        .or_else(|| config.storage.database_path.as_ref().map(PathBuf::from));
    let snapshot_path = opts
        .snapshot
        .or_else(|| config.storage.snapshot_path.as_ref().map(PathBuf::from));

    if config.sources.is_empty() {
        return Err(eyre!(
            "no sources configured; add [[sources]] entries to your config (see `curator config init`)"
        ));
    }
    if config.tasks.is_empty() {
        return Err(eyre!("no tasks configured; add [[tasks]] entries to your config"));
    }

    let sources = curator_sources::build_sources(&config.sources, config.pipeline.fetch_timeout())?;

    let storage = match &db_path {
        Some(path) => Some(Arc::new(Storage::open(path).await?)),
        None => None,
    };
    let sink: Arc<dyn Sink> = match &storage {
        Some(storage) => storage.clone(),
        None => Arc::new(MemorySink::new()),
    };

    let pipeline = Pipeline::new(
        config.pipeline.clone(),
        config.tasks.clone(),
        Collaborators {
            sources,
            syntax: Arc::new(DelimiterSyntaxChecker::new()),
            scorer: Arc::new(HeuristicScorer::new()),
            sink,
        },
    )?;

    if let Some(path) = snapshot_path.as_deref().filter(|p| p.exists()) {
        pipeline
            .load_snapshot(path)
            .wrap_err_with(|| format!("loading snapshot {}", path.display()))?;
        // The snapshot carries its own config; an explicit cap still wins.
        if let Some(max) = opts.max {
            pipeline.update_config(&ConfigPatch {
                max_snippets_per_run: Some(max),
                ..Default::default()
            })?;
        }
    }

    let run_id = RunId::new();
    if let Some(storage) = &storage {
        storage.insert_run(&run_id).await?;
    }

    info!(
        %run_id,
        sources = config.sources.len(),
        tasks = config.tasks.len(),
        db = db_path.as_ref().map(|p| p.display().to_string()).unwrap_or_default(),
        "starting pipeline"
    );

    if !pipeline.start() {
        return Err(eyre!("pipeline refused to start (state: {})", pipeline.status()));
    }

    let spinner = spinner();
    let final_state = drive(&pipeline, &spinner, opts.duration).await;
    spinner.finish_and_clear();

    let metrics = pipeline.metrics();
    print_summary(&run_id, final_state, &metrics, pipeline.record_count());

    if let Some(path) = &snapshot_path {
        match pipeline.save_snapshot(path).await {
            Ok(()) => println!("  Snapshot: {}", path.display()),
            Err(e) => warn!(error = %e, path = %path.display(), "failed to save snapshot"),
        }
    }

    if let Some(storage) = &storage {
        let stats = serde_json::to_string(&metrics)?;
        storage
            .finish_run(&run_id, final_state.as_str(), &stats)
            .await?;
        println!("  Stored:   {} records in database", storage.count_records().await?);
    }
    println!();

    if final_state == PipelineState::Error {
        return Err(eyre!("pipeline ended in ERROR; see the log above"));
    }
    Ok(())
}

/// Wait for the run to settle, stopping it on Ctrl-C or when `limit` elapses.
async fn drive(pipeline: &Pipeline, spinner: &ProgressBar, limit: Option<Duration>) -> PipelineState {
    let deadline = async {
        match limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut tick = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            state = pipeline.wait_until_settled() => return state,
            _ = tokio::signal::ctrl_c() => {
                spinner.set_message("Stopping (Ctrl-C)...");
                info!("interrupt received, stopping");
                pipeline.stop().await;
                return pipeline.status();
            }
            _ = &mut deadline => {
                spinner.set_message("Stopping (time limit)...");
                info!("duration elapsed, stopping");
                pipeline.stop().await;
                return pipeline.status();
            }
            _ = tick.tick() => {
                let m = pipeline.metrics();
                let depths = pipeline.queue_depths();
                spinner.set_message(format!(
                    "fetched {} | validated {} | rejected {} | duplicates {} | integrated {} | queues {}/{}",
                    m.total_fetched,
                    m.total_validated,
                    m.total_rejected,
                    m.total_duplicates,
                    m.total_integrated,
                    depths.fetch,
                    depths.accept,
                ));
            }
        }
    }
}

fn spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.cyan} [{elapsed}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    spinner.set_style(style);
    spinner.set_message("Starting...");
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

fn print_summary(run_id: &RunId, state: PipelineState, m: &MetricsSnapshot, cached: usize) {
    println!();
    println!("  Run {run_id} finished: {state}");
    println!("  Fetched:    {}", m.total_fetched);
    println!("  Validated:  {}", m.total_validated);
    println!("  Rejected:   {}", m.total_rejected);
    println!("  Duplicates: {}", m.total_duplicates);
    println!("  Dropped:    {}", m.total_dropped);
    println!("  Integrated: {}", m.total_integrated);
    println!("  Errors:     {}", m.total_errors);
    println!("  Avg score:  {:.2} over {cached} cached records", m.average_quality);
}

// ---------------------------------------------------------------------------
// Reporting
// ---------------------------------------------------------------------------

fn cmd_best(snapshot: &Path, language: Option<&str>, top: usize) -> Result<()> {
    let pipeline = offline_pipeline()?;
    pipeline.load_snapshot(snapshot)?;

    let records = pipeline.best_records(language, top);
    if records.is_empty() {
        println!("No records.");
        return Ok(());
    }

    for (rank, record) in records.iter().enumerate() {
        let meta = &record.metadata;
        println!(
            "{:>3}. {:>5.2} {:<9} {:<10} {}",
            rank + 1,
            meta.quality_score,
            meta.quality_tier,
            meta.language,
            record.key
        );
        if let Some(url) = &meta.url {
            println!("       {url}");
        }
    }
    Ok(())
}

fn cmd_metrics(snapshot: &Path) -> Result<()> {
    let snapshot = Snapshot::read_from(snapshot)?;
    println!("{}", serde_json::to_string_pretty(&snapshot.metrics)?);
    Ok(())
}

async fn cmd_runs(db: &Path) -> Result<()> {
    let storage = Storage::open_readonly(db).await?;
    let runs = storage.list_runs().await?;
    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }
    for run in runs {
        let finished = run
            .finished_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{}  {}  {}  {}",
            run.id,
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            finished,
            run.final_state.as_deref().unwrap_or("RUNNING"),
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
