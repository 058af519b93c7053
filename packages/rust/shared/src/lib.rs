//! Shared types, error model, configuration, and collaborator traits for Curator.
//!
//! This crate is the foundation depended on by all other Curator crates.
//! It provides:
//! - [`CuratorError`]: the unified error type
//! - Domain types ([`Task`], [`Candidate`], [`ScoredCandidate`], [`Record`], [`Fingerprint`])
//! - Configuration ([`AppConfig`], [`PipelineConfig`], [`ConfigPatch`], config loading)
//! - Collaborator traits ([`Source`], [`SyntaxValidator`], [`QualityScorer`], [`Sink`])

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ConfigPatch, DedupMode, PipelineConfig, SourceEntry, SourceEntryKind,
    StorageConfig, ValidationFailurePolicy, config_dir, config_file_path, init_config,
    load_config, load_config_from,
};
pub use error::{CuratorError, Result};
pub use traits::{QualityScorer, Sink, Source, SyntaxValidator};
pub use types::{
    Candidate, Complexity, Fingerprint, LogEntry, LogLevel, PipelineState, QualityTier, Record,
    RecordMetadata, RunId, ScoredCandidate, SourceKind, Task,
};
