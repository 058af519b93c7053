//! Collaborator interfaces consumed by the pipeline.
//!
//! The pipeline owns orchestration only; fetching, judging, and persisting
//! snippets is delegated to implementations of these traits. All of them
//! are called concurrently from several workers and must be `Send + Sync`.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Candidate, Complexity, Record, SourceKind};

/// An external snippet source.
#[async_trait]
pub trait Source: Send + Sync {
    /// Unique source name, used as the rate-limit key and in metrics.
    fn name(&self) -> &str;

    fn kind(&self) -> SourceKind;

    /// Fetch up to `max_results` candidates for `query` in `language`.
    ///
    /// Errors are caught per call by the fetcher and never abort a task.
    async fn fetch(&self, query: &str, language: &str, max_results: usize)
    -> Result<Vec<Candidate>>;
}

/// Decides whether snippet text is syntactically plausible for a language.
pub trait SyntaxValidator: Send + Sync {
    /// `Err` means "could not judge"; the pipeline's failure policy decides
    /// whether such candidates are kept.
    fn is_syntax_valid(&self, content: &str, language: &str) -> Result<bool>;
}

/// Scores candidates and extracts descriptive features.
pub trait QualityScorer: Send + Sync {
    /// Quality in `[0, 10]`. Out-of-range values are clamped by the caller.
    fn score(&self, candidate: &Candidate) -> f64;

    fn complexity(&self, content: &str) -> Complexity;

    fn extract_patterns(&self, candidate: &Candidate) -> Vec<String>;
}

/// Keyed destination for integrated records.
///
/// The pipeline serializes calls to `put`, so implementations need not be
/// internally synchronized beyond `Send + Sync`.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn put(&self, key: &str, record: &Record) -> Result<()>;
}
