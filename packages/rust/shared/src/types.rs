//! Core domain types flowing through the curation pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one pipeline run (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Task / Candidate
// ---------------------------------------------------------------------------

/// One unit of fetch work: a search query in a given language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub query: String,
    pub language: String,
}

impl Task {
    pub fn new(query: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            language: language.into(),
        }
    }
}

/// The family of external source a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Structured JSON search API.
    Api,
    /// Code blocks scraped from an HTML page.
    Html,
    /// In-process or hand-fed source.
    Manual,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Html => "html",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw fetched snippet, not yet validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Snippet text.
    pub content: String,
    /// Name of the configured source that produced it.
    pub source: String,
    pub source_kind: SourceKind,
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Popularity signal reported by the source (votes, stars, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_score: Option<i64>,
}

impl Candidate {
    /// Build a candidate with no optional metadata.
    pub fn new(
        content: impl Into<String>,
        source: impl Into<String>,
        source_kind: SourceKind,
        language: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            source: source.into(),
            source_kind,
            language: language.into(),
            url: None,
            title: None,
            external_score: None,
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.content)
    }
}

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// Hex SHA-256 of snippet content, stable across processes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    pub fn of(content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Quality band derived from a `[0, 10]` score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityTier {
    Excellent,
    Good,
    Average,
    Poor,
    Rejected,
}

impl QualityTier {
    /// Fixed score bands: >=8, >=6, >=4, >=2, below.
    pub fn from_score(score: f64) -> Self {
        if score >= 8.0 {
            Self::Excellent
        } else if score >= 6.0 {
            Self::Good
        } else if score >= 4.0 {
            Self::Average
        } else if score >= 2.0 {
            Self::Poor
        } else {
            Self::Rejected
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excellent => "EXCELLENT",
            Self::Good => "GOOD",
            Self::Average => "AVERAGE",
            Self::Poor => "POOR",
            Self::Rejected => "REJECTED",
        }
    }
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "SIMPLE",
            Self::Moderate => "MODERATE",
            Self::Complex => "COMPLEX",
        }
    }
}

/// A candidate that passed validation and carries its quality assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub fingerprint: Fingerprint,
    pub quality_score: f64,
    pub quality_tier: QualityTier,
    pub complexity: Complexity,
    pub patterns: Vec<String>,
    pub validated: bool,
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// Everything known about a stored snippet besides its text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub source: String,
    pub source_kind: SourceKind,
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_score: Option<i64>,
    pub quality_score: f64,
    pub quality_tier: QualityTier,
    pub complexity: Complexity,
    #[serde(default)]
    pub patterns: Vec<String>,
    pub fingerprint: Fingerprint,
    pub integrated_at: DateTime<Utc>,
}

/// The unit persisted into a [`Sink`](crate::Sink).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub content: String,
    pub metadata: RecordMetadata,
}

impl Record {
    /// Promote a scored candidate into a record under `key`.
    pub fn from_scored(key: String, scored: ScoredCandidate) -> Self {
        let ScoredCandidate {
            candidate,
            fingerprint,
            quality_score,
            quality_tier,
            complexity,
            patterns,
            validated: _,
        } = scored;

        Self {
            key,
            content: candidate.content,
            metadata: RecordMetadata {
                source: candidate.source,
                source_kind: candidate.source_kind,
                language: candidate.language,
                url: candidate.url,
                title: candidate.title,
                external_score: candidate.external_score,
                quality_score,
                quality_tier,
                complexity,
                patterns,
                fingerprint,
                integrated_at: Utc::now(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle state owned by the pipeline supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Idle,
    Running,
    Paused,
    Stopped,
    Error,
}

impl PipelineState {
    /// Whether a run currently owns worker tasks.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Stopped => "STOPPED",
            Self::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// One line of the pipeline's in-memory activity log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}
