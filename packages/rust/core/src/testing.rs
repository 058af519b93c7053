//! Collaborator stubs shared by the unit tests in this crate.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use curator_shared::{
    Candidate, Complexity, CuratorError, PipelineConfig, QualityScorer, Record, Result, Sink,
    Source, SourceKind, SyntaxValidator,
};

use crate::pipeline::{Collaborators, Shared};
use crate::sink::MemorySink;

#[derive(Debug, Clone, Copy)]
pub enum StubSyntax {
    Valid,
    Invalid,
    Failing,
}

impl SyntaxValidator for StubSyntax {
    fn is_syntax_valid(&self, _content: &str, language: &str) -> Result<bool> {
        match self {
            Self::Valid => Ok(true),
            Self::Invalid => Ok(false),
            Self::Failing => Err(CuratorError::validation(format!(
                "no grammar for {language}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedScorer(pub f64);

impl QualityScorer for FixedScorer {
    fn score(&self, _candidate: &Candidate) -> f64 {
        self.0
    }

    fn complexity(&self, _content: &str) -> Complexity {
        Complexity::Simple
    }

    fn extract_patterns(&self, _candidate: &Candidate) -> Vec<String> {
        Vec::new()
    }
}

pub struct PanickingScorer;

impl QualityScorer for PanickingScorer {
    fn score(&self, _candidate: &Candidate) -> f64 {
        panic!("scorer blew up")
    }

    fn complexity(&self, _content: &str) -> Complexity {
        Complexity::Simple
    }

    fn extract_patterns(&self, _candidate: &Candidate) -> Vec<String> {
        Vec::new()
    }
}

/// Returns a fixed list of snippets per query.
pub struct ScriptedSource {
    name: String,
    by_query: HashMap<String, Vec<String>>,
}

impl ScriptedSource {
    pub fn new<'a>(
        name: &str,
        script: impl IntoIterator<Item = (&'a str, Vec<&'a str>)>,
    ) -> Self {
        Self {
            name: name.to_string(),
            by_query: script
                .into_iter()
                .map(|(q, items)| (q.to_string(), items.into_iter().map(String::from).collect()))
                .collect(),
        }
    }
}

#[async_trait]
impl Source for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Manual
    }

    async fn fetch(&self, query: &str, language: &str, max_results: usize) -> Result<Vec<Candidate>> {
        Ok(self
            .by_query
            .get(query)
            .into_iter()
            .flatten()
            .take(max_results)
            .map(|content| Candidate::new(content.as_str(), &self.name, SourceKind::Manual, language))
            .collect())
    }
}

/// Always returns `max_results` distinct snippets.
pub struct UnboundedSource {
    name: String,
    counter: AtomicU64,
}

impl UnboundedSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            counter: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Source for UnboundedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Api
    }

    async fn fetch(&self, _query: &str, language: &str, max_results: usize) -> Result<Vec<Candidate>> {
        Ok((0..max_results)
            .map(|_| {
                let n = self.counter.fetch_add(1, Ordering::Relaxed);
                Candidate::new(format!("fn generated_{n}() {{}}"), &self.name, SourceKind::Api, language)
            })
            .collect())
    }
}

pub struct FailingSource;

#[async_trait]
impl Source for FailingSource {
    fn name(&self) -> &str {
        "failing"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Api
    }

    async fn fetch(&self, _query: &str, _language: &str, _max_results: usize) -> Result<Vec<Candidate>> {
        Err(CuratorError::Network("connection refused".into()))
    }
}

/// Never answers; only a timeout or cancellation gets past it.
pub struct HangingSource;

#[async_trait]
impl Source for HangingSource {
    fn name(&self) -> &str {
        "hanging"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Html
    }

    async fn fetch(&self, _query: &str, _language: &str, _max_results: usize) -> Result<Vec<Candidate>> {
        std::future::pending().await
    }
}

pub struct FailingSink;

#[async_trait]
impl Sink for FailingSink {
    async fn put(&self, key: &str, _record: &Record) -> Result<()> {
        Err(CuratorError::Storage(format!("disk full writing {key}")))
    }
}

/// Memory sink whose writes take a fixed time.
pub struct SlowSink {
    delay: Duration,
    inner: MemorySink,
}

impl SlowSink {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            inner: MemorySink::new(),
        }
    }
}

#[async_trait]
impl Sink for SlowSink {
    async fn put(&self, key: &str, record: &Record) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.put(key, record).await
    }
}

pub fn single(source: impl Source + 'static) -> Vec<Arc<dyn Source>> {
    let source: Arc<dyn Source> = Arc::new(source);
    vec![source]
}

pub fn collaborators(
    sources: Vec<Arc<dyn Source>>,
    syntax: impl SyntaxValidator + 'static,
    scorer: impl QualityScorer + 'static,
    sink: Arc<dyn Sink>,
) -> Collaborators {
    Collaborators {
        sources,
        syntax: Arc::new(syntax),
        scorer: Arc::new(scorer),
        sink,
    }
}

pub fn shared_with(syntax: StubSyntax, scorer: FixedScorer) -> Shared {
    Shared::new(
        PipelineConfig::default(),
        Vec::new(),
        collaborators(Vec::new(), syntax, scorer, Arc::new(MemorySink::new())),
    )
}

pub fn shared_with_sink(sink: Arc<dyn Sink>) -> Shared {
    Shared::new(
        PipelineConfig::default(),
        Vec::new(),
        collaborators(Vec::new(), StubSyntax::Valid, FixedScorer(5.0), sink),
    )
}
