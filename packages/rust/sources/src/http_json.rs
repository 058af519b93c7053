//! JSON search API source.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use curator_shared::{Candidate, CuratorError, Result, Source, SourceKind};

use crate::{http_client, parse_base_url};

/// Queries `GET {base}?q=..&language=..&limit=..`.
///
/// The response is either a JSON array of snippet objects or an object with
/// an `items` array. Each snippet carries `content` (or `code`) and may carry
/// `url`, `title` and a numeric `score`.
pub struct HttpJsonSource {
    name: String,
    base_url: Url,
    client: Client,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Payload {
    List(Vec<Item>),
    Wrapped { items: Vec<Item> },
}

#[derive(Debug, Deserialize)]
struct Item {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    score: Option<f64>,
}

impl HttpJsonSource {
    pub fn new(name: &str, base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            base_url: parse_base_url(name, base_url)?,
            client: http_client(timeout)?,
        })
    }

    fn request_url(&self, query: &str, language: &str, max_results: usize) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("language", language)
            .append_pair("limit", &max_results.to_string());
        url
    }

    fn parse_candidates(&self, body: &str, language: &str, max_results: usize) -> Result<Vec<Candidate>> {
        let payload: Payload = serde_json::from_str(body)
            .map_err(|e| CuratorError::parse(format!("{}: invalid JSON response: {e}", self.name)))?;
        let items = match payload {
            Payload::List(items) | Payload::Wrapped { items } => items,
        };

        Ok(items
            .into_iter()
            .filter_map(|item| {
                let content = item.content.or(item.code)?;
                if content.trim().is_empty() {
                    return None;
                }
                let mut candidate = Candidate::new(content, &self.name, SourceKind::Api, language);
                candidate.url = item.url;
                candidate.title = item.title;
                candidate.external_score = item
                    .score
                    .filter(|s| s.is_finite())
                    .map(|s| s.round() as i64);
                Some(candidate)
            })
            .take(max_results)
            .collect())
    }
}

#[async_trait]
impl Source for HttpJsonSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Api
    }

    #[instrument(skip_all, fields(source = %self.name, query = %query, language = %language))]
    async fn fetch(&self, query: &str, language: &str, max_results: usize) -> Result<Vec<Candidate>> {
        let url = self.request_url(query, language, max_results);
        debug!(%url, "querying JSON source");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| CuratorError::Network(format!("{}: {e}", self.name)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CuratorError::Network(format!("{}: HTTP {status}", self.name)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| CuratorError::Network(format!("{}: body read failed: {e}", self.name)))?;

        let candidates = self.parse_candidates(&body, language, max_results)?;
        debug!(count = candidates.len(), "JSON source returned candidates");
        Ok(candidates)
    }
}
