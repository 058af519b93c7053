//! HTML results-page source: every `<pre>` block is one candidate.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use curator_shared::{Candidate, CuratorError, Result, Source, SourceKind};

use crate::{http_client, parse_base_url};

pub struct HtmlCodeSource {
    name: String,
    base_url: Url,
    client: Client,
}

impl HtmlCodeSource {
    pub fn new(name: &str, base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            base_url: parse_base_url(name, base_url)?,
            client: http_client(timeout)?,
        })
    }

    fn request_url(&self, query: &str, language: &str) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("language", language);
        url
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| CuratorError::parse(format!("selector '{css}': {e}")))
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>()
}

/// Page title: first non-empty `<h1>`, else `<title>`.
fn page_title(doc: &Html) -> Result<Option<String>> {
    for css in ["h1", "title"] {
        let sel = selector(css)?;
        let found = doc
            .select(&sel)
            .map(|el| element_text(el).trim().to_string())
            .find(|t| !t.is_empty());
        if found.is_some() {
            return Ok(found);
        }
    }
    Ok(None)
}

/// Text of each `<pre>` block, preferring its `<code>` child when present.
fn code_blocks(doc: &Html) -> Result<Vec<String>> {
    let pre = selector("pre")?;
    let code = selector("code")?;

    Ok(doc
        .select(&pre)
        .filter_map(|block| {
            let text = block
                .select(&code)
                .next()
                .map(element_text)
                .unwrap_or_else(|| element_text(block));
            let text = text.trim_matches('\n').to_string();
            (!text.trim().is_empty()).then_some(text)
        })
        .collect())
}

#[async_trait]
impl Source for HtmlCodeSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Html
    }

    #[instrument(skip_all, fields(source = %self.name, query = %query, language = %language))]
    async fn fetch(&self, query: &str, language: &str, max_results: usize) -> Result<Vec<Candidate>> {
        let url = self.request_url(query, language);
        debug!(%url, "fetching results page");

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
        let final_url = response.url().to_string();

        let body = response
            .text()
            .await
            .map_err(|e| CuratorError::Network(format!("{}: body read failed: {e}", self.name)))?;

        // `Html` is not `Send`; keep it out of any await point.
        let (title, blocks) = {
            let doc = Html::parse_document(&body);
            (page_title(&doc)?, code_blocks(&doc)?)
        };

        let candidates: Vec<Candidate> = blocks
            .into_iter()
            .take(max_results)
            .map(|content| {
                let mut candidate = Candidate::new(content, &self.name, SourceKind::Html, language);
                candidate.url = Some(final_url.clone());
                candidate.title = title.clone();
                candidate
            })
            .collect();

        debug!(count = candidates.len(), "extracted code blocks");
        Ok(candidates)
    }
}
