//! Fetch collaborators for the Curator pipeline.
//!
//! Each configured `[[sources]]` entry becomes one [`Source`] implementation:
//! - [`HttpJsonSource`]: a JSON search endpoint returning snippet objects
//! - [`HtmlCodeSource`]: an HTML results page whose `<pre>` blocks are snippets

mod html;
mod http_json;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::info;
use url::Url;

use curator_shared::{CuratorError, Result, Source, SourceEntry, SourceEntryKind};

pub use html::HtmlCodeSource;
pub use http_json::HttpJsonSource;

/// User-Agent string for source requests.
const USER_AGENT: &str = concat!("Curator/", env!("CARGO_PKG_VERSION"));

/// Build the HTTP client shared by a source.
fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(timeout)
        .build()
        .map_err(|e| CuratorError::Network(format!("failed to build HTTP client: {e}")))
}

fn parse_base_url(name: &str, base_url: &str) -> Result<Url> {
    let url = Url::parse(base_url)
        .map_err(|e| CuratorError::config(format!("source '{name}': invalid base_url: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(CuratorError::config(format!(
            "source '{name}': unsupported scheme '{other}'"
        ))),
    }
}

/// Instantiate every configured source. Names must be unique, since they
/// key the rate limiter and the per-source metrics.
pub fn build_sources(
    entries: &[SourceEntry],
    request_timeout: Duration,
) -> Result<Vec<Arc<dyn Source>>> {
    let mut names = HashSet::new();
    let mut sources: Vec<Arc<dyn Source>> = Vec::with_capacity(entries.len());

    for entry in entries {
        if !names.insert(entry.name.as_str()) {
            return Err(CuratorError::config(format!(
                "duplicate source name '{}'",
                entry.name
            )));
        }

        let source: Arc<dyn Source> = match entry.kind {
            SourceEntryKind::HttpJson => Arc::new(HttpJsonSource::new(
                &entry.name,
                &entry.base_url,
                request_timeout,
            )?),
            SourceEntryKind::Html => Arc::new(HtmlCodeSource::new(
                &entry.name,
                &entry.base_url,
                request_timeout,
            )?),
        };
        info!(name = %entry.name, kind = ?entry.kind, base_url = %entry.base_url, "source registered");
        sources.push(source);
    }

    Ok(sources)
}
