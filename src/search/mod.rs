//! Search API client
//!
//! Issues one search request per run and turns the response into an ordered
//! list of candidate image URLs. Failures are not retried here; a failed
//! search simply means the run finds nothing.

use crate::config::SearchApiConfig;
use crate::error::{Error, Result};
use serde_json::Value;

pub mod extract;

pub use extract::{extract_image_urls, find_orig_url};

const USER_AGENT: &str = concat!("pin-relay/", env!("CARGO_PKG_VERSION"));

/// Parameters of a single search request
///
/// Immutable once built; every field ends up in the outbound query string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchConfig {
    /// Search terms as typed by the user
    pub keywords: String,
    /// Number of results requested
    pub page_size: usize,
    /// Scroll cursor
    pub scroll: u32,
    /// Paging bookmark from a previous response (empty for the first page)
    pub bookmark: String,
}

impl SearchConfig {
    /// First-page search for `keywords` with the configured page size and scroll
    pub fn new(keywords: impl Into<String>, settings: &SearchApiConfig) -> Self {
        Self {
            keywords: keywords.into(),
            page_size: settings.page_size,
            scroll: settings.scroll,
            bookmark: String::new(),
        }
    }

    /// Continue from a bookmark returned by an earlier page
    pub fn with_bookmark(mut self, bookmark: impl Into<String>) -> Self {
        self.bookmark = bookmark.into();
        self
    }

    /// Value of the `source_url` parameter
    pub fn source_url(&self) -> String {
        format!("/search/pins/?q={}", urlencoding::encode(&self.keywords))
    }

    /// Value of the `data` parameter
    ///
    /// The upstream resource parses this as a literal, so the field order and
    /// spacing are fixed. Only the query and bookmark are escaped.
    pub fn data_payload(&self) -> String {
        format!(
            concat!(
                r#"{{"options":{{"page_size":{}, "scroll":{}, "query":{},"scope":"pins","#,
                r#""bookmarks":[{}],"field_set_key":"unauth_react","#,
                r#""no_fetch_context_on_resource":false}},"context":{{}}}}"#
            ),
            self.page_size,
            self.scroll,
            Value::String(self.keywords.clone()),
            Value::String(self.bookmark.clone()),
        )
    }
}

/// Search API client
#[derive(Clone, Debug)]
pub struct Fetcher {
    client: reqwest::Client,
    endpoint: String,
}

impl Fetcher {
    /// Build a client for the configured endpoint
    pub fn new(settings: &SearchApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self::with_client(client, settings.endpoint.clone()))
    }

    /// Use an existing HTTP client
    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    /// Run one search and return at most `page_size` candidate URLs, in result order
    pub async fn fetch(&self, search: &SearchConfig) -> Result<Vec<String>> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("source_url", search.source_url()),
                ("data", search.data_payload()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                status = status.as_u16(),
                body = %truncate_for_log(&body),
                query = %search.keywords,
                "Search API request failed"
            );
            return Err(Error::Api {
                status: status.as_u16(),
                url: self.endpoint.clone(),
            });
        }

        let bytes = response.bytes().await?;
        let body: Value = serde_json::from_slice(&bytes)?;

        let mut urls = extract_image_urls(&body);
        urls.truncate(search.page_size);

        tracing::debug!(
            query = %search.keywords,
            candidates = urls.len(),
            "Search returned candidate URLs"
        );

        Ok(urls)
    }
}

fn truncate_for_log(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
