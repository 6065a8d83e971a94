//! Web Search Service
//!
//! This module provides the search port used to ground summaries in current
//! patient-facing material. Results are plain text snippets in ranked order.

use crate::error::PortError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, warn};

const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";
const MAX_RESULTS: usize = 5;

/// Defines the contract for any service that can search the web.
///
/// This abstraction allows the system to swap between a hosted search API and an
/// offline stand-in while keeping the stage handlers unchanged.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchService: Send + Sync {
    /// Runs a query and returns snippet texts, best match first.
    async fn search(&self, query: &str) -> Result<Vec<String>, PortError>;
}

/// An implementation of `SearchService` backed by the Tavily search API.
pub struct TavilySearchService {
    http: reqwest::Client,
    api_key: String,
}

#[derive(Serialize)]
struct TavilyRequest<'a> {
    query: &'a str,
    max_results: usize,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Deserialize)]
struct TavilyResult {
    #[serde(default)]
    content: String,
}

impl TavilySearchService {
    /// Creates a new Tavily-backed search service.
    ///
    /// # Arguments
    ///
    /// * `api_key` - The Tavily API key.
    /// * `timeout` - Optional per-request deadline.
    pub fn new(api_key: String, timeout: Option<Duration>) -> Result<Self, PortError> {
        let mut builder = reqwest::Client::builder();
        if let Some(limit) = timeout {
            builder = builder.timeout(limit);
        }
        let http = builder
            .build()
            .map_err(|e| PortError::network(e.to_string()))?;
        Ok(Self { http, api_key })
    }
}

#[async_trait]
impl SearchService for TavilySearchService {
    async fn search(&self, query: &str) -> Result<Vec<String>, PortError> {
        let response = self
            .http
            .post(TAVILY_ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&TavilyRequest {
                query,
                max_results: MAX_RESULTS,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PortError::new(crate::error::PortErrorKind::Timeout, e.to_string())
                } else {
                    PortError::network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PortError::provider(format!("search returned HTTP {status}")));
        }

        let body: TavilyResponse = response
            .json()
            .await
            .map_err(|e| PortError::provider(e.to_string()))?;

        let snippets: Vec<String> = body
            .results
            .into_iter()
            .map(|result| result.content)
            .filter(|content| !content.trim().is_empty())
            .take(MAX_RESULTS)
            .collect();

        info!(query = %query, results = snippets.len(), "Search completed");
        Ok(snippets)
    }
}

/// A fixed-answer `SearchService` for offline runs and tests.
///
/// Every query returns the same snippets; queries are recorded in order.
#[derive(Default)]
pub struct CannedSearchService {
    snippets: Vec<String>,
    queries: Mutex<Vec<String>>,
}

impl CannedSearchService {
    pub fn new(snippets: Vec<String>) -> Self {
        Self {
            snippets,
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Returns every query received so far, oldest first.
    pub fn queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .map(|queries| queries.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SearchService for CannedSearchService {
    async fn search(&self, query: &str) -> Result<Vec<String>, PortError> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(query.to_string());
        }
        if self.snippets.is_empty() {
            warn!(query = %query, "Canned search has no snippets configured");
        }
        Ok(self.snippets.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_canned_search_records_queries() {
        let search = CannedSearchService::new(vec!["first".into(), "second".into()]);

        let snippets = search.search("asthma patient information").await.unwrap();
        assert_eq!(snippets, vec!["first".to_string(), "second".to_string()]);
        assert_eq!(search.queries(), vec!["asthma patient information".to_string()]);
    }

    #[test]
    fn test_tavily_response_tolerates_missing_fields() {
        let body: TavilyResponse =
            serde_json::from_str(r#"{"results":[{"title":"t","content":"c"},{"title":"x"}]}"#)
                .unwrap();
        assert_eq!(body.results.len(), 2);
        assert_eq!(body.results[0].content, "c");
        assert!(body.results[1].content.is_empty());

        let empty: TavilyResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.results.is_empty());
    }
}
