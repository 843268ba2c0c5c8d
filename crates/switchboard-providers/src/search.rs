//! Web-search providers.

use std::time::Duration;

use async_trait::async_trait;

use crate::http::{classify_status, classify_transport};
use crate::types::{FailureKind, HealthReport, ProviderResponse, UsageUnits};

#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub query: String,
    pub max_results: usize,
    pub timeout: Duration,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            max_results: 5,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, query: &SearchQuery) -> ProviderResponse<Vec<SearchHit>>;

    async fn ping(&self) -> Result<(), String> {
        Ok(())
    }

    async fn health_check(&self) -> HealthReport {
        let start = std::time::Instant::now();
        match self.ping().await {
            Ok(()) => HealthReport::healthy(start.elapsed().as_millis() as u64),
            Err(detail) => HealthReport::unavailable(detail),
        }
    }
}

async fn fetch_json(
    name: &str,
    builder: reqwest::RequestBuilder,
) -> Result<serde_json::Value, ProviderResponse<Vec<SearchHit>>> {
    let response = match builder.send().await {
        Ok(r) => r,
        Err(e) => {
            return Err(ProviderResponse::fail(
                name,
                classify_transport(&e),
                e.to_string(),
            ))
        }
    };
    if !response.status().is_success() {
        let kind = classify_status(response.status());
        let detail = response.text().await.unwrap_or_default();
        return Err(ProviderResponse::fail(name, kind, detail));
    }
    response.json().await.map_err(|e| {
        ProviderResponse::fail(name, FailureKind::UpstreamError, e.to_string())
    })
}

// ---------------------------------------------------------------------------
// Brave Search
// ---------------------------------------------------------------------------

pub struct BraveSearch {
    client: reqwest::Client,
    api_key: String,
}

impl BraveSearch {
    pub fn new(client: reqwest::Client, api_key: String) -> Self {
        Self { client, api_key }
    }
}

#[async_trait]
impl SearchProvider for BraveSearch {
    fn name(&self) -> &str {
        "brave"
    }

    async fn execute(&self, query: &SearchQuery) -> ProviderResponse<Vec<SearchHit>> {
        let builder = self
            .client
            .get("https://api.search.brave.com/res/v1/web/search")
            .header("X-Subscription-Token", &self.api_key)
            .query(&[
                ("q", query.query.clone()),
                ("count", query.max_results.to_string()),
            ])
            .timeout(query.timeout);

        let value = match fetch_json(self.name(), builder).await {
            Ok(v) => v,
            Err(fail) => return fail,
        };

        let hits = value["web"]["results"]
            .as_array()
            .map(|results| {
                results
                    .iter()
                    .take(query.max_results)
                    .map(|r| SearchHit {
                        title: r["title"].as_str().unwrap_or_default().to_string(),
                        url: r["url"].as_str().unwrap_or_default().to_string(),
                        snippet: r["description"].as_str().unwrap_or_default().to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        ProviderResponse::ok(
            self.name(),
            hits,
            Some(UsageUnits {
                prompt_units: 1,
                completion_units: 0,
            }),
        )
    }
}

// ---------------------------------------------------------------------------
// SerpAPI (Google)
// ---------------------------------------------------------------------------

pub struct SerpApiSearch {
    client: reqwest::Client,
    api_key: String,
}

impl SerpApiSearch {
    pub fn new(client: reqwest::Client, api_key: String) -> Self {
        Self { client, api_key }
    }
}

#[async_trait]
impl SearchProvider for SerpApiSearch {
    fn name(&self) -> &str {
        "google"
    }

    async fn execute(&self, query: &SearchQuery) -> ProviderResponse<Vec<SearchHit>> {
        let builder = self
            .client
            .get("https://serpapi.com/search")
            .query(&[
                ("engine", "google".to_string()),
                ("q", query.query.clone()),
                ("num", query.max_results.to_string()),
                ("api_key", self.api_key.clone()),
            ])
            .timeout(query.timeout);

        let value = match fetch_json(self.name(), builder).await {
            Ok(v) => v,
            Err(fail) => return fail,
        };

        let hits = value["organic_results"]
            .as_array()
            .map(|results| {
                results
                    .iter()
                    .take(query.max_results)
                    .map(|r| SearchHit {
                        title: r["title"].as_str().unwrap_or_default().to_string(),
                        url: r["link"].as_str().unwrap_or_default().to_string(),
                        snippet: r["snippet"].as_str().unwrap_or_default().to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        ProviderResponse::ok(
            self.name(),
            hits,
            Some(UsageUnits {
                prompt_units: 1,
                completion_units: 0,
            }),
        )
    }
}
