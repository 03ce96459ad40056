use crate::http::build_client;
use crate::models::Source;
use crate::search::{SearchError, SearchProvider, SearchResponse};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use urlencoding::encode;

#[derive(Debug, Clone)]
pub struct WebSearchConfig {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl WebSearchConfig {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("WEBSEARCH_URL").ok()?;
        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: std::env::var("WEBSEARCH_API_KEY").ok(),
        })
    }
}

/// HTTP web-search adapter. A 429 from the capability surfaces as
/// `SearchError::RateLimited` with the upstream status attached.
#[derive(Debug, Clone)]
pub struct WebSearchClient {
    config: WebSearchConfig,
    http: Client,
}

impl WebSearchClient {
    pub fn new(config: WebSearchConfig) -> Self {
        Self {
            config,
            http: build_client(),
        }
    }
}

#[async_trait]
impl SearchProvider for WebSearchClient {
    async fn search(&self, query: &str, max_results: u32) -> Result<SearchResponse, SearchError> {
        let url = format!(
            "{}/search?q={}&count={}",
            self.config.base_url,
            encode(query),
            max_results
        );
        let mut request = self.http.get(url);
        if let Some(key) = &self.config.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| SearchError::Failed(err.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(SearchError::RateLimited {
                status: Some(status.as_u16()),
            });
        }
        if !status.is_success() {
            return Err(SearchError::Failed(format!("HTTP {status}")));
        }

        let payload: WireResponse = response
            .json()
            .await
            .map_err(|err| SearchError::Failed(err.to_string()))?;

        let sources = payload
            .results
            .iter()
            .map(|hit| Source {
                title: hit.title.clone(),
                url: hit.url.clone(),
                // some engines send `content` instead of a description
                description: hit.description.clone().or_else(|| hit.content.clone()),
            })
            .collect();
        let text = payload.results.into_iter().fold(String::new(), |mut acc, hit| {
            if !acc.is_empty() {
                acc.push_str("\n\n");
            }
            acc.push_str(&hit.title);
            if let Some(snippet) = hit.description.or(hit.content) {
                acc.push('\n');
                acc.push_str(&snippet);
            }
            acc
        });

        Ok(SearchResponse { text, sources })
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    results: Vec<WireHit>,
}

#[derive(Debug, Clone, Deserialize)]
struct WireHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    content: Option<String>,
}
