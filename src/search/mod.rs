mod aggregate;
mod websearch;

pub use aggregate::{ContextSet, collect_search_contexts, run_search};
pub use websearch::{WebSearchClient, WebSearchConfig};

use crate::models::Source;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search capability rate limited")]
    RateLimited { status: Option<u16> },
    #[error("search request failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub text: String,
    pub sources: Vec<Source>,
}

/// Injected web-search capability.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: u32) -> Result<SearchResponse, SearchError>;
}
