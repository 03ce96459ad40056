use crate::http::build_client;
use crate::models::EnrichmentPayload;
use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Request(String),
}

/// Fire-and-forget persistence for run outcomes. Failures are logged by the
/// orchestrator and never affect the run's own verdict.
#[async_trait]
pub trait OutcomeStore: Send + Sync {
    async fn save_outcome(&self, item_id: &str, payload: &EnrichmentPayload)
    -> Result<(), StoreError>;
    async fn mark_notified_success(&self, item_id: &str) -> Result<(), StoreError>;
    async fn mark_notified_failure(&self, item_id: &str) -> Result<(), StoreError>;
}

/// REST-backed store writing into the warehouse service.
#[derive(Debug, Clone)]
pub struct RestOutcomeStore {
    base_url: String,
    service_key: String,
    http: Client,
}

impl RestOutcomeStore {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("WAREHOUSE_API_URL").ok()?;
        let service_key = std::env::var("WAREHOUSE_SERVICE_KEY").ok()?;
        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
            http: build_client(),
        })
    }

    async fn post_json(&self, url: String, body: serde_json::Value) -> Result<(), StoreError> {
        let response = self
            .http
            .post(url)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .json(&body)
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(StoreError::Request(format!("HTTP {}", response.status())));
        }
        Ok(())
    }
}

#[async_trait]
impl OutcomeStore for RestOutcomeStore {
    async fn save_outcome(
        &self,
        item_id: &str,
        payload: &EnrichmentPayload,
    ) -> Result<(), StoreError> {
        let url = format!("{}/items/{}/enrichment", self.base_url, item_id);
        let body = serde_json::to_value(payload)
            .map_err(|err| StoreError::Request(err.to_string()))?;
        self.post_json(url, body).await
    }

    async fn mark_notified_success(&self, item_id: &str) -> Result<(), StoreError> {
        let url = format!("{}/items/{}/notification", self.base_url, item_id);
        self.post_json(url, serde_json::json!({"state": "notified"}))
            .await
    }

    async fn mark_notified_failure(&self, item_id: &str) -> Result<(), StoreError> {
        let url = format!("{}/items/{}/notification", self.base_url, item_id);
        self.post_json(url, serde_json::json!({"state": "notify_failed"}))
            .await
    }
}
