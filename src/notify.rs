use crate::http::build_client;
use crate::models::EnrichmentPayload;
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use reqwest::Client;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Request(String),
    #[error("notification rejected: HTTP {0}")]
    Status(u16),
}

/// Downstream notification, dispatched at most once per run outcome. A
/// failure is recorded separately by the orchestrator; synchronous retries
/// belong to the external replay worker.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, payload: &EnrichmentPayload) -> Result<(), NotifyError>;
}

/// Webhook notifier with optional basic-auth credentials.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: String,
    auth_header: Option<String>,
    http: Client,
}

impl WebhookNotifier {
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("NOTIFY_WEBHOOK_URL").ok()?;
        let auth_header = match (
            std::env::var("NOTIFY_WEBHOOK_USER").ok(),
            std::env::var("NOTIFY_WEBHOOK_PASSWORD").ok(),
        ) {
            (Some(user), Some(password)) => {
                let credentials = BASE64.encode(format!("{user}:{password}"));
                Some(format!("Basic {credentials}"))
            }
            _ => None,
        };
        Some(Self {
            url,
            auth_header,
            http: build_client(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, payload: &EnrichmentPayload) -> Result<(), NotifyError> {
        let mut request = self.http.post(&self.url).json(payload);
        if let Some(auth) = &self.auth_header {
            request = request.header("Authorization", auth);
        }
        let response = request
            .send()
            .await
            .map_err(|err| NotifyError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}
