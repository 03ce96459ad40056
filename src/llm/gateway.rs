use crate::http::build_client;
use crate::llm::{ModelClient, ModelError, ModelMessage};
use async_trait::async_trait;
use eyre::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub gateway_url: String,
    pub api_key: Option<String>,
    pub model: Option<String>,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self {
            gateway_url: std::env::var("MODEL_GATEWAY_URL")
                .unwrap_or_else(|_| "http://localhost:3000".into()),
            api_key: std::env::var("MODEL_GATEWAY_API_KEY").ok(),
            model: std::env::var("MODEL_GATEWAY_MODEL").ok(),
        }
    }
}

/// Inference-gateway backed model client. The gateway answers with a list of
/// content blocks; only the text blocks matter here.
pub struct GatewayClient {
    http: Client,
    config: GatewayConfig,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            http: build_client(),
            config,
        }
    }

    async fn chat(&self, messages: &[ModelMessage]) -> Result<String, ModelError> {
        let gateway = self.config.gateway_url.trim();
        if gateway.is_empty() {
            return Err(ModelError::MissingGateway);
        }

        let body = ChatRequest {
            model: self.config.model.clone(),
            input: ChatInput {
                messages: messages.to_vec(),
            },
        };

        let mut request = self.http.post(format!("{gateway}/inference")).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| ModelError::Http(err.to_string()))?;

        if !response.status().is_success() {
            return Err(ModelError::Http(format!("HTTP {}", response.status())));
        }

        let payload: GatewayResponse = response
            .json()
            .await
            .map_err(|err| ModelError::InvalidResponse(err.to_string()))?;

        let text = payload
            .content
            .into_iter()
            .filter(|item| item.r#type == "text")
            .map(|item| item.text)
            .collect::<Vec<_>>()
            .join("\n");
        if text.is_empty() {
            return Err(ModelError::InvalidResponse("missing text".into()));
        }
        Ok(text)
    }
}

#[async_trait]
impl ModelClient for GatewayClient {
    async fn invoke(&self, messages: &[ModelMessage]) -> Result<String, ModelError> {
        self.chat(messages).await
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    input: ChatInput,
}

#[derive(Debug, Serialize)]
struct ChatInput {
    messages: Vec<ModelMessage>,
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    content: Vec<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    r#type: String,
    text: String,
}
