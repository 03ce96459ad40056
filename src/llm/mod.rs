mod decode;
mod gateway;

pub use decode::decode_model_json;
pub use gateway::{GatewayClient, GatewayConfig};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("missing gateway url")]
    MissingGateway,
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelMessage {
    pub role: String,
    pub content: String,
}

impl ModelMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Opaque string-producing model capability. Implementations flatten any
/// structured content blocks down to plain text.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn invoke(&self, messages: &[ModelMessage]) -> Result<String, ModelError>;
}
