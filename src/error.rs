use thiserror::Error;

/// Failure taxonomy for one enrichment run. Every variant maps to a stable
/// machine code plus the HTTP status the embedding API should surface.
#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("invalid enrichment target: {0}")]
    InvalidTarget(String),

    #[error("search capability rate limited")]
    RateLimited { status: Option<u16> },

    #[error("search request failed: {0}")]
    SearchFailed(String),

    #[error("extraction failed schema validation: {0}")]
    SchemaValidation(String),

    #[error("run cancelled{}", .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    RunCancelled { reason: Option<String> },

    #[error("internal error: {0}")]
    Internal(String),
}

impl EnrichError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidTarget(_) => "INVALID_TARGET",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::SearchFailed(_) => "SEARCH_FAILED",
            Self::SchemaValidation(_) => "SCHEMA_VALIDATION_FAILED",
            Self::RunCancelled { .. } => "RUN_CANCELLED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            Self::InvalidTarget(_) => 400,
            Self::RateLimited { status } => status.unwrap_or(503),
            Self::SearchFailed(_) => 502,
            Self::SchemaValidation(_) => 422,
            Self::RunCancelled { .. } => 409,
            Self::Internal(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_statuses() {
        assert_eq!(EnrichError::InvalidTarget("x".into()).status(), 400);
        assert_eq!(
            EnrichError::RateLimited { status: Some(429) }.status(),
            429
        );
        assert_eq!(EnrichError::RateLimited { status: None }.status(), 503);
        assert_eq!(EnrichError::SearchFailed("boom".into()).status(), 502);
        assert_eq!(EnrichError::RunCancelled { reason: None }.status(), 409);
        assert_eq!(
            EnrichError::RunCancelled { reason: None }.code(),
            "RUN_CANCELLED"
        );
    }

    #[test]
    fn cancelled_message_carries_reason() {
        let err = EnrichError::RunCancelled {
            reason: Some("operator request".into()),
        };
        assert!(err.to_string().contains("operator request"));
    }
}
