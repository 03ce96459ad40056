mod catalog;
mod config;
mod error;
mod extraction;
mod http;
mod limiter;
mod llm;
mod metrics;
mod models;
mod notify;
mod orchestrator;
mod prompts;
mod registry;
mod schema;
mod search;
mod store;
mod telemetry;

pub use catalog::{CatalogShortcut, resolve_catalog_match};
pub use config::EnrichConfig;
pub use error::EnrichError;
pub use extraction::{ExtractionLoop, LoopBudgets, LoopResult, TOO_MANY_SEARCH_REQUESTS};
pub use limiter::RateLimitedInvoker;
pub use llm::{
    GatewayClient, GatewayConfig, ModelClient, ModelError, ModelMessage, decode_model_json,
};
pub use models::{
    CancelRequest, CatalogCandidate, EnrichOptions, EnrichTarget, EnrichmentPayload,
    SearchContext, Source,
};
pub use notify::{Notifier, NotifyError, WebhookNotifier};
pub use orchestrator::Enricher;
pub use prompts::PromptSet;
pub use registry::{
    CancelDetails, CancellationRegistry, CancellationStatus, RunHandle, RunOutcome,
    RunOutcomeKind, RunToken,
};
pub use schema::{SchemaError, ValidatedExtraction, coerce_localized_number, validate_extraction};
pub use search::{
    ContextSet, SearchError, SearchProvider, SearchResponse, WebSearchClient, WebSearchConfig,
    collect_search_contexts,
};
pub use store::{OutcomeStore, RestOutcomeStore, StoreError};
pub use telemetry::init_tracing;
