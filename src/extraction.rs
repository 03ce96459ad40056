use crate::error::EnrichError;
use crate::limiter::RateLimitedInvoker;
use crate::llm::{ModelClient, ModelMessage, decode_model_json};
use crate::metrics;
use crate::models::{SearchContext, Source};
use crate::prompts::PromptSet;
use crate::registry::RunToken;
use crate::schema::validate_extraction;
use crate::search::{ContextSet, SearchProvider, run_search};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

/// Supervisor verdict reported when the model keeps asking for more searches
/// past the round budget.
pub const TOO_MANY_SEARCH_REQUESTS: &str = "TOO_MANY_SEARCH_REQUESTS";

#[derive(Debug, Clone, Copy)]
pub struct LoopBudgets {
    pub max_attempts: u32,
    pub max_agent_searches_per_request: u32,
    pub max_search_rounds: u32,
}

/// Explicit loop accounting. Attempts and search rounds are independent
/// budgets: a search-only response never consumes an attempt.
#[derive(Debug, Default)]
struct LoopState {
    attempts_used: u32,
    search_rounds_used: u32,
    last_extraction: Option<Map<String, Value>>,
    last_supervisor_text: Option<String>,
}

#[derive(Debug)]
pub struct LoopResult {
    pub success: bool,
    pub supervisor: Option<String>,
    pub data: Option<Map<String, Value>>,
    pub contexts: Vec<SearchContext>,
    pub sources: Vec<Source>,
    pub attempts_used: u32,
    pub search_rounds_used: u32,
}

pub struct ExtractionLoop<'a> {
    pub model: &'a dyn ModelClient,
    pub search: &'a dyn SearchProvider,
    pub invoker: &'a RateLimitedInvoker,
    pub prompts: &'a PromptSet,
    pub budgets: LoopBudgets,
    pub numeric_fields: &'a [String],
    pub search_max_results: u32,
    pub token: Option<&'a RunToken>,
}

impl ExtractionLoop<'_> {
    /// Drives the extract → validate → supervise cycle until one of the
    /// termination conditions hits. Business outcomes (supervisor FAILs,
    /// exceeded search budget) return `Ok` with `success:false`;
    /// infrastructure failures and cancellation propagate as errors.
    pub async fn run(self, term: &str, mut contexts: ContextSet) -> Result<LoopResult, EnrichError> {
        let mut state = LoopState::default();

        loop {
            self.checkpoint()?;
            let extraction_input = PromptSet::render_extraction_input(
                term,
                &contexts.aggregated_text(),
                state.last_supervisor_text.as_deref(),
            );
            let raw = self
                .model
                .invoke(&[
                    ModelMessage::system(self.prompts.extraction.clone()),
                    ModelMessage::user(extraction_input),
                ])
                .await
                .map_err(|err| EnrichError::internal(format!("model invocation failed: {err}")))?;
            self.checkpoint()?;

            let value = decode_model_json(&raw).ok_or_else(|| {
                EnrichError::SchemaValidation("model response is not valid JSON".into())
            })?;
            let validated = validate_extraction(&value, self.numeric_fields)
                .map_err(|err| EnrichError::SchemaValidation(err.to_string()))?;
            metrics::loop_round(state.attempts_used, state.search_rounds_used);

            if !validated.search_queries.is_empty() {
                // Search request round: free of attempt cost. Fields riding
                // along are kept as the best-effort draft.
                if validated.has_data() {
                    state.last_extraction = Some(validated.fields.clone());
                }
                if state.search_rounds_used >= self.budgets.max_search_rounds {
                    warn!(
                        target = "argus.extraction",
                        rounds = state.search_rounds_used,
                        "search_round_budget_exhausted"
                    );
                    return Ok(self.finish(
                        false,
                        Some(TOO_MANY_SEARCH_REQUESTS.to_string()),
                        state,
                        contexts,
                    ));
                }

                let mut queries = validated.search_queries;
                let cap = self.budgets.max_agent_searches_per_request as usize;
                if queries.len() > cap {
                    debug!(
                        target = "argus.extraction",
                        requested = queries.len(),
                        cap = cap,
                        "agent_search_requests_truncated"
                    );
                    queries.truncate(cap);
                }
                for query in &queries {
                    self.checkpoint()?;
                    let context =
                        run_search(self.search, self.invoker, query, self.search_max_results)
                            .await?;
                    self.checkpoint()?;
                    contexts.push(context);
                }
                state.search_rounds_used += 1;
                continue;
            }

            if !validated.has_data() {
                return Err(EnrichError::SchemaValidation(
                    "extraction carried neither fields nor search requests".into(),
                ));
            }
            state.last_extraction = Some(validated.fields.clone());

            self.checkpoint()?;
            let supervisor_input = PromptSet::render_supervisor_input(
                &Value::Object(validated.fields),
                &contexts.aggregated_text(),
            );
            let verdict_raw = self
                .model
                .invoke(&[
                    ModelMessage::system(self.prompts.supervisor.clone()),
                    ModelMessage::user(supervisor_input),
                ])
                .await
                .map_err(|err| EnrichError::internal(format!("supervisor call failed: {err}")))?;
            self.checkpoint()?;

            let verdict = verdict_raw.trim().to_string();
            if verdict.starts_with("PASS") {
                info!(
                    target = "argus.extraction",
                    attempts_used = state.attempts_used,
                    "supervisor_passed"
                );
                return Ok(self.finish(true, Some(verdict), state, contexts));
            }

            // FAIL, or anything the supervisor sent that is not a PASS
            state.attempts_used += 1;
            state.last_supervisor_text = Some(verdict);
            info!(
                target = "argus.extraction",
                attempts_used = state.attempts_used,
                max_attempts = self.budgets.max_attempts,
                "supervisor_failed_extraction"
            );
            if state.attempts_used >= self.budgets.max_attempts {
                let supervisor = state.last_supervisor_text.clone();
                return Ok(self.finish(false, supervisor, state, contexts));
            }
        }
    }

    fn finish(
        &self,
        success: bool,
        supervisor: Option<String>,
        state: LoopState,
        contexts: ContextSet,
    ) -> LoopResult {
        let (contexts, sources) = contexts.into_parts();
        LoopResult {
            success,
            supervisor,
            data: state.last_extraction,
            contexts,
            sources,
            attempts_used: state.attempts_used,
            search_rounds_used: state.search_rounds_used,
        }
    }

    fn checkpoint(&self) -> Result<(), EnrichError> {
        if let Some(token) = self.token {
            if token.is_cancelled() {
                return Err(EnrichError::RunCancelled {
                    reason: token.reason(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ModelError;
    use crate::search::{SearchError, SearchResponse};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct SeqModel {
        replies: Mutex<VecDeque<String>>,
    }

    impl SeqModel {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            }
        }
    }

    #[async_trait]
    impl ModelClient for SeqModel {
        async fn invoke(&self, _messages: &[ModelMessage]) -> Result<String, ModelError> {
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ModelError::InvalidResponse("script exhausted".into()))
        }
    }

    struct CountingSearch {
        calls: AtomicU32,
        fail_with: Option<SearchError>,
    }

    impl CountingSearch {
        fn ok() -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_with: None,
            }
        }

        fn count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SearchProvider for CountingSearch {
        async fn search(
            &self,
            query: &str,
            _max_results: u32,
        ) -> Result<SearchResponse, SearchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(SearchError::RateLimited { status }) = &self.fail_with {
                return Err(SearchError::RateLimited { status: *status });
            }
            Ok(SearchResponse {
                text: format!("hits for {query}"),
                sources: vec![],
            })
        }
    }

    fn budgets(max_attempts: u32, per_round: u32, rounds: u32) -> LoopBudgets {
        LoopBudgets {
            max_attempts,
            max_agent_searches_per_request: per_round,
            max_search_rounds: rounds,
        }
    }

    fn numeric() -> Vec<String> {
        vec!["preis".into(), "gewicht".into()]
    }

    async fn drive(
        model: &SeqModel,
        search: &CountingSearch,
        budgets: LoopBudgets,
    ) -> Result<LoopResult, EnrichError> {
        let invoker = RateLimitedInvoker::new(Duration::from_millis(0));
        let prompts = PromptSet::default();
        let fields = numeric();
        let engine = ExtractionLoop {
            model,
            search: search as &dyn SearchProvider,
            invoker: &invoker,
            prompts: &prompts,
            budgets,
            numeric_fields: &fields,
            search_max_results: 5,
            token: None,
        };
        let mut contexts = ContextSet::default();
        contexts.push(SearchContext {
            query: "primary".into(),
            text: "primary results".into(),
            sources: vec![],
        });
        engine.run("Produkt", contexts).await
    }

    #[tokio::test]
    async fn search_only_round_is_attempt_free() {
        // max_attempts=1: if the search round cost an attempt the later
        // extraction could never succeed
        let model = SeqModel::new(&[
            r#"{"__searchQueries": ["Hersteller Datenblatt"]}"#,
            r#"{"Artikelname": "Produkt", "Preis": "249,99 €"}"#,
            "PASS",
        ]);
        let search = CountingSearch::ok();
        let result = drive(&model, &search, budgets(1, 2, 3)).await.expect("loop");
        assert!(result.success);
        assert_eq!(result.attempts_used, 0);
        assert_eq!(result.search_rounds_used, 1);
        assert_eq!(search.count(), 1);
        let data = result.data.expect("data");
        assert_eq!(data["Preis"], json!(249.99));
        // the supplemental context was appended after the primary
        assert_eq!(result.contexts.len(), 2);
        assert_eq!(result.contexts[0].query, "primary");
    }

    #[tokio::test]
    async fn endless_search_requests_terminate_gracefully() {
        let round = r#"{"__searchQueries": ["noch eine Suche"], "Artikelname": "Entwurf"}"#;
        let model = SeqModel::new(&[round, round, round, round]);
        let search = CountingSearch::ok();
        let result = drive(&model, &search, budgets(2, 1, 3)).await.expect("loop");
        assert!(!result.success);
        assert_eq!(result.supervisor.as_deref(), Some(TOO_MANY_SEARCH_REQUESTS));
        assert_eq!(search.count(), 3);
        assert_eq!(result.search_rounds_used, 3);
        assert_eq!(result.attempts_used, 0);
        // best-effort draft survives the give-up
        assert_eq!(result.data.expect("draft")["Artikelname"], json!("Entwurf"));
    }

    #[tokio::test]
    async fn excess_queries_per_round_are_truncated() {
        let model = SeqModel::new(&[
            r#"{"__searchQueries": ["a", "b", "c"]}"#,
            r#"{"Artikelname": "Produkt"}"#,
            "PASS",
        ]);
        let search = CountingSearch::ok();
        let result = drive(&model, &search, budgets(1, 1, 3)).await.expect("loop");
        assert!(result.success);
        assert_eq!(search.count(), 1);
    }

    #[tokio::test]
    async fn exhausted_attempts_resolve_to_needs_review() {
        let model = SeqModel::new(&[
            r#"{"Artikelname": "erster Entwurf"}"#,
            "FAIL: Preis fehlt",
            r#"{"Artikelname": "zweiter Entwurf"}"#,
            "FAIL: Preis fehlt weiterhin",
        ]);
        let search = CountingSearch::ok();
        let result = drive(&model, &search, budgets(2, 1, 3)).await.expect("loop");
        assert!(!result.success);
        assert_eq!(result.attempts_used, 2);
        assert_eq!(
            result.supervisor.as_deref(),
            Some("FAIL: Preis fehlt weiterhin")
        );
        assert_eq!(
            result.data.expect("last data")["Artikelname"],
            json!("zweiter Entwurf")
        );
    }

    #[tokio::test]
    async fn supervisor_fail_then_pass_retries_within_budget() {
        let model = SeqModel::new(&[
            r#"{"Artikelname": "Entwurf"}"#,
            "FAIL: unbelegt",
            r#"{"Artikelname": "Produkt", "Gewicht": "0.5 kg"}"#,
            "PASS sieht gut aus",
        ]);
        let search = CountingSearch::ok();
        let result = drive(&model, &search, budgets(2, 1, 3)).await.expect("loop");
        assert!(result.success);
        assert_eq!(result.attempts_used, 1);
        assert_eq!(result.data.expect("data")["Gewicht"], json!(0.5));
    }

    #[tokio::test]
    async fn schema_failure_is_fatal() {
        let model = SeqModel::new(&[r#"{"Preis": "auf Anfrage"}"#]);
        let search = CountingSearch::ok();
        let err = drive(&model, &search, budgets(2, 1, 3))
            .await
            .expect_err("fatal");
        assert_eq!(err.code(), "SCHEMA_VALIDATION_FAILED");

        let model = SeqModel::new(&["not json"]);
        let err = drive(&model, &CountingSearch::ok(), budgets(2, 1, 3))
            .await
            .expect_err("fatal");
        assert_eq!(err.code(), "SCHEMA_VALIDATION_FAILED");
    }

    #[tokio::test]
    async fn mid_loop_rate_limit_propagates() {
        let model = SeqModel::new(&[r#"{"__searchQueries": ["q"]}"#]);
        let search = CountingSearch {
            calls: AtomicU32::new(0),
            fail_with: Some(SearchError::RateLimited { status: Some(429) }),
        };
        let err = drive(&model, &search, budgets(2, 1, 3))
            .await
            .expect_err("fatal");
        assert_eq!(err.code(), "RATE_LIMITED");
        assert_eq!(err.status(), 429);
    }

    #[tokio::test]
    async fn cancelled_token_stops_the_loop() {
        use crate::models::CancelRequest;
        use crate::registry::CancellationRegistry;

        let registry = CancellationRegistry::new();
        let handle = registry.begin_run("item-1", None).expect("run");
        registry.request_cancellation(
            "item-1",
            &CancelRequest {
                actor: None,
                reason: Some("stop".into()),
            },
        );
        let token = handle.token();

        let model = SeqModel::new(&[r#"{"Artikelname": "x"}"#]);
        let search = CountingSearch::ok();
        let invoker = RateLimitedInvoker::new(Duration::from_millis(0));
        let prompts = PromptSet::default();
        let fields = numeric();
        let engine = ExtractionLoop {
            model: &model,
            search: &search,
            invoker: &invoker,
            prompts: &prompts,
            budgets: budgets(2, 1, 3),
            numeric_fields: &fields,
            search_max_results: 5,
            token: Some(&token),
        };
        let err = engine
            .run("Produkt", ContextSet::default())
            .await
            .expect_err("cancelled");
        assert_eq!(err.code(), "RUN_CANCELLED");
        assert!(err.to_string().contains("stop"));
    }
}
