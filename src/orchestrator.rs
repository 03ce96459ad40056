use crate::catalog::resolve_catalog_match;
use crate::config::EnrichConfig;
use crate::error::EnrichError;
use crate::extraction::{ExtractionLoop, LoopBudgets, TOO_MANY_SEARCH_REQUESTS};
use crate::limiter::RateLimitedInvoker;
use crate::llm::ModelClient;
use crate::metrics;
use crate::models::{
    CancelRequest, EnrichOptions, EnrichTarget, EnrichmentPayload, FIELD_ITEM_UUID,
    FIELD_SEARCH_QUERY,
};
use crate::notify::Notifier;
use crate::prompts::PromptSet;
use crate::registry::{CancellationRegistry, CancellationStatus, RunToken};
use crate::search::{SearchProvider, collect_search_contexts};
use crate::store::OutcomeStore;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

const REVIEWED_BY_CATALOG: &str = "catalog-match";
const REVIEWED_BY_SUPERVISOR: &str = "supervisor-agent";
const DEFAULT_ACTOR: &str = "system";

/// Wires registry, limiter, resolver and extraction loop into one run and
/// owns the persist + notify tail.
pub struct Enricher {
    registry: CancellationRegistry,
    invoker: RateLimitedInvoker,
    config: EnrichConfig,
    prompts: PromptSet,
    model: Arc<dyn ModelClient>,
    search: Arc<dyn SearchProvider>,
    store: Arc<dyn OutcomeStore>,
    notifier: Arc<dyn Notifier>,
}

impl Enricher {
    pub fn new(
        config: EnrichConfig,
        model: Arc<dyn ModelClient>,
        search: Arc<dyn SearchProvider>,
        store: Arc<dyn OutcomeStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            registry: CancellationRegistry::new(),
            invoker: RateLimitedInvoker::new(config.search_spacing),
            config,
            prompts: PromptSet::default(),
            model,
            search,
            store,
            notifier,
        }
    }

    pub fn with_prompts(mut self, prompts: PromptSet) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn registry(&self) -> &CancellationRegistry {
        &self.registry
    }

    pub fn request_cancellation(
        &self,
        item_id: &str,
        request: &CancelRequest,
    ) -> CancellationStatus {
        self.registry.request_cancellation(item_id, request)
    }

    /// Runs the full pipeline for one item. Business soft-failures resolve
    /// into a needs-review payload; only infrastructure failures and
    /// cancellation surface as errors.
    pub async fn run(
        &self,
        target: EnrichTarget,
        item_id: &str,
        options: EnrichOptions,
    ) -> Result<EnrichmentPayload, EnrichError> {
        let item_id = item_id.trim().to_string();
        if item_id.is_empty() {
            return Err(EnrichError::InvalidTarget("empty item id".into()));
        }
        let term = options
            .search_term
            .clone()
            .or_else(|| target.description.clone())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| EnrichError::InvalidTarget("missing item description".into()))?;
        let actor = options
            .actor
            .clone()
            .unwrap_or_else(|| DEFAULT_ACTOR.to_string());

        // register before any expensive work; everything below must observe
        // the token
        let handle = self.registry.begin_run(&item_id, Some(actor.clone()))?;
        let token = handle.token();

        match self
            .run_inner(&target, &item_id, &term, &actor, &options, &token)
            .await
        {
            Ok(payload) => {
                handle.complete(payload.summary.clone());
                Ok(payload)
            }
            Err(err @ EnrichError::RunCancelled { .. }) => {
                info!(
                    target = "argus.orchestrator",
                    item_id = %item_id,
                    "run_cancelled_mid_flight"
                );
                handle.cancel(token.reason());
                Err(err)
            }
            Err(err) => {
                handle.fail(Some(err.to_string()));
                Err(err)
            }
        }
    }

    async fn run_inner(
        &self,
        target: &EnrichTarget,
        item_id: &str,
        term: &str,
        actor: &str,
        options: &EnrichOptions,
        token: &RunToken,
    ) -> Result<EnrichmentPayload, EnrichError> {
        let shortcut = self
            .checked_stage("catalog_match", item_id, token, async {
                Ok(resolve_catalog_match(
                    self.model.as_ref(),
                    &self.prompts,
                    &options.catalog_candidates,
                    term,
                    target,
                )
                .await)
            })
            .await?;

        let payload = if let Some(shortcut) = shortcut {
            info!(
                target = "argus.orchestrator",
                item_id = %item_id,
                "catalog_shortcut_hit"
            );
            let mut item = shortcut.data;
            assert_identity(&mut item, target, term);
            EnrichmentPayload {
                item_id: item_id.to_string(),
                status: "completed".into(),
                error: None,
                needs_review: false,
                summary: Some(shortcut.summary.clone()),
                review_decision: "approved".into(),
                review_notes: Some(shortcut.summary),
                reviewed_by: REVIEWED_BY_CATALOG.into(),
                actor: actor.to_string(),
                item: Value::Object(item),
                sources: vec![shortcut.source],
            }
        } else {
            let contexts = self
                .checked_stage("primary_search", item_id, token, async {
                    collect_search_contexts(
                        term,
                        self.search.as_ref(),
                        &self.invoker,
                        self.config.search_max_results,
                    )
                    .await
                })
                .await?;

            let budgets = LoopBudgets {
                max_attempts: options.max_attempts.unwrap_or(self.config.max_attempts).max(1),
                max_agent_searches_per_request: options
                    .max_agent_searches_per_request
                    .unwrap_or(self.config.max_agent_searches_per_request),
                max_search_rounds: self.config.max_search_rounds,
            };
            let engine = ExtractionLoop {
                model: self.model.as_ref(),
                search: self.search.as_ref(),
                invoker: &self.invoker,
                prompts: &self.prompts,
                budgets,
                numeric_fields: &self.config.numeric_fields,
                search_max_results: self.config.search_max_results,
                token: Some(token),
            };
            let result = self
                .checked_stage("extraction_loop", item_id, token, engine.run(term, contexts))
                .await?;

            let mut item = target.as_object();
            if let Some(data) = &result.data {
                for (key, value) in data {
                    item.insert(key.clone(), value.clone());
                }
            }
            assert_identity(&mut item, target, term);

            let summary = if result.success {
                "Extraction approved by supervisor".to_string()
            } else if result.supervisor.as_deref() == Some(TOO_MANY_SEARCH_REQUESTS) {
                format!(
                    "Gave up after {} supplemental search round(s); best-effort data kept for review",
                    result.search_rounds_used
                )
            } else {
                format!(
                    "Supervisor rejected {} attempt(s); manual review required",
                    result.attempts_used
                )
            };
            EnrichmentPayload {
                item_id: item_id.to_string(),
                status: if result.success {
                    "completed".into()
                } else {
                    "needs_review".into()
                },
                error: None,
                needs_review: !result.success,
                summary: Some(summary),
                review_decision: if result.success {
                    "approved".into()
                } else {
                    "pending".into()
                },
                review_notes: result.supervisor,
                reviewed_by: REVIEWED_BY_SUPERVISOR.into(),
                actor: actor.to_string(),
                item: Value::Object(item),
                sources: result.sources,
            }
        };

        self.checked_stage("persist_outcome", item_id, token, async {
            if let Err(err) = self.store.save_outcome(item_id, &payload).await {
                warn!(
                    target = "argus.orchestrator",
                    item_id = %item_id,
                    error = %err,
                    "outcome_persist_failed"
                );
            }
            Ok(())
        })
        .await?;

        // exactly-once dispatch: failure is recorded, never retried here and
        // never turned into a run failure
        self.checked_stage("notify", item_id, token, async {
            match self.notifier.notify(&payload).await {
                Ok(()) => {
                    if let Err(err) = self.store.mark_notified_success(item_id).await {
                        warn!(
                            target = "argus.orchestrator",
                            item_id = %item_id,
                            error = %err,
                            "notified_flag_persist_failed"
                        );
                    }
                }
                Err(err) => {
                    warn!(
                        target = "argus.orchestrator",
                        item_id = %item_id,
                        error = %err,
                        "notification_failed"
                    );
                    if let Err(err) = self.store.mark_notified_failure(item_id).await {
                        warn!(
                            target = "argus.orchestrator",
                            item_id = %item_id,
                            error = %err,
                            "notify_failure_flag_persist_failed"
                        );
                    }
                }
            }
            Ok(())
        })
        .await?;

        Ok(payload)
    }

    /// Cancellation checkpoints bracket every suspension point; stage timing
    /// goes to the trace-based metrics.
    async fn checked_stage<T, Fut>(
        &self,
        name: &'static str,
        item_id: &str,
        token: &RunToken,
        fut: Fut,
    ) -> Result<T, EnrichError>
    where
        Fut: Future<Output = Result<T, EnrichError>>,
    {
        self.registry.throw_if_cancelled(item_id, Some(token))?;
        let started = Instant::now();
        let value = fut.await?;
        metrics::stage_elapsed(name, started.elapsed().as_millis());
        self.registry.throw_if_cancelled(item_id, Some(token))?;
        Ok(value)
    }
}

fn assert_identity(item: &mut Map<String, Value>, target: &EnrichTarget, term: &str) {
    if let Some(id) = &target.item_uuid {
        item.insert(FIELD_ITEM_UUID.into(), Value::String(id.clone()));
    }
    item.insert(FIELD_SEARCH_QUERY.into(), Value::String(term.to_string()));
}
