use crate::error::EnrichError;
use crate::limiter::RateLimitedInvoker;
use crate::models::{SearchContext, Source};
use crate::search::{SearchError, SearchProvider};
use std::collections::HashSet;
use tracing::debug;

const PRIMARY_QUERY_SUFFIX: &str = "Produktdaten technische Daten";
const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Append-only search history of one run. Index 0 is always the primary
/// search; sources are deduplicated across all contexts.
#[derive(Debug, Default)]
pub struct ContextSet {
    contexts: Vec<SearchContext>,
    sources: Vec<Source>,
    seen: HashSet<String>,
}

impl ContextSet {
    pub fn contexts(&self) -> &[SearchContext] {
        &self.contexts
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn into_parts(self) -> (Vec<SearchContext>, Vec<Source>) {
        (self.contexts, self.sources)
    }

    pub fn push(&mut self, context: SearchContext) {
        self.record_sources(&context.sources);
        self.contexts.push(context);
    }

    pub fn record_sources(&mut self, new: &[Source]) {
        for source in new {
            if self.seen.insert(source.dedup_key()) {
                self.sources.push(source.clone());
            }
        }
    }

    /// Renders every context as a `Search query N:` block for prompting.
    pub fn aggregated_text(&self) -> String {
        self.contexts
            .iter()
            .enumerate()
            .map(|(idx, ctx)| format!("Search query {}: {}\n{}", idx + 1, ctx.query, ctx.text))
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR)
    }
}

/// Runs one search through the shared invoker and maps capability failures
/// onto the run error taxonomy.
pub async fn run_search(
    provider: &dyn SearchProvider,
    invoker: &RateLimitedInvoker,
    query: &str,
    max_results: u32,
) -> Result<SearchContext, EnrichError> {
    let outcome = invoker
        .invoke(|| provider.search(query, max_results))
        .await;
    match outcome {
        Ok(response) => {
            debug!(
                target = "argus.search",
                query = %query,
                sources = response.sources.len(),
                "search_completed"
            );
            Ok(SearchContext {
                query: query.to_string(),
                text: response.text,
                sources: response.sources,
            })
        }
        Err(SearchError::RateLimited { status }) => Err(EnrichError::RateLimited { status }),
        Err(SearchError::Failed(cause)) => Err(EnrichError::SearchFailed(cause)),
    }
}

/// Issues the primary search for a run and seeds the context set with it.
pub async fn collect_search_contexts(
    term: &str,
    provider: &dyn SearchProvider,
    invoker: &RateLimitedInvoker,
    max_results: u32,
) -> Result<ContextSet, EnrichError> {
    let query = format!("{term} {PRIMARY_QUERY_SUFFIX}");
    let context = run_search(provider, invoker, &query, max_results).await?;
    let mut set = ContextSet::default();
    set.push(context);
    Ok(set)
}
