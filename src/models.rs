use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::skip_serializing_none;

/// JSON key of the warehouse item identifier, as stored upstream.
pub const FIELD_ITEM_UUID: &str = "itemUUid";
/// JSON key of the free-text item description used as the search seed.
pub const FIELD_DESCRIPTION: &str = "Artikelbeschreibung";
/// JSON key the orchestrator writes the effective search term under.
pub const FIELD_SEARCH_QUERY: &str = "searchQuery";

/// Candidate record handed in by the warehouse layer. Everything beyond the
/// two well-known fields is carried through untouched and re-emitted on the
/// enriched item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichTarget {
    #[serde(rename = "itemUUid", default, skip_serializing_if = "Option::is_none")]
    pub item_uuid: Option<String>,
    #[serde(
        rename = "Artikelbeschreibung",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EnrichTarget {
    pub fn new(item_uuid: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            item_uuid: Some(item_uuid.into()),
            description: Some(description.into()),
            extra: Map::new(),
        }
    }

    /// Flattens the target back into the JSON object extracted fields get
    /// overlaid onto.
    pub fn as_object(&self) -> Map<String, Value> {
        let mut obj = self.extra.clone();
        if let Some(id) = &self.item_uuid {
            obj.insert(FIELD_ITEM_UUID.into(), Value::String(id.clone()));
        }
        if let Some(desc) = &self.description {
            obj.insert(FIELD_DESCRIPTION.into(), Value::String(desc.clone()));
        }
        obj
    }
}

/// Per-run options supplied by the caller alongside the target.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichOptions {
    /// Overrides the search term derived from the item description.
    #[serde(default)]
    pub search_term: Option<String>,
    /// Who started the run; recorded on the outcome and the payload.
    #[serde(default)]
    pub actor: Option<String>,
    /// Pre-fetched catalog candidates for the shortcut resolver.
    #[serde(default)]
    pub catalog_candidates: Vec<CatalogCandidate>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub max_agent_searches_per_request: Option<u32>,
}

/// One pre-fetched internal catalog product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogCandidate {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    pub name: String,
}

/// A web source backing part of the extraction. Deduplicated across the run
/// by url, else by title+description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Source {
    pub fn dedup_key(&self) -> String {
        match self.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            Some(url) => format!("url:{url}"),
            None => format!(
                "text:{}|{}",
                self.title.trim(),
                self.description.as_deref().unwrap_or("").trim()
            ),
        }
    }
}

/// One executed search: the query, the capability's combined text and the
/// raw sources it cited. Index 0 of a run's context list is always the
/// primary search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchContext {
    pub query: String,
    pub text: String,
    pub sources: Vec<Source>,
}

/// Terminal verdict of a run, as returned to the caller and persisted.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentPayload {
    pub item_id: String,
    pub status: String,
    pub error: Option<String>,
    pub needs_review: bool,
    pub summary: Option<String>,
    pub review_decision: String,
    pub review_notes: Option<String>,
    pub reviewed_by: String,
    pub actor: String,
    pub item: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Source>,
}

/// Cancellation request metadata.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}
