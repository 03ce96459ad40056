use crate::models::CatalogCandidate;
use serde_json::json;

const EXTRACTION_SYSTEM_PROMPT: &str = r#"
You are a product data extraction agent for a warehouse inventory system. Given a raw item
description and aggregated web search context, respond with a valid JSON object containing the
structured product fields you can substantiate (Artikelname, Hersteller, Preis, Gewicht, EAN,
Farbe, Material and similar). If you need additional web searches before committing, respond with
a JSON object whose `__searchQueries` array lists the queries you want executed; your other fields
will be kept as a draft. Output JSON only.
"#;

const SUPERVISOR_SYSTEM_PROMPT: &str = r#"
You are a supervisor reviewing a structured product extraction against the search context it was
derived from. Check that every populated field is supported by the context and that nothing
essential is fabricated. Respond with EXACTLY one of:
- `PASS` if the extraction is acceptable
- `FAIL: <reason>` if it is not (be specific about what must change)
"#;

const CATALOG_MATCH_SYSTEM_PROMPT: &str = r#"
You are matching a warehouse item description against pre-fetched internal catalog products.
Respond with JSON only: {"isMatch": bool, "confidence": number between 0 and 1,
"matchedProductId": string or null, "target": object with the product fields you can take over}.
Set isMatch to true only when you are confident the description refers to one of the candidates.
"#;

/// Prompt templates for the three model interactions. `catalog_match` being
/// absent disables the shortcut resolver.
#[derive(Debug, Clone)]
pub struct PromptSet {
    pub extraction: String,
    pub supervisor: String,
    pub catalog_match: Option<String>,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            extraction: EXTRACTION_SYSTEM_PROMPT.trim().to_string(),
            supervisor: SUPERVISOR_SYSTEM_PROMPT.trim().to_string(),
            catalog_match: Some(CATALOG_MATCH_SYSTEM_PROMPT.trim().to_string()),
        }
    }
}

impl PromptSet {
    pub fn render_extraction_input(
        term: &str,
        aggregated_search_text: &str,
        previous_feedback: Option<&str>,
    ) -> String {
        json!({
            "itemDescription": term,
            "searchContext": aggregated_search_text,
            "supervisorFeedback": previous_feedback,
        })
        .to_string()
    }

    pub fn render_supervisor_input(data: &serde_json::Value, aggregated_search_text: &str) -> String {
        json!({
            "extraction": data,
            "searchContext": aggregated_search_text,
        })
        .to_string()
    }

    pub fn render_catalog_input(term: &str, candidates: &[CatalogCandidate]) -> String {
        json!({
            "itemDescription": term,
            "candidates": candidates,
        })
        .to_string()
    }
}
