use crate::llm::{ModelClient, ModelMessage, decode_model_json};
use crate::models::{CatalogCandidate, EnrichTarget, FIELD_ITEM_UUID, Source};
use crate::prompts::PromptSet;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogDecision {
    is_match: bool,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    matched_product_id: Option<String>,
    #[serde(default)]
    target: Option<Value>,
}

/// Fast-path result: the merged item data, the single catalog source and the
/// review note carrying the model's confidence.
#[derive(Debug, Clone)]
pub struct CatalogShortcut {
    pub data: serde_json::Map<String, Value>,
    pub source: Source,
    pub summary: String,
}

/// Asks the model whether one of the pre-fetched catalog candidates matches
/// the item. Every failure mode short of a usable match is a no-decision:
/// the caller falls through to the full extraction pipeline.
pub async fn resolve_catalog_match(
    model: &dyn ModelClient,
    prompts: &PromptSet,
    candidates: &[CatalogCandidate],
    term: &str,
    target: &EnrichTarget,
) -> Option<CatalogShortcut> {
    let template = prompts.catalog_match.as_ref()?;
    if candidates.is_empty() {
        return None;
    }

    let messages = [
        ModelMessage::system(template.clone()),
        ModelMessage::user(PromptSet::render_catalog_input(term, candidates)),
    ];
    let raw = match model.invoke(&messages).await {
        Ok(raw) => raw,
        Err(err) => {
            warn!(target = "argus.catalog", error = %err, "catalog_match_call_failed");
            return None;
        }
    };

    let value = match decode_model_json(&raw) {
        Some(value) => value,
        None => {
            warn!(target = "argus.catalog", "catalog_match_unparseable");
            return None;
        }
    };
    let decision: CatalogDecision = match serde_json::from_value(value) {
        Ok(decision) => decision,
        Err(err) => {
            warn!(target = "argus.catalog", error = %err, "catalog_match_bad_shape");
            return None;
        }
    };

    if !decision.is_match {
        debug!(target = "argus.catalog", term = %term, "catalog_no_match");
        return None;
    }

    let product = resolve_product(candidates, decision.matched_product_id.as_deref())?;
    let url = product.url.clone()?;

    let mut data = target.as_object();
    if let Some(Value::Object(fields)) = decision.target {
        for (key, value) in fields {
            data.insert(key, value);
        }
    }
    // identifiers win over whatever the model echoed back
    if let Some(id) = &target.item_uuid {
        data.insert(FIELD_ITEM_UUID.into(), Value::String(id.clone()));
    }

    let summary = format!(
        "Matched internal catalog product `{}` with confidence {:.2}",
        product.name, decision.confidence
    );
    Some(CatalogShortcut {
        data,
        source: Source {
            title: product.name.clone(),
            url: Some(url),
            description: Some(format!("Internal catalog product {}", product.id)),
        },
        summary,
    })
}

/// Prefers the exact id the model named; otherwise the first candidate that
/// actually has a url.
fn resolve_product<'a>(
    candidates: &'a [CatalogCandidate],
    matched_id: Option<&str>,
) -> Option<&'a CatalogCandidate> {
    if let Some(id) = matched_id {
        if let Some(exact) = candidates
            .iter()
            .find(|c| c.id == id && c.url.as_deref().is_some_and(|u| !u.trim().is_empty()))
        {
            return Some(exact);
        }
        warn!(
            target = "argus.catalog",
            matched_id = %id,
            "matched_product_id_unresolvable"
        );
    }
    candidates
        .iter()
        .find(|c| c.url.as_deref().is_some_and(|u| !u.trim().is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ModelError;
    use async_trait::async_trait;
    use serde_json::json;

    struct ScriptedModel {
        reply: Result<String, ModelError>,
    }

    impl ScriptedModel {
        fn replying(raw: &str) -> Self {
            Self {
                reply: Ok(raw.to_string()),
            }
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        async fn invoke(&self, _messages: &[ModelMessage]) -> Result<String, ModelError> {
            match &self.reply {
                Ok(raw) => Ok(raw.clone()),
                Err(_) => Err(ModelError::Http("down".into())),
            }
        }
    }

    fn candidates() -> Vec<CatalogCandidate> {
        vec![
            CatalogCandidate {
                id: "P-1".into(),
                url: None,
                name: "Ohne Url".into(),
            },
            CatalogCandidate {
                id: "P-2".into(),
                url: Some("https://shop.example/p-2".into()),
                name: "Bohrmaschine 750W".into(),
            },
        ]
    }

    fn target() -> EnrichTarget {
        EnrichTarget::new("abc-123", "Bohrmaschine")
    }

    #[tokio::test]
    async fn confident_match_builds_shortcut() {
        let model = ScriptedModel::replying(
            r#"{"isMatch": true, "confidence": 0.92, "matchedProductId": "P-2",
               "target": {"Artikelname": "Bohrmaschine 750W", "itemUUid": "spoofed"}}"#,
        );
        let shortcut =
            resolve_catalog_match(&model, &PromptSet::default(), &candidates(), "Bohrmaschine", &target())
                .await
                .expect("shortcut");
        assert_eq!(
            shortcut.source.url.as_deref(),
            Some("https://shop.example/p-2")
        );
        assert_eq!(shortcut.data["Artikelname"], json!("Bohrmaschine 750W"));
        // re-asserted over the model's echo
        assert_eq!(shortcut.data["itemUUid"], json!("abc-123"));
        assert!(shortcut.summary.contains("0.92"));
    }

    #[tokio::test]
    async fn unknown_matched_id_falls_back_to_first_with_url() {
        let model = ScriptedModel::replying(
            r#"{"isMatch": true, "confidence": 0.7, "matchedProductId": "missing"}"#,
        );
        let shortcut =
            resolve_catalog_match(&model, &PromptSet::default(), &candidates(), "Bohrmaschine", &target())
                .await
                .expect("shortcut");
        assert!(shortcut.source.title.contains("Bohrmaschine"));
    }

    #[tokio::test]
    async fn no_decision_paths_never_throw() {
        let prompts = PromptSet::default();
        let term = "Bohrmaschine";

        let no_match = ScriptedModel::replying(r#"{"isMatch": false, "confidence": 0.9}"#);
        assert!(
            resolve_catalog_match(&no_match, &prompts, &candidates(), term, &target())
                .await
                .is_none()
        );

        let garbage = ScriptedModel::replying("not json at all");
        assert!(
            resolve_catalog_match(&garbage, &prompts, &candidates(), term, &target())
                .await
                .is_none()
        );

        let bad_shape = ScriptedModel::replying(r#"{"isMatch": "yes"}"#);
        assert!(
            resolve_catalog_match(&bad_shape, &prompts, &candidates(), term, &target())
                .await
                .is_none()
        );

        let model_down = ScriptedModel {
            reply: Err(ModelError::Http("down".into())),
        };
        assert!(
            resolve_catalog_match(&model_down, &prompts, &candidates(), term, &target())
                .await
                .is_none()
        );

        // no candidates, no template
        let ok = ScriptedModel::replying(r#"{"isMatch": true, "confidence": 1.0}"#);
        assert!(
            resolve_catalog_match(&ok, &prompts, &[], term, &target())
                .await
                .is_none()
        );
        let without_template = PromptSet {
            catalog_match: None,
            ..PromptSet::default()
        };
        assert!(
            resolve_catalog_match(&ok, &without_template, &candidates(), term, &target())
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn match_without_any_url_is_no_decision() {
        let model = ScriptedModel::replying(r#"{"isMatch": true, "confidence": 0.9}"#);
        let urlless = vec![CatalogCandidate {
            id: "P-9".into(),
            url: None,
            name: "Produkt".into(),
        }];
        assert!(
            resolve_catalog_match(&model, &PromptSet::default(), &urlless, "x", &target())
                .await
                .is_none()
        );
    }
}
