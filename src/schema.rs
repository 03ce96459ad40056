use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Field the model uses to request supplemental searches before committing.
pub const SEARCH_QUERIES_FIELD: &str = "__searchQueries";

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("extraction is not a JSON object")]
    NotAnObject,
    #[error("invalid {SEARCH_QUERIES_FIELD} entry: {0}")]
    InvalidSearchQueries(String),
    #[error("field `{field}` is not a usable number: {raw}")]
    InvalidNumber { field: String, raw: String },
}

/// A schema-checked model response, split into the committed fields and any
/// requested supplemental searches.
#[derive(Debug, Clone)]
pub struct ValidatedExtraction {
    pub fields: Map<String, Value>,
    pub search_queries: Vec<String>,
}

impl ValidatedExtraction {
    /// True when the response carries extraction fields beyond the search
    /// request itself.
    pub fn has_data(&self) -> bool {
        !self.fields.is_empty()
    }
}

/// Validates a decoded model response. Declared numeric fields are coerced
/// from localized formats (comma decimals, thousand separators, unit or
/// currency suffixes); unknown fields pass through untouched.
pub fn validate_extraction(
    value: &Value,
    numeric_fields: &[String],
) -> Result<ValidatedExtraction, SchemaError> {
    let object = value.as_object().ok_or(SchemaError::NotAnObject)?;

    let mut fields = Map::new();
    let mut search_queries = Vec::new();

    for (key, field_value) in object {
        if key == SEARCH_QUERIES_FIELD {
            search_queries = validate_search_queries(field_value)?;
            continue;
        }
        if is_numeric_field(key, numeric_fields) {
            fields.insert(key.clone(), coerce_numeric_value(key, field_value)?);
        } else {
            fields.insert(key.clone(), field_value.clone());
        }
    }

    Ok(ValidatedExtraction {
        fields,
        search_queries,
    })
}

fn is_numeric_field(key: &str, numeric_fields: &[String]) -> bool {
    let key = key.to_lowercase();
    numeric_fields.iter().any(|field| *field == key)
}

fn validate_search_queries(value: &Value) -> Result<Vec<String>, SchemaError> {
    let entries = value
        .as_array()
        .ok_or_else(|| SchemaError::InvalidSearchQueries("expected an array".into()))?;
    let mut queries = Vec::with_capacity(entries.len());
    for entry in entries {
        let query = entry
            .as_str()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| SchemaError::InvalidSearchQueries(entry.to_string()))?;
        queries.push(query.to_string());
    }
    Ok(queries)
}

fn coerce_numeric_value(field: &str, value: &Value) -> Result<Value, SchemaError> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Number(_) => Ok(value.clone()),
        Value::String(raw) => coerce_localized_number(raw)
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| SchemaError::InvalidNumber {
                field: field.to_string(),
                raw: raw.clone(),
            }),
        other => Err(SchemaError::InvalidNumber {
            field: field.to_string(),
            raw: other.to_string(),
        }),
    }
}

/// Parses numbers as they appear in scraped European product data:
/// `"249,99 €"`, `"1.234,56"`, `"-0,75"`, `"0.5 kg"`.
pub fn coerce_localized_number(raw: &str) -> Option<f64> {
    let text = raw.trim();
    let first_digit = text.find(|c: char| c.is_ascii_digit())?;
    let begin = match text[..first_digit].chars().last() {
        Some(sign @ ('-' | '+')) => first_digit - sign.len_utf8(),
        _ => first_digit,
    };
    let token: String = text[begin..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-' | '+'))
        .collect();
    let token = token.trim_end_matches(['.', ',']);

    let dots = token.matches('.').count();
    let commas = token.matches(',').count();
    let normalized = if dots > 0 && commas > 0 {
        // the separator appearing last is the decimal one
        if token.rfind(',') > token.rfind('.') {
            token.replace('.', "").replace(',', ".")
        } else {
            token.replace(',', "")
        }
    } else if commas > 1 {
        token.replace(',', "")
    } else if commas == 1 {
        token.replace(',', ".")
    } else if dots > 1 {
        token.replace('.', "")
    } else {
        token.to_string()
    };

    normalized.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NUMERIC: &[&str] = &["preis", "gewicht"];

    fn numeric_fields() -> Vec<String> {
        NUMERIC.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn localized_numbers_coerce() {
        assert_eq!(coerce_localized_number("249,99 €"), Some(249.99));
        assert_eq!(coerce_localized_number("1.234,56"), Some(1234.56));
        assert_eq!(coerce_localized_number("-0,75"), Some(-0.75));
        assert_eq!(coerce_localized_number("0.5 kg"), Some(0.5));
        assert_eq!(coerce_localized_number("EUR 1.299.000"), Some(1_299_000.0));
        assert_eq!(coerce_localized_number("12"), Some(12.0));
        assert_eq!(coerce_localized_number("kein Preis"), None);
    }

    #[test]
    fn numeric_fields_are_coerced_case_insensitively() {
        let value = json!({
            "Preis": "249,99 €",
            "Gewicht": "0.5 kg",
            "Artikelname": "Produkt",
        });
        let validated = validate_extraction(&value, &numeric_fields()).expect("valid");
        assert_eq!(validated.fields["Preis"], json!(249.99));
        assert_eq!(validated.fields["Gewicht"], json!(0.5));
        assert_eq!(validated.fields["Artikelname"], json!("Produkt"));
        assert!(validated.search_queries.is_empty());
        assert!(validated.has_data());
    }

    #[test]
    fn unknown_fields_pass_through() {
        let value = json!({"Zustand": "neu", "tags": ["a", "b"]});
        let validated = validate_extraction(&value, &numeric_fields()).expect("valid");
        assert_eq!(validated.fields["tags"], json!(["a", "b"]));
    }

    #[test]
    fn uncoercible_number_fails() {
        let value = json!({"Preis": "auf Anfrage"});
        assert!(validate_extraction(&value, &numeric_fields()).is_err());
        let value = json!({"Preis": true});
        assert!(validate_extraction(&value, &numeric_fields()).is_err());
    }

    #[test]
    fn search_queries_are_split_off_and_checked() {
        let value = json!({
            "__searchQueries": ["Hersteller Datenblatt", " EAN 4006381333931 "],
        });
        let validated = validate_extraction(&value, &numeric_fields()).expect("valid");
        assert!(!validated.has_data());
        assert_eq!(
            validated.search_queries,
            vec!["Hersteller Datenblatt", "EAN 4006381333931"]
        );

        let invalid = json!({"__searchQueries": [""]});
        assert!(validate_extraction(&invalid, &numeric_fields()).is_err());
        let invalid = json!({"__searchQueries": [42]});
        assert!(validate_extraction(&invalid, &numeric_fields()).is_err());
        let invalid = json!({"__searchQueries": "not-an-array"});
        assert!(validate_extraction(&invalid, &numeric_fields()).is_err());
    }

    #[test]
    fn non_object_extraction_fails() {
        assert!(validate_extraction(&json!([1, 2]), &numeric_fields()).is_err());
        assert!(validate_extraction(&json!("text"), &numeric_fields()).is_err());
    }
}
