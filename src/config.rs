use once_cell::sync::Lazy;
use std::sync::Once;
use std::time::Duration;

static LOAD_DOTENV: Once = Once::new();

/// Numeric item fields the schema validator coerces from localized formats.
/// Overridable via `ENRICH_NUMERIC_FIELDS` (comma separated, lowercase).
static DEFAULT_NUMERIC_FIELDS: Lazy<Vec<String>> = Lazy::new(|| {
    ["preis", "uvp", "gewicht", "breite", "hoehe", "laenge", "tiefe"]
        .into_iter()
        .map(str::to_string)
        .collect()
});

#[derive(Debug, Clone)]
pub struct EnrichConfig {
    /// Minimum spacing between outbound search call starts.
    pub search_spacing: Duration,
    /// Results requested from the search capability per query.
    pub search_max_results: u32,
    /// Committed extractions the loop may spend on supervisor FAILs.
    pub max_attempts: u32,
    /// Agent-requested queries executed per search round; excess truncated.
    pub max_agent_searches_per_request: u32,
    /// Completed supplemental-search rounds before the graceful give-up.
    pub max_search_rounds: u32,
    /// Lowercased names of numeric item fields for localized coercion.
    pub numeric_fields: Vec<String>,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            search_spacing: Duration::from_millis(750),
            search_max_results: 5,
            max_attempts: 3,
            max_agent_searches_per_request: 2,
            max_search_rounds: 3,
            numeric_fields: DEFAULT_NUMERIC_FIELDS.clone(),
        }
    }
}

impl EnrichConfig {
    pub fn from_env() -> Self {
        LOAD_DOTENV.call_once(|| {
            let _ = dotenvy::dotenv();
        });
        let defaults = Self::default();
        Self {
            search_spacing: Duration::from_millis(env_u64(
                "ENRICH_SEARCH_SPACING_MS",
                defaults.search_spacing.as_millis() as u64,
            )),
            search_max_results: env_u32("ENRICH_SEARCH_MAX_RESULTS", defaults.search_max_results),
            max_attempts: env_u32("ENRICH_MAX_ATTEMPTS", defaults.max_attempts).max(1),
            max_agent_searches_per_request: env_u32(
                "ENRICH_MAX_AGENT_SEARCHES",
                defaults.max_agent_searches_per_request,
            ),
            max_search_rounds: env_u32("ENRICH_MAX_SEARCH_ROUNDS", defaults.max_search_rounds),
            numeric_fields: numeric_fields_from_env(),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

fn numeric_fields_from_env() -> Vec<String> {
    std::env::var("ENRICH_NUMERIC_FIELDS")
        .ok()
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
        })
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_NUMERIC_FIELDS.clone())
}
