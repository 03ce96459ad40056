use tracing::trace;

// Lightweight trace-based metrics helpers; the embedding service scrapes
// these spans instead of a dedicated recorder.

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "argus.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn loop_round(attempts_used: u32, search_rounds_used: u32) {
    trace!(
        target = "argus.metrics",
        attempts_used = attempts_used,
        search_rounds_used = search_rounds_used,
        "extraction_round"
    );
}
