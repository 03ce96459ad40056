use tracing_subscriber::{EnvFilter, fmt};

/// Installs the default subscriber for hosts that do not bring their own.
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
