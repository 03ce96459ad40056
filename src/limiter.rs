use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;

/// Serializes a capability call behind a minimum inter-call start spacing,
/// shared across all runs. tokio's mutex wakes waiters in acquisition order,
/// which gives the FIFO guarantee; the guard is held across the call, so at
/// most one call is in flight.
#[derive(Clone)]
pub struct RateLimitedInvoker {
    state: Arc<Mutex<InvokerState>>,
    spacing: Duration,
}

#[derive(Debug, Default)]
struct InvokerState {
    last_start: Option<Instant>,
}

impl RateLimitedInvoker {
    pub fn new(spacing: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(InvokerState::default())),
            spacing,
        }
    }

    pub async fn invoke<T, F, Fut>(&self, call: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.invoke_spaced(call, None).await
    }

    /// `spacing` overrides the configured minimum for this call only.
    pub async fn invoke_spaced<T, F, Fut>(&self, call: F, spacing: Option<Duration>) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let spacing = spacing.unwrap_or(self.spacing);
        let mut state = self.state.lock().await;
        if let Some(last) = state.last_start {
            let elapsed = last.elapsed();
            if elapsed < spacing {
                sleep(spacing - elapsed).await;
            }
        }
        state.last_start = Some(Instant::now());
        // Guard stays held: the next waiter is released only once this call
        // resolved, whether it succeeded or not.
        call().await
    }
}
