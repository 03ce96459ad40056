use crate::error::EnrichError;
use crate::models::CancelRequest;
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Who asked for the cancellation and why; written exactly once per token.
#[derive(Debug, Clone)]
pub struct CancelDetails {
    pub actor: Option<String>,
    pub reason: Option<String>,
    pub requested_at: DateTime<Utc>,
}

/// Cancellation handle threaded through a run. Once signaled it stays
/// signaled for the lifetime of that run.
#[derive(Clone)]
pub struct RunToken {
    cancel: CancellationToken,
    details: Arc<OnceCell<CancelDetails>>,
}

impl RunToken {
    fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            details: Arc::new(OnceCell::new()),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn details(&self) -> Option<&CancelDetails> {
        self.details.get()
    }

    pub fn reason(&self) -> Option<String> {
        self.details.get().and_then(|d| d.reason.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunStatus {
    Running,
    Cancelling,
}

struct ActiveRun {
    run_id: Uuid,
    token: RunToken,
    status: RunStatus,
    started_at: DateTime<Utc>,
    actor: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcomeKind {
    Completed,
    Cancelled,
    Failed,
}

/// Terminal record of the most recent run for an item id; superseded by the
/// next `begin_run` for that id.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub item_id: String,
    pub outcome: RunOutcomeKind,
    pub details: Option<String>,
    pub finished_at: DateTime<Utc>,
    pub actor: Option<String>,
    pub started_at: DateTime<Utc>,
    pub cancel_requested_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancellationStatus {
    #[serde(rename = "CANCELLATION_REQUESTED")]
    Requested,
    NotFound,
    AlreadyCancelled,
    AlreadyFinished,
    AlreadyAborted,
    InvalidId,
    AbortFailed,
}

struct RegistryInner {
    active: Mutex<HashMap<String, ActiveRun>>,
    outcomes: Mutex<HashMap<String, RunOutcome>>,
}

/// Process-lifetime registry enforcing at most one active run per item id.
#[derive(Clone)]
pub struct CancellationRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for CancellationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                active: Mutex::new(HashMap::new()),
                outcomes: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Registers a run and hands back its token plus the terminal
    /// transitions. A stale entry for the same id is overwritten; its later
    /// finalize becomes a no-op through the run-id identity guard.
    pub fn begin_run(
        &self,
        item_id: &str,
        actor: Option<String>,
    ) -> Result<RunHandle, EnrichError> {
        if item_id.trim().is_empty() {
            return Err(EnrichError::InvalidTarget("empty item id".into()));
        }
        let run_id = Uuid::new_v4();
        let token = RunToken::new();
        let started_at = Utc::now();
        let run = ActiveRun {
            run_id,
            token: token.clone(),
            status: RunStatus::Running,
            started_at,
            actor: actor.clone(),
        };

        {
            let mut active = self.inner.active.lock().unwrap();
            if let Some(stale) = active.insert(item_id.to_string(), run) {
                warn!(
                    target = "argus.registry",
                    item_id = %item_id,
                    stale_run_id = %stale.run_id,
                    "active_run_superseded"
                );
            }
        }
        self.inner.outcomes.lock().unwrap().remove(item_id);

        Ok(RunHandle {
            inner: self.inner.clone(),
            run_id,
            item_id: item_id.to_string(),
            token,
            actor,
            started_at,
            finalized: AtomicBool::new(false),
        })
    }

    /// Signals the active run for `item_id`. Signaling is synchronous; every
    /// non-success case reports a distinct status rather than a silent no-op.
    pub fn request_cancellation(
        &self,
        item_id: &str,
        request: &CancelRequest,
    ) -> CancellationStatus {
        if item_id.trim().is_empty() {
            return CancellationStatus::InvalidId;
        }

        {
            let mut active = self.inner.active.lock().unwrap();
            if let Some(run) = active.get_mut(item_id) {
                if run.status == RunStatus::Cancelling || run.token.is_cancelled() {
                    return CancellationStatus::AlreadyAborted;
                }
                let details = CancelDetails {
                    actor: request.actor.clone(),
                    reason: request.reason.clone(),
                    requested_at: Utc::now(),
                };
                if run.token.details.set(details).is_err() {
                    return CancellationStatus::AbortFailed;
                }
                run.token.cancel.cancel();
                run.status = RunStatus::Cancelling;
                info!(
                    target = "argus.registry",
                    item_id = %item_id,
                    actor = request.actor.as_deref().unwrap_or("unknown"),
                    "cancellation_requested"
                );
                return CancellationStatus::Requested;
            }
        }

        match self.inner.outcomes.lock().unwrap().get(item_id) {
            Some(outcome) if outcome.outcome == RunOutcomeKind::Cancelled => {
                CancellationStatus::AlreadyCancelled
            }
            Some(_) => CancellationStatus::AlreadyFinished,
            None => CancellationStatus::NotFound,
        }
    }

    /// Cheap cancellation checkpoint. The explicit token is preferred over a
    /// registry lookup.
    pub fn throw_if_cancelled(
        &self,
        item_id: &str,
        token: Option<&RunToken>,
    ) -> Result<(), EnrichError> {
        let cancelled_reason = match token {
            Some(token) => token.is_cancelled().then(|| token.reason()),
            None => {
                let active = self.inner.active.lock().unwrap();
                active
                    .get(item_id)
                    .filter(|run| run.token.is_cancelled())
                    .map(|run| run.token.reason())
            }
        };
        match cancelled_reason {
            Some(reason) => Err(EnrichError::RunCancelled { reason }),
            None => Ok(()),
        }
    }

    /// Idempotent status lookup for the most recent terminal run.
    pub fn outcome(&self, item_id: &str) -> Option<RunOutcome> {
        self.inner.outcomes.lock().unwrap().get(item_id).cloned()
    }
}

/// Finalization handle for one registered run. Each transition fires at most
/// once; repeat calls and stale calls (run superseded) are no-ops.
pub struct RunHandle {
    inner: Arc<RegistryInner>,
    run_id: Uuid,
    item_id: String,
    token: RunToken,
    actor: Option<String>,
    started_at: DateTime<Utc>,
    finalized: AtomicBool,
}

impl RunHandle {
    pub fn token(&self) -> RunToken {
        self.token.clone()
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn complete(&self, details: Option<String>) {
        self.finalize(RunOutcomeKind::Completed, details);
    }

    pub fn cancel(&self, details: Option<String>) {
        self.finalize(RunOutcomeKind::Cancelled, details);
    }

    pub fn fail(&self, details: Option<String>) {
        self.finalize(RunOutcomeKind::Failed, details);
    }

    fn finalize(&self, outcome: RunOutcomeKind, details: Option<String>) {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut active = self.inner.active.lock().unwrap();
        let still_ours = active
            .get(&self.item_id)
            .map(|run| run.run_id == self.run_id)
            .unwrap_or(false);
        if !still_ours {
            warn!(
                target = "argus.registry",
                item_id = %self.item_id,
                run_id = %self.run_id,
                "stale_finalize_ignored"
            );
            return;
        }
        active.remove(&self.item_id);
        drop(active);

        let record = RunOutcome {
            item_id: self.item_id.clone(),
            outcome,
            details,
            finished_at: Utc::now(),
            actor: self.actor.clone(),
            started_at: self.started_at,
            cancel_requested_at: self.token.details().map(|d| d.requested_at),
        };
        self.inner
            .outcomes
            .lock()
            .unwrap()
            .insert(self.item_id.clone(), record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cancel_req(reason: &str) -> CancelRequest {
        CancelRequest {
            actor: Some("tester".into()),
            reason: Some(reason.into()),
        }
    }

    #[test]
    fn empty_id_is_rejected() {
        let registry = CancellationRegistry::new();
        assert!(registry.begin_run("  ", None).is_err());
        assert_eq!(
            registry.request_cancellation("", &CancelRequest::default()),
            CancellationStatus::InvalidId
        );
    }

    #[test]
    fn cancellation_lifecycle_statuses() {
        let registry = CancellationRegistry::new();
        assert_eq!(
            registry.request_cancellation("box-1", &CancelRequest::default()),
            CancellationStatus::NotFound
        );

        let handle = registry.begin_run("box-1", Some("worker".into())).expect("run");
        assert_eq!(
            registry.request_cancellation("box-1", &cancel_req("operator request")),
            CancellationStatus::Requested
        );
        assert!(handle.token().is_cancelled());
        assert_eq!(
            handle.token().reason().as_deref(),
            Some("operator request")
        );
        // repeat after signaling is reported, not silently swallowed
        assert_eq!(
            registry.request_cancellation("box-1", &cancel_req("again")),
            CancellationStatus::AlreadyAborted
        );

        handle.cancel(Some("operator request".into()));
        assert_eq!(
            registry.request_cancellation("box-1", &CancelRequest::default()),
            CancellationStatus::AlreadyCancelled
        );
        let outcome = registry.outcome("box-1").expect("outcome");
        assert_eq!(outcome.outcome, RunOutcomeKind::Cancelled);
        assert!(outcome.cancel_requested_at.is_some());
    }

    #[test]
    fn finished_run_reports_already_finished() {
        let registry = CancellationRegistry::new();
        let handle = registry.begin_run("box-2", None).expect("run");
        handle.complete(Some("done".into()));
        assert_eq!(
            registry.request_cancellation("box-2", &CancelRequest::default()),
            CancellationStatus::AlreadyFinished
        );
    }

    #[test]
    fn stale_finalize_cannot_corrupt_successor() {
        let registry = CancellationRegistry::new();
        let first = registry.begin_run("box-3", None).expect("first");
        let second = registry.begin_run("box-3", None).expect("second");

        // late finalize from the superseded run is ignored
        first.fail(Some("late failure".into()));
        assert!(registry.outcome("box-3").is_none());
        assert_eq!(
            registry.request_cancellation("box-3", &cancel_req("stop")),
            CancellationStatus::Requested
        );
        assert!(second.token().is_cancelled());

        second.cancel(None);
        assert_eq!(
            registry.outcome("box-3").expect("outcome").outcome,
            RunOutcomeKind::Cancelled
        );
    }

    #[test]
    fn transitions_fire_exactly_once() {
        let registry = CancellationRegistry::new();
        let handle = registry.begin_run("box-4", None).expect("run");
        handle.complete(Some("first".into()));
        handle.fail(Some("second".into()));
        let outcome = registry.outcome("box-4").expect("outcome");
        assert_eq!(outcome.outcome, RunOutcomeKind::Completed);
        assert_eq!(outcome.details.as_deref(), Some("first"));
    }

    #[test]
    fn throw_if_cancelled_prefers_explicit_token() {
        let registry = CancellationRegistry::new();
        let handle = registry.begin_run("box-5", None).expect("run");
        let token = handle.token();
        assert!(registry.throw_if_cancelled("box-5", Some(&token)).is_ok());

        registry.request_cancellation("box-5", &cancel_req("stop now"));
        let err = registry
            .throw_if_cancelled("box-5", Some(&token))
            .expect_err("cancelled");
        assert_eq!(err.code(), "RUN_CANCELLED");
        assert!(err.to_string().contains("stop now"));

        // registry-lookup path works as well
        let err = registry
            .throw_if_cancelled("box-5", None)
            .expect_err("cancelled");
        assert_eq!(err.status(), 409);
    }
}
