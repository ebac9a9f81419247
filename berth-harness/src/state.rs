//! Arrangement state machine.
//!
//! ```text
//! Idle -> NetworkCreated -> DatabaseReady -> ApplicationReady -> Provisioned
//!      -> TestRunning -> Passed | Failed
//!
//! any state -> TornDown (exactly once per attempt)
//! ```
//!
//! Every attempt gets its own history so retries can be inspected afterwards.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use berth_runtime::BuildProgress;
use serde::Serialize;

/// Lifecycle state of one arrangement attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArrangementState {
    Idle,
    NetworkCreated,
    DatabaseReady,
    ApplicationReady,
    Provisioned,
    TestRunning,
    Passed,
    Failed,
    TornDown,
}

impl ArrangementState {
    /// Whether `next` may follow `self`.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ArrangementState::*;
        match (self, next) {
            (TornDown, _) => false,
            (_, TornDown) => true,
            (Idle, NetworkCreated)
            | (NetworkCreated, DatabaseReady)
            | (DatabaseReady, ApplicationReady)
            | (ApplicationReady, Provisioned)
            | (Provisioned, TestRunning)
            | (TestRunning, Passed)
            | (TestRunning, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ArrangementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::NetworkCreated => "network_created",
            Self::DatabaseReady => "database_ready",
            Self::ApplicationReady => "application_ready",
            Self::Provisioned => "provisioned",
            Self::TestRunning => "test_running",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::TornDown => "torn_down",
        };
        f.write_str(name)
    }
}

impl From<BuildProgress> for ArrangementState {
    fn from(progress: BuildProgress) -> Self {
        match progress {
            BuildProgress::NetworkCreated => Self::NetworkCreated,
            BuildProgress::DatabaseReady => Self::DatabaseReady,
            BuildProgress::ApplicationReady => Self::ApplicationReady,
        }
    }
}

/// Shared recorder of per-attempt state histories.
///
/// Cheap to clone; clones observe the same histories.
#[derive(Debug, Clone, Default)]
pub struct StateTracker {
    attempts: Arc<Mutex<Vec<Vec<ArrangementState>>>>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new attempt in [`ArrangementState::Idle`].
    pub fn begin_attempt(&self) {
        self.lock().push(vec![ArrangementState::Idle]);
    }

    /// Record `next` for the current attempt.
    ///
    /// Illegal transitions are logged and ignored. Returns whether the state
    /// was recorded.
    pub fn transition(&self, next: ArrangementState) -> bool {
        let mut attempts = self.lock();
        let attempt = attempts.len();
        let Some(history) = attempts.last_mut() else {
            tracing::warn!(state = %next, "state transition without an attempt");
            return false;
        };
        let current = history.last().copied().unwrap_or(ArrangementState::Idle);
        if !current.can_transition_to(next) {
            tracing::warn!(attempt, from = %current, to = %next, "ignoring illegal state transition");
            return false;
        }
        tracing::debug!(attempt, from = %current, to = %next, "arrangement state changed");
        history.push(next);
        true
    }

    /// State of the current attempt.
    pub fn current(&self) -> Option<ArrangementState> {
        self.lock().last().and_then(|h| h.last().copied())
    }

    /// Every attempt's history, oldest first.
    pub fn attempt_history(&self) -> Vec<Vec<ArrangementState>> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Vec<ArrangementState>>> {
        self.attempts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
