//! Workflow definitions and the events that trigger them.

use super::step::StepRunner;
use chrono::{DateTime, Utc};
use rewardflow_core::{BoxFuture, RewardError, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A named event delivered to the dispatcher.
///
/// The event id doubles as the run id: redelivering the same event reuses the
/// step journal of the earlier run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    /// Run id
    pub id: Uuid,
    /// Event name, matched against workflow triggers (e.g. `user/login`)
    pub name: String,
    /// Event payload
    pub data: serde_json::Value,
    /// When the event was created
    pub timestamp: DateTime<Utc>,
}

impl WorkflowEvent {
    /// A new event with a fresh run id.
    #[must_use]
    pub fn new(name: impl Into<String>, data: serde_json::Value) -> Self {
        Self::with_id(Uuid::new_v4(), name, data)
    }

    /// An event with a caller-chosen run id.
    #[must_use]
    pub fn with_id(id: Uuid, name: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id,
            name: name.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    /// Decode the payload into a typed struct.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Permanent`] when the payload does not match;
    /// retrying a malformed event cannot help.
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, WorkflowError> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            WorkflowError::Permanent(format!("malformed payload for {}: {e}", self.name))
        })
    }
}

/// Workflow failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    /// A dependency failed in a way that may succeed on retry.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// A failure that retrying will reproduce.
    #[error("Permanent failure: {0}")]
    Permanent(String),

    /// The step journal could not be read or written.
    #[error("Step journal error: {0}")]
    Journal(String),
}

impl WorkflowError {
    /// Whether the dispatcher should run the workflow again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Journal(_))
    }
}

impl From<RewardError> for WorkflowError {
    fn from(error: RewardError) -> Self {
        if error.is_retryable() {
            Self::Transient(error.to_string())
        } else {
            Self::Permanent(error.to_string())
        }
    }
}

impl From<StoreError> for WorkflowError {
    fn from(error: StoreError) -> Self {
        RewardError::from(error).into()
    }
}

/// A multi-step background process.
///
/// `run` may be invoked several times for the same event (retries and
/// redelivery); side effects belong inside [`StepRunner::run`] so completed
/// steps are skipped on later attempts.
pub trait Workflow: Send + Sync {
    /// Stable identifier, used for metrics and step scoping.
    fn id(&self) -> &str;

    /// Event name pattern. A trailing `*` matches any suffix (`user/*`).
    fn trigger(&self) -> &str;

    /// Execute one attempt of the workflow.
    fn run<'a>(
        &'a self,
        event: &'a WorkflowEvent,
        steps: &'a StepRunner,
    ) -> BoxFuture<'a, Result<serde_json::Value, WorkflowError>>;

    /// Called once after the final attempt failed.
    ///
    /// The default does nothing; workflows use it to record the failure on
    /// the entity they were processing.
    fn on_failure<'a>(
        &'a self,
        _event: &'a WorkflowEvent,
        _error: &'a WorkflowError,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }
}

/// Whether an event name satisfies a trigger pattern.
#[must_use]
pub fn trigger_matches(pattern: &str, name: &str) -> bool {
    pattern
        .strip_suffix('*')
        .map_or_else(|| pattern == name, |prefix| name.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_triggers_match_prefixes() {
        assert!(trigger_matches("user/*", "user/login"));
        assert!(trigger_matches("user/*", "user/"));
        assert!(!trigger_matches("user/*", "reward/request.queued"));
        assert!(trigger_matches("reward/request.queued", "reward/request.queued"));
        assert!(!trigger_matches("reward/request.queued", "reward/request.queued.v2"));
    }

    #[test]
    fn reward_errors_split_by_retryability() {
        let transient: WorkflowError = RewardError::TransientInfra("db".into()).into();
        assert!(transient.is_retryable());

        let permanent: WorkflowError = RewardError::Validation("bad".into()).into();
        assert!(!permanent.is_retryable());
    }
}
