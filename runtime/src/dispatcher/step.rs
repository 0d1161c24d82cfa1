//! Named, memoized workflow steps.
//!
//! A workflow run may be attempted several times. Each named step's output is
//! written to a [`StepJournal`] keyed by run id, so a retried attempt replays
//! completed steps from the journal instead of repeating their side effects.

use super::workflow::WorkflowError;
use rewardflow_core::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// Per-run storage of step outputs.
///
/// Step names passed here are already scoped by workflow id.
pub trait StepJournal: Send + Sync {
    /// The recorded output of `step` in `run_id`, if it completed before.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Journal`] if the journal cannot be read.
    fn load<'a>(
        &'a self,
        run_id: Uuid,
        step: &'a str,
    ) -> BoxFuture<'a, Result<Option<serde_json::Value>, WorkflowError>>;

    /// Record the output of a completed step.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Journal`] if the journal cannot be written.
    fn record<'a>(
        &'a self,
        run_id: Uuid,
        step: &'a str,
        output: serde_json::Value,
    ) -> BoxFuture<'a, Result<(), WorkflowError>>;
}

/// Process-local journal. Memoization survives retries but not restarts.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStepJournal {
    entries: Arc<Mutex<HashMap<(Uuid, String), serde_json::Value>>>,
}

impl InMemoryStepJournal {
    /// Create an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded step outputs across all runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StepJournal for InMemoryStepJournal {
    fn load<'a>(
        &'a self,
        run_id: Uuid,
        step: &'a str,
    ) -> BoxFuture<'a, Result<Option<serde_json::Value>, WorkflowError>> {
        let cached = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(run_id, step.to_string()))
            .cloned();
        Box::pin(async move { Ok(cached) })
    }

    fn record<'a>(
        &'a self,
        run_id: Uuid,
        step: &'a str,
        output: serde_json::Value,
    ) -> BoxFuture<'a, Result<(), WorkflowError>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((run_id, step.to_string()), output);
        Box::pin(async { Ok(()) })
    }
}

/// Executes named steps for one workflow run.
#[derive(Clone)]
pub struct StepRunner {
    run_id: Uuid,
    workflow_id: String,
    journal: Arc<dyn StepJournal>,
}

impl StepRunner {
    /// Create a runner for `run_id` of `workflow_id`.
    #[must_use]
    pub fn new(run_id: Uuid, workflow_id: impl Into<String>, journal: Arc<dyn StepJournal>) -> Self {
        Self {
            run_id,
            workflow_id: workflow_id.into(),
            journal,
        }
    }

    /// The run this runner belongs to.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Run `step` once per run.
    ///
    /// If the journal already holds an output for `name`, it is decoded and
    /// returned without calling `step`. Otherwise `step` runs and its output is
    /// recorded before being returned. A failing step records nothing.
    ///
    /// # Errors
    ///
    /// Returns the step's own error, or [`WorkflowError::Journal`] when the
    /// journal cannot be read, written or decoded.
    pub async fn run<T, F, Fut>(&self, name: &str, step: F) -> Result<T, WorkflowError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, WorkflowError>>,
    {
        let key = format!("{}:{name}", self.workflow_id);

        if let Some(cached) = self.journal.load(self.run_id, &key).await? {
            metrics::counter!("dispatcher_step_cache_hits_total").increment(1);
            tracing::debug!(run_id = %self.run_id, step = %key, "Replaying memoized step");
            return serde_json::from_value(cached)
                .map_err(|e| WorkflowError::Journal(format!("decode step {key}: {e}")));
        }

        let output = step().await?;
        let value = serde_json::to_value(&output)
            .map_err(|e| WorkflowError::Journal(format!("encode step {key}: {e}")))?;
        self.journal.record(self.run_id, &key, value).await?;
        tracing::debug!(run_id = %self.run_id, step = %key, "Step completed");

        Ok(output)
    }
}

impl std::fmt::Debug for StepRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRunner")
            .field("run_id", &self.run_id)
            .field("workflow_id", &self.workflow_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn completed_steps_are_replayed_from_the_journal() {
        let journal = Arc::new(InMemoryStepJournal::new());
        let run_id = Uuid::new_v4();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let runner = StepRunner::new(run_id, "wf", journal.clone());
            let value: u32 = runner
                .run("count", || async {
                    Ok(u32::try_from(calls.fetch_add(1, Ordering::SeqCst)).unwrap_or(0) + 10)
                })
                .await
                .unwrap();
            assert_eq!(value, 10);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(journal.len(), 1);
    }

    #[tokio::test]
    async fn failed_steps_are_not_recorded() {
        let journal = Arc::new(InMemoryStepJournal::new());
        let runner = StepRunner::new(Uuid::new_v4(), "wf", journal.clone());

        let result: Result<(), _> = runner
            .run("flaky", || async {
                Err(WorkflowError::Transient("timeout".to_string()))
            })
            .await;

        assert!(result.is_err());
        assert!(journal.is_empty());
    }

    #[tokio::test]
    async fn steps_are_scoped_per_run_and_workflow() {
        let journal = Arc::new(InMemoryStepJournal::new());
        let run_id = Uuid::new_v4();

        let a = StepRunner::new(run_id, "wf-a", journal.clone());
        let b = StepRunner::new(run_id, "wf-b", journal.clone());
        let c = StepRunner::new(Uuid::new_v4(), "wf-a", journal.clone());

        let first: String = a.run("s", || async { Ok("a".to_string()) }).await.unwrap();
        let second: String = b.run("s", || async { Ok("b".to_string()) }).await.unwrap();
        let third: String = c.run("s", || async { Ok("c".to_string()) }).await.unwrap();

        assert_eq!((first.as_str(), second.as_str(), third.as_str()), ("a", "b", "c"));
        assert_eq!(journal.len(), 3);
    }
}
