//! Background workflows run by the dispatcher.
//!
//! - [`UserEventWorkflow`] (`user/*`): records a user action in the event log,
//!   then requests rewards for every active event of that type whose
//!   condition now holds.
//! - [`RewardProcessWorkflow`] ([`REWARD_QUEUED`]): finishes a request queued
//!   in deferred mode.
//!
//! Each side effect runs inside a named step, so a retried run replays
//! finished steps from the journal instead of repeating them.

use crate::condition::Evaluation;
use crate::processor::{ClaimRequest, Delivery, REWARD_QUEUED, RequestProcessor};
use chrono::{DateTime, Utc};
use rewardflow_core::BoxFuture;
use rewardflow_core::store::EventLogStore;
use rewardflow_core::types::{
    EventDefinition, EventLogEntry, EventType, LogEntryId, RequestId, RequestStatus, RewardRequest,
    UserId,
};
use rewardflow_runtime::{StepRunner, Workflow, WorkflowError, WorkflowEvent};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// A user action delivered by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserActionEvent {
    /// Acting user
    pub user_id: UserId,
    /// Kind of action
    pub event_type: EventType,
    /// Action payload (`questId`, `newLevel`, ...)
    #[serde(default)]
    pub data: serde_json::Value,
    /// When the action happened; defaults to the dispatch time
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
}

impl UserActionEvent {
    /// Dispatcher event name, e.g. `user/daily_login`.
    #[must_use]
    pub fn event_name(&self) -> String {
        format!("user/{}", self.event_type.as_str().to_ascii_lowercase())
    }

    /// Wrap the action for dispatch under a fresh run id.
    #[must_use]
    pub fn into_workflow_event(self) -> WorkflowEvent {
        let name = self.event_name();
        WorkflowEvent::new(name, json!(self))
    }
}

/// Appends user actions to the log and requests the rewards they unlock.
pub struct UserEventWorkflow {
    processor: Arc<RequestProcessor>,
    event_log: Arc<dyn EventLogStore>,
}

impl UserEventWorkflow {
    /// Stable workflow id.
    pub const ID: &'static str = "user-event";

    /// Create the workflow.
    #[must_use]
    pub fn new(processor: Arc<RequestProcessor>, event_log: Arc<dyn EventLogStore>) -> Self {
        Self {
            processor,
            event_log,
        }
    }

    async fn execute(
        &self,
        event: &WorkflowEvent,
        steps: &StepRunner,
    ) -> Result<serde_json::Value, WorkflowError> {
        let action: UserActionEvent = event.payload()?;

        // The run id doubles as the entry id so redelivery appends once.
        let entry_id: LogEntryId = steps
            .run("append-log", || async {
                let entry = EventLogEntry {
                    id: LogEntryId::from_uuid(event.id),
                    user_id: action.user_id,
                    event_type: action.event_type.clone(),
                    data: action.data.clone(),
                    timestamp: action.occurred_at.unwrap_or(event.timestamp),
                };
                let id = entry.id;
                self.event_log
                    .append(entry)
                    .await
                    .map(|()| id)
                    .map_err(WorkflowError::from)
            })
            .await?;

        let events: Vec<EventDefinition> = steps
            .run("active-events", || async {
                self.processor
                    .catalog()
                    .active_events_of_type(action.event_type.clone())
                    .await
                    .map_err(WorkflowError::from)
            })
            .await?;

        let mut requests = Vec::new();
        for definition in &events {
            let evaluation: Evaluation = steps
                .run(&format!("check:{}", definition.id), || {
                    self.check(action.user_id, definition)
                })
                .await?;
            if !evaluation.is_satisfied() {
                continue;
            }

            let request: Option<RewardRequest> = steps
                .run(&format!("process:{}", definition.id), || {
                    self.request(action.user_id, definition)
                })
                .await?;
            requests.extend(request);
        }

        tracing::info!(
            run_id = %event.id,
            user_id = %action.user_id,
            event_type = %action.event_type,
            evaluated = events.len(),
            requested = requests.len(),
            "User action processed"
        );

        Ok(json!({
            "logEntryId": entry_id,
            "evaluated": events.len(),
            "requests": requests,
        }))
    }

    /// Malformed conditions count as unmet; only transient failures retry.
    async fn check(
        &self,
        user_id: UserId,
        definition: &EventDefinition,
    ) -> Result<Evaluation, WorkflowError> {
        match self.processor.conditions().evaluate(user_id, definition).await {
            Ok(evaluation) => Ok(evaluation),
            Err(error) if error.is_retryable() => Err(error.into()),
            Err(error) => {
                tracing::warn!(
                    event_id = %definition.id,
                    error = %error,
                    "Condition could not be evaluated"
                );
                Ok(Evaluation::NotSatisfied)
            }
        }
    }

    async fn request(
        &self,
        user_id: UserId,
        definition: &EventDefinition,
    ) -> Result<Option<RewardRequest>, WorkflowError> {
        match self
            .processor
            .process_reward_request(user_id, definition.id, ClaimRequest::default())
            .await
        {
            Ok(request) => Ok(Some(request)),
            Err(error) if error.is_retryable() => Err(error.into()),
            Err(error) => {
                tracing::warn!(
                    event_id = %definition.id,
                    user_id = %user_id,
                    error = %error,
                    "Reward request not created"
                );
                Ok(None)
            }
        }
    }
}

impl Workflow for UserEventWorkflow {
    fn id(&self) -> &str {
        Self::ID
    }

    fn trigger(&self) -> &str {
        "user/*"
    }

    fn run<'a>(
        &'a self,
        event: &'a WorkflowEvent,
        steps: &'a StepRunner,
    ) -> BoxFuture<'a, Result<serde_json::Value, WorkflowError>> {
        Box::pin(self.execute(event, steps))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueuedRequest {
    request_id: RequestId,
}

/// Finishes deferred requests: re-checks the condition, routes by approval
/// mode and fulfils auto-approved requests.
///
/// A run that fails for good marks its request FAILED with the error.
pub struct RewardProcessWorkflow {
    processor: Arc<RequestProcessor>,
}

impl RewardProcessWorkflow {
    /// Stable workflow id.
    pub const ID: &'static str = "reward-process";

    /// Create the workflow.
    #[must_use]
    pub const fn new(processor: Arc<RequestProcessor>) -> Self {
        Self { processor }
    }

    async fn execute(
        &self,
        event: &WorkflowEvent,
        steps: &StepRunner,
    ) -> Result<serde_json::Value, WorkflowError> {
        let QueuedRequest { request_id } = event.payload()?;

        let request = self.processor.find_request(request_id).await?;
        if !matches!(
            request.status,
            RequestStatus::Pending | RequestStatus::Approved
        ) {
            tracing::debug!(
                request_id = %request_id,
                status = ?request.status,
                "Queued request already settled"
            );
            return Ok(json!(request));
        }

        let evaluation: Evaluation = steps
            .run("check-condition", || async {
                self.processor
                    .evaluate_for(&request)
                    .await
                    .map_err(WorkflowError::from)
            })
            .await?;

        let routed: RewardRequest = steps
            .run("route", || async {
                self.processor
                    .route_queued(request_id, evaluation)
                    .await
                    .map_err(WorkflowError::from)
            })
            .await?;

        if routed.status != RequestStatus::Approved {
            return Ok(json!(routed));
        }

        let fulfilled: RewardRequest = steps
            .run("fulfil", || async {
                self.processor
                    .fulfil_approved(request_id, Delivery::Background)
                    .await
                    .map_err(WorkflowError::from)
            })
            .await?;

        Ok(json!(fulfilled))
    }
}

impl Workflow for RewardProcessWorkflow {
    fn id(&self) -> &str {
        Self::ID
    }

    fn trigger(&self) -> &str {
        REWARD_QUEUED
    }

    fn run<'a>(
        &'a self,
        event: &'a WorkflowEvent,
        steps: &'a StepRunner,
    ) -> BoxFuture<'a, Result<serde_json::Value, WorkflowError>> {
        Box::pin(self.execute(event, steps))
    }

    fn on_failure<'a>(
        &'a self,
        event: &'a WorkflowEvent,
        error: &'a WorkflowError,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let Ok(QueuedRequest { request_id }) = event.payload() else {
                return;
            };
            if let Err(e) = self.processor.mark_failed(request_id, error.to_string()).await {
                tracing::error!(
                    request_id = %request_id,
                    error = %e,
                    "Could not record workflow failure on request"
                );
            }
        })
    }
}
