//! Named actions delivered by the transport.
//!
//! The transport hands over `(action, payload)` pairs; payloads are camelCase
//! JSON. Anything that does not decode (missing fields, malformed ids,
//! unknown statuses) is a [`RewardError::Validation`] and touches nothing.

use crate::catalog::{NewEvent, NewReward};
use crate::processor::{ClaimRequest, RequestProcessor};
use crate::workflows::UserActionEvent;
use rewardflow_core::RewardError;
use rewardflow_core::types::{EventId, EventStatus, RequestId, RequestStatus, RewardId, UserId};
use rewardflow_runtime::{DispatchError, DispatcherHandle};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;

/// Action names understood by [`ActionRouter::handle`].
pub mod names {
    /// Claim an event's reward
    pub const REQUEST: &str = "reward.request";
    /// Read one of the caller's requests
    pub const GET_REQUEST_STATUS: &str = "reward.getRequestStatus";
    /// Fulfil an approved request
    pub const CLAIM: &str = "reward.claim";
    /// Admin approve or reject
    pub const ADMIN_UPDATE_REQUEST_STATUS: &str = "reward.adminUpdateRequestStatus";
    /// Evaluate an event condition for a user
    pub const CHECK_CONDITION: &str = "event.checkCondition";
    /// Create an event definition
    pub const CREATE_EVENT: &str = "event.create";
    /// Activate or deactivate an event
    pub const UPDATE_EVENT_STATUS: &str = "event.updateStatus";
    /// Attach a reward to an event
    pub const CREATE_REWARD: &str = "reward.create";
    /// Overwrite a reward's stock
    pub const UPDATE_REWARD_QUANTITY: &str = "reward.updateQuantity";
    /// A user's requests, newest first
    pub const LIST_REQUESTS: &str = "reward.listRequests";
    /// Record a user action and run the user-event workflow
    pub const USER_ACTION: &str = "user.action";
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestPayload {
    user_id: UserId,
    event_id: EventId,
    #[serde(flatten)]
    claim: ClaimRequest,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OwnedRequest {
    request_id: RequestId,
    user_id: UserId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdminUpdate {
    request_id: RequestId,
    status: RequestStatus,
    #[serde(default)]
    message: Option<String>,
    admin_id: UserId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConditionCheck {
    user_id: UserId,
    event_id: EventId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventStatusUpdate {
    event_id: EventId,
    status: EventStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuantityUpdate {
    reward_id: RewardId,
    quantity: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserRef {
    user_id: UserId,
}

/// Routes transport actions to the processor, catalog and dispatcher.
#[derive(Clone)]
pub struct ActionRouter {
    processor: Arc<RequestProcessor>,
    dispatcher: DispatcherHandle,
}

impl ActionRouter {
    /// Create a router.
    #[must_use]
    pub const fn new(processor: Arc<RequestProcessor>, dispatcher: DispatcherHandle) -> Self {
        Self {
            processor,
            dispatcher,
        }
    }

    /// Handle one action and return its JSON result.
    ///
    /// # Errors
    ///
    /// - [`RewardError::Validation`]: unknown action or undecodable payload
    /// - whatever the target operation returns
    #[tracing::instrument(skip(self, payload))]
    pub async fn handle(&self, action: &str, payload: Value) -> Result<Value, RewardError> {
        let result = self.route(action, payload).await;
        if let Err(error) = &result {
            tracing::debug!(code = error.code(), error = %error, "Action failed");
        }
        result
    }

    async fn route(&self, action: &str, payload: Value) -> Result<Value, RewardError> {
        let processor = &self.processor;
        match action {
            names::REQUEST => {
                let p: RequestPayload = decode(action, payload)?;
                let request = processor
                    .process_reward_request(p.user_id, p.event_id, p.claim)
                    .await?;
                Ok(json!(request))
            }
            names::GET_REQUEST_STATUS => {
                let p: OwnedRequest = decode(action, payload)?;
                Ok(json!(processor.get_request_status(p.request_id, p.user_id).await?))
            }
            names::CLAIM => {
                let p: OwnedRequest = decode(action, payload)?;
                Ok(json!(processor.claim(p.request_id, p.user_id).await?))
            }
            names::ADMIN_UPDATE_REQUEST_STATUS => {
                let p: AdminUpdate = decode(action, payload)?;
                let request = processor
                    .admin_update_request_status(p.request_id, p.status, p.message, p.admin_id)
                    .await?;
                Ok(json!(request))
            }
            names::CHECK_CONDITION => {
                let p: ConditionCheck = decode(action, payload)?;
                Ok(Value::Bool(
                    processor.check_condition(p.user_id, p.event_id).await?,
                ))
            }
            names::CREATE_EVENT => {
                let p: NewEvent = decode(action, payload)?;
                Ok(json!(processor.catalog().create_event(p).await?))
            }
            names::UPDATE_EVENT_STATUS => {
                let p: EventStatusUpdate = decode(action, payload)?;
                let event = processor
                    .catalog()
                    .update_event_status(p.event_id, p.status)
                    .await?;
                Ok(json!(event))
            }
            names::CREATE_REWARD => {
                let p: NewReward = decode(action, payload)?;
                Ok(json!(processor.catalog().create_reward(p).await?))
            }
            names::UPDATE_REWARD_QUANTITY => {
                let p: QuantityUpdate = decode(action, payload)?;
                let reward = processor
                    .inventory()
                    .set_quantity(p.reward_id, p.quantity, processor.now())
                    .await?;
                Ok(json!(reward))
            }
            names::LIST_REQUESTS => {
                let p: UserRef = decode(action, payload)?;
                Ok(json!(processor.list_requests(p.user_id).await?))
            }
            names::USER_ACTION => {
                let p: UserActionEvent = decode(action, payload)?;
                let run = self
                    .dispatcher
                    .dispatch(p.into_workflow_event())
                    .await
                    .map_err(dispatch_error)?;
                Ok(json!({ "runId": run.run_id() }))
            }
            unknown => Err(RewardError::Validation(format!("unknown action: {unknown}"))),
        }
    }
}

impl std::fmt::Debug for ActionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRouter")
            .field("processor", &self.processor)
            .finish_non_exhaustive()
    }
}

fn decode<T: DeserializeOwned>(action: &str, payload: Value) -> Result<T, RewardError> {
    serde_json::from_value(payload)
        .map_err(|e| RewardError::Validation(format!("invalid payload for {action}: {e}")))
}

fn dispatch_error(error: DispatchError) -> RewardError {
    match error {
        DispatchError::NoWorkflow(name) => {
            RewardError::Validation(format!("no workflow handles {name}"))
        }
        other => RewardError::TransientInfra(other.to_string()),
    }
}
