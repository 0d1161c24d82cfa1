//! Reward request processing.
//!
//! The [`RequestProcessor`] turns a claim into a durable state transition:
//!
//! 1. Resolve the idempotency key; a known key returns the stored request
//! 2. Record the request as PENDING (the unique key makes this the claim)
//! 3. Reject if the event is inactive, has no reward, or the reward is depleted
//! 4. Evaluate the event condition (inline mode) or queue the background
//!    workflow (deferred mode; a full or closed queue falls back to inline)
//! 5. Manual events stop at PENDING; auto events are approved, stock is taken
//!    and the request completes, or fails with the decrement error
//!
//! Every write is a compare-and-set on the request status, so two actors
//! racing on one request cannot both move it. Once a request is recorded, any
//! processing error is written into it as FAILED rather than lost.
//!
//! # Reconciliation
//!
//! If stock was taken but the COMPLETED write keeps failing, the request is
//! marked FAILED with a message naming the reward and
//! `rewards_reconciliation_required_total` is incremented. Stock is never
//! re-incremented automatically.

use crate::catalog::Catalog;
use crate::condition::{ConditionEvaluator, Evaluation};
use crate::inventory::InventoryService;
use rewardflow_core::environment::Clock;
use rewardflow_core::store::{InsertOutcome, RewardRequestStore, StoreError};
use rewardflow_core::types::{
    ActorId, ApprovalMode, EventDefinition, EventId, EventStatus, RequestId, RequestStatus, Reward,
    RewardId, RewardRequest, UserId,
};
use rewardflow_core::{DateTime, IdempotencyKey, RewardError, Utc};
use rewardflow_runtime::retry::retry_with_predicate;
use rewardflow_runtime::{DispatchError, DispatcherHandle, RetryPolicy, WorkflowEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

/// Event name that triggers background processing of a queued request.
pub const REWARD_QUEUED: &str = "reward/request.queued";

/// Where condition evaluation and fulfilment run for new requests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    /// Everything runs on the caller's path
    #[default]
    Inline,
    /// The request is screened, left PENDING and finished by the
    /// reward-process workflow
    Deferred,
}

impl FromStr for ProcessingMode {
    type Err = RewardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inline" => Ok(Self::Inline),
            "deferred" => Ok(Self::Deferred),
            other => Err(RewardError::Validation(format!(
                "unknown processing mode: {other}"
            ))),
        }
    }
}

/// Optional parts of a reward claim.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClaimRequest {
    /// Specific reward; defaults to the event's first reward
    pub reward_id: Option<RewardId>,
    /// Caller-chosen deduplication key; derived from user and event if absent
    pub idempotency_key: Option<String>,
}

/// Who is driving a fulfilment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// A caller is waiting: every failure is recorded on the request
    Inline,
    /// A dispatcher run: transient failures are returned so the run retries
    Background,
}

/// Processing knobs.
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    /// Inline or deferred processing of new requests
    pub mode: ProcessingMode,
    /// Whether event conditions gate approval
    pub evaluate_conditions: bool,
    /// Backoff for the status write that follows a successful decrement
    pub status_retry: RetryPolicy,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            mode: ProcessingMode::Inline,
            evaluate_conditions: true,
            status_retry: RetryPolicy::default(),
        }
    }
}

/// Requests currently between decrement and status write in this process.
#[derive(Debug, Default, Clone)]
struct InFlight(Arc<Mutex<HashSet<RequestId>>>);

impl InFlight {
    fn enter(&self, id: RequestId) -> Option<InFlightGuard> {
        let inserted = self
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
        inserted.then(|| InFlightGuard {
            set: Arc::clone(&self.0),
            id,
        })
    }
}

struct InFlightGuard {
    set: Arc<Mutex<HashSet<RequestId>>>,
    id: RequestId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Orchestrates reward requests from claim to terminal state.
pub struct RequestProcessor {
    catalog: Catalog,
    inventory: InventoryService,
    requests: Arc<dyn RewardRequestStore>,
    conditions: Arc<ConditionEvaluator>,
    clock: Arc<dyn Clock>,
    dispatcher: Option<DispatcherHandle>,
    settings: ProcessorSettings,
    in_flight: InFlight,
}

impl RequestProcessor {
    /// Create an inline processor with default settings.
    #[must_use]
    pub fn new(
        catalog: Catalog,
        inventory: InventoryService,
        requests: Arc<dyn RewardRequestStore>,
        conditions: Arc<ConditionEvaluator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            catalog,
            inventory,
            requests,
            conditions,
            clock,
            dispatcher: None,
            settings: ProcessorSettings::default(),
            in_flight: InFlight::default(),
        }
    }

    /// Replace the processing settings.
    #[must_use]
    pub fn with_settings(mut self, settings: ProcessorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Dispatcher used to queue deferred requests.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: DispatcherHandle) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Event and reward lookup.
    #[must_use]
    pub const fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Reward stock.
    #[must_use]
    pub const fn inventory(&self) -> &InventoryService {
        &self.inventory
    }

    /// Condition strategies.
    #[must_use]
    pub fn conditions(&self) -> &ConditionEvaluator {
        &self.conditions
    }

    /// Active settings.
    #[must_use]
    pub const fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    /// Current time on the processor's clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Process a user's claim on an event's reward.
    ///
    /// Repeating the call with the same idempotency key returns the stored
    /// request unchanged, whatever its status.
    ///
    /// # Errors
    ///
    /// Nothing is recorded when these are returned:
    ///
    /// - [`RewardError::Validation`]: malformed idempotency key
    /// - [`RewardError::NotFound`]: unknown event
    /// - [`RewardError::Conflict`]: an active request for the event exists
    ///   under another key, or the key belongs to another user or event
    /// - [`RewardError::TransientInfra`]: store failure before the request
    ///   was recorded
    ///
    /// After the request is recorded, failures are written into it as FAILED.
    #[tracing::instrument(skip(self, claim))]
    pub async fn process_reward_request(
        &self,
        user_id: UserId,
        event_id: EventId,
        claim: ClaimRequest,
    ) -> Result<RewardRequest, RewardError> {
        let key = match claim.idempotency_key {
            Some(raw) => IdempotencyKey::parse(raw)?,
            None => IdempotencyKey::for_reward_request(&user_id, &event_id),
        };

        if let Some(existing) = self.requests.find_by_key(key.clone()).await? {
            tracing::debug!(
                request_id = %existing.id,
                status = ?existing.status,
                "Idempotency key already used, returning stored request"
            );
            return replay(existing, user_id, event_id);
        }

        let event = self.catalog.find_event(event_id).await?;

        let active = self.requests.find_active(user_id, event_id).await?;
        if let Some(active) = active.filter(|r| r.idempotency_key != key) {
            return Err(RewardError::Conflict(format!(
                "request {} for event {event_id} is already {}",
                active.id, active.status
            )));
        }

        let pending = RewardRequest::pending(user_id, event_id, claim.reward_id, key, self.now());
        let request = match self.requests.insert_unique(pending).await? {
            InsertOutcome::Inserted(request) => request,
            InsertOutcome::Existing(existing) => return replay(existing, user_id, event_id),
        };
        tracing::info!(request_id = %request.id, "Reward request recorded");

        let request_id = request.id;
        let decided = match self.decide(request, &event).await {
            Ok(decided) => decided,
            Err(error) => {
                tracing::warn!(
                    request_id = %request_id,
                    error = %error,
                    "Reward request processing failed"
                );
                self.mark_failed(request_id, error.to_string()).await?
            }
        };

        record_outcome(outcome_label(decided.status));
        Ok(decided)
    }

    /// Whether `user_id` currently fulfils `event_id`'s condition.
    ///
    /// Unsupported event types report `false`.
    ///
    /// # Errors
    ///
    /// - [`RewardError::NotFound`]: unknown event
    /// - [`RewardError::Validation`]: malformed condition
    /// - [`RewardError::TransientInfra`]: log read failed or timed out
    pub async fn check_condition(
        &self,
        user_id: UserId,
        event_id: EventId,
    ) -> Result<bool, RewardError> {
        let event = self.catalog.find_event(event_id).await?;
        Ok(self
            .conditions
            .evaluate(user_id, &event)
            .await?
            .is_satisfied())
    }

    /// Evaluate the condition gating `request`.
    ///
    /// Always satisfied when condition evaluation is disabled.
    ///
    /// # Errors
    ///
    /// - [`RewardError::NotFound`]: the request's event is gone
    /// - [`RewardError::Validation`]: malformed condition
    /// - [`RewardError::TransientInfra`]: log read failed or timed out
    pub async fn evaluate_for(&self, request: &RewardRequest) -> Result<Evaluation, RewardError> {
        let event = self.catalog.find_event(request.event_id).await?;
        self.evaluate(request.user_id, &event).await
    }

    /// Screen and route a queued request given its condition outcome.
    ///
    /// Requests that are no longer PENDING come back unchanged. Otherwise the
    /// result is REJECTED, PENDING (manual approval) or APPROVED (ready for
    /// [`RequestProcessor::fulfil_approved`]).
    ///
    /// # Errors
    ///
    /// - [`RewardError::NotFound`]: unknown request or event
    /// - [`RewardError::TransientInfra`]: store failure
    pub async fn route_queued(
        &self,
        request_id: RequestId,
        evaluation: Evaluation,
    ) -> Result<RewardRequest, RewardError> {
        let request = self.find_request(request_id).await?;
        if request.status != RequestStatus::Pending {
            return Ok(request);
        }

        let event = self.catalog.find_event(request.event_id).await?;
        let request = self.screen(request, &event).await?;
        if request.status.is_terminal() {
            return Ok(request);
        }
        self.gate(request, &event, evaluation).await
    }

    /// Take stock for an APPROVED request and complete it.
    ///
    /// Requests in any other status come back unchanged.
    ///
    /// # Errors
    ///
    /// - [`RewardError::NotFound`]: unknown request
    /// - [`RewardError::TransientInfra`]: background delivery only, when the
    ///   decrement hit a transient failure
    /// - [`RewardError::ReconciliationRequired`]: stock was taken but no
    ///   outcome could be recorded
    pub async fn fulfil_approved(
        &self,
        request_id: RequestId,
        delivery: Delivery,
    ) -> Result<RewardRequest, RewardError> {
        self.fulfil(request_id, ActorId::system(), delivery).await
    }

    /// Admin approval: PENDING → APPROVED, then take stock and complete.
    ///
    /// # Errors
    ///
    /// - [`RewardError::NotFound`]: unknown request
    /// - [`RewardError::InvalidStateTransition`]: the request is not PENDING
    /// - [`RewardError::ReconciliationRequired`]: stock was taken but no
    ///   outcome could be recorded
    #[tracing::instrument(skip(self))]
    pub async fn approve_reward_request(
        &self,
        request_id: RequestId,
        admin_id: UserId,
    ) -> Result<RewardRequest, RewardError> {
        let actor = ActorId::user(&admin_id);
        let request = self.find_request(request_id).await?;
        let approved = request.approved(actor.clone(), self.now())?;
        self.write(approved, RequestStatus::Pending).await?;
        tracing::info!(request_id = %request_id, "Reward request approved");

        let fulfilled = self.fulfil(request_id, actor, Delivery::Inline).await?;
        record_outcome(outcome_label(fulfilled.status));
        Ok(fulfilled)
    }

    /// Admin rejection: PENDING → REJECTED with `reason`.
    ///
    /// # Errors
    ///
    /// - [`RewardError::NotFound`]: unknown request
    /// - [`RewardError::InvalidStateTransition`]: the request is not PENDING
    #[tracing::instrument(skip(self, reason))]
    pub async fn reject_reward_request(
        &self,
        request_id: RequestId,
        reason: String,
        admin_id: UserId,
    ) -> Result<RewardRequest, RewardError> {
        let request = self.find_request(request_id).await?;
        let rejected = request.rejected(reason, ActorId::user(&admin_id), self.now())?;
        let rejected = self.write(rejected, RequestStatus::Pending).await?;

        tracing::info!(request_id = %request_id, "Reward request rejected by admin");
        record_outcome(outcome_label(rejected.status));
        Ok(rejected)
    }

    /// Admin status update.
    ///
    /// APPROVED moves PENDING → APPROVED and leaves the request for the user
    /// to claim; REJECTED behaves like
    /// [`RequestProcessor::reject_reward_request`].
    ///
    /// # Errors
    ///
    /// - [`RewardError::Validation`]: any other target status
    /// - [`RewardError::NotFound`]: unknown request
    /// - [`RewardError::InvalidStateTransition`]: the request is not PENDING
    #[tracing::instrument(skip(self, message))]
    pub async fn admin_update_request_status(
        &self,
        request_id: RequestId,
        status: RequestStatus,
        message: Option<String>,
        admin_id: UserId,
    ) -> Result<RewardRequest, RewardError> {
        match status {
            RequestStatus::Approved => {
                let request = self.find_request(request_id).await?;
                let approved = request.transitioned(
                    RequestStatus::Approved,
                    message,
                    ActorId::user(&admin_id),
                    self.now(),
                )?;
                let approved = self.write(approved, RequestStatus::Pending).await?;
                tracing::info!(request_id = %request_id, "Reward request approved, awaiting claim");
                Ok(approved)
            }
            RequestStatus::Rejected => {
                let reason = message.unwrap_or_else(|| "rejected by admin".to_string());
                self.reject_reward_request(request_id, reason, admin_id).await
            }
            other => Err(RewardError::Validation(format!(
                "admins may set APPROVED or REJECTED, not {other}"
            ))),
        }
    }

    /// User claim of an APPROVED request: take stock and complete.
    ///
    /// Claiming an already COMPLETED request returns it unchanged.
    ///
    /// # Errors
    ///
    /// - [`RewardError::NotFound`]: unknown request
    /// - [`RewardError::Forbidden`]: the request belongs to another user
    /// - [`RewardError::InvalidStateTransition`]: the request is neither
    ///   APPROVED nor COMPLETED
    /// - [`RewardError::Conflict`]: the request is being fulfilled right now
    #[tracing::instrument(skip(self))]
    pub async fn claim(
        &self,
        request_id: RequestId,
        user_id: UserId,
    ) -> Result<RewardRequest, RewardError> {
        let request = self.find_request(request_id).await?;
        ensure_owner(&request, user_id)?;

        match request.status {
            RequestStatus::Completed => Ok(request),
            RequestStatus::Approved => {
                let fulfilled = self
                    .fulfil(request_id, ActorId::user(&user_id), Delivery::Inline)
                    .await?;
                record_outcome(outcome_label(fulfilled.status));
                Ok(fulfilled)
            }
            current => Err(RewardError::InvalidStateTransition {
                current,
                attempted: RequestStatus::Completed,
            }),
        }
    }

    /// A request, visible to its owner only.
    ///
    /// # Errors
    ///
    /// - [`RewardError::NotFound`]: unknown request
    /// - [`RewardError::Forbidden`]: the request belongs to another user
    pub async fn get_request_status(
        &self,
        request_id: RequestId,
        user_id: UserId,
    ) -> Result<RewardRequest, RewardError> {
        let request = self.find_request(request_id).await?;
        ensure_owner(&request, user_id)?;
        Ok(request)
    }

    /// All requests of a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`RewardError::TransientInfra`] on store failure.
    pub async fn list_requests(&self, user_id: UserId) -> Result<Vec<RewardRequest>, RewardError> {
        Ok(self.requests.list_for_user(user_id).await?)
    }

    /// Append an audit note. Allowed in every status.
    ///
    /// # Errors
    ///
    /// - [`RewardError::NotFound`]: unknown request
    /// - [`RewardError::TransientInfra`]: store failure
    pub async fn add_note(
        &self,
        request_id: RequestId,
        text: impl Into<String>,
        by: ActorId,
    ) -> Result<RewardRequest, RewardError> {
        let note = RewardRequest::note(text, by, self.now());
        Ok(self.requests.append_note(request_id, note).await?)
    }

    /// Record a failure on a non-terminal request.
    ///
    /// Terminal requests come back unchanged.
    ///
    /// # Errors
    ///
    /// - [`RewardError::NotFound`]: unknown request
    /// - [`RewardError::InvalidStateTransition`]: the status changed concurrently
    /// - [`RewardError::TransientInfra`]: store failure
    pub async fn mark_failed(
        &self,
        request_id: RequestId,
        detail: impl Into<String>,
    ) -> Result<RewardRequest, RewardError> {
        let request = self.find_request(request_id).await?;
        if request.status.is_terminal() {
            return Ok(request);
        }

        let failed = request.failed(detail, ActorId::system(), self.now())?;
        let failed = self.write(failed, request.status).await?;
        tracing::warn!(
            request_id = %request_id,
            message = failed.message.as_deref().unwrap_or_default(),
            "Reward request marked failed"
        );
        Ok(failed)
    }

    /// Load a request.
    ///
    /// # Errors
    ///
    /// - [`RewardError::NotFound`]: unknown request
    /// - [`RewardError::TransientInfra`]: store failure
    pub async fn find_request(&self, request_id: RequestId) -> Result<RewardRequest, RewardError> {
        self.requests
            .get(request_id)
            .await?
            .ok_or_else(|| RewardError::not_found("request", request_id))
    }

    async fn decide(
        &self,
        request: RewardRequest,
        event: &EventDefinition,
    ) -> Result<RewardRequest, RewardError> {
        let request = self.screen(request, event).await?;
        if request.status.is_terminal() {
            return Ok(request);
        }

        match (self.settings.mode, &self.dispatcher) {
            (ProcessingMode::Deferred, Some(dispatcher)) => match queue(dispatcher, &request) {
                Ok(()) => return Ok(request),
                Err(error) => tracing::warn!(
                    request_id = %request.id,
                    error = %error,
                    "Could not queue reward request, processing inline"
                ),
            },
            (ProcessingMode::Deferred, None) => {
                tracing::warn!(
                    request_id = %request.id,
                    "Deferred mode without a dispatcher, processing inline"
                );
            }
            (ProcessingMode::Inline, _) => {}
        }

        let evaluation = self.evaluate(request.user_id, event).await?;
        let request = self.gate(request, event, evaluation).await?;
        if request.status == RequestStatus::Approved {
            return self.fulfil(request.id, ActorId::system(), Delivery::Inline).await;
        }
        Ok(request)
    }

    /// Reject on inactive event, missing reward or depleted stock; otherwise
    /// return the PENDING request with its reward attached.
    async fn screen(
        &self,
        request: RewardRequest,
        event: &EventDefinition,
    ) -> Result<RewardRequest, RewardError> {
        if let Some(reason) = inactive_reason(event, self.now()) {
            return self.reject(&request, reason).await;
        }

        let reward = match request.reward_id {
            Some(reward_id) => match self.inventory.find_by_id(reward_id).await {
                Ok(reward) if reward.event_id == event.id => reward,
                Ok(_) => {
                    let reason = format!("reward {reward_id} does not belong to event {}", event.id);
                    return self.reject(&request, reason).await;
                }
                Err(RewardError::NotFound { .. }) => {
                    return self
                        .reject(&request, format!("reward {reward_id} not found"))
                        .await;
                }
                Err(error) => return Err(error),
            },
            None => {
                let first: Option<Reward> = self
                    .catalog
                    .find_rewards_for_event(event.id)
                    .await?
                    .into_iter()
                    .next();
                match first {
                    Some(reward) => reward,
                    None => return self.reject(&request, "no reward configured").await,
                }
            }
        };

        let request = if request.reward_id == Some(reward.id) {
            request
        } else {
            let attached = request.with_reward(reward.id, self.now())?;
            self.write(attached, request.status).await?
        };

        if reward.is_depleted() {
            return self
                .reject(&request, format!("reward {} is depleted", reward.id))
                .await;
        }
        Ok(request)
    }

    /// Apply the condition outcome and approval mode to a screened request.
    async fn gate(
        &self,
        request: RewardRequest,
        event: &EventDefinition,
        evaluation: Evaluation,
    ) -> Result<RewardRequest, RewardError> {
        match evaluation {
            Evaluation::Satisfied => {}
            Evaluation::NotSatisfied => return self.reject(&request, "condition not met").await,
            Evaluation::Unsupported => {
                let reason = format!("unsupported event type {}", event.event_type);
                return self.reject(&request, reason).await;
            }
        }

        match event.approval_mode {
            ApprovalMode::Manual => {
                tracing::info!(request_id = %request.id, "Awaiting admin approval");
                Ok(request)
            }
            ApprovalMode::Auto => {
                let approved = request.approved(ActorId::system(), self.now())?;
                self.write(approved, RequestStatus::Pending).await
            }
        }
    }

    async fn evaluate(
        &self,
        user_id: UserId,
        event: &EventDefinition,
    ) -> Result<Evaluation, RewardError> {
        if !self.settings.evaluate_conditions {
            return Ok(Evaluation::Satisfied);
        }
        self.conditions.evaluate(user_id, event).await
    }

    /// Decrement, then APPROVED → COMPLETED (or FAILED).
    ///
    /// The request is reloaded under an in-process guard so a second
    /// fulfilment of the same request cannot take stock twice.
    async fn fulfil(
        &self,
        request_id: RequestId,
        actor: ActorId,
        delivery: Delivery,
    ) -> Result<RewardRequest, RewardError> {
        let Some(_guard) = self.in_flight.enter(request_id) else {
            let busy = format!("request {request_id} is already being fulfilled");
            return Err(match delivery {
                Delivery::Inline => RewardError::Conflict(busy),
                Delivery::Background => RewardError::TransientInfra(busy),
            });
        };

        let request = self.find_request(request_id).await?;
        if request.status != RequestStatus::Approved {
            return Ok(request);
        }

        let Some(reward_id) = request.reward_id else {
            let failed = request.failed("no reward configured", actor, self.now())?;
            return self.write(failed, RequestStatus::Approved).await;
        };

        match self.inventory.decrement_if_available(reward_id).await {
            Ok(reward) => self.complete(request, &reward, actor).await,
            Err(error) if error.is_retryable() && delivery == Delivery::Background => Err(error),
            Err(error) => {
                tracing::warn!(
                    request_id = %request_id,
                    reward_id = %reward_id,
                    error = %error,
                    "Inventory decrement failed"
                );
                let failed = request.failed(error.to_string(), actor, self.now())?;
                self.write(failed, RequestStatus::Approved).await
            }
        }
    }

    async fn complete(
        &self,
        request: RewardRequest,
        reward: &Reward,
        actor: ActorId,
    ) -> Result<RewardRequest, RewardError> {
        let message = format!("granted {} ({})", reward.name, reward.id);
        let completed = request.completed(Some(message), actor.clone(), self.now())?;

        let written = retry_with_predicate(
            &self.settings.status_retry,
            || self.write(completed.clone(), RequestStatus::Approved),
            RewardError::is_retryable,
        )
        .await;

        match written {
            Ok(completed) => {
                tracing::info!(
                    request_id = %completed.id,
                    reward_id = %reward.id,
                    "Reward granted"
                );
                Ok(completed)
            }
            Err(cause) => self.reconcile(request, reward.id, actor, cause).await,
        }
    }

    async fn reconcile(
        &self,
        request: RewardRequest,
        reward_id: RewardId,
        actor: ActorId,
        cause: RewardError,
    ) -> Result<RewardRequest, RewardError> {
        metrics::counter!("rewards_reconciliation_required_total").increment(1);
        tracing::error!(
            request_id = %request.id,
            reward_id = %reward_id,
            error = %cause,
            "Stock taken but completion not recorded, reconciliation required"
        );

        let detail = format!(
            "reward {reward_id} was decremented but the request could not be completed ({cause}); \
             reconciliation required"
        );
        let failed = request.failed(detail.clone(), actor, self.now())?;
        match self.write(failed, RequestStatus::Approved).await {
            Ok(failed) => Ok(failed),
            Err(error) => {
                tracing::error!(
                    request_id = %request.id,
                    error = %error,
                    "Could not record reconciliation failure"
                );
                Err(RewardError::ReconciliationRequired(detail))
            }
        }
    }

    async fn reject(
        &self,
        request: &RewardRequest,
        reason: impl Into<String>,
    ) -> Result<RewardRequest, RewardError> {
        let rejected = request.rejected(reason, ActorId::system(), self.now())?;
        let rejected = self.write(rejected, request.status).await?;
        tracing::info!(
            request_id = %rejected.id,
            reason = rejected.message.as_deref().unwrap_or_default(),
            "Reward request rejected"
        );
        Ok(rejected)
    }

    /// Compare-and-set write of `updated` over `expected`.
    async fn write(
        &self,
        updated: RewardRequest,
        expected: RequestStatus,
    ) -> Result<RewardRequest, RewardError> {
        let attempted = updated.status;
        self.requests
            .transition(updated, expected)
            .await
            .map_err(|error| match error {
                StoreError::StatusMismatch { actual, .. } => RewardError::InvalidStateTransition {
                    current: actual,
                    attempted,
                },
                other => other.into(),
            })
    }
}

impl std::fmt::Debug for RequestProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestProcessor")
            .field("settings", &self.settings)
            .field("conditions", &self.conditions)
            .field("dispatcher", &self.dispatcher.is_some())
            .finish_non_exhaustive()
    }
}

/// Return the request already stored under a key, provided it was made by the
/// same user for the same event.
fn replay(
    existing: RewardRequest,
    user_id: UserId,
    event_id: EventId,
) -> Result<RewardRequest, RewardError> {
    if existing.user_id != user_id || existing.event_id != event_id {
        record_outcome("key_conflict");
        return Err(RewardError::Conflict(
            "idempotency key already used for a different request".to_string(),
        ));
    }
    record_outcome("duplicate");
    Ok(existing)
}

/// Hand a screened request to the reward-process workflow.
///
/// Never waits for queue space: this also runs inside user-event workflow
/// runs, where waiting on the worker pool's own queue can stall every worker.
fn queue(dispatcher: &DispatcherHandle, request: &RewardRequest) -> Result<(), DispatchError> {
    let event = WorkflowEvent::with_id(
        *request.id.as_uuid(),
        REWARD_QUEUED,
        serde_json::json!({ "requestId": request.id }),
    );
    dispatcher.try_dispatch(event)?;
    tracing::info!(request_id = %request.id, "Reward request queued");
    Ok(())
}

fn inactive_reason(event: &EventDefinition, now: DateTime<Utc>) -> Option<String> {
    if event.status == EventStatus::Inactive {
        Some(format!("event {} is not active", event.id))
    } else if now < event.start_date {
        Some(format!("event {} has not started", event.id))
    } else if now > event.end_date {
        Some(format!("event {} has ended", event.id))
    } else {
        None
    }
}

fn ensure_owner(request: &RewardRequest, user_id: UserId) -> Result<(), RewardError> {
    if request.user_id == user_id {
        Ok(())
    } else {
        Err(RewardError::Forbidden(format!(
            "request {} belongs to another user",
            request.id
        )))
    }
}

const fn outcome_label(status: RequestStatus) -> &'static str {
    match status {
        RequestStatus::Pending => "pending",
        RequestStatus::Approved => "approved",
        RequestStatus::Completed => "completed",
        RequestStatus::Rejected => "rejected",
        RequestStatus::Failed => "failed",
    }
}

fn record_outcome(outcome: &'static str) {
    metrics::counter!("rewards_requests_total", "outcome" => outcome).increment(1);
}
