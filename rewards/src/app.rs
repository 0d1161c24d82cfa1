//! Service wiring.
//!
//! Builds the processor from its stores, registers both workflows and starts
//! the dispatcher. The binary uses it with the Postgres store; tests use it
//! with the in-memory store.

use crate::actions::ActionRouter;
use crate::catalog::Catalog;
use crate::condition::ConditionEvaluator;
use crate::config::Config;
use crate::inventory::InventoryService;
use crate::processor::{ProcessorSettings, RequestProcessor};
use crate::workflows::{RewardProcessWorkflow, UserEventWorkflow};
use rewardflow_core::environment::{Clock, SystemClock};
use rewardflow_core::store::{EventDefinitionStore, EventLogStore, RewardRequestStore, RewardStore};
use rewardflow_runtime::{
    DispatchError, Dispatcher, DispatcherBuilder, DispatcherHandle, HealthCheck, RetryPolicy,
    StepJournal,
};
use std::sync::Arc;
use std::time::Duration;

/// The four stores the pipeline persists through.
#[derive(Clone)]
pub struct Stores {
    /// Event definitions
    pub events: Arc<dyn EventDefinitionStore>,
    /// Rewards and their stock
    pub rewards: Arc<dyn RewardStore>,
    /// User action log
    pub event_log: Arc<dyn EventLogStore>,
    /// Reward requests
    pub requests: Arc<dyn RewardRequestStore>,
}

impl Stores {
    /// Use one backend for every store.
    #[must_use]
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: EventDefinitionStore + RewardStore + EventLogStore + RewardRequestStore + 'static,
    {
        Self {
            events: store.clone(),
            rewards: store.clone(),
            event_log: store.clone(),
            requests: store,
        }
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}

/// Assembles a [`RewardsApp`].
pub struct AppBuilder {
    config: Config,
    stores: Stores,
    clock: Arc<dyn Clock>,
    journal: Option<Arc<dyn StepJournal>>,
    status_retry: Option<RetryPolicy>,
}

impl AppBuilder {
    /// Start from configuration and stores, with the system clock and an
    /// in-memory step journal.
    #[must_use]
    pub fn new(config: Config, stores: Stores) -> Self {
        Self {
            config,
            stores,
            clock: Arc::new(SystemClock),
            journal: None,
            status_retry: None,
        }
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Persist workflow steps in `journal`.
    #[must_use]
    pub fn with_journal(mut self, journal: Arc<dyn StepJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Backoff for the status write after a decrement. Defaults to the
    /// dispatcher's retry policy.
    #[must_use]
    pub fn with_status_retry(mut self, policy: RetryPolicy) -> Self {
        self.status_retry = Some(policy);
        self
    }

    /// Wire everything and spawn the workers. Must be called inside a Tokio
    /// runtime.
    #[must_use]
    pub fn start(self) -> RewardsApp {
        let Self {
            config,
            stores,
            clock,
            journal,
            status_retry,
        } = self;

        let mut builder = DispatcherBuilder::new(config.dispatcher_config());
        if let Some(journal) = journal {
            builder = builder.with_journal(journal);
        }
        let handle = builder.handle();

        let catalog = Catalog::new(stores.events.clone(), stores.rewards.clone(), clock.clone());
        let inventory = InventoryService::new(stores.rewards.clone(), config.io_timeout());
        let conditions = Arc::new(ConditionEvaluator::with_builtin_strategies(
            stores.event_log.clone(),
            config.io_timeout(),
            config.rewards.daily_login_max_gap_days,
        ));
        let settings = ProcessorSettings {
            mode: config.rewards.processing_mode,
            evaluate_conditions: config.rewards.evaluate_conditions,
            status_retry: status_retry.unwrap_or_else(|| config.retry_policy()),
        };

        let processor = Arc::new(
            RequestProcessor::new(
                catalog,
                inventory,
                stores.requests.clone(),
                conditions,
                clock,
            )
            .with_settings(settings)
            .with_dispatcher(handle.clone()),
        );

        let dispatcher = builder
            .register(Arc::new(UserEventWorkflow::new(
                processor.clone(),
                stores.event_log.clone(),
            )))
            .register(Arc::new(RewardProcessWorkflow::new(processor.clone())))
            .start();

        tracing::info!(
            mode = ?config.rewards.processing_mode,
            evaluate_conditions = config.rewards.evaluate_conditions,
            "Reward pipeline started"
        );

        RewardsApp {
            router: ActionRouter::new(processor.clone(), handle),
            processor,
            dispatcher,
        }
    }
}

impl std::fmt::Debug for AppBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A running reward pipeline.
pub struct RewardsApp {
    processor: Arc<RequestProcessor>,
    router: ActionRouter,
    dispatcher: Dispatcher,
}

impl RewardsApp {
    /// Begin assembling an app.
    #[must_use]
    pub fn builder(config: Config, stores: Stores) -> AppBuilder {
        AppBuilder::new(config, stores)
    }

    /// The request processor.
    #[must_use]
    pub fn processor(&self) -> &Arc<RequestProcessor> {
        &self.processor
    }

    /// The action router.
    #[must_use]
    pub const fn router(&self) -> &ActionRouter {
        &self.router
    }

    /// The running dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// A handle for submitting events.
    #[must_use]
    pub fn handle(&self) -> DispatcherHandle {
        self.dispatcher.handle()
    }

    /// Dispatcher health.
    #[must_use]
    pub fn health(&self) -> HealthCheck {
        self.dispatcher.health()
    }

    /// Stop the dispatcher, waiting at most `timeout` for running workflows.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::ShutdownTimeout`] if workflows were still
    /// running when the timeout expired.
    pub async fn shutdown(self, timeout: Duration) -> Result<(), DispatchError> {
        self.dispatcher.shutdown(timeout).await
    }
}

impl std::fmt::Debug for RewardsApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RewardsApp")
            .field("processor", &self.processor)
            .finish_non_exhaustive()
    }
}
