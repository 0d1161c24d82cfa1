//! Shared setup for the rewards integration tests.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use rewardflow_core::environment::Clock;
use rewardflow_core::types::{ApprovalMode, EventDefinition, EventType, Reward};
use rewardflow_runtime::RetryPolicy;
use rewardflow_testing::{FixedClock, InMemoryStore, fixtures, test_clock};
use rewards::app::{RewardsApp, Stores};
use rewards::catalog::Catalog;
use rewards::condition::ConditionEvaluator;
use rewards::config::Config;
use rewards::inventory::InventoryService;
use rewards::processor::{ProcessingMode, ProcessorSettings, RequestProcessor};
use std::sync::Arc;
use std::time::Duration;

/// An inline processor over an in-memory store.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub clock: FixedClock,
    pub processor: RequestProcessor,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(ProcessorSettings {
            status_retry: fast_retry(1),
            ..ProcessorSettings::default()
        })
    }

    pub fn with_settings(settings: ProcessorSettings) -> Self {
        rewardflow_testing::init_tracing();
        let store = Arc::new(InMemoryStore::new());
        let clock = test_clock();
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());

        let processor = RequestProcessor::new(
            Catalog::new(store.clone(), store.clone(), shared_clock.clone()),
            InventoryService::new(store.clone(), Duration::from_secs(1)),
            store.clone(),
            Arc::new(ConditionEvaluator::with_builtin_strategies(
                store.clone(),
                Duration::from_secs(1),
                1,
            )),
            shared_clock,
        )
        .with_settings(settings);

        Self {
            store,
            clock,
            processor,
        }
    }

    /// Seed an event of `event_type` with one reward of `quantity`.
    pub fn seed(
        &self,
        event_type: EventType,
        mode: ApprovalMode,
        quantity: i64,
    ) -> (EventDefinition, Reward) {
        let event = fixtures::event(event_type, mode, self.clock.now());
        let reward = fixtures::reward(event.id, quantity, self.clock.now());
        self.store.seed_event(event.clone());
        self.store.seed_reward(reward.clone());
        (event, reward)
    }
}

/// Millisecond backoff for tests.
pub fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(max_retries)
        .initial_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(5))
        .jitter(false)
        .build()
}

/// A running app over an in-memory store with fast dispatcher retries.
pub fn start_app(mode: ProcessingMode) -> (RewardsApp, Arc<InMemoryStore>, FixedClock) {
    start_app_with_pool(mode, 2, 64)
}

/// Like [`start_app`], with an explicit worker count and queue capacity.
pub fn start_app_with_pool(
    mode: ProcessingMode,
    workers: usize,
    queue_capacity: usize,
) -> (RewardsApp, Arc<InMemoryStore>, FixedClock) {
    rewardflow_testing::init_tracing();
    let store = Arc::new(InMemoryStore::new());
    let clock = test_clock();

    let mut config = Config::default();
    config.rewards.processing_mode = mode;
    config.rewards.io_timeout_ms = 1_000;
    config.dispatcher.workers = workers;
    config.dispatcher.queue_capacity = queue_capacity;
    config.dispatcher.max_retries = 2;
    config.dispatcher.initial_backoff_ms = 1;
    config.dispatcher.max_backoff_ms = 5;

    let app = RewardsApp::builder(config, Stores::shared(store.clone()))
        .with_clock(Arc::new(clock.clone()))
        .with_status_retry(fast_retry(1))
        .start();
    (app, store, clock)
}

/// Poll `check` every 10ms for up to two seconds.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
