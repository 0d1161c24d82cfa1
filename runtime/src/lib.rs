//! # Rewardflow Runtime
//!
//! Background execution for the reward pipeline.
//!
//! ## Core Components
//!
//! - **Dispatcher**: bounded task queue plus worker pool running registered
//!   workflows, with per-run step memoization and retry of transient failures
//! - **Retry**: exponential backoff policy shared by the dispatcher and services
//! - **Dead Letter Queue**: runs that exhausted their retries, kept for redrive
//! - **Health**: component health checks
//! - **Metrics**: Prometheus exporter and metric descriptions

#![forbid(unsafe_code)]

/// Async dispatcher, workflows and step memoization
pub mod dispatcher;

/// Dead-letter queue for failed runs
pub mod dlq;

/// Component health checks
pub mod health;

/// Prometheus metrics for observability
pub mod metrics;

/// Retry logic with exponential backoff
pub mod retry;

pub use dispatcher::{
    DispatchError, Dispatcher, DispatcherBuilder, DispatcherConfig, DispatcherHandle, RunHandle,
    RunOutcome, StepJournal, StepRunner, Workflow, WorkflowError, WorkflowEvent,
};
pub use dlq::DeadLetterQueue;
pub use health::{HealthCheck, HealthReport, HealthStatus};
pub use retry::RetryPolicy;
