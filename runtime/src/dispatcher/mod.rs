//! Async dispatcher: a bounded task queue drained by a worker pool.
//!
//! Events are matched against registered workflow triggers; each match becomes
//! a job. Workers run the job, retrying transient failures with backoff and
//! the same run id, so memoized steps are skipped on later attempts. Jobs that
//! exhaust their retries land in the dead-letter queue and the workflow's
//! failure hook runs.
//!
//! # Example
//!
//! ```no_run
//! use rewardflow_runtime::dispatcher::{DispatcherBuilder, DispatcherConfig, WorkflowEvent};
//! use std::time::Duration;
//!
//! # async fn example(workflow: std::sync::Arc<dyn rewardflow_runtime::dispatcher::Workflow>)
//! # -> Result<(), Box<dyn std::error::Error>> {
//! let builder = DispatcherBuilder::new(DispatcherConfig::default());
//! let handle = builder.handle();
//! let dispatcher = builder.register(workflow).start();
//!
//! let run = handle
//!     .dispatch(WorkflowEvent::new("user/login", serde_json::json!({})))
//!     .await?;
//! let outcomes = run.wait().await;
//!
//! dispatcher.shutdown(Duration::from_secs(30)).await?;
//! # Ok(())
//! # }
//! ```

mod step;
mod workflow;

pub use step::{InMemoryStepJournal, StepJournal, StepRunner};
pub use workflow::{Workflow, WorkflowError, WorkflowEvent, trigger_matches};

use crate::dlq::DeadLetterQueue;
use crate::health::HealthCheck;
use crate::retry::RetryPolicy;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Dispatcher errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The dispatcher is shutting down and refuses new work.
    #[error("Dispatcher queue is closed")]
    QueueClosed,

    /// The queue has no free slot and the caller asked not to wait.
    #[error("Dispatcher queue is full")]
    QueueFull,

    /// No registered workflow matches the event name.
    #[error("No workflow registered for event: {0}")]
    NoWorkflow(String),

    /// Shutdown timed out with jobs still running.
    #[error("Shutdown timed out with {0} jobs still running")]
    ShutdownTimeout(usize),
}

/// Worker pool and retry configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of concurrent workers
    pub workers: usize,
    /// Bounded queue capacity; `dispatch` waits when full
    pub queue_capacity: usize,
    /// Backoff between attempts of a failing run
    pub retry_policy: RetryPolicy,
    /// Dead-letter queue capacity
    pub dlq_max_size: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            retry_policy: RetryPolicy::default(),
            dlq_max_size: 500,
        }
    }
}

/// A permanently failed run, as stored in the dead-letter queue.
#[derive(Debug, Clone)]
pub struct FailedRun {
    /// Workflow that failed
    pub workflow_id: String,
    /// Triggering event (its id is the run id)
    pub event: WorkflowEvent,
}

/// Final result of one workflow run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Workflow that ran
    pub workflow_id: String,
    /// Run id
    pub run_id: Uuid,
    /// Attempts made, including the first
    pub attempts: u32,
    /// Workflow output or the last error
    pub result: Result<serde_json::Value, WorkflowError>,
}

/// Completion handle for a dispatched event.
///
/// Dropping it does not cancel the runs.
#[derive(Debug)]
pub struct RunHandle {
    run_id: Uuid,
    receivers: Vec<oneshot::Receiver<RunOutcome>>,
}

impl RunHandle {
    /// Run id shared by every workflow the event triggered.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Wait for every triggered workflow to finish.
    ///
    /// Runs abandoned during shutdown are omitted.
    pub async fn wait(self) -> Vec<RunOutcome> {
        let mut outcomes = Vec::with_capacity(self.receivers.len());
        for receiver in self.receivers {
            if let Ok(outcome) = receiver.await {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    /// [`RunHandle::wait`] bounded by `timeout`; `None` on expiry.
    pub async fn wait_with_timeout(self, timeout: Duration) -> Option<Vec<RunOutcome>> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }
}

struct Job {
    workflow: Arc<dyn Workflow>,
    event: WorkflowEvent,
    done: oneshot::Sender<RunOutcome>,
}

type Registry = Arc<RwLock<Vec<Arc<dyn Workflow>>>>;

/// Cloneable entry point for submitting events.
///
/// Available from the builder before workflows are registered, so services
/// that dispatch can be constructed before the workflows that call them.
#[derive(Clone)]
pub struct DispatcherHandle {
    sender: mpsc::Sender<Job>,
    registry: Registry,
    accepting: Arc<AtomicBool>,
}

impl DispatcherHandle {
    /// Queue `event` for every workflow whose trigger matches its name.
    ///
    /// Waits for queue space when the queue is full. Code running inside a
    /// workflow must use [`try_dispatch`](Self::try_dispatch) instead: a
    /// worker waiting on its own queue never frees a slot.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::QueueClosed`]: the dispatcher is shutting down
    /// - [`DispatchError::NoWorkflow`]: nothing is registered for the event
    pub async fn dispatch(&self, event: WorkflowEvent) -> Result<RunHandle, DispatchError> {
        let matched = self.matching(&event)?;

        let run_id = event.id;
        let mut receivers = Vec::with_capacity(matched.len());
        for workflow in matched {
            let (job, receiver) = Self::job(workflow, &event);
            self.sender
                .send(job)
                .await
                .map_err(|_| DispatchError::QueueClosed)?;
            receivers.push(receiver);
        }

        Ok(RunHandle { run_id, receivers })
    }

    /// Queue `event` without waiting for queue space.
    ///
    /// Either every matching workflow is queued or none is.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::QueueFull`]: not enough free slots right now
    /// - [`DispatchError::QueueClosed`]: the dispatcher is shutting down
    /// - [`DispatchError::NoWorkflow`]: nothing is registered for the event
    pub fn try_dispatch(&self, event: WorkflowEvent) -> Result<RunHandle, DispatchError> {
        let matched = self.matching(&event)?;

        let permits = self
            .sender
            .try_reserve_many(matched.len())
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(()) => DispatchError::QueueFull,
                mpsc::error::TrySendError::Closed(()) => DispatchError::QueueClosed,
            })?;

        let run_id = event.id;
        let mut receivers = Vec::with_capacity(matched.len());
        for (permit, workflow) in permits.zip(matched) {
            let (job, receiver) = Self::job(workflow, &event);
            permit.send(job);
            receivers.push(receiver);
        }

        Ok(RunHandle { run_id, receivers })
    }

    fn matching(&self, event: &WorkflowEvent) -> Result<Vec<Arc<dyn Workflow>>, DispatchError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(DispatchError::QueueClosed);
        }

        let matched: Vec<Arc<dyn Workflow>> = self
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|wf| trigger_matches(wf.trigger(), &event.name))
            .cloned()
            .collect();

        if matched.is_empty() {
            return Err(DispatchError::NoWorkflow(event.name.clone()));
        }
        Ok(matched)
    }

    fn job(
        workflow: Arc<dyn Workflow>,
        event: &WorkflowEvent,
    ) -> (Job, oneshot::Receiver<RunOutcome>) {
        let (done, receiver) = oneshot::channel();
        tracing::debug!(
            run_id = %event.id,
            workflow = workflow.id(),
            event = %event.name,
            "Queueing workflow run"
        );
        let job = Job {
            workflow,
            event: event.clone(),
            done,
        };
        (job, receiver)
    }

    /// Remaining queue capacity.
    #[must_use]
    pub fn available_capacity(&self) -> usize {
        self.sender.capacity()
    }
}

impl std::fmt::Debug for DispatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherHandle")
            .field("accepting", &self.accepting.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Collects workflows before the worker pool starts.
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    registry: Registry,
    sender: mpsc::Sender<Job>,
    receiver: mpsc::Receiver<Job>,
    journal: Arc<dyn StepJournal>,
    accepting: Arc<AtomicBool>,
}

impl DispatcherBuilder {
    /// Create a builder with an in-memory step journal.
    #[must_use]
    pub fn new(config: DispatcherConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            config,
            registry: Arc::new(RwLock::new(Vec::new())),
            sender,
            receiver,
            journal: Arc::new(InMemoryStepJournal::new()),
            accepting: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Use a durable step journal.
    #[must_use]
    pub fn with_journal(mut self, journal: Arc<dyn StepJournal>) -> Self {
        self.journal = journal;
        self
    }

    /// A handle for submitting events.
    #[must_use]
    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle {
            sender: self.sender.clone(),
            registry: Arc::clone(&self.registry),
            accepting: Arc::clone(&self.accepting),
        }
    }

    /// Register a workflow.
    #[must_use]
    pub fn register(self, workflow: Arc<dyn Workflow>) -> Self {
        tracing::info!(
            workflow = workflow.id(),
            trigger = workflow.trigger(),
            "Registered workflow"
        );
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(workflow);
        self
    }

    /// Spawn the worker pool. Must be called inside a Tokio runtime.
    #[must_use]
    pub fn start(self) -> Dispatcher {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let receiver = Arc::new(Mutex::new(self.receiver));
        let dlq = DeadLetterQueue::new(self.config.dlq_max_size);
        let in_flight = Arc::new(AtomicUsize::new(0));

        let shared = Arc::new(WorkerContext {
            journal: self.journal,
            retry_policy: self.config.retry_policy.clone(),
            dlq: dlq.clone(),
            in_flight: Arc::clone(&in_flight),
        });

        let workers = (0..self.config.workers.max(1))
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    Arc::clone(&receiver),
                    shutdown_rx.clone(),
                    Arc::clone(&shared),
                ))
            })
            .collect();

        tracing::info!(workers = self.config.workers, "Dispatcher started");

        Dispatcher {
            handle: DispatcherHandle {
                sender: self.sender,
                registry: self.registry,
                accepting: self.accepting,
            },
            workers,
            shutdown: shutdown_tx,
            dlq,
            in_flight,
            config: self.config,
        }
    }
}

/// A running worker pool.
pub struct Dispatcher {
    handle: DispatcherHandle,
    workers: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
    dlq: DeadLetterQueue<FailedRun>,
    in_flight: Arc<AtomicUsize>,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// A handle for submitting events.
    #[must_use]
    pub fn handle(&self) -> DispatcherHandle {
        self.handle.clone()
    }

    /// Runs that exhausted their retries.
    #[must_use]
    pub const fn dead_letters(&self) -> &DeadLetterQueue<FailedRun> {
        &self.dlq
    }

    /// Re-queue every dead-lettered run with its original run id.
    ///
    /// Steps that completed before the failure are replayed from the journal.
    /// Returns how many runs were re-queued.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::QueueClosed`] if the dispatcher is shutting down.
    pub async fn redrive_dead_letters(&self) -> Result<usize, DispatchError> {
        let entries = self.dlq.drain();
        let count = entries.len();
        for entry in entries {
            let workflow = self
                .handle
                .registry
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .find(|wf| wf.id() == entry.payload.workflow_id)
                .cloned();
            let Some(workflow) = workflow else {
                tracing::warn!(
                    workflow = %entry.payload.workflow_id,
                    "Dropping dead letter for unregistered workflow"
                );
                continue;
            };
            let (done, _ignored) = oneshot::channel();
            self.handle
                .sender
                .send(Job {
                    workflow,
                    event: entry.payload.event,
                    done,
                })
                .await
                .map_err(|_| DispatchError::QueueClosed)?;
        }
        tracing::info!(count, "Redrove dead letters");
        Ok(count)
    }

    /// Health based on dead-letter queue usage.
    #[must_use]
    pub fn health(&self) -> HealthCheck {
        let dlq_size = self.dlq.len();
        let dlq_capacity = self.dlq.max_size();
        #[allow(clippy::cast_precision_loss)]
        let usage = (dlq_size as f64 / dlq_capacity as f64) * 100.0;

        let check = if !self.handle.accepting.load(Ordering::SeqCst) {
            HealthCheck::unhealthy("dispatcher", "Dispatcher is shutting down")
        } else if dlq_size >= dlq_capacity {
            HealthCheck::unhealthy("dispatcher", "Dead letter queue is full")
        } else if usage > 50.0 {
            HealthCheck::degraded(
                "dispatcher",
                format!("Dead letter queue is {usage:.0}% full"),
            )
        } else {
            HealthCheck::healthy("dispatcher")
        };

        check
            .with_metadata("workers", self.config.workers.to_string())
            .with_metadata("in_flight", self.in_flight.load(Ordering::SeqCst).to_string())
            .with_metadata("queue_available", self.handle.available_capacity().to_string())
            .with_metadata("dlq_size", dlq_size.to_string())
    }

    /// Stop accepting events, drain the queue and wait for workers.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::ShutdownTimeout`] if workers are still busy
    /// when `timeout` expires; they are aborted.
    pub async fn shutdown(self, timeout: Duration) -> Result<(), DispatchError> {
        tracing::info!("Dispatcher shutting down");
        self.handle.accepting.store(false, Ordering::SeqCst);
        let _ = self.shutdown.send(true);

        let workers = self.workers;
        let aborts: Vec<_> = workers.iter().map(JoinHandle::abort_handle).collect();
        let joined = tokio::time::timeout(timeout, futures::future::join_all(workers)).await;

        if joined.is_err() {
            let remaining = self.in_flight.load(Ordering::SeqCst);
            for abort in aborts {
                abort.abort();
            }
            tracing::warn!(remaining, "Dispatcher shutdown timed out");
            return Err(DispatchError::ShutdownTimeout(remaining));
        }

        tracing::info!("Dispatcher stopped");
        Ok(())
    }
}

struct WorkerContext {
    journal: Arc<dyn StepJournal>,
    retry_policy: RetryPolicy,
    dlq: DeadLetterQueue<FailedRun>,
    in_flight: Arc<AtomicUsize>,
}

async fn worker_loop(
    worker: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    mut shutdown: watch::Receiver<bool>,
    ctx: Arc<WorkerContext>,
) {
    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown.changed() => None,
            job = async { receiver.lock().await.recv().await } => job,
        };

        match job {
            Some(job) => execute(&ctx, job).await,
            None => break,
        }
    }

    // Drain whatever was queued before shutdown.
    loop {
        let next = receiver.lock().await.try_recv();
        match next {
            Ok(job) => execute(&ctx, job).await,
            Err(_) => break,
        }
    }

    tracing::debug!(worker, "Dispatcher worker stopped");
}

async fn execute(ctx: &WorkerContext, job: Job) {
    let Job {
        workflow,
        event,
        done,
    } = job;

    ctx.in_flight.fetch_add(1, Ordering::SeqCst);
    let started = Instant::now();
    let runner = StepRunner::new(event.id, workflow.id(), Arc::clone(&ctx.journal));

    let mut attempt: u32 = 0;
    let result = loop {
        match workflow.run(&event, &runner).await {
            Ok(output) => break Ok(output),
            Err(error) if error.is_retryable() && ctx.retry_policy.allows_retry(attempt) => {
                let delay = ctx.retry_policy.delay_for_attempt(attempt);
                tracing::warn!(
                    run_id = %event.id,
                    workflow = workflow.id(),
                    attempt = attempt + 1,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %error,
                    "Workflow attempt failed, retrying"
                );
                metrics::counter!("dispatcher_retries_total", "workflow" => workflow.id().to_string())
                    .increment(1);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => break Err(error),
        }
    };
    let attempts = attempt + 1;

    let label = match &result {
        Ok(_) => {
            tracing::debug!(run_id = %event.id, workflow = workflow.id(), attempts, "Workflow completed");
            "success"
        }
        Err(error) => {
            tracing::error!(
                run_id = %event.id,
                workflow = workflow.id(),
                attempts,
                error = %error,
                "Workflow failed permanently, dead-lettering"
            );
            ctx.dlq.push(
                FailedRun {
                    workflow_id: workflow.id().to_string(),
                    event: event.clone(),
                },
                error.to_string(),
                attempts,
            );
            workflow.on_failure(&event, error).await;
            "failure"
        }
    };

    metrics::counter!(
        "dispatcher_runs_total",
        "workflow" => workflow.id().to_string(),
        "result" => label
    )
    .increment(1);
    metrics::histogram!("dispatcher_run_duration_seconds", "workflow" => workflow.id().to_string())
        .record(started.elapsed().as_secs_f64());

    ctx.in_flight.fetch_sub(1, Ordering::SeqCst);

    let _ = done.send(RunOutcome {
        workflow_id: workflow.id().to_string(),
        run_id: event.id,
        attempts,
        result,
    });
}
