//! Prometheus metrics for the reward pipeline.
//!
//! Metric names:
//! - `rewards_requests_total{outcome}`: reward requests by final outcome
//! - `rewards_inventory_decrements_total{result}`: decrement attempts
//! - `rewards_reconciliation_required_total`: decrements whose status write failed
//! - `dispatcher_runs_total{workflow,result}`: finished workflow runs
//! - `dispatcher_retries_total{workflow}`: retried workflow attempts
//! - `dispatcher_step_cache_hits_total`: steps replayed from the journal
//! - `dispatcher_run_duration_seconds{workflow}`: run latency
//!
//! # Example
//!
//! ```rust,no_run
//! use rewardflow_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! // Scrape http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use thiserror::Error;

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build the exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install the exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus scrape endpoint.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    started: bool,
}

impl MetricsServer {
    /// A server that will listen on `addr`.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            started: false,
        }
    }

    /// Install the global recorder and start the HTTP listener.
    ///
    /// Must be called inside a Tokio runtime, at most once per process.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or a recorder
    /// is already installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        if self.started {
            return Ok(());
        }

        PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .install()
            .map_err(|e| MetricsError::Install(e.to_string()))?;

        describe_metrics();
        self.started = true;
        tracing::info!(addr = %self.addr, "Metrics available at http://{}/metrics", self.addr);
        Ok(())
    }

    /// Address the listener binds to.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }
}

fn describe_metrics() {
    describe_counter!(
        "rewards_requests_total",
        "Reward requests by outcome (completed, pending, rejected, failed, duplicate)"
    );
    describe_counter!(
        "rewards_inventory_decrements_total",
        "Inventory decrement attempts by result"
    );
    describe_counter!(
        "rewards_reconciliation_required_total",
        "Decrements committed whose status write failed"
    );
    describe_counter!(
        "dispatcher_runs_total",
        "Finished workflow runs by workflow and result"
    );
    describe_counter!("dispatcher_retries_total", "Retried workflow attempts");
    describe_counter!(
        "dispatcher_step_cache_hits_total",
        "Workflow steps replayed from the step journal"
    );
    describe_counter!(
        "dispatcher_dead_letters_dropped_total",
        "Dead letters evicted because the queue was full"
    );
    describe_gauge!(
        "dispatcher_dead_letter_queue_size",
        "Runs waiting in the dead-letter queue"
    );
    describe_histogram!(
        "dispatcher_run_duration_seconds",
        "Wall time of a workflow run including retries"
    );
}
