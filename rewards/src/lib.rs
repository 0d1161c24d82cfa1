//! # Rewards
//!
//! Reward request processing on top of the rewardflow crates.
//!
//! A user claims an event's reward; the [`processor::RequestProcessor`]
//! records the claim under an idempotency key, checks the event window and
//! stock, evaluates the event condition against the user's action log, and
//! either completes the request, leaves it for admin approval, or rejects it.
//!
//! ## Modules
//!
//! - [`condition`]: strategy map from event type to condition evaluation
//! - [`inventory`]: timed access to reward stock
//! - [`catalog`]: event and reward lookup and administration
//! - [`processor`]: the request state machine
//! - [`workflows`]: background processing of user actions and deferred requests
//! - [`actions`]: named actions delivered by the transport
//! - [`app`]: wiring for the worker binary and tests
//! - [`config`]: environment configuration
//!
//! ## Example
//!
//! ```no_run
//! use rewards::app::{RewardsApp, Stores};
//! use rewards::config::Config;
//! use rewardflow_postgres::{PoolSettings, PostgresStore};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresStore::connect("postgres://localhost/rewards", &PoolSettings::default()).await?;
//! let app = RewardsApp::builder(Config::from_env(), Stores::shared(Arc::new(store))).start();
//!
//! let request = app
//!     .router()
//!     .handle(
//!         "reward.request",
//!         serde_json::json!({
//!             "userId": "6f1c2f4e-9d0b-4d6c-8a57-2b1f0c3e4a11",
//!             "eventId": "0b5d7a3c-1e2f-4a6b-9c8d-7e6f5a4b3c21",
//!         }),
//!     )
//!     .await?;
//! println!("{request}");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod actions;
pub mod app;
pub mod catalog;
pub mod condition;
pub mod config;
pub mod inventory;
pub mod processor;
pub mod workflows;
