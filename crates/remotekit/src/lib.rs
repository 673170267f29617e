//! # Remotekit
//!
//! Calls a remote resource-management endpoint without letting a flaky
//! network take the caller down with it.
//!
//! - [`CircuitBreaker`] stops calling a failing target for a cooldown period.
//!   Breakers live in a [`BreakerRegistry`] keyed by target and are shared by
//!   every client of that target.
//! - [`with_retry`] retries transient failures with exponential backoff and
//!   optional jitter.
//! - [`Transport`] performs a single attempt. [`HttpTransport`] speaks
//!   JSON-RPC over HTTP; [`MockTransport`] replays scripted outcomes in tests.
//! - [`ResilientClient`] combines them and implements
//!   [`changeplan::ResourceProvider`].
//!
//! ```ignore
//! use remotekit::{BreakerRegistry, ClientConfig, ResilientClient};
//!
//! let config = ClientConfig::default();
//! let registry = BreakerRegistry::new(config.breaker.clone());
//! let client = ResilientClient::from_config(&config, &registry);
//! client.health()?;
//! ```

pub mod breaker;
pub mod client;
pub mod config;
pub mod http;
pub mod retry;
pub mod transport;

pub use breaker::{BreakerRegistry, BreakerState, CircuitBreaker, Permit};
pub use changeplan::{Error, Result};
pub use client::ResilientClient;
pub use config::{CircuitBreakerConfig, ClientConfig, DEFAULT_ENDPOINT, RetryPolicy};
pub use http::HttpTransport;
pub use retry::{RecordingSleeper, Sleeper, ThreadSleeper, with_retry};
pub use transport::{MockTransport, Operation, Request, Response, Transport};
