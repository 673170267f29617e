//! Resilient client
//!
//! Every call goes through breaker admission, then the retry loop around the
//! transport, then breaker outcome recording.

use crate::breaker::{BreakerRegistry, CircuitBreaker};
use crate::config::{ClientConfig, RetryPolicy};
use crate::http::HttpTransport;
use crate::retry::{Sleeper, ThreadSleeper, with_retry};
use crate::transport::{Operation, Request, Response, Transport};
use changeplan::{Error, Resource, ResourceConfig, ResourceProvider, ResourceStatus, Result};
use std::sync::Arc;

/// Client for a resource-management endpoint that survives a flaky network.
pub struct ResilientClient {
    transport: Box<dyn Transport>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl ResilientClient {
    /// Wrap `transport`, sharing the registry's breaker for its target.
    pub fn new(transport: Box<dyn Transport>, registry: &BreakerRegistry, retry: RetryPolicy) -> Self {
        let breaker = registry.breaker(transport.target());
        Self {
            transport,
            breaker,
            retry,
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    /// HTTP client for the configured endpoint.
    pub fn from_config(config: &ClientConfig, registry: &BreakerRegistry) -> Self {
        let transport = HttpTransport::new(config.endpoint.clone(), config.timeout);
        Self::new(Box::new(transport), registry, config.retry.clone())
    }

    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn target(&self) -> &str {
        self.transport.target()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Perform one logical call.
    ///
    /// # Errors
    ///
    /// Returns `Error::CircuitOpen` without touching the transport while the
    /// breaker rejects calls, otherwise the last error once retries are spent.
    pub fn invoke(&self, request: &Request) -> Result<Response> {
        let permit = self.breaker.admit()?;

        let outcome = with_retry(&self.retry, self.sleeper.as_ref(), |attempt| {
            log::debug!(
                "{} {} attempt {}",
                request.operation,
                request.resource_id,
                attempt + 1
            );
            self.transport.send(request)
        });

        // Rejections and not-found answers still prove the endpoint is up.
        let healthy = match &outcome {
            Ok(_) => true,
            Err(e) => !e.is_retryable(),
        };
        self.breaker.record(permit, healthy);
        outcome
    }

    fn unexpected(&self, operation: Operation, response: &Response) -> Error {
        Error::InvalidResponse {
            target: self.target().to_string(),
            message: format!("unexpected reply to {operation}: {response:?}"),
        }
    }

    fn expect_resource(&self, request: &Request) -> Result<Resource> {
        match self.invoke(request)? {
            Response::Resource(resource) => Ok(resource),
            other => Err(self.unexpected(request.operation, &other)),
        }
    }
}

impl ResourceProvider for ResilientClient {
    fn create(&self, config: &ResourceConfig) -> Result<Resource> {
        self.expect_resource(&Request::with_config(Operation::Create, config))
    }

    fn update(&self, _current: &ResourceConfig, desired: &ResourceConfig) -> Result<Resource> {
        self.expect_resource(&Request::with_config(Operation::Update, desired))
    }

    fn delete(&self, config: &ResourceConfig) -> Result<()> {
        let request = Request::new(Operation::Delete, &config.resource_type, &config.id);
        match self.invoke(&request)? {
            Response::Deleted => Ok(()),
            other => Err(self.unexpected(request.operation, &other)),
        }
    }

    fn get(&self, resource_type: &str, resource_id: &str) -> Result<Resource> {
        self.expect_resource(&Request::new(Operation::Read, resource_type, resource_id))
    }

    fn status(&self, resource_type: &str, resource_id: &str) -> Result<ResourceStatus> {
        let request = Request::new(Operation::Status, resource_type, resource_id);
        match self.invoke(&request)? {
            Response::Status(status) => Ok(status),
            other => Err(self.unexpected(request.operation, &other)),
        }
    }

    fn health(&self) -> Result<()> {
        let request = Request::health();
        match self.invoke(&request)? {
            Response::Healthy => Ok(()),
            other => Err(self.unexpected(request.operation, &other)),
        }
    }
}
