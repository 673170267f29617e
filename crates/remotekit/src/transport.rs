//! Raw transport to the resource-management endpoint

use changeplan::{Error, Resource, ResourceConfig, ResourceStatus, Result};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Operation requested from the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
    Status,
    Health,
}

impl Operation {
    /// Remote method name.
    pub fn method(self) -> &'static str {
        match self {
            Self::Create => "resource.create",
            Self::Read => "resource.get",
            Self::Update => "resource.update",
            Self::Delete => "resource.delete",
            Self::Status => "resource.status",
            Self::Health => "health.check",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method())
    }
}

/// A single call to the endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub operation: Operation,
    pub resource_type: String,
    pub resource_id: String,
    /// Configuration to apply, for create and update
    pub config: Option<ResourceConfig>,
}

impl Request {
    pub fn new(operation: Operation, resource_type: &str, resource_id: &str) -> Self {
        Self {
            operation,
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            config: None,
        }
    }

    pub fn with_config(operation: Operation, config: &ResourceConfig) -> Self {
        Self {
            config: Some(config.clone()),
            ..Self::new(operation, &config.resource_type, &config.id)
        }
    }

    pub fn health() -> Self {
        Self::new(Operation::Health, "", "")
    }
}

/// What the endpoint answered.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Resource(Resource),
    Status(ResourceStatus),
    Deleted,
    Healthy,
}

/// Sends requests to one remote target.
pub trait Transport: Send + Sync {
    /// Identifies the target for breaker keying and error reports.
    fn target(&self) -> &str;

    /// Perform one attempt, bounded by the transport's own timeout.
    fn send(&self, request: &Request) -> Result<Response>;
}

/// Scripted transport for testing without network access.
///
/// Queued outcomes are returned in order; once the queue is empty the mock
/// answers like a healthy endpoint that echoes the request.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    target: String,
    script: Arc<Mutex<VecDeque<Result<Response>>>>,
    requests: Arc<Mutex<Vec<Request>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockTransport {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }

    pub fn push_ok(&self, response: Response) {
        lock(&self.script).push_back(Ok(response));
    }

    pub fn push_err(&self, error: Error) {
        lock(&self.script).push_back(Err(error));
    }

    /// Queue `count` connection failures.
    pub fn push_failures(&self, count: usize) {
        for _ in 0..count {
            self.push_err(Error::ConnectionFailure {
                target: self.target.clone(),
                message: "connection refused".to_string(),
            });
        }
    }

    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn requests(&self) -> Vec<Request> {
        lock(&self.requests).clone()
    }

    fn echo(request: &Request) -> Response {
        match request.operation {
            Operation::Create | Operation::Update | Operation::Read => {
                let config = request.config.clone().unwrap_or_else(|| {
                    ResourceConfig::new(&request.resource_id, &request.resource_type, "")
                });
                Response::Resource(Resource::from_config(&config, chrono::Utc::now()))
            }
            Operation::Status => Response::Status(ResourceStatus::Active),
            Operation::Delete => Response::Deleted,
            Operation::Health => Response::Healthy,
        }
    }
}

impl Transport for MockTransport {
    fn target(&self) -> &str {
        &self.target
    }

    fn send(&self, request: &Request) -> Result<Response> {
        lock(&self.requests).push(request.clone());
        lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| Ok(Self::echo(request)))
    }
}
