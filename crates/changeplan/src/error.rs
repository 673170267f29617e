//! Error types for planning, approval and execution.
//!
//! Errors are categorized so the remote layer can decide what to retry and
//! callers can decide what to surface. Every error carries a stable code and
//! structured details naming the offending entities.

use crate::change::PlanStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

/// Categories of errors for retry logic and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Connection or timeout errors (transient, retryable)
    Transient,
    /// Circuit breaker rejected the call without contacting the endpoint
    Rejected,
    /// Resource or plan does not exist
    NotFound,
    /// Input failed validation (including dependency cycles)
    Validation,
    /// Another writer committed state first
    Conflict,
    /// Plan is in the wrong approval status for the requested action
    Workflow,
    /// A plan was only partially applied
    Execution,
    /// State storage or serialization failure
    Storage,
}

impl ErrorCategory {
    /// Whether this error category is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Transient => "Remote endpoint unreachable",
            Self::Rejected => "Remote endpoint temporarily disabled",
            Self::NotFound => "Not found",
            Self::Validation => "Invalid input",
            Self::Conflict => "Concurrent modification",
            Self::Workflow => "Invalid approval transition",
            Self::Execution => "Partial execution",
            Self::Storage => "State storage failure",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Transient => "Check connectivity to the remote endpoint and try again",
            Self::Rejected => "Wait for the recovery timeout before retrying",
            Self::NotFound => "Verify the identifier and project",
            Self::Validation => "Fix the offending changes and generate a new plan",
            Self::Conflict => "Re-diff against the latest state and generate a new plan",
            Self::Workflow => "Check the plan status before acting on it",
            Self::Execution => "Generate a new plan from the resulting state to continue",
            Self::Storage => "Check the state directory and its permissions",
        }
    }
}

/// Errors that can occur while planning, approving or executing changes.
#[derive(Debug, Error)]
pub enum Error {
    /// The remote endpoint could not be reached or answered with a server error
    #[error("connection to {target} failed: {message}")]
    ConnectionFailure { target: String, message: String },

    /// A single remote call attempt exceeded its timeout
    #[error("request to {target} timed out after {timeout_secs:.1}s")]
    Timeout { target: String, timeout_secs: f64 },

    /// The circuit breaker for the target is open
    #[error("circuit open for {target}; calls are rejected until it recovers")]
    CircuitOpen { target: String },

    /// The endpoint answered with something that could not be understood
    #[error("invalid response from {target}: {message}")]
    InvalidResponse { target: String, message: String },

    /// A resource referenced by an operation does not exist
    #[error("resource not found: {resource_id}")]
    ResourceNotFound { resource_id: String },

    /// Input failed validation
    #[error("validation failed: {message}")]
    ValidationFailed {
        message: String,
        change_ids: Vec<String>,
    },

    /// The dependency relation between changes contains a cycle
    #[error("dependency cycle among changes: {}", change_ids.join(", "))]
    DependencyCycle { change_ids: Vec<String> },

    /// No plan with this id is known
    #[error("plan not found: {plan_id}")]
    PlanNotFound { plan_id: String },

    /// The plan is not in a status that allows the action
    #[error("cannot {action} plan {plan_id}: plan is {from}")]
    InvalidTransition {
        plan_id: String,
        from: PlanStatus,
        action: &'static str,
    },

    /// The plan is claimed by a running execution or halted on an earlier one
    #[error("cannot execute plan {plan_id}: {reason}")]
    ExecutionBlocked { plan_id: String, reason: String },

    /// The stored state version moved past the expected version
    #[error(
        "state conflict for project {project_id}: expected version {expected}, store is at {actual}"
    )]
    StateConflict {
        project_id: String,
        expected: u64,
        actual: u64,
    },

    /// A change failed and the plan was only partially applied
    #[error("execution of plan {plan_id} halted at {failed}: {source}")]
    ExecutionFailed {
        plan_id: String,
        completed: Vec<String>,
        failed: String,
        skipped: Vec<String>,
        #[source]
        source: Box<Error>,
    },

    /// State storage failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a validation error naming the offending changes.
    pub fn validation(message: impl Into<String>, change_ids: Vec<String>) -> Self {
        Self::ValidationFailed {
            message: message.into(),
            change_ids,
        }
    }

    /// Get the error category for retry logic.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::ConnectionFailure { .. } | Error::Timeout { .. } => ErrorCategory::Transient,
            Error::CircuitOpen { .. } => ErrorCategory::Rejected,
            Error::ResourceNotFound { .. } | Error::PlanNotFound { .. } => ErrorCategory::NotFound,
            Error::InvalidResponse { .. }
            | Error::ValidationFailed { .. }
            | Error::DependencyCycle { .. } => ErrorCategory::Validation,
            Error::StateConflict { .. } => ErrorCategory::Conflict,
            Error::InvalidTransition { .. } | Error::ExecutionBlocked { .. } => {
                ErrorCategory::Workflow
            }
            Error::ExecutionFailed { .. } => ErrorCategory::Execution,
            Error::Storage(_) | Error::Serialization(_) => ErrorCategory::Storage,
        }
    }

    /// Whether this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Error::ConnectionFailure { .. } => "REMOTE_001",
            Error::Timeout { .. } => "REMOTE_002",
            Error::CircuitOpen { .. } => "REMOTE_003",
            Error::InvalidResponse { .. } => "REMOTE_004",
            Error::ResourceNotFound { .. } => "RESOURCE_001",
            Error::ValidationFailed { .. } => "VALIDATION_001",
            Error::DependencyCycle { .. } => "PLAN_001",
            Error::PlanNotFound { .. } => "PLAN_002",
            Error::InvalidTransition { .. } => "APPROVAL_001",
            Error::ExecutionBlocked { .. } => "APPROVAL_002",
            Error::StateConflict { .. } => "STATE_001",
            Error::Storage(_) => "STATE_002",
            Error::Serialization(_) => "STATE_003",
            Error::ExecutionFailed { .. } => "EXECUTION_001",
        }
    }

    /// Structured details identifying the offending entities.
    pub fn details(&self) -> Value {
        match self {
            Error::ConnectionFailure { target, .. }
            | Error::CircuitOpen { target }
            | Error::InvalidResponse { target, .. } => json!({ "target": target }),
            Error::Timeout {
                target,
                timeout_secs,
            } => json!({ "target": target, "timeoutSecs": timeout_secs }),
            Error::ResourceNotFound { resource_id } => json!({ "resourceId": resource_id }),
            Error::ValidationFailed { change_ids, .. } | Error::DependencyCycle { change_ids } => {
                json!({ "changeIds": change_ids })
            }
            Error::PlanNotFound { plan_id } => json!({ "planId": plan_id }),
            Error::InvalidTransition {
                plan_id,
                from,
                action,
            } => json!({ "planId": plan_id, "status": from, "action": action }),
            Error::ExecutionBlocked { plan_id, reason } => {
                json!({ "planId": plan_id, "reason": reason })
            }
            Error::StateConflict {
                project_id,
                expected,
                actual,
            } => json!({ "projectId": project_id, "expectedVersion": expected, "actualVersion": actual }),
            Error::ExecutionFailed {
                plan_id,
                completed,
                failed,
                skipped,
                source,
            } => json!({
                "planId": plan_id,
                "completed": completed,
                "failed": failed,
                "skipped": skipped,
                "cause": source.code(),
            }),
            Error::Storage(_) | Error::Serialization(_) => Value::Null,
        }
    }
}

/// User-visible rendering of an error.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub code: &'static str,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub details: Value,
}

impl From<&Error> for ErrorReport {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            timestamp: Utc::now(),
            details: err.details(),
        }
    }
}

/// Result type for planning operations
pub type Result<T> = std::result::Result<T, Error>;
