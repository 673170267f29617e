//! # Changeplan
//!
//! Reconcile a declared desired infrastructure state against the tracked
//! current state, gate the resulting plan behind approval, and apply it.
//!
//! ## Core Concepts
//!
//! - **Change**: a create, update or delete of one resource, with its
//!   dependencies and risk level
//! - **ChangePlan**: dependency-ordered changes derived from a state diff
//! - **ApprovalWorkflow**: moves plans from pending to a final disposition
//! - **ExecutionCoordinator**: applies approved plans and commits the new
//!   state with compare-and-swap
//!
//! ## Example
//!
//! ```ignore
//! use changeplan::{
//!     ApprovalConfig, ApprovalWorkflow, ChangePlanEngine, DefaultChangePlanEngine,
//!     DesiredState, ExecutionCoordinator, MemoryStateStore, MockProvider, NoProgress,
//!     ResourceConfig,
//! };
//!
//! let engine = DefaultChangePlanEngine::default();
//! let desired = DesiredState::new(vec![ResourceConfig::new("logs", "bucket", "eu-west-1")]);
//! let plan = engine.generate_plan("web", None, &desired, chrono::Utc::now())?;
//! let plan_id = plan.id().to_string();
//!
//! let approvals = ApprovalWorkflow::new(ApprovalConfig::default());
//! approvals.submit(plan, chrono::Utc::now())?;
//! approvals.approve(&plan_id, "alice", chrono::Utc::now())?;
//!
//! let (provider, store) = (MockProvider::new(), MemoryStateStore::new());
//! ExecutionCoordinator::new(&provider, &store, &approvals).execute(&plan_id, &mut NoProgress)?;
//! ```
//!
//! ## Capability Traits
//!
//! - [`ChangePlanEngine`]: plan generation and validation
//! - [`ResourceProvider`]: the remote resource-management endpoint
//! - [`StateStore`]: versioned state storage with compare-and-swap
//! - [`CostEstimator`]: price lookup
//! - [`ProgressCallback`]: receives execution progress

pub mod approval;
pub mod change;
pub mod context;
pub mod diff;
pub mod engine;
pub mod error;
pub mod executor;
pub mod graph;
pub mod policy;
pub mod provider;
pub mod risk;
pub mod store;
pub mod types;

// Re-export main types at crate root
pub use approval::{
    ApprovalBook, ApprovalConfig, ApprovalEvent, ApprovalWorkflow, AutoApprovalRule, HaltedRun,
    SYSTEM_ACTOR,
};
pub use change::{Change, ChangeAction, ChangePlan, ChangeSummary, PlanStatus, RiskLevel};
pub use context::{NoProgress, ProgressCallback};
pub use diff::compute_changes;
pub use engine::{
    ChangePlanEngine, CostEstimate, CostEstimator, DefaultChangePlanEngine, ValidationReport,
};
pub use error::{Error, ErrorCategory, ErrorReport, Result};
pub use executor::{ChangeOutcome, ExecutionCoordinator, ExecutionResult};
pub use graph::DependencyGraph;
pub use policy::PlanPolicy;
pub use provider::{MockProvider, ResourceProvider};
pub use risk::RiskAssessor;
pub use store::{MemoryStateStore, StateStore, check_candidate};
pub use types::{
    DesiredState, InfrastructureState, Properties, PropertyValue, Resource, ResourceConfig,
    ResourceStatus, StateMetadata, StateSnapshot, Tags,
};
