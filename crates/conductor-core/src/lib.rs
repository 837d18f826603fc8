//! Core types and error definitions for the conductor agent orchestrator.
//!
//! This crate holds the value records passed between the orchestrator's
//! components and the lifecycle events promised to UI clients.
//!
//! # Main types
//!
//! - [`ConductorError`]: Unified error enum; every variant ends up as a failed result.
//! - [`ExecutionContext`]: Identity and retry budget of one run.
//! - [`ExecutionResult`]: Immutable outcome of one run.
//! - [`PipelineStep`]: A typed pipeline step with strategy, dependencies and condition.
//! - [`AgentState`]: Mutable state shared with agents through [`SharedState`].
//! - [`RunEvent`]: A lifecycle notification (`agent_started` … `agent_completed`).

/// Execution context and result records.
pub mod context;
/// Error types.
pub mod error;
/// Lifecycle events and delivery counters.
pub mod event;
/// Pipeline step model and parallel eligibility.
pub mod pipeline;
/// Shared agent state.
pub mod state;

pub use context::{ExecutionContext, ExecutionResult, Metadata, DEFAULT_MAX_RETRIES};
pub use error::{ConductorError, ConductorResult};
pub use event::{DeliveryStats, RunEvent, RunEventKind};
pub use pipeline::{
    is_parallel_eligible, ExecutionStrategy, PipelineStep, StepCondition, CONTINUE_ON_ERROR,
    REQUIRES_SEQUENTIAL,
};
pub use state::{AgentState, SharedState};
