//! Agent execution orchestrator: admission, lifecycle events, retries and pipelines.
//!
//! Runs opaque agents on behalf of many concurrent callers. Every admitted
//! run is bracketed by `agent_started` and exactly one `agent_completed`,
//! whatever happens in between (success, failure, fallback, timeout, panic,
//! cancellation).
//!
//! # Main types
//!
//! - [`Orchestrator`]: Top-level engine exposing `execute_agent` and `execute_pipeline`.
//! - [`OrchestratorConfig`]: TOML-loadable limits, timeouts and retry policy.
//! - [`AdmissionController`]: Bounded concurrency gate with queue-wait measurement.
//! - [`EventNotifier`] / [`BroadcastNotifier`]: Lifecycle event transport contract and in-process implementation.
//! - [`RunReporter`]: Per-run event handle enforcing ordering and tool pairing.
//! - [`RetryManager`] / [`FallbackStrategy`]: Exponential-backoff retries with a last-resort fallback.
//! - [`PipelineExecutor`]: Sequential or opt-in parallel step scheduling.
//! - [`ExecutionTracker`]: Bounded history and aggregate statistics.

/// Admission control.
pub mod admission;
/// Orchestrator configuration.
pub mod config;
/// Top-level orchestration engine.
pub mod engine;
/// Agent execution core with deadline and cancellation.
pub mod executor;
/// Event notifier contract and broadcast implementation.
pub mod notifier;
/// Pipeline scheduling.
pub mod pipeline;
/// Periodic progress updates.
pub mod progress;
/// Agent trait and registries.
pub mod registry;
/// Per-run event reporter.
pub mod reporter;
/// Retry and fallback policy.
pub mod retry;
/// Execution history and statistics.
pub mod tracker;

pub use admission::{AdmissionController, AdmissionPermit};
pub use config::{OrchestratorConfig, RetryPolicy};
pub use engine::Orchestrator;
pub use executor::AgentExecutor;
pub use notifier::{BroadcastNotifier, EventNotifier};
pub use pipeline::{PipelineExecutor, StepRunner};
pub use progress::{IntervalUpdateManager, OperationGuard, PeriodicUpdateManager};
pub use registry::{Agent, AgentRegistry, InMemoryAgentRegistry};
pub use reporter::RunReporter;
pub use retry::{
    DegradedResponseFallback, FallbackStrategy, NoFallback, RetryManager, RetryOutcome,
    RetryReport,
};
pub use tracker::{ExecutionTracker, Gauges, StatsSnapshot};
