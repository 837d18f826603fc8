use crate::context::Metadata;
use crate::error::{ConductorError, ConductorResult};
use crate::state::AgentState;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Metadata key that forces a step (and its batch) onto the sequential path.
pub const REQUIRES_SEQUENTIAL: &str = "requires_sequential";
/// Metadata key that lets a pipeline continue past this step's failure.
pub const CONTINUE_ON_ERROR: &str = "continue_on_error";

/// How a step wants to be scheduled relative to its siblings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    /// No preference; treated as sequential unless a sibling opts into parallel.
    #[default]
    Unset,
    Sequential,
    Parallel,
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStrategy::Unset => write!(f, "unset"),
            ExecutionStrategy::Sequential => write!(f, "sequential"),
            ExecutionStrategy::Parallel => write!(f, "parallel"),
        }
    }
}

/// Predicate over the shared agent state deciding whether a step runs.
pub type StepCondition = Arc<dyn Fn(&AgentState) -> ConductorResult<bool> + Send + Sync>;

/// One step of a pipeline. Declared by the caller, read-only during execution.
#[derive(Clone)]
pub struct PipelineStep {
    pub agent_name: String,
    pub strategy: ExecutionStrategy,
    /// Names of earlier steps' agents this step depends on.
    pub dependencies: Vec<String>,
    pub condition: Option<StepCondition>,
    pub metadata: Metadata,
}

impl PipelineStep {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            strategy: ExecutionStrategy::Unset,
            dependencies: Vec::new(),
            condition: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn parallel(self) -> Self {
        self.with_strategy(ExecutionStrategy::Parallel)
    }

    pub fn sequential(self) -> Self {
        self.with_strategy(ExecutionStrategy::Sequential)
    }

    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn with_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&AgentState) -> ConductorResult<bool> + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Marks the step so that its failure does not halt the pipeline.
    pub fn continue_on_error(self) -> Self {
        self.with_metadata(CONTINUE_ON_ERROR, serde_json::Value::Bool(true))
    }

    fn flag(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    pub fn continues_on_error(&self) -> bool {
        self.flag(CONTINUE_ON_ERROR)
    }

    pub fn requires_sequential(&self) -> bool {
        self.strategy == ExecutionStrategy::Sequential || self.flag(REQUIRES_SEQUENTIAL)
    }

    /// Whether this step could run alongside siblings.
    pub fn is_parallel_safe(&self) -> bool {
        self.dependencies.is_empty() && !self.requires_sequential()
    }

    /// Evaluates the step condition against `state`.
    ///
    /// A step without a condition always runs. A predicate that panics is
    /// reported as [`ConductorError::ConditionEvaluation`].
    pub fn should_run(&self, state: &AgentState) -> ConductorResult<bool> {
        let Some(condition) = &self.condition else {
            return Ok(true);
        };
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| condition(state)))
            .unwrap_or_else(|_| {
                Err(ConductorError::ConditionEvaluation(format!(
                    "condition for step '{}' panicked",
                    self.agent_name
                )))
            })
    }
}

impl fmt::Debug for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineStep")
            .field("agent_name", &self.agent_name)
            .field("strategy", &self.strategy)
            .field("dependencies", &self.dependencies)
            .field("has_condition", &self.condition.is_some())
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Decides whether a batch of steps may fan out concurrently.
///
/// Parallelism is never inferred: every step must be parallel-safe (no
/// dependencies, no sequential requirement), there must be more than one
/// step, and at least one step must explicitly ask for
/// [`ExecutionStrategy::Parallel`].
pub fn is_parallel_eligible(steps: &[PipelineStep]) -> bool {
    steps.len() > 1
        && steps.iter().all(PipelineStep::is_parallel_safe)
        && steps
            .iter()
            .any(|s| s.strategy == ExecutionStrategy::Parallel)
}
