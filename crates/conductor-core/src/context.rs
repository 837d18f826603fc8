use crate::error::ConductorError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Free-form key/value metadata attached to contexts, steps and results.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Default number of retries granted to a new context.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Per-run execution context.
///
/// Created once per run request and owned by that run. Pipeline steps get
/// their own derived copy (see [`ExecutionContext::for_step`]); contexts are
/// never shared across runs or users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub run_id: String,
    pub thread_id: String,
    pub user_id: String,
    pub request_id: String,
    pub agent_name: String,
    /// Retries consumed so far. Never exceeds `max_retries`.
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub flow_id: Option<String>,
}

impl ExecutionContext {
    /// Creates a context for a fresh run with a generated run and request id.
    pub fn new(
        agent_name: impl Into<String>,
        thread_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            user_id: user_id.into(),
            request_id: Uuid::new_v4().to_string(),
            agent_name: agent_name.into(),
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            metadata: Metadata::new(),
            flow_id: None,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_flow_id(mut self, flow_id: impl Into<String>) -> Self {
        self.flow_id = Some(flow_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether another retry is still allowed.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Derives the context for one pipeline step.
    ///
    /// Identity fields (`run_id`, `thread_id`, `user_id`, `request_id`,
    /// `flow_id`) and the retry budget come from the pipeline's base context;
    /// `agent_name` and `metadata` come from the step. The retry counter
    /// starts from zero.
    pub fn for_step(&self, agent_name: &str, metadata: &Metadata) -> Self {
        Self {
            run_id: self.run_id.clone(),
            thread_id: self.thread_id.clone(),
            user_id: self.user_id.clone(),
            request_id: self.request_id.clone(),
            agent_name: agent_name.to_string(),
            retry_count: 0,
            max_retries: self.max_retries,
            metadata: metadata.clone(),
            flow_id: self.flow_id.clone(),
        }
    }
}

/// Outcome of one run. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub agent_name: String,
    pub run_id: String,
    pub duration: Duration,
    pub error: Option<String>,
    /// Value returned by the agent (or the fallback), if any.
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub metadata: Metadata,
    pub completed_at: DateTime<Utc>,
}

impl ExecutionResult {
    fn base(ctx: &ExecutionContext, success: bool, duration: Duration) -> Self {
        Self {
            success,
            agent_name: ctx.agent_name.clone(),
            run_id: ctx.run_id.clone(),
            duration,
            error: None,
            output: None,
            metadata: Metadata::new(),
            completed_at: Utc::now(),
        }
    }

    /// A successful run.
    pub fn success(ctx: &ExecutionContext, output: serde_json::Value, duration: Duration) -> Self {
        let mut result = Self::base(ctx, true, duration);
        result.output = Some(output);
        result.metadata.insert("retry_count".into(), ctx.retry_count.into());
        result
    }

    /// A run that exceeded its deadline.
    pub fn timeout(ctx: &ExecutionContext, deadline: Duration, duration: Duration) -> Self {
        Self::error(ctx, &ConductorError::timeout(deadline), duration)
    }

    /// A failed run.
    ///
    /// `metadata.error_type` carries the error's taxonomy name; timeouts also
    /// set `metadata.timeout = true` and cancellations `metadata.cancelled = true`.
    pub fn error(ctx: &ExecutionContext, err: &ConductorError, duration: Duration) -> Self {
        let mut result = Self::base(ctx, false, duration);
        result.error = Some(err.to_string());
        result
            .metadata
            .insert("error_type".into(), err.kind().into());
        result.metadata.insert("retry_count".into(), ctx.retry_count.into());
        match err {
            ConductorError::Timeout { .. } => {
                result.metadata.insert("timeout".into(), true.into());
            }
            ConductorError::Cancelled(_) => {
                result.metadata.insert("cancelled".into(), true.into());
            }
            _ => {}
        }
        result
    }

    /// A degraded result produced by a fallback strategy after retries ran out.
    ///
    /// `success` reflects whether the fallback produced usable output.
    pub fn fallback(
        ctx: &ExecutionContext,
        outcome: Result<serde_json::Value, ConductorError>,
        last_error: &ConductorError,
        duration: Duration,
    ) -> Self {
        let mut result = match outcome {
            Ok(output) => {
                let mut result = Self::base(ctx, true, duration);
                result.output = Some(output);
                result.error = Some(last_error.to_string());
                result.metadata.insert("retry_count".into(), ctx.retry_count.into());
                result
            }
            Err(err) => Self::error(ctx, &err, duration),
        };
        result.metadata.insert("fallback_used".into(), true.into());
        result
            .metadata
            .insert("original_error_type".into(), last_error.kind().into());
        result
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    fn flag(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    pub fn is_timeout(&self) -> bool {
        self.flag("timeout")
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag("cancelled")
    }

    pub fn used_fallback(&self) -> bool {
        self.flag("fallback_used")
    }

    /// The recorded `metadata.error_type`, if the run failed.
    pub fn error_type(&self) -> Option<&str> {
        self.metadata.get("error_type").and_then(|v| v.as_str())
    }
}
