use thiserror::Error;

/// A convenience `Result` alias using [`ConductorError`].
pub type ConductorResult<T> = Result<T, ConductorError>;

/// Top-level error type for the conductor orchestrator.
///
/// Every variant is caught at the boundary nearest its origin and converted
/// into a failed [`ExecutionResult`](crate::ExecutionResult); none of them
/// escape the orchestrator's public entry points.
#[derive(Error, Debug)]
pub enum ConductorError {
    /// The agent did not finish before its deadline.
    #[error("execution timed out after {seconds}s (timeout)")]
    Timeout {
        /// The deadline that was exceeded, in (possibly fractional) seconds.
        seconds: f64,
    },

    /// Unexpected failure raised by agent code.
    #[error("Execution error: {0}")]
    Execution(String),

    /// Agent missing from the registry, or invalid orchestrator configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A pipeline step condition predicate failed.
    #[error("Condition evaluation error: {0}")]
    ConditionEvaluation(String),

    /// Retries were used up and the fallback strategy produced nothing usable.
    #[error("Fallback exhausted: {0}")]
    FallbackExhausted(String),

    /// The event transport rejected a notification.
    #[error("Notifier delivery error: {0}")]
    NotifierDelivery(String),

    /// The run was cancelled before it finished.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// The orchestrator is shutting down and admits no new runs.
    #[error("orchestrator is shutting down")]
    ShuttingDown,

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A TOML configuration parse error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ConductorError {
    /// Builds a [`ConductorError::Timeout`] from a deadline.
    pub fn timeout(deadline: std::time::Duration) -> Self {
        Self::Timeout {
            seconds: deadline.as_secs_f64(),
        }
    }

    /// Taxonomy name of the error, recorded as `metadata.error_type`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "Timeout",
            Self::Execution(_) => "ExecutionError",
            Self::Configuration(_) => "ConfigurationError",
            Self::ConditionEvaluation(_) => "ConditionEvaluationError",
            Self::FallbackExhausted(_) => "FallbackExhausted",
            Self::NotifierDelivery(_) => "NotifierDeliveryError",
            Self::Cancelled(_) => "Cancelled",
            Self::ShuttingDown => "ShuttingDown",
            Self::Json(_) => "JsonError",
            Self::Io(_) => "IoError",
            Self::Toml(_) => "TomlError",
        }
    }

    /// Whether another attempt may succeed.
    ///
    /// Only generic execution errors are retried; timeouts, configuration
    /// problems and cancellation go straight to a failed result.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Execution(_))
    }
}
