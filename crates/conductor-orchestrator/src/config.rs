use conductor_core::{ConductorError, ConductorResult, DEFAULT_MAX_RETRIES};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Backoff settings for the retry manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry; doubles for every further retry.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Cap for a single backoff sleep.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl RetryPolicy {
    /// Sleep before retry number `retry` (1-based): `base * 2^(retry-1)`, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1);
        let delay = self
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }
}

/// Orchestrator configuration, usually loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_concurrent_agents")]
    pub max_concurrent_agents: usize,
    #[serde(default = "default_agent_execution_timeout_ms")]
    pub agent_execution_timeout_ms: u64,
    #[serde(default = "default_max_history_size")]
    pub max_history_size: usize,
    #[serde(default = "default_queue_notice_threshold_ms")]
    pub queue_notice_threshold_ms: u64,
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_periodic_update_interval_ms")]
    pub periodic_update_interval_ms: u64,
    #[serde(default = "default_stream_updates")]
    pub stream_updates: bool,
}

fn default_max_concurrent_agents() -> usize {
    10
}
fn default_agent_execution_timeout_ms() -> u64 {
    30_000
}
fn default_max_history_size() -> usize {
    100
}
fn default_queue_notice_threshold_ms() -> u64 {
    1_000
}
fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_backoff_base_ms() -> u64 {
    1_000
}
fn default_backoff_max_ms() -> u64 {
    30_000
}
fn default_periodic_update_interval_ms() -> u64 {
    5_000
}
fn default_stream_updates() -> bool {
    true
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_agents: default_max_concurrent_agents(),
            agent_execution_timeout_ms: default_agent_execution_timeout_ms(),
            max_history_size: default_max_history_size(),
            queue_notice_threshold_ms: default_queue_notice_threshold_ms(),
            default_max_retries: default_max_retries(),
            retry: RetryPolicy::default(),
            periodic_update_interval_ms: default_periodic_update_interval_ms(),
            stream_updates: default_stream_updates(),
        }
    }
}

impl OrchestratorConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(raw: &str) -> ConductorResult<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML config file.
    pub async fn load(path: impl AsRef<Path>) -> ConductorResult<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            ConductorError::Configuration(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Reject values the orchestrator cannot run with.
    pub fn validate(&self) -> ConductorResult<()> {
        if self.max_concurrent_agents == 0 {
            return Err(ConductorError::Configuration(
                "max_concurrent_agents must be at least 1".into(),
            ));
        }
        if self.agent_execution_timeout_ms == 0 {
            return Err(ConductorError::Configuration(
                "agent_execution_timeout_ms must be positive".into(),
            ));
        }
        if self.max_history_size == 0 {
            return Err(ConductorError::Configuration(
                "max_history_size must be at least 1".into(),
            ));
        }
        if self.periodic_update_interval_ms == 0 {
            return Err(ConductorError::Configuration(
                "periodic_update_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Replace every value [`validate`](Self::validate) would reject with its
    /// default, logging each replacement.
    pub fn sanitized(mut self) -> Self {
        if self.max_concurrent_agents == 0 {
            warn!(default = default_max_concurrent_agents(), "max_concurrent_agents is 0, using default");
            self.max_concurrent_agents = default_max_concurrent_agents();
        }
        if self.agent_execution_timeout_ms == 0 {
            warn!(default = default_agent_execution_timeout_ms(), "agent_execution_timeout_ms is 0, using default");
            self.agent_execution_timeout_ms = default_agent_execution_timeout_ms();
        }
        if self.max_history_size == 0 {
            warn!(default = default_max_history_size(), "max_history_size is 0, using default");
            self.max_history_size = default_max_history_size();
        }
        if self.periodic_update_interval_ms == 0 {
            warn!(
                default = default_periodic_update_interval_ms(),
                "periodic_update_interval_ms is 0, using default"
            );
            self.periodic_update_interval_ms = default_periodic_update_interval_ms();
        }
        self
    }

    pub fn agent_execution_timeout(&self) -> Duration {
        Duration::from_millis(self.agent_execution_timeout_ms)
    }

    pub fn queue_notice_threshold(&self) -> Duration {
        Duration::from_millis(self.queue_notice_threshold_ms)
    }

    pub fn periodic_update_interval(&self) -> Duration {
        Duration::from_millis(self.periodic_update_interval_ms)
    }
}
