use crate::config::RetryPolicy;
use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult, ExecutionContext, SharedState};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Produces a last-resort outcome once a run has used up its retries.
#[async_trait]
pub trait FallbackStrategy: Send + Sync {
    /// `Ok` means a degraded but usable result; `Err` means the run fails.
    async fn fallback(
        &self,
        ctx: &ExecutionContext,
        state: &SharedState,
        last_error: &ConductorError,
    ) -> ConductorResult<serde_json::Value>;
}

/// Writes an apology into `final_answer` (unless the agent already left one)
/// and reports a degraded success.
pub struct DegradedResponseFallback;

#[async_trait]
impl FallbackStrategy for DegradedResponseFallback {
    async fn fallback(
        &self,
        ctx: &ExecutionContext,
        state: &SharedState,
        last_error: &ConductorError,
    ) -> ConductorResult<serde_json::Value> {
        let message = format!(
            "Sorry, {} could not complete this request right now. Please try again shortly.",
            ctx.agent_name
        );
        {
            let mut guard = state.write().await;
            if guard.final_answer.is_none() {
                guard.final_answer = Some(message.clone());
            }
        }
        info!(
            run_id = %ctx.run_id,
            agent = %ctx.agent_name,
            "Degraded response fallback applied"
        );
        Ok(serde_json::json!({
            "degraded": true,
            "message": message,
            "reason": last_error.to_string(),
        }))
    }
}

/// Gives up: exhausted retries turn into a failed run.
pub struct NoFallback;

#[async_trait]
impl FallbackStrategy for NoFallback {
    async fn fallback(
        &self,
        ctx: &ExecutionContext,
        _state: &SharedState,
        last_error: &ConductorError,
    ) -> ConductorResult<serde_json::Value> {
        Err(ConductorError::FallbackExhausted(format!(
            "'{}' failed after {} retries: {last_error}",
            ctx.agent_name, ctx.retry_count
        )))
    }
}

/// How a retried run ended.
#[derive(Debug)]
pub enum RetryOutcome {
    Succeeded(serde_json::Value),
    /// A non-retryable error ended the run.
    Failed(ConductorError),
    /// Retries ran out and the fallback strategy produced `outcome`.
    Fallback {
        outcome: ConductorResult<serde_json::Value>,
        last_error: ConductorError,
    },
}

#[derive(Debug)]
pub struct RetryReport {
    pub outcome: RetryOutcome,
    pub attempts: u32,
    pub failed_attempts: u32,
}

/// Re-runs failed attempts with exponential backoff, then hands over to a
/// [`FallbackStrategy`].
///
/// Only [`ConductorError::Execution`] is retried. Timeouts, missing agents
/// and cancellations end the run on the first occurrence.
pub struct RetryManager {
    policy: RetryPolicy,
    fallback: Arc<dyn FallbackStrategy>,
}

impl RetryManager {
    pub fn new(policy: RetryPolicy, fallback: Arc<dyn FallbackStrategy>) -> Self {
        Self { policy, fallback }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Drive `attempt` until it succeeds or the context's retry budget is
    /// spent. `attempt` receives the 1-based attempt number.
    ///
    /// `ctx.retry_count` is advanced in place, so the caller's context
    /// reflects the retries consumed when this returns.
    pub async fn run<F, Fut>(
        &self,
        ctx: &mut ExecutionContext,
        state: &SharedState,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> RetryReport
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ConductorResult<serde_json::Value>>,
    {
        let mut attempts = 0u32;
        let mut failed_attempts = 0u32;

        loop {
            attempts += 1;
            let err = match attempt(attempts).await {
                Ok(value) => {
                    return RetryReport {
                        outcome: RetryOutcome::Succeeded(value),
                        attempts,
                        failed_attempts,
                    }
                }
                Err(e) => e,
            };
            failed_attempts += 1;

            if !err.is_retryable() {
                return RetryReport {
                    outcome: RetryOutcome::Failed(err),
                    attempts,
                    failed_attempts,
                };
            }

            if !ctx.can_retry() {
                error!(
                    run_id = %ctx.run_id,
                    agent = %ctx.agent_name,
                    retries = ctx.retry_count,
                    error = %err,
                    "Retries exhausted, running fallback"
                );
                let outcome = self.fallback.fallback(ctx, state, &err).await;
                return RetryReport {
                    outcome: RetryOutcome::Fallback {
                        outcome,
                        last_error: err,
                    },
                    attempts,
                    failed_attempts,
                };
            }

            ctx.retry_count += 1;
            let delay = self.policy.backoff(ctx.retry_count);
            warn!(
                run_id = %ctx.run_id,
                agent = %ctx.agent_name,
                retry = ctx.retry_count,
                max_retries = ctx.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Attempt failed, retrying"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    return RetryReport {
                        outcome: RetryOutcome::Failed(ConductorError::Cancelled(format!(
                            "run '{}' was cancelled during backoff",
                            ctx.run_id
                        ))),
                        attempts,
                        failed_attempts,
                    };
                }
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
