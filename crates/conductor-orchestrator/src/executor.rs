use crate::registry::{Agent, AgentRegistry};
use crate::reporter::RunReporter;
use conductor_core::{ConductorError, ConductorResult, ExecutionContext, SharedState};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{error, warn};

/// Looks agents up and runs single attempts under a hard deadline.
pub struct AgentExecutor {
    registry: Arc<dyn AgentRegistry>,
    timeout: Duration,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl AgentExecutor {
    pub fn new(registry: Arc<dyn AgentRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Find the agent named by the context. A missing agent is a
    /// configuration error for this run.
    pub async fn resolve(&self, ctx: &ExecutionContext) -> ConductorResult<Arc<dyn Agent>> {
        self.registry
            .get_async(&ctx.agent_name, ctx)
            .await
            .ok_or_else(|| {
                ConductorError::Configuration(format!(
                    "agent '{}' is not registered",
                    ctx.agent_name
                ))
            })
    }

    /// Run one attempt of `agent`.
    ///
    /// The agent runs on its own task so that a deadline or a cancellation
    /// can abort it without touching sibling runs, and so that a panic in
    /// agent code surfaces as [`ConductorError::Execution`]. Dropping the
    /// returned future aborts the task as well.
    pub async fn execute(
        &self,
        agent: Arc<dyn Agent>,
        state: SharedState,
        reporter: RunReporter,
        cancel: &CancellationToken,
    ) -> ConductorResult<serde_json::Value> {
        let name = agent.name().to_string();
        let run_id = reporter.run_id().to_string();
        let mut handle =
            AbortOnDropHandle::new(tokio::spawn(async move { agent.execute(state, reporter).await }));

        tokio::select! {
            joined = &mut handle => match joined {
                Ok(result) => result,
                Err(e) if e.is_panic() => {
                    let msg = panic_message(e.into_panic());
                    error!(run_id = %run_id, agent = %name, panic = %msg, "Agent panicked");
                    Err(ConductorError::Execution(format!("agent '{name}' panicked: {msg}")))
                }
                Err(_) => Err(ConductorError::Cancelled(format!(
                    "agent '{name}' task was aborted"
                ))),
            },
            _ = tokio::time::sleep(self.timeout) => {
                handle.abort();
                warn!(
                    run_id = %run_id,
                    agent = %name,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Agent execution timed out"
                );
                Err(ConductorError::timeout(self.timeout))
            }
            _ = cancel.cancelled() => {
                handle.abort();
                warn!(run_id = %run_id, agent = %name, "Agent execution cancelled");
                Err(ConductorError::Cancelled(format!("run '{run_id}' was cancelled")))
            }
        }
    }
}
