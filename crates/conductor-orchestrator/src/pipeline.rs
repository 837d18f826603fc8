//! Pipeline scheduling: parallel fan-out or ordered sequential execution.

use async_trait::async_trait;
use conductor_core::{
    is_parallel_eligible, ConductorError, ExecutionContext, ExecutionResult, PipelineStep,
    SharedState,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::task::AbortOnDropHandle;
use tracing::{error, info, warn};

/// Runs a single pipeline step to completion.
///
/// Implementations must not fail: every outcome is an [`ExecutionResult`].
#[async_trait]
pub trait StepRunner: Send + Sync + 'static {
    async fn run_step(&self, ctx: ExecutionContext, state: SharedState) -> ExecutionResult;
}

/// Spawned parallel steps, in step order. Dropping it aborts every task.
type FanOut = Vec<(ExecutionContext, AbortOnDropHandle<ExecutionResult>)>;

/// Await every task of a fan-out in order.
///
/// A panicked step becomes a failed result. Any other join failure fails the
/// whole fan-out, but only after the remaining tasks have run to completion,
/// so each of their runs still closes its own event stream.
async fn join_fan_out(fan_out: FanOut) -> Result<Vec<ExecutionResult>, ConductorError> {
    let mut results = Vec::with_capacity(fan_out.len());
    let mut failure = None;
    for (ctx, handle) in fan_out {
        match handle.await {
            Ok(result) => results.push(result),
            Err(e) if e.is_panic() => {
                warn!(run_id = %ctx.run_id, step = %ctx.agent_name, "Pipeline step panicked");
                let err = ConductorError::Execution(format!("step '{}' panicked", ctx.agent_name));
                results.push(ExecutionResult::error(&ctx, &err, Duration::ZERO));
            }
            Err(e) => {
                warn!(run_id = %ctx.run_id, step = %ctx.agent_name, error = %e, "Pipeline step task lost");
                failure.get_or_insert_with(|| {
                    ConductorError::Execution(format!(
                        "parallel step '{}' could not be joined: {e}",
                        ctx.agent_name
                    ))
                });
            }
        }
    }
    match failure {
        Some(err) => Err(err),
        None => Ok(results),
    }
}

/// Schedules a batch of [`PipelineStep`]s on a [`StepRunner`].
pub struct PipelineExecutor {
    runner: Arc<dyn StepRunner>,
}

impl PipelineExecutor {
    pub fn new(runner: Arc<dyn StepRunner>) -> Self {
        Self { runner }
    }

    /// Execute `steps` under `base`.
    ///
    /// Results come back in step order. Skipped steps produce no result and a
    /// sequential halt drops the remainder, so the output may be shorter than
    /// the input.
    pub async fn execute(
        &self,
        steps: &[PipelineStep],
        base: &ExecutionContext,
        state: &SharedState,
    ) -> Vec<ExecutionResult> {
        if steps.is_empty() {
            return Vec::new();
        }

        if is_parallel_eligible(steps) {
            info!(run_id = %base.run_id, steps = steps.len(), "Running pipeline in parallel");
            let fan_out = self.spawn_parallel(steps, base, state).await;
            return self.finish_parallel(fan_out, steps, base, state).await;
        }

        info!(run_id = %base.run_id, steps = steps.len(), "Running pipeline sequentially");
        self.run_sequential(steps, base, state).await
    }

    async fn admits(&self, step: &PipelineStep, base: &ExecutionContext, state: &SharedState) -> bool {
        let decision = {
            let guard = state.read().await;
            step.should_run(&guard)
        };
        match decision {
            Ok(true) => true,
            Ok(false) => {
                info!(run_id = %base.run_id, step = %step.agent_name, "Step condition false, skipping");
                false
            }
            Err(e) => {
                warn!(
                    run_id = %base.run_id,
                    step = %step.agent_name,
                    error = %e,
                    "Step condition failed, skipping"
                );
                false
            }
        }
    }

    /// Evaluate conditions and spawn one task per admitted step, in step order.
    async fn spawn_parallel(
        &self,
        steps: &[PipelineStep],
        base: &ExecutionContext,
        state: &SharedState,
    ) -> FanOut {
        let mut fan_out = Vec::with_capacity(steps.len());
        for step in steps {
            if !self.admits(step, base, state).await {
                continue;
            }
            let ctx = base.for_step(&step.agent_name, &step.metadata);
            let runner = Arc::clone(&self.runner);
            let step_ctx = ctx.clone();
            let state = Arc::clone(state);
            let handle = tokio::spawn(async move { runner.run_step(step_ctx, state).await });
            fan_out.push((ctx, AbortOnDropHandle::new(handle)));
        }
        fan_out
    }

    /// Join a fan-out in step order. If it cannot be joined, rerun the same
    /// step set sequentially.
    async fn finish_parallel(
        &self,
        fan_out: FanOut,
        steps: &[PipelineStep],
        base: &ExecutionContext,
        state: &SharedState,
    ) -> Vec<ExecutionResult> {
        match join_fan_out(fan_out).await {
            Ok(results) => results,
            Err(e) => {
                error!(
                    run_id = %base.run_id,
                    error = %e,
                    "Parallel fan-out failed, rerunning steps sequentially"
                );
                self.run_sequential(steps, base, state).await
            }
        }
    }

    async fn run_sequential(
        &self,
        steps: &[PipelineStep],
        base: &ExecutionContext,
        state: &SharedState,
    ) -> Vec<ExecutionResult> {
        let mut results = Vec::with_capacity(steps.len());
        // agent name -> whether its step succeeded; skipped steps count as failed.
        let mut outcomes: HashMap<&str, bool> = HashMap::new();

        for (idx, step) in steps.iter().enumerate() {
            let blocked = step.dependencies.iter().find(|dep| {
                match outcomes.get(dep.as_str()) {
                    Some(ok) => !ok,
                    None => {
                        warn!(
                            run_id = %base.run_id,
                            step = %step.agent_name,
                            dependency = %dep,
                            "Unknown dependency ignored"
                        );
                        false
                    }
                }
            });
            if let Some(dep) = blocked {
                warn!(
                    run_id = %base.run_id,
                    step = %step.agent_name,
                    dependency = %dep,
                    "Dependency did not succeed, skipping step"
                );
                outcomes.insert(step.agent_name.as_str(), false);
                continue;
            }

            if !self.admits(step, base, state).await {
                outcomes.insert(step.agent_name.as_str(), false);
                continue;
            }

            let ctx = base.for_step(&step.agent_name, &step.metadata);
            let result = self.runner.run_step(ctx, Arc::clone(state)).await;
            outcomes.insert(step.agent_name.as_str(), result.success);

            let halt = !result.success && !step.continues_on_error();
            results.push(result);
            if halt {
                info!(
                    run_id = %base.run_id,
                    step = %step.agent_name,
                    remaining = steps.len() - idx - 1,
                    "Step failed, halting pipeline"
                );
                break;
            }
        }
        results
    }
}
