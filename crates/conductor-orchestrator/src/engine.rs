use crate::admission::AdmissionController;
use crate::config::OrchestratorConfig;
use crate::executor::AgentExecutor;
use crate::notifier::EventNotifier;
use crate::pipeline::{PipelineExecutor, StepRunner};
use crate::progress::{IntervalUpdateManager, PeriodicUpdateManager};
use crate::registry::AgentRegistry;
use crate::reporter::RunReporter;
use crate::retry::{DegradedResponseFallback, FallbackStrategy, RetryManager, RetryOutcome};
use crate::tracker::{ExecutionTracker, Gauges, StatsSnapshot};
use async_trait::async_trait;
use conductor_core::{
    ConductorError, ExecutionContext, ExecutionResult, PipelineStep, SharedState,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How long shutdown waits for cancelled runs to emit their terminal event.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
/// Prompt excerpt length used in the opening progress message.
const PROMPT_PREVIEW_CHARS: usize = 80;

struct ActiveRun {
    run_id: String,
    agent_name: String,
    cancel: CancellationToken,
}

/// Active-run table entry held by `execute_agent`. Removes itself on drop.
///
/// A run whose future is dropped before it finished is recorded as cancelled
/// and still delivers `agent_completed` from a spawned task.
struct RunGuard {
    inner: Arc<OrchestratorInner>,
    slot: Uuid,
    reporter: RunReporter,
    started: Instant,
    waited: Duration,
    finished: bool,
}

impl RunGuard {
    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.inner.active_runs.lock().remove(&self.slot);
        if self.finished {
            return;
        }

        let ctx = self.reporter.context();
        let err = ConductorError::Cancelled(format!(
            "run '{}' was dropped before completion",
            ctx.run_id
        ));
        let result = ExecutionResult::error(ctx, &err, self.started.elapsed());
        warn!(run_id = %ctx.run_id, agent = %ctx.agent_name, "Run dropped before completion");
        self.inner
            .tracker
            .record(&result, self.waited, result.duration, 1);

        let report = completion_report(&result, ctx.retry_count, None);
        let duration_ms = result.duration.as_millis() as u64;
        let reporter = self.reporter.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    reporter.completed(report, duration_ms).await;
                });
            }
            Err(_) => warn!(
                run_id = %ctx.run_id,
                "No runtime left to deliver agent_completed for dropped run"
            ),
        }
    }
}

struct OrchestratorInner {
    config: OrchestratorConfig,
    admission: AdmissionController,
    executor: AgentExecutor,
    retry: RetryManager,
    notifier: Arc<dyn EventNotifier>,
    updates: Arc<dyn PeriodicUpdateManager>,
    tracker: ExecutionTracker,
    active_runs: Mutex<HashMap<Uuid, ActiveRun>>,
    shutting_down: AtomicBool,
}

/// The agent execution orchestrator.
///
/// Admits runs through a bounded gate, brackets each run with
/// `agent_started`/`agent_completed`, enforces the per-attempt deadline,
/// retries and falls back, and keeps a bounded history. Cheap to clone; all
/// clones share one engine.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
}

fn completion_report(
    result: &ExecutionResult,
    retry_count: u32,
    final_answer: Option<String>,
) -> serde_json::Value {
    serde_json::json!({
        "success": result.success,
        "agent_name": result.agent_name,
        "error": result.error,
        "error_type": result.error_type(),
        "timeout": result.is_timeout(),
        "fallback_used": result.used_fallback(),
        "retry_count": retry_count,
        "final_answer": final_answer,
        "output": result.output,
    })
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PROMPT_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

impl Orchestrator {
    /// Create an orchestrator with the interval update manager and the
    /// degraded-response fallback.
    pub fn new(
        config: OrchestratorConfig,
        registry: Arc<dyn AgentRegistry>,
        notifier: Arc<dyn EventNotifier>,
    ) -> Self {
        let updates = Arc::new(IntervalUpdateManager::new(config.periodic_update_interval()));
        Self::with_components(config, registry, notifier, updates, Arc::new(DegradedResponseFallback))
    }

    /// Create with a custom update manager and fallback strategy.
    ///
    /// Invalid config values are replaced by their defaults.
    pub fn with_components(
        config: OrchestratorConfig,
        registry: Arc<dyn AgentRegistry>,
        notifier: Arc<dyn EventNotifier>,
        updates: Arc<dyn PeriodicUpdateManager>,
        fallback: Arc<dyn FallbackStrategy>,
    ) -> Self {
        let config = match config.validate() {
            Ok(()) => config,
            Err(e) => {
                warn!(error = %e, "Invalid orchestrator config, falling back to defaults");
                config.sanitized()
            }
        };

        info!(
            max_concurrent_agents = config.max_concurrent_agents,
            timeout_ms = config.agent_execution_timeout_ms,
            max_history = config.max_history_size,
            "Orchestrator initialised"
        );

        Self {
            inner: Arc::new(OrchestratorInner {
                admission: AdmissionController::new(config.max_concurrent_agents),
                executor: AgentExecutor::new(registry, config.agent_execution_timeout()),
                retry: RetryManager::new(config.retry.clone(), fallback),
                notifier,
                updates,
                tracker: ExecutionTracker::new(config.max_history_size),
                active_runs: Mutex::new(HashMap::new()),
                shutting_down: AtomicBool::new(false),
                config,
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn notifier(&self) -> &Arc<dyn EventNotifier> {
        &self.inner.notifier
    }

    /// A fresh context carrying the configured retry budget.
    pub fn new_context(
        &self,
        agent_name: impl Into<String>,
        thread_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> ExecutionContext {
        ExecutionContext::new(agent_name, thread_id, user_id)
            .with_max_retries(self.inner.config.default_max_retries)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Run one agent to completion. Never fails; every outcome is a result.
    ///
    /// An admitted run emits `agent_started` first and `agent_completed`
    /// exactly once, last. A run refused because of shutdown emits nothing.
    pub async fn execute_agent(&self, ctx: ExecutionContext, state: SharedState) -> ExecutionResult {
        let inner = &self.inner;
        if self.is_shutting_down() {
            warn!(run_id = %ctx.run_id, agent = %ctx.agent_name, "Rejecting run during shutdown");
            return ExecutionResult::error(&ctx, &ConductorError::ShuttingDown, Duration::ZERO);
        }

        let (permit, waited) = match inner.admission.acquire().await {
            Ok(admitted) => admitted,
            Err(e) => {
                warn!(run_id = %ctx.run_id, agent = %ctx.agent_name, error = %e, "Run not admitted");
                return ExecutionResult::error(&ctx, &e, Duration::ZERO);
            }
        };
        let started = Instant::now();
        let reporter = RunReporter::new(
            ctx.clone(),
            Arc::clone(&inner.notifier),
            inner.config.stream_updates,
            inner.tracker.notifier_failures(),
        );
        let Some((guard, cancel)) = self.register_run(&reporter, started, waited) else {
            warn!(run_id = %ctx.run_id, agent = %ctx.agent_name, "Shutdown began during admission");
            return ExecutionResult::error(&ctx, &ConductorError::ShuttingDown, Duration::ZERO);
        };
        reporter.started().await;
        info!(
            run_id = %ctx.run_id,
            agent = %ctx.agent_name,
            waited_ms = waited.as_millis() as u64,
            "Agent run admitted"
        );

        if waited > inner.config.queue_notice_threshold() {
            reporter
                .thinking(
                    format!(
                        "Queued for {:.1}s waiting for an available agent slot",
                        waited.as_secs_f64()
                    ),
                    Some(0),
                )
                .await;
        }
        let prompt = state.read().await.user_prompt.clone();
        if let Some(prompt) = prompt {
            reporter
                .thinking(format!("Working on: {}", preview(&prompt)), Some(1))
                .await;
        }

        let mut ctx = ctx;
        let (result, failed_attempts) = self
            .run_attempts(&mut ctx, &state, &reporter, &cancel, started)
            .await;
        let result = result.with_metadata("queue_wait_ms", (waited.as_millis() as u64).into());

        let final_answer = state.read().await.final_answer.clone();
        let report = completion_report(&result, ctx.retry_count, final_answer);
        reporter
            .completed(report, result.duration.as_millis() as u64)
            .await;

        inner
            .tracker
            .record(&result, waited, result.duration, failed_attempts);
        info!(
            run_id = %ctx.run_id,
            agent = %ctx.agent_name,
            success = result.success,
            retries = ctx.retry_count,
            duration_ms = result.duration.as_millis() as u64,
            "Agent run completed"
        );

        guard.finish();
        drop(permit);
        result
    }

    async fn run_attempts(
        &self,
        ctx: &mut ExecutionContext,
        state: &SharedState,
        reporter: &RunReporter,
        cancel: &CancellationToken,
        started: Instant,
    ) -> (ExecutionResult, u32) {
        let inner = &self.inner;
        let _tracking = inner.updates.track_operation(
            reporter,
            &ctx.agent_name,
            "agent_execution",
            inner.config.agent_execution_timeout_ms,
            &format!("Running {}", ctx.agent_name),
        );

        let agent = match inner.executor.resolve(ctx).await {
            Ok(agent) => agent,
            Err(e) => {
                error!(run_id = %ctx.run_id, agent = %ctx.agent_name, error = %e, "Agent lookup failed");
                return (ExecutionResult::error(ctx, &e, started.elapsed()), 1);
            }
        };

        let executor = &inner.executor;
        let report = inner
            .retry
            .run(ctx, state, cancel, |attempt| {
                let agent = Arc::clone(&agent);
                let state = Arc::clone(state);
                let reporter = reporter.clone();
                async move {
                    debug!(run_id = %reporter.run_id(), attempt, "Starting attempt");
                    executor.execute(agent, state, reporter, cancel).await
                }
            })
            .await;

        let elapsed = started.elapsed();
        let result = match report.outcome {
            RetryOutcome::Succeeded(output) => ExecutionResult::success(ctx, output, elapsed),
            RetryOutcome::Failed(e) => ExecutionResult::error(ctx, &e, elapsed),
            RetryOutcome::Fallback {
                outcome,
                last_error,
            } => ExecutionResult::fallback(ctx, outcome, &last_error, elapsed),
        };
        (
            result.with_metadata("attempts", report.attempts.into()),
            report.failed_attempts,
        )
    }

    /// Enter the run into the active-run table. Returns `None` once shutdown
    /// has begun; the check happens under the table lock that `shutdown`
    /// drains under, so no run can slip in after the drain.
    fn register_run(
        &self,
        reporter: &RunReporter,
        started: Instant,
        waited: Duration,
    ) -> Option<(RunGuard, CancellationToken)> {
        let ctx = reporter.context();
        let slot = Uuid::new_v4();
        let cancel = CancellationToken::new();
        {
            let mut runs = self.inner.active_runs.lock();
            if self.is_shutting_down() {
                return None;
            }
            runs.insert(
                slot,
                ActiveRun {
                    run_id: ctx.run_id.clone(),
                    agent_name: ctx.agent_name.clone(),
                    cancel: cancel.clone(),
                },
            );
        }
        let guard = RunGuard {
            inner: Arc::clone(&self.inner),
            slot,
            reporter: reporter.clone(),
            started,
            waited,
            finished: false,
        };
        Some((guard, cancel))
    }

    /// Execute `steps` under `ctx`, in parallel when every step allows it and
    /// at least one asks for it, otherwise in order. Never fails.
    pub async fn execute_pipeline(
        &self,
        steps: &[PipelineStep],
        ctx: ExecutionContext,
        state: SharedState,
    ) -> Vec<ExecutionResult> {
        let runner: Arc<dyn StepRunner> = Arc::new(self.clone());
        PipelineExecutor::new(runner)
            .execute(steps, &ctx, &state)
            .await
    }

    /// Cancel every in-flight execution belonging to `run_id`. Returns how
    /// many were signalled.
    pub fn cancel_run(&self, run_id: &str) -> usize {
        let runs = self.inner.active_runs.lock();
        let mut cancelled = 0;
        for run in runs.values().filter(|r| r.run_id == run_id) {
            info!(run_id = %run.run_id, agent = %run.agent_name, "Cancelling run");
            run.cancel.cancel();
            cancelled += 1;
        }
        cancelled
    }

    pub fn active_run_count(&self) -> usize {
        self.inner.active_runs.lock().len()
    }

    /// Retained results, oldest first.
    pub fn history(&self) -> Vec<ExecutionResult> {
        self.inner.tracker.history()
    }

    pub fn execution_stats(&self) -> StatsSnapshot {
        let inner = &self.inner;
        inner.tracker.snapshot(Gauges {
            concurrent: inner.admission.in_flight(),
            peak_concurrent: inner.admission.peak(),
            capacity: inner.admission.capacity(),
            delivery: inner.notifier.delivery_stats(),
        })
    }

    /// Stop admitting, cancel active runs, then shut the notifier and the
    /// update manager down. Idempotent.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Orchestrator shutdown initiated");

        let drained: Vec<ActiveRun> = {
            let mut runs = inner.active_runs.lock();
            inner.admission.close();
            runs.drain().map(|(_, run)| run).collect()
        };
        for run in &drained {
            run.cancel.cancel();
        }

        // Give cancelled runs the chance to deliver agent_completed.
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        while inner.admission.in_flight() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        if inner.admission.in_flight() > 0 {
            warn!(
                in_flight = inner.admission.in_flight(),
                "Runs still active after shutdown grace period"
            );
        }

        inner.notifier.shutdown().await;
        inner.updates.shutdown().await;
        info!(cancelled = drained.len(), "Orchestrator shut down");
    }
}

#[async_trait]
impl StepRunner for Orchestrator {
    async fn run_step(&self, ctx: ExecutionContext, state: SharedState) -> ExecutionResult {
        self.execute_agent(ctx, state).await
    }
}
