//! Per-run event handle enforcing the lifecycle notification contract.

use crate::notifier::EventNotifier;
use conductor_core::{ConductorResult, ExecutionContext};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pending,
    Open,
    Closed,
}

struct ReporterState {
    phase: Phase,
    open_tools: Vec<String>,
}

struct ReporterInner {
    ctx: ExecutionContext,
    notifier: Arc<dyn EventNotifier>,
    stream_updates: bool,
    notifier_failures: Arc<AtomicU64>,
    state: Mutex<ReporterState>,
}

/// Event handle for one run, handed to the agent being executed.
///
/// All events of the run go through one async mutex, so they reach the
/// notifier in call order: `agent_started` first, `agent_completed` last and
/// only once. Anything sent after completion is dropped. Notifier errors are
/// logged and counted, never returned.
#[derive(Clone)]
pub struct RunReporter {
    inner: Arc<ReporterInner>,
}

impl RunReporter {
    pub fn new(
        ctx: ExecutionContext,
        notifier: Arc<dyn EventNotifier>,
        stream_updates: bool,
        notifier_failures: Arc<AtomicU64>,
    ) -> Self {
        Self {
            inner: Arc::new(ReporterInner {
                ctx,
                notifier,
                stream_updates,
                notifier_failures,
                state: Mutex::new(ReporterState {
                    phase: Phase::Pending,
                    open_tools: Vec::new(),
                }),
            }),
        }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.inner.ctx
    }

    pub fn run_id(&self) -> &str {
        &self.inner.ctx.run_id
    }

    /// Whether the caller asked for intermediate updates to be streamed.
    pub fn stream_updates(&self) -> bool {
        self.inner.stream_updates
    }

    fn record(&self, outcome: ConductorResult<()>, event: &str) {
        if let Err(e) = outcome {
            self.inner.notifier_failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                run_id = %self.inner.ctx.run_id,
                agent = %self.inner.ctx.agent_name,
                event,
                error = %e,
                "Notifier delivery failed"
            );
        }
    }

    /// Emit `agent_started`. Only the first call has any effect.
    pub(crate) async fn started(&self) {
        let mut state = self.inner.state.lock().await;
        if state.phase != Phase::Pending {
            return;
        }
        state.phase = Phase::Open;
        let outcome = self.inner.notifier.send_agent_started(&self.inner.ctx).await;
        self.record(outcome, "agent_started");
    }

    /// Emit an `agent_thinking` progress message.
    pub async fn thinking(&self, text: impl AsRef<str>, step: Option<u32>) {
        self.progress(text, step, None).await;
    }

    /// Emit an `agent_thinking` message with a completion percentage.
    pub async fn progress(&self, text: impl AsRef<str>, step: Option<u32>, percent: Option<f32>) {
        let state = self.inner.state.lock().await;
        if state.phase != Phase::Open {
            debug!(run_id = %self.inner.ctx.run_id, "Dropping agent_thinking outside open run");
            return;
        }
        let outcome = self
            .inner
            .notifier
            .send_agent_thinking(&self.inner.ctx, text.as_ref(), step, percent)
            .await;
        self.record(outcome, "agent_thinking");
    }

    /// Emit `tool_executing` and remember the tool as open.
    pub async fn tool_executing(&self, tool: &str) {
        let mut state = self.inner.state.lock().await;
        if state.phase != Phase::Open {
            debug!(run_id = %self.inner.ctx.run_id, tool, "Dropping tool_executing outside open run");
            return;
        }
        state.open_tools.push(tool.to_string());
        let outcome = self
            .inner
            .notifier
            .send_tool_executing(&self.inner.ctx, tool)
            .await;
        self.record(outcome, "tool_executing");
    }

    /// Emit `tool_completed` and close the oldest open invocation of `tool`.
    pub async fn tool_completed(&self, tool: &str, result: serde_json::Value) {
        let mut state = self.inner.state.lock().await;
        if state.phase != Phase::Open {
            debug!(run_id = %self.inner.ctx.run_id, tool, "Dropping tool_completed outside open run");
            return;
        }
        match state.open_tools.iter().position(|t| t == tool) {
            Some(idx) => {
                state.open_tools.remove(idx);
            }
            None => debug!(run_id = %self.inner.ctx.run_id, tool, "tool_completed without tool_executing"),
        }
        let outcome = self
            .inner
            .notifier
            .send_tool_completed(&self.inner.ctx, tool, result)
            .await;
        self.record(outcome, "tool_completed");
    }

    /// Emit the terminal `agent_completed`. Returns `false` if the run was
    /// already completed.
    ///
    /// Tool invocations still open are closed first with an `interrupted`
    /// result. A run that never started gets its `agent_started` here.
    pub(crate) async fn completed(&self, report: serde_json::Value, duration_ms: u64) -> bool {
        let mut state = self.inner.state.lock().await;
        match state.phase {
            Phase::Closed => return false,
            Phase::Pending => {
                let outcome = self.inner.notifier.send_agent_started(&self.inner.ctx).await;
                self.record(outcome, "agent_started");
            }
            Phase::Open => {}
        }
        state.phase = Phase::Closed;

        for tool in std::mem::take(&mut state.open_tools) {
            let outcome = self
                .inner
                .notifier
                .send_tool_completed(
                    &self.inner.ctx,
                    &tool,
                    serde_json::json!({ "status": "interrupted" }),
                )
                .await;
            self.record(outcome, "tool_completed");
        }

        let outcome = self
            .inner
            .notifier
            .send_agent_completed(&self.inner.ctx, report, duration_ms)
            .await;
        self.record(outcome, "agent_completed");
        true
    }

    pub async fn is_completed(&self) -> bool {
        self.inner.state.lock().await.phase == Phase::Closed
    }

    /// Tool invocations that have not seen their `tool_completed` yet.
    pub async fn open_tools(&self) -> Vec<String> {
        self.inner.state.lock().await.open_tools.clone()
    }
}
