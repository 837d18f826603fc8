//! Scripted agents and a recording notifier shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use conductor_core::{
    ConductorError, ConductorResult, DeliveryStats, ExecutionContext, RunEvent, RunEventKind,
    SharedState,
};
use conductor_orchestrator::{
    Agent, EventNotifier, InMemoryAgentRegistry, Orchestrator, OrchestratorConfig, RunReporter,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Small limits so timing tests finish quickly.
pub fn fast_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.agent_execution_timeout_ms = 500;
    config.retry.backoff_base_ms = 10;
    config.retry.backoff_max_ms = 100;
    config.periodic_update_interval_ms = 60_000;
    config
}

pub fn orchestrator(
    config: OrchestratorConfig,
    agents: Vec<Arc<dyn Agent>>,
) -> (Orchestrator, Arc<RecordingNotifier>) {
    init_tracing();
    let registry = InMemoryAgentRegistry::new();
    for agent in agents {
        registry.register(agent);
    }
    let notifier = Arc::new(RecordingNotifier::default());
    let orch = Orchestrator::new(
        config,
        Arc::new(registry),
        Arc::clone(&notifier) as Arc<dyn EventNotifier>,
    );
    (orch, notifier)
}

// ---------------------------------------------------------------------------
// Recording notifier
// ---------------------------------------------------------------------------

/// Keeps every event in memory. With `failing` set, records nothing and
/// rejects every send.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<RunEvent>>,
    seq: AtomicU64,
    failed: AtomicU64,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.failing.store(true, Ordering::SeqCst);
        notifier
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().clone()
    }

    /// Events of one execution, identified by run id and agent name.
    pub fn events_for(&self, run_id: &str, agent: &str) -> Vec<RunEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.run_id == run_id && e.agent_name == agent)
            .cloned()
            .collect()
    }

    pub fn names_for(&self, run_id: &str, agent: &str) -> Vec<&'static str> {
        self.events_for(run_id, agent)
            .iter()
            .map(|e| e.kind.name())
            .collect()
    }

    fn record(&self, ctx: &ExecutionContext, kind: RunEventKind) -> ConductorResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            self.failed.fetch_add(1, Ordering::SeqCst);
            return Err(ConductorError::NotifierDelivery("transport down".into()));
        }
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        self.events.lock().push(RunEvent::new(ctx, seq, kind));
        Ok(())
    }
}

#[async_trait]
impl EventNotifier for RecordingNotifier {
    async fn send_agent_started(&self, ctx: &ExecutionContext) -> ConductorResult<()> {
        self.record(ctx, RunEventKind::AgentStarted)
    }

    async fn send_agent_thinking(
        &self,
        ctx: &ExecutionContext,
        text: &str,
        step: Option<u32>,
        progress: Option<f32>,
    ) -> ConductorResult<()> {
        self.record(
            ctx,
            RunEventKind::AgentThinking {
                text: text.to_string(),
                step,
                progress,
            },
        )
    }

    async fn send_tool_executing(&self, ctx: &ExecutionContext, tool: &str) -> ConductorResult<()> {
        self.record(ctx, RunEventKind::ToolExecuting { tool: tool.into() })
    }

    async fn send_tool_completed(
        &self,
        ctx: &ExecutionContext,
        tool: &str,
        result: serde_json::Value,
    ) -> ConductorResult<()> {
        self.record(
            ctx,
            RunEventKind::ToolCompleted {
                tool: tool.into(),
                result,
            },
        )
    }

    async fn send_agent_completed(
        &self,
        ctx: &ExecutionContext,
        report: serde_json::Value,
        duration_ms: u64,
    ) -> ConductorResult<()> {
        self.record(
            ctx,
            RunEventKind::AgentCompleted {
                report,
                duration_ms,
            },
        )
    }

    fn delivery_stats(&self) -> DeliveryStats {
        DeliveryStats {
            delivered: self.events.lock().len() as u64,
            no_subscribers: 0,
            failed: self.failed.load(Ordering::SeqCst),
        }
    }

    async fn shutdown(&self) {}
}

// ---------------------------------------------------------------------------
// Scripted agents
// ---------------------------------------------------------------------------

/// Sleeps, then succeeds.
pub struct SleepAgent {
    pub name: &'static str,
    pub delay: Duration,
}

impl SleepAgent {
    pub fn new(name: &'static str, delay: Duration) -> Arc<dyn Agent> {
        Arc::new(Self { name, delay })
    }
}

#[async_trait]
impl Agent for SleepAgent {
    fn name(&self) -> &str {
        self.name
    }

    async fn execute(
        &self,
        _state: SharedState,
        reporter: RunReporter,
    ) -> ConductorResult<serde_json::Value> {
        reporter.thinking(format!("{} resting", self.name), None).await;
        tokio::time::sleep(self.delay).await;
        Ok(serde_json::json!({ "agent": self.name }))
    }
}

/// Sleeps, then marks itself finished. Lets a test see whether an agent task
/// outlived its run.
pub struct WatchedAgent {
    pub name: &'static str,
    pub delay: Duration,
    finished: AtomicBool,
}

impl WatchedAgent {
    pub fn new(name: &'static str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name,
            delay,
            finished: AtomicBool::new(false),
        })
    }

    pub fn finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for WatchedAgent {
    fn name(&self) -> &str {
        self.name
    }

    async fn execute(
        &self,
        _state: SharedState,
        _reporter: RunReporter,
    ) -> ConductorResult<serde_json::Value> {
        tokio::time::sleep(self.delay).await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(serde_json::json!({ "agent": self.name }))
    }
}

/// Fails the first `failures` attempts, then succeeds.
pub struct FlakyAgent {
    pub name: &'static str,
    failures: u32,
    attempts: AtomicU32,
}

impl FlakyAgent {
    pub fn new(name: &'static str, failures: u32) -> Arc<Self> {
        Arc::new(Self {
            name,
            failures,
            attempts: AtomicU32::new(0),
        })
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for FlakyAgent {
    fn name(&self) -> &str {
        self.name
    }

    async fn execute(
        &self,
        _state: SharedState,
        _reporter: RunReporter,
    ) -> ConductorResult<serde_json::Value> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.failures {
            Err(ConductorError::Execution(format!("attempt {n} failed")))
        } else {
            Ok(serde_json::json!({ "attempt": n }))
        }
    }
}

/// Always returns a business failure the retry manager will retry.
pub struct FailingAgent {
    pub name: &'static str,
}

impl FailingAgent {
    pub fn new(name: &'static str) -> Arc<dyn Agent> {
        Arc::new(Self { name })
    }
}

#[async_trait]
impl Agent for FailingAgent {
    fn name(&self) -> &str {
        self.name
    }

    async fn execute(
        &self,
        _state: SharedState,
        _reporter: RunReporter,
    ) -> ConductorResult<serde_json::Value> {
        Err(ConductorError::Execution(format!("{} is broken", self.name)))
    }
}

/// Opens each tool in turn, optionally hanging inside the last one.
pub struct ToolAgent {
    pub name: &'static str,
    pub tools: Vec<&'static str>,
    pub hang_in_last: bool,
}

impl ToolAgent {
    pub fn new(name: &'static str, tools: Vec<&'static str>, hang_in_last: bool) -> Arc<dyn Agent> {
        Arc::new(Self {
            name,
            tools,
            hang_in_last,
        })
    }
}

#[async_trait]
impl Agent for ToolAgent {
    fn name(&self) -> &str {
        self.name
    }

    async fn execute(
        &self,
        state: SharedState,
        reporter: RunReporter,
    ) -> ConductorResult<serde_json::Value> {
        for (i, tool) in self.tools.iter().enumerate() {
            reporter.tool_executing(tool).await;
            if self.hang_in_last && i + 1 == self.tools.len() {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            reporter
                .tool_completed(tool, serde_json::json!({ "ok": true }))
                .await;
        }
        state.write().await.final_answer = Some(format!("{} used {} tools", self.name, self.tools.len()));
        Ok(serde_json::json!({ "tools": self.tools }))
    }
}

/// Panics on every attempt.
pub struct PanicAgent;

#[async_trait]
impl Agent for PanicAgent {
    fn name(&self) -> &str {
        "panicker"
    }

    async fn execute(
        &self,
        _state: SharedState,
        reporter: RunReporter,
    ) -> ConductorResult<serde_json::Value> {
        reporter.tool_executing("dangerous_tool").await;
        panic!("agent exploded");
    }
}

/// Records how many instances run at the same time.
pub struct ConcurrencyGauge {
    pub name: &'static str,
    pub delay: Duration,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyGauge {
    pub fn new(name: &'static str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name,
            delay,
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for ConcurrencyGauge {
    fn name(&self) -> &str {
        self.name
    }

    async fn execute(
        &self,
        _state: SharedState,
        _reporter: RunReporter,
    ) -> ConductorResult<serde_json::Value> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(serde_json::Value::Null)
    }
}

/// Assert the lifecycle contract for one execution's events: started first,
/// exactly one completed and it is last, tools paired.
pub fn assert_lifecycle(events: &[RunEvent]) {
    assert!(!events.is_empty(), "no events recorded");
    assert_eq!(events[0].kind, RunEventKind::AgentStarted, "first event must be agent_started");
    let started = events.iter().filter(|e| e.kind == RunEventKind::AgentStarted).count();
    assert_eq!(started, 1, "agent_started must be emitted once");

    let completed = events.iter().filter(|e| e.kind.is_terminal()).count();
    assert_eq!(completed, 1, "agent_completed must be emitted once");
    assert!(events.last().unwrap().kind.is_terminal(), "agent_completed must be last");

    for event in &events[1..] {
        assert!(events[0].seq < event.seq);
        assert!(events[0].timestamp <= event.timestamp);
    }

    let mut open: Vec<&str> = Vec::new();
    for event in events {
        match &event.kind {
            RunEventKind::ToolExecuting { tool } => open.push(tool.as_str()),
            RunEventKind::ToolCompleted { tool, .. } => {
                let idx = open
                    .iter()
                    .position(|t| *t == tool.as_str())
                    .unwrap_or_else(|| panic!("tool_completed for '{tool}' without tool_executing"));
                open.remove(idx);
            }
            _ => {}
        }
    }
    assert!(open.is_empty(), "unpaired tools: {open:?}");
}
