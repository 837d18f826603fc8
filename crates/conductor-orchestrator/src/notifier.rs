use async_trait::async_trait;
use conductor_core::{
    ConductorError, ConductorResult, DeliveryStats, ExecutionContext, RunEvent, RunEventKind,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::info;

/// Default broadcast channel capacity.
const DEFAULT_CAPACITY: usize = 1024;

/// Transport that carries lifecycle events to UI clients.
///
/// Implementations may fail; the orchestrator logs and swallows every
/// error they return.
#[async_trait]
pub trait EventNotifier: Send + Sync {
    async fn send_agent_started(&self, ctx: &ExecutionContext) -> ConductorResult<()>;

    async fn send_agent_thinking(
        &self,
        ctx: &ExecutionContext,
        text: &str,
        step: Option<u32>,
        progress: Option<f32>,
    ) -> ConductorResult<()>;

    async fn send_tool_executing(&self, ctx: &ExecutionContext, tool: &str)
        -> ConductorResult<()>;

    async fn send_tool_completed(
        &self,
        ctx: &ExecutionContext,
        tool: &str,
        result: serde_json::Value,
    ) -> ConductorResult<()>;

    async fn send_agent_completed(
        &self,
        ctx: &ExecutionContext,
        report: serde_json::Value,
        duration_ms: u64,
    ) -> ConductorResult<()>;

    fn delivery_stats(&self) -> DeliveryStats;

    async fn shutdown(&self);
}

/// In-process notifier that fans events out on a broadcast channel.
///
/// Sending never blocks; slow subscribers lag rather than stall the run.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<RunEvent>,
    seq: AtomicU64,
    delivered: AtomicU64,
    no_subscribers: AtomicU64,
    failed: AtomicU64,
    closed: AtomicBool,
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            seq: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            no_subscribers: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Receive every event emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn emit(&self, ctx: &ExecutionContext, kind: RunEventKind) -> ConductorResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            self.failed.fetch_add(1, Ordering::Relaxed);
            return Err(ConductorError::NotifierDelivery(format!(
                "notifier is shut down, dropping {}",
                kind.name()
            )));
        }
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        match self.tx.send(RunEvent::new(ctx, seq, kind)) {
            Ok(_) => self.delivered.fetch_add(1, Ordering::Relaxed),
            // No receivers is not an error: the UI may simply not be connected.
            Err(_) => self.no_subscribers.fetch_add(1, Ordering::Relaxed),
        };
        Ok(())
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventNotifier for BroadcastNotifier {
    async fn send_agent_started(&self, ctx: &ExecutionContext) -> ConductorResult<()> {
        self.emit(ctx, RunEventKind::AgentStarted)
    }

    async fn send_agent_thinking(
        &self,
        ctx: &ExecutionContext,
        text: &str,
        step: Option<u32>,
        progress: Option<f32>,
    ) -> ConductorResult<()> {
        self.emit(
            ctx,
            RunEventKind::AgentThinking {
                text: text.to_string(),
                step,
                progress,
            },
        )
    }

    async fn send_tool_executing(
        &self,
        ctx: &ExecutionContext,
        tool: &str,
    ) -> ConductorResult<()> {
        self.emit(
            ctx,
            RunEventKind::ToolExecuting {
                tool: tool.to_string(),
            },
        )
    }

    async fn send_tool_completed(
        &self,
        ctx: &ExecutionContext,
        tool: &str,
        result: serde_json::Value,
    ) -> ConductorResult<()> {
        self.emit(
            ctx,
            RunEventKind::ToolCompleted {
                tool: tool.to_string(),
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
        self.emit(
            ctx,
            RunEventKind::AgentCompleted {
                report,
                duration_ms,
            },
        )
    }

    fn delivery_stats(&self) -> DeliveryStats {
        DeliveryStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            no_subscribers: self.no_subscribers.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    async fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(
                delivered = self.delivered.load(Ordering::Relaxed),
                "Broadcast notifier shut down"
            );
        }
    }
}
