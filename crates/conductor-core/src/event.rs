use crate::context::ExecutionContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle notifications delivered to UI clients for one run.
///
/// Within a run, `AgentStarted` comes first and `AgentCompleted` comes last,
/// exactly once; every `ToolExecuting` is followed by a matching
/// `ToolCompleted` before the run completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEventKind {
    AgentStarted,

    /// Free-text progress, optionally with a step number and percentage.
    AgentThinking {
        text: String,
        step: Option<u32>,
        progress: Option<f32>,
    },

    ToolExecuting {
        tool: String,
    },

    ToolCompleted {
        tool: String,
        result: serde_json::Value,
    },

    /// Terminal event of the run.
    AgentCompleted {
        report: serde_json::Value,
        duration_ms: u64,
    },
}

impl RunEventKind {
    /// Wire name of the event kind.
    pub fn name(&self) -> &'static str {
        match self {
            RunEventKind::AgentStarted => "agent_started",
            RunEventKind::AgentThinking { .. } => "agent_thinking",
            RunEventKind::ToolExecuting { .. } => "tool_executing",
            RunEventKind::ToolCompleted { .. } => "tool_completed",
            RunEventKind::AgentCompleted { .. } => "agent_completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEventKind::AgentCompleted { .. })
    }
}

/// A lifecycle notification addressed to one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: String,
    pub thread_id: String,
    pub user_id: String,
    pub agent_name: String,
    /// Monotonic sequence number assigned by the notifier.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: RunEventKind,
}

impl RunEvent {
    pub fn new(ctx: &ExecutionContext, seq: u64, kind: RunEventKind) -> Self {
        Self {
            run_id: ctx.run_id.clone(),
            thread_id: ctx.thread_id.clone(),
            user_id: ctx.user_id.clone(),
            agent_name: ctx.agent_name.clone(),
            seq,
            timestamp: Utc::now(),
            kind,
        }
    }
}

/// Delivery counters reported by an event notifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStats {
    /// Events handed to at least one subscriber.
    pub delivered: u64,
    /// Events accepted while nobody was listening.
    pub no_subscribers: u64,
    /// Events the transport refused.
    pub failed: u64,
}

impl DeliveryStats {
    pub fn total(&self) -> u64 {
        self.delivered + self.no_subscribers + self.failed
    }
}
