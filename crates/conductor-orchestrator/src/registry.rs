use crate::reporter::RunReporter;
use async_trait::async_trait;
use conductor_core::{ConductorResult, ExecutionContext, SharedState};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// An executable unit of agent work.
///
/// Implementations publish progress through the [`RunReporter`]
/// (`thinking`, `tool_executing`/`tool_completed`); the orchestrator owns
/// the `agent_started`/`agent_completed` bracket.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        state: SharedState,
        reporter: RunReporter,
    ) -> ConductorResult<serde_json::Value>;
}

/// Lookup of agents by name.
#[async_trait]
pub trait AgentRegistry: Send + Sync {
    fn get(&self, name: &str) -> Option<Arc<dyn Agent>>;

    /// Context-aware lookup. Defaults to [`get`](Self::get).
    async fn get_async(&self, name: &str, _ctx: &ExecutionContext) -> Option<Arc<dyn Agent>> {
        self.get(name)
    }
}

/// Name → agent map held in memory.
pub struct InMemoryAgentRegistry {
    agents: RwLock<HashMap<String, Arc<dyn Agent>>>,
}

impl InMemoryAgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Register an agent under its own name, replacing any previous one.
    pub fn register(&self, agent: Arc<dyn Agent>) {
        let name = agent.name().to_string();
        info!(agent = %name, "Registered agent");
        self.agents.write().insert(name, agent);
    }

    pub fn remove(&self, name: &str) -> bool {
        self.agents.write().remove(name).is_some()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }
}

impl Default for InMemoryAgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentRegistry for InMemoryAgentRegistry {
    fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.read().get(name).cloned()
    }
}
