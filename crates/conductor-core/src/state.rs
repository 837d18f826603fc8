use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Mutable state handed to every agent invocation of a run or pipeline.
///
/// The orchestrator only reads `user_prompt` and `final_answer` (for
/// progress messages and fallbacks); everything else belongs to the agents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentState {
    #[serde(default)]
    pub user_prompt: Option<String>,
    #[serde(default)]
    pub final_answer: Option<String>,
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
}

/// State shared by reference between the caller and the agents it runs.
pub type SharedState = Arc<RwLock<AgentState>>;

impl AgentState {
    pub fn with_prompt(prompt: impl Into<String>) -> Self {
        Self {
            user_prompt: Some(prompt.into()),
            ..Self::default()
        }
    }

    /// Wraps the state for sharing with agents.
    pub fn shared(self) -> SharedState {
        Arc::new(RwLock::new(self))
    }

    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.data.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }
}
