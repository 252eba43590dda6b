//! Agent registry for delegation targets.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::errors::ConfigError;
use crate::tool::BoxTool;

/// A named agent that can run a turn or receive delegated sub-tasks.
pub struct AgentDefinition {
    pub name: String,
    /// One-line capability summary surfaced to delegating models.
    pub description: String,
    pub system_prompt: String,
    pub tools: Vec<Arc<BoxTool>>,
}

impl std::fmt::Debug for AgentDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentDefinition")
            .field("name", &self.name)
            .field("tools", &self.tools.len())
            .finish()
    }
}

/// Thread-safe lookup of agents by name.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Arc<AgentDefinition>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, agent: AgentDefinition) -> Result<(), ConfigError> {
        if agent.name.trim().is_empty() {
            return Err(ConfigError::Invalid("agent name cannot be empty".into()));
        }
        let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());
        if agents.contains_key(&agent.name) {
            return Err(ConfigError::DuplicateAgent(agent.name));
        }
        agents.insert(agent.name.clone(), Arc::new(agent));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<AgentDefinition>> {
        self.agents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Registered agent names, sorted for stable error messages.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .agents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// "name: description" lines for embedding into delegation prompts.
    pub fn describe(&self) -> String {
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        let mut entries: Vec<(&String, &Arc<AgentDefinition>)> = agents.iter().collect();
        entries.sort_by_key(|(name, _)| name.as_str());
        entries
            .iter()
            .map(|(name, agent)| format!("{}: {}", name, agent.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
