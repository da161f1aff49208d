use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::agents::{Agent, AgentKind};

fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

#[derive(Default)]
struct Index {
    by_kind: HashMap<AgentKind, Arc<dyn Agent>>,
    // name_key -> agent
    by_name: HashMap<String, Arc<dyn Agent>>,
}

/// Process-wide agent lookup by kind or case-insensitive name.
///
/// Registering a second agent of an already-registered kind replaces the kind
/// mapping; the earlier agent stays reachable by its own name.
#[derive(Default)]
pub struct AgentRegistry {
    index: RwLock<Index>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, agent: Arc<dyn Agent>) {
        let kind = agent.kind();
        let name = agent.name().to_string();
        let mut index = self.index.write();
        if index.by_kind.insert(kind, agent.clone()).is_some() {
            tracing::debug!(kind = %kind, agent = %name, "replacing agent registered for kind");
        }
        index.by_name.insert(name_key(&name), agent);
        tracing::info!(kind = %kind, agent = %name, "registered agent");
    }

    pub fn by_kind(&self, kind: AgentKind) -> Option<Arc<dyn Agent>> {
        self.index.read().by_kind.get(&kind).cloned()
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.index
            .read()
            .by_name
            .get(&name_key(name))
            .cloned()
    }

    /// One agent per kind (the current kind mapping), ordered by name.
    pub fn all(&self) -> Vec<Arc<dyn Agent>> {
        let mut agents = self
            .index
            .read()
            .by_kind
            .values()
            .cloned()
            .collect::<Vec<_>>();
        agents.sort_by(|a, b| a.name().cmp(b.name()));
        agents
    }

    /// Every registered name, including agents shadowed in the kind mapping.
    pub fn names(&self) -> Vec<String> {
        let mut names = self
            .index
            .read()
            .by_name
            .values()
            .map(|agent| agent.name().to_string())
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.index.read().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
