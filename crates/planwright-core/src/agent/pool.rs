//! Agent pool: the agents consulted each round, keyed by id.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::roster::{Role, RosterAgent};
use super::trait_def::Agent;

/// A collection of registered [`Agent`]s.
///
/// Iteration is in id order, so every run consults agents in the same
/// order.
#[derive(Default, Clone)]
pub struct AgentPool {
    agents: BTreeMap<String, Arc<dyn Agent>>,
}

impl AgentPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// The seven built-in roles.
    pub fn standard() -> Self {
        let mut pool = Self::new();
        for role in Role::ALL {
            pool.register(RosterAgent::new(role));
        }
        pool
    }

    /// Register an agent under [`Agent::id`], replacing and returning any
    /// agent already registered with that id.
    pub fn register(&mut self, agent: impl Agent + 'static) -> Option<Arc<dyn Agent>> {
        self.register_arc(Arc::new(agent))
    }

    pub fn register_arc(&mut self, agent: Arc<dyn Agent>) -> Option<Arc<dyn Agent>> {
        self.agents.insert(agent.id().to_string(), agent)
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.agents.keys().map(String::as_str).collect()
    }

    pub fn agents(&self) -> impl Iterator<Item = &Arc<dyn Agent>> {
        self.agents.values()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl std::fmt::Debug for AgentPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentPool")
            .field("agents", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentInput, Analysis};
    use anyhow::Result;
    use async_trait::async_trait;

    struct Fixed(&'static str);

    #[async_trait]
    impl Agent for Fixed {
        fn id(&self) -> &str {
            self.0
        }

        fn role(&self) -> &str {
            "fixed"
        }

        async fn analyze(&self, _input: &AgentInput) -> Result<Analysis> {
            Ok(Analysis {
                contributions: vec![],
                confidence: 1.0,
                reasoning: String::new(),
            })
        }
    }

    #[test]
    fn standard_pool_has_seven_roles() {
        let pool = AgentPool::standard();
        assert_eq!(pool.len(), 7);
        assert!(pool.get("program_coordinator").is_some());
        assert!(pool.get("finance_resources").is_some());
    }

    #[test]
    fn register_replaces_same_id() {
        let mut pool = AgentPool::new();
        assert!(pool.register(Fixed("a")).is_none());
        assert!(pool.register(Fixed("a")).is_some());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn ids_are_sorted() {
        let mut pool = AgentPool::new();
        pool.register(Fixed("zeta"));
        pool.register(Fixed("alpha"));
        assert_eq!(pool.ids(), ["alpha", "zeta"]);
        assert!(!pool.is_empty());
    }
}
