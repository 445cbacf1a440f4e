//! Registry of remote encoding agents.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use vodmill_models::{AgentId, Codec};

/// A registered remote agent: address, declared capabilities, capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub id: AgentId,
    pub name: String,
    /// Base URL of the agent's HTTP endpoint
    pub base_url: String,
    /// Codecs the agent declares it can encode
    pub codecs: Vec<Codec>,
    /// Concurrent encodes the agent accepts
    pub capacity: u32,
    /// Encodes currently dispatched to the agent
    pub active: u32,
    pub last_heartbeat: DateTime<Utc>,
}

impl AgentInfo {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        codecs: Vec<Codec>,
        capacity: u32,
    ) -> Self {
        Self {
            id: AgentId::new(),
            name: name.into(),
            base_url: base_url.into(),
            codecs,
            capacity,
            active: 0,
            last_heartbeat: Utc::now(),
        }
    }

    pub fn free_slots(&self) -> u32 {
        self.capacity.saturating_sub(self.active)
    }

    pub fn supports(&self, codec: Codec) -> bool {
        self.codecs.contains(&codec)
    }
}

/// Shared registry of remote agents.
///
/// Purely additive capacity: an empty registry is a normal operating
/// state and every lookup degrades to "no remote slot available".
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<AgentId, AgentInfo>>,
}

impl AgentRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn register(&self, agent: AgentInfo) -> AgentId {
        let id = agent.id.clone();
        info!(agent_id = %id, name = %agent.name, capacity = agent.capacity, "Agent registered");
        self.agents.write().await.insert(id.clone(), agent);
        id
    }

    pub async fn deregister(&self, id: &AgentId) {
        if self.agents.write().await.remove(id).is_some() {
            info!(agent_id = %id, "Agent deregistered");
        }
    }

    pub async fn record_heartbeat(&self, id: &AgentId) {
        if let Some(agent) = self.agents.write().await.get_mut(id) {
            agent.last_heartbeat = Utc::now();
        }
    }

    pub async fn get(&self, id: &AgentId) -> Option<AgentInfo> {
        self.agents.read().await.get(id).cloned()
    }

    /// Pick the agent with the most free slots among those supporting the
    /// codec and heartbeating within `freshness`. Returns `None` when no
    /// agent qualifies; the caller falls back to local execution.
    pub async fn select(&self, codec: Codec, freshness: Duration) -> Option<AgentInfo> {
        let cutoff = Utc::now() - freshness;
        self.agents
            .read()
            .await
            .values()
            .filter(|a| a.supports(codec) && a.free_slots() > 0 && a.last_heartbeat >= cutoff)
            .max_by_key(|a| a.free_slots())
            .cloned()
    }

    /// Reserve a slot on an agent. Returns false when the agent is gone
    /// or already full (lost a race with another dispatch).
    pub async fn reserve(&self, id: &AgentId) -> bool {
        let mut agents = self.agents.write().await;
        match agents.get_mut(id) {
            Some(agent) if agent.free_slots() > 0 => {
                agent.active += 1;
                true
            }
            _ => false,
        }
    }

    pub async fn release(&self, id: &AgentId) {
        if let Some(agent) = self.agents.write().await.get_mut(id) {
            agent.active = agent.active.saturating_sub(1);
        }
    }

    /// Drop agents whose heartbeat is older than `max_age`.
    pub async fn prune_stale(&self, max_age: Duration) -> Vec<AgentId> {
        let cutoff = Utc::now() - max_age;
        let mut agents = self.agents.write().await;
        let stale: Vec<AgentId> = agents
            .values()
            .filter(|a| a.last_heartbeat < cutoff)
            .map(|a| a.id.clone())
            .collect();
        for id in &stale {
            warn!(agent_id = %id, "Pruning agent with stale heartbeat");
            agents.remove(id);
        }
        stale
    }

    pub async fn agent_count(&self) -> usize {
        self.agents.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(name: &str, codecs: Vec<Codec>, capacity: u32) -> AgentInfo {
        AgentInfo::new(name, format!("http://{name}.local:9000"), codecs, capacity)
    }

    #[tokio::test]
    async fn test_select_prefers_most_free_capacity() {
        let registry = AgentRegistry::new();
        registry.register(agent("small", vec![Codec::H264], 1)).await;
        let big = registry.register(agent("big", vec![Codec::H264], 4)).await;

        let selected = registry
            .select(Codec::H264, Duration::seconds(60))
            .await
            .unwrap();
        assert_eq!(selected.id, big);
    }

    #[tokio::test]
    async fn test_select_filters_codec_support() {
        let registry = AgentRegistry::new();
        registry.register(agent("h264-only", vec![Codec::H264], 4)).await;

        assert!(registry
            .select(Codec::Av1, Duration::seconds(60))
            .await
            .is_none());
        assert!(registry
            .select(Codec::H264, Duration::seconds(60))
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_reserve_respects_capacity() {
        let registry = AgentRegistry::new();
        let id = registry.register(agent("a", vec![Codec::H264], 2)).await;

        assert!(registry.reserve(&id).await);
        assert!(registry.reserve(&id).await);
        assert!(!registry.reserve(&id).await);

        registry.release(&id).await;
        assert!(registry.reserve(&id).await);
    }

    #[tokio::test]
    async fn test_full_agent_not_selected() {
        let registry = AgentRegistry::new();
        let id = registry.register(agent("a", vec![Codec::H264], 1)).await;
        registry.reserve(&id).await;

        assert!(registry
            .select(Codec::H264, Duration::seconds(60))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_prune_stale_agents() {
        let registry = AgentRegistry::new();
        let mut stale = agent("stale", vec![Codec::H264], 2);
        stale.last_heartbeat = Utc::now() - Duration::seconds(600);
        let stale_id = stale.id.clone();
        registry.register(stale).await;
        registry.register(agent("fresh", vec![Codec::H264], 2)).await;

        let pruned = registry.prune_stale(Duration::seconds(120)).await;
        assert_eq!(pruned, vec![stale_id]);
        assert_eq!(registry.agent_count().await, 1);
    }
}
