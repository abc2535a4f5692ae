// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::domain::agent::AgentId;
use crate::domain::delivery::ConfigPublisher;
use crate::domain::routing::RouterConfig;

/// Per-agent outbox holding the most recent configuration pushed to each agent.
///
/// The delivery layer drains it when an agent polls; tests read it directly.
#[derive(Clone, Default)]
pub struct InMemoryConfigPublisher {
    outbox: Arc<DashMap<AgentId, RouterConfig>>,
    pushes: Arc<AtomicUsize>,
}

impl InMemoryConfigPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self, agent_id: AgentId) -> Option<RouterConfig> {
        self.outbox.get(&agent_id).map(|c| c.value().clone())
    }

    /// Remove and return the pending configuration for `agent_id`.
    pub fn take(&self, agent_id: AgentId) -> Option<RouterConfig> {
        self.outbox.remove(&agent_id).map(|(_, config)| config)
    }

    /// Total number of pushes received.
    pub fn push_count(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigPublisher for InMemoryConfigPublisher {
    async fn publish(&self, agent_id: AgentId, config: &RouterConfig) -> anyhow::Result<()> {
        debug!(%agent_id, router_id = %config.router_id, entries = config.entries.len(), "Queued router config");
        self.outbox.insert(agent_id, config.clone());
        self.pushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
