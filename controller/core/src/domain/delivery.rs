// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;

use crate::domain::agent::AgentId;
use crate::domain::routing::RouterConfig;

/// Outbound port to the agent-delivery collaborator.
///
/// Called with the agent's full compiled configuration whenever it changes.
/// A failed push is logged by the caller and retried on the next compile.
#[async_trait]
pub trait ConfigPublisher: Send + Sync {
    async fn publish(&self, agent_id: AgentId, config: &RouterConfig) -> anyhow::Result<()>;
}
