// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::AgentId;
use crate::domain::credential::TokenId;
use crate::domain::router::RouterId;
use crate::domain::routing::MicroserviceId;
use crate::domain::tenant::TenantId;

/// Credential lifecycle events.
///
/// Token values never appear in events; tokens are identified by `jti` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TrustEvent {
    AgentRegistered {
        agent_id: AgentId,
        tenant_id: TenantId,
        registered_at: DateTime<Utc>,
    },
    AgentRevoked {
        agent_id: AgentId,
        reason: String,
        revoked_at: DateTime<Utc>,
    },
    AgentRemoved {
        agent_id: AgentId,
        tokens_removed: usize,
        removed_at: DateTime<Utc>,
    },
    KeyRotated {
        agent_id: AgentId,
        rotated_at: DateTime<Utc>,
    },
    TokenIssued {
        agent_id: AgentId,
        jti: TokenId,
        expires_at: DateTime<Utc>,
    },
    TokenVerified {
        agent_id: AgentId,
        jti: TokenId,
        consumed: bool,
        verified_at: DateTime<Utc>,
    },
    TokenRejected {
        /// Claimed agent, if the token could be decoded
        agent_id: Option<AgentId>,
        reason: String, // ControlPlaneError::code()
        rejected_at: DateTime<Utc>,
    },
    TokenRevoked {
        agent_id: AgentId,
        jti: TokenId,
        revoked_at: DateTime<Utc>,
    },
}

/// Router graph and routing directive events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TopologyEvent {
    RouterCreated {
        tenant_id: TenantId,
        router_id: RouterId,
        agent_id: Option<AgentId>,
        is_default: bool,
        created_at: DateTime<Utc>,
    },
    RouterActivated {
        tenant_id: TenantId,
        router_id: RouterId,
        activated_at: DateTime<Utc>,
    },
    RouterUpdated {
        tenant_id: TenantId,
        router_id: RouterId,
        updated_at: DateTime<Utc>,
    },
    DefaultRouterReplaced {
        tenant_id: TenantId,
        previous: RouterId,
        current: RouterId,
        replaced_at: DateTime<Utc>,
    },
    RouterRemoved {
        tenant_id: TenantId,
        router_id: RouterId,
        connections_removed: usize,
        removed_at: DateTime<Utc>,
    },
    RoutersConnected {
        tenant_id: TenantId,
        source: RouterId,
        target: RouterId,
        connected_at: DateTime<Utc>,
    },
    RoutersDisconnected {
        tenant_id: TenantId,
        source: RouterId,
        target: RouterId,
        disconnected_at: DateTime<Utc>,
    },
    DirectiveDeclared {
        tenant_id: TenantId,
        name: String,
        source: MicroserviceId,
        destination: MicroserviceId,
        declared_at: DateTime<Utc>,
    },
    DirectiveRemoved {
        tenant_id: TenantId,
        name: String,
        removed_at: DateTime<Utc>,
    },
    TopologyCompiled {
        tenant_id: TenantId,
        router_count: usize,
        unreachable: Vec<String>,
        pushed_agents: usize,
        compiled_at: DateTime<Utc>,
    },
}
