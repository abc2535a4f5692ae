// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Aggregate
//!
//! A fog node registered with the control plane. The heartbeat and health
//! fields are written by the external status-reporting collaborator; this
//! crate only reads them.
//!
//! Deleting an agent cascades to its keys, access tokens, router and the
//! microservices placed on it (see
//! [`crate::application::coordinator::ControlPlaneCoordinator::remove_agent`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::tenant::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(pub Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Credential state of an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AgentStatus {
    /// The agent may obtain and present tokens.
    Active,
    /// An operator revoked the agent's credentials. Terminal.
    Revoked { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub tenant_id: TenantId,
    pub name: String,
    pub status: AgentStatus,
    /// Last heartbeat reported by the agent (owned by the status collaborator)
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Reported health summary (owned by the status collaborator)
    pub health: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(tenant_id: TenantId, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: AgentId::new(),
            tenant_id,
            name: name.into(),
            status: AgentStatus::Active,
            last_heartbeat: None,
            health: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_revoked(&self) -> bool {
        matches!(self.status, AgentStatus::Revoked { .. })
    }

    /// Revoke the agent. Revocation is terminal; revoking twice keeps the first reason.
    pub fn revoke(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        if self.is_revoked() {
            return;
        }
        self.status = AgentStatus::Revoked { reason: reason.into() };
        self.updated_at = now;
    }
}
