// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Control-Plane Error Taxonomy
//!
//! Every operation fails with exactly one [`ControlPlaneError`] variant and
//! leaves prior state untouched. Nothing here is retried automatically.
//!
//! The API layer maps variants to status codes through [`ControlPlaneError::code`];
//! the `Display` strings are for logs only.

use thiserror::Error;

use crate::domain::agent::AgentId;
use crate::domain::credential::TokenId;
use crate::domain::repository::RepositoryError;
use crate::domain::router::RouterId;
use crate::domain::routing::MicroserviceId;
use crate::domain::tenant::TenantId;

#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("token signature does not match any verification key")]
    InvalidSignature,

    #[error("token expired")]
    Expired,

    #[error("token {0} already used")]
    AlreadyUsed(TokenId),

    #[error("tenant {0} already has a default router")]
    DefaultExists(TenantId),

    #[error("unknown router: {0}")]
    UnknownRouter(RouterId),

    #[error("router {0} cannot connect to itself")]
    SelfConnection(RouterId),

    #[error("connection {from} -> {to} already exists")]
    DuplicateConnection { from: RouterId, to: RouterId },

    #[error("router {0} still has dependents")]
    HasDependents(RouterId),

    #[error("routing directive name already in use: {0}")]
    DuplicateName(String),

    #[error("unknown microservice: {0}")]
    UnknownMicroservice(MicroserviceId),

    #[error("no router path for directive {directive}")]
    Unreachable { directive: String },

    #[error("agent {0} is revoked")]
    AgentRevoked(AgentId),

    #[error("router {0} cannot act as an upstream router")]
    InvalidUpstream(RouterId),

    #[error("agent {0} already hosts a router")]
    RouterExists(AgentId),

    #[error("malformed input: {0}")]
    Malformed(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ControlPlaneError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable identifier of the variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::InvalidSignature => "invalid_signature",
            Self::Expired => "expired",
            Self::AlreadyUsed(_) => "already_used",
            Self::DefaultExists(_) => "default_exists",
            Self::UnknownRouter(_) => "unknown_router",
            Self::SelfConnection(_) => "self_connection",
            Self::DuplicateConnection { .. } => "duplicate_connection",
            Self::HasDependents(_) => "has_dependents",
            Self::DuplicateName(_) => "duplicate_name",
            Self::UnknownMicroservice(_) => "unknown_microservice",
            Self::Unreachable { .. } => "unreachable",
            Self::AgentRevoked(_) => "agent_revoked",
            Self::InvalidUpstream(_) => "invalid_upstream",
            Self::RouterExists(_) => "router_exists",
            Self::Malformed(_) => "malformed",
            Self::Repository(_) => "storage",
        }
    }

    /// True for failures caused by the presented credential rather than the system.
    pub fn is_credential_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidSignature | Self::Expired | Self::AlreadyUsed(_) | Self::AgentRevoked(_) | Self::Malformed(_)
        )
    }
}
