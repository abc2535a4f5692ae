// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates concrete repository implementations from the configured storage
//! backend, keeping the domain layer free of infrastructure types.
//!
//! The replay ledger is the only store with a PostgreSQL implementation: it is
//! the one that must be shared by every controller replica for single-use
//! tokens to hold. Everything else is in memory.

use anyhow::Result;
use sqlx::PgPool;
use std::sync::Arc;

use crate::domain::repository::{
    AccessTokenRepository, AgentKeyRepository, AgentRepository, ApplicationRepository, MicroserviceRepository,
    RouterConnectionRepository, RouterRepository, RoutingDirectiveRepository, StorageBackend, UsedTokenRepository,
};
use crate::infrastructure::repositories::{
    InMemoryAccessTokenRepository, InMemoryAgentKeyRepository, InMemoryAgentRepository,
    InMemoryApplicationRepository, InMemoryMicroserviceRepository, InMemoryRouterConnectionRepository,
    InMemoryRouterRepository, InMemoryRoutingDirectiveRepository, InMemoryUsedTokenRepository,
    PostgresUsedTokenRepository,
};

/// Every repository the control plane needs.
#[derive(Clone)]
pub struct Repositories {
    pub agents: Arc<dyn AgentRepository>,
    pub agent_keys: Arc<dyn AgentKeyRepository>,
    pub access_tokens: Arc<dyn AccessTokenRepository>,
    pub used_tokens: Arc<dyn UsedTokenRepository>,
    pub routers: Arc<dyn RouterRepository>,
    pub connections: Arc<dyn RouterConnectionRepository>,
    pub applications: Arc<dyn ApplicationRepository>,
    pub microservices: Arc<dyn MicroserviceRepository>,
    pub directives: Arc<dyn RoutingDirectiveRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            agents: Arc::new(InMemoryAgentRepository::new()),
            agent_keys: Arc::new(InMemoryAgentKeyRepository::new()),
            access_tokens: Arc::new(InMemoryAccessTokenRepository::new()),
            used_tokens: Arc::new(InMemoryUsedTokenRepository::new()),
            routers: Arc::new(InMemoryRouterRepository::new()),
            connections: Arc::new(InMemoryRouterConnectionRepository::new()),
            applications: Arc::new(InMemoryApplicationRepository::new()),
            microservices: Arc::new(InMemoryMicroserviceRepository::new()),
            directives: Arc::new(InMemoryRoutingDirectiveRepository::new()),
        }
    }
}

/// Creates a UsedTokenRepository implementation based on the configured backend
pub fn create_used_token_repository(
    backend: &StorageBackend,
    pool: Option<PgPool>,
) -> Result<Arc<dyn UsedTokenRepository>> {
    match (backend, pool) {
        (StorageBackend::InMemory, _) => Ok(Arc::new(InMemoryUsedTokenRepository::new())),
        (StorageBackend::PostgreSQL(_), Some(pool)) => Ok(Arc::new(PostgresUsedTokenRepository::new(pool))),
        (StorageBackend::PostgreSQL(_), None) => {
            anyhow::bail!("PostgreSQL storage backend selected but no connection pool was provided")
        }
    }
}

/// Creates the full repository set for the configured backend
pub fn create_repositories(backend: &StorageBackend, pool: Option<PgPool>) -> Result<Repositories> {
    Ok(Repositories {
        used_tokens: create_used_token_repository(backend, pool)?,
        ..Repositories::in_memory()
    })
}
