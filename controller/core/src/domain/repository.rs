// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts, one per aggregate, implemented in
//! `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `AgentRepository` | `Agent` | `InMemoryAgentRepository` |
//! | `AgentKeyRepository` | `AgentKey` | `InMemoryAgentKeyRepository` |
//! | `AccessTokenRepository` | `AccessToken` | `InMemoryAccessTokenRepository` |
//! | `UsedTokenRepository` | `UsedTokenRecord` | `InMemoryUsedTokenRepository`, `PostgresUsedTokenRepository` |
//! | `RouterRepository` | `Router` | `InMemoryRouterRepository` |
//! | `RouterConnectionRepository` | `RouterConnection` | `InMemoryRouterConnectionRepository` |
//! | `ApplicationRepository` | `Application` | `InMemoryApplicationRepository` |
//! | `MicroserviceRepository` | `Microservice` | `InMemoryMicroserviceRepository` |
//! | `RoutingDirectiveRepository` | `RoutingDirective` | `InMemoryRoutingDirectiveRepository` |
//!
//! Cascades are not implemented by storage. The application services delete
//! dependents explicitly, under the tenant's mutation lock.
//!
//! The only conditional write is [`UsedTokenRepository::insert_if_absent`],
//! which must be atomic against concurrent callers with the same `jti`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::agent::{Agent, AgentId};
use crate::domain::credential::{AccessToken, AgentKey, TokenId, UsedTokenRecord};
use crate::domain::router::{Router, RouterConnection, RouterId};
use crate::domain::routing::{Application, ApplicationId, Microservice, MicroserviceId, RoutingDirective};
use crate::domain::tenant::TenantId;

/// Storage backend enum for pluggable persistence
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
}

#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// Save agent (create or update)
    async fn save(&self, agent: &Agent) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: AgentId) -> Result<Option<Agent>, RepositoryError>;

    async fn find_by_tenant(&self, tenant_id: TenantId) -> Result<Vec<Agent>, RepositoryError>;

    async fn delete(&self, id: AgentId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait AgentKeyRepository: Send + Sync {
    /// Save the agent's key record (create or replace)
    async fn save(&self, key: &AgentKey) -> Result<(), RepositoryError>;

    async fn find_by_agent(&self, agent_id: AgentId) -> Result<Option<AgentKey>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<AgentKey>, RepositoryError>;

    async fn delete(&self, agent_id: AgentId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait AccessTokenRepository: Send + Sync {
    async fn save(&self, token: &AccessToken) -> Result<(), RepositoryError>;

    async fn find_by_jti(&self, jti: TokenId) -> Result<Option<AccessToken>, RepositoryError>;

    async fn find_by_agent(&self, agent_id: AgentId) -> Result<Vec<AccessToken>, RepositoryError>;

    async fn delete(&self, jti: TokenId) -> Result<(), RepositoryError>;

    /// Delete every token of the agent. Returns the number removed.
    async fn delete_by_agent(&self, agent_id: AgentId) -> Result<usize, RepositoryError>;

    /// Delete tokens with `expires_at <= now`. Returns the number removed.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, RepositoryError>;
}

#[async_trait]
pub trait UsedTokenRepository: Send + Sync {
    /// Atomically store `record` unless a live record (`expires_at >= now`) exists
    /// for the same `jti`. An expired record is replaced. Returns true if stored.
    async fn insert_if_absent(&self, record: &UsedTokenRecord, now: DateTime<Utc>) -> Result<bool, RepositoryError>;

    async fn find(&self, jti: TokenId) -> Result<Option<UsedTokenRecord>, RepositoryError>;

    /// Store `record` unconditionally, keeping the later expiry if one exists.
    async fn force_insert(&self, record: &UsedTokenRecord) -> Result<(), RepositoryError>;

    /// Delete records with `expires_at < now`. Returns the number removed.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, RepositoryError>;
}

#[async_trait]
pub trait RouterRepository: Send + Sync {
    async fn save(&self, router: &Router) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: RouterId) -> Result<Option<Router>, RepositoryError>;

    async fn find_by_tenant(&self, tenant_id: TenantId) -> Result<Vec<Router>, RepositoryError>;

    async fn find_by_agent(&self, agent_id: AgentId) -> Result<Option<Router>, RepositoryError>;

    async fn find_default(&self, tenant_id: TenantId) -> Result<Option<Router>, RepositoryError>;

    async fn delete(&self, id: RouterId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait RouterConnectionRepository: Send + Sync {
    async fn save(&self, connection: &RouterConnection) -> Result<(), RepositoryError>;

    async fn find(&self, source: RouterId, target: RouterId) -> Result<Option<RouterConnection>, RepositoryError>;

    async fn find_by_tenant(&self, tenant_id: TenantId) -> Result<Vec<RouterConnection>, RepositoryError>;

    /// Connections where `router` is either endpoint
    async fn find_by_router(&self, router: RouterId) -> Result<Vec<RouterConnection>, RepositoryError>;

    async fn delete(&self, source: RouterId, target: RouterId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ApplicationRepository: Send + Sync {
    async fn save(&self, application: &Application) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: ApplicationId) -> Result<Option<Application>, RepositoryError>;

    async fn find_by_tenant(&self, tenant_id: TenantId) -> Result<Vec<Application>, RepositoryError>;

    async fn delete(&self, id: ApplicationId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait MicroserviceRepository: Send + Sync {
    async fn save(&self, microservice: &Microservice) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: MicroserviceId) -> Result<Option<Microservice>, RepositoryError>;

    async fn find_by_tenant(&self, tenant_id: TenantId) -> Result<Vec<Microservice>, RepositoryError>;

    async fn find_by_application(&self, application_id: ApplicationId) -> Result<Vec<Microservice>, RepositoryError>;

    async fn find_by_agent(&self, agent_id: AgentId) -> Result<Vec<Microservice>, RepositoryError>;

    async fn delete(&self, id: MicroserviceId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait RoutingDirectiveRepository: Send + Sync {
    async fn save(&self, directive: &RoutingDirective) -> Result<(), RepositoryError>;

    async fn find_by_name(&self, tenant_id: TenantId, name: &str) -> Result<Option<RoutingDirective>, RepositoryError>;

    async fn find_by_tenant(&self, tenant_id: TenantId) -> Result<Vec<RoutingDirective>, RepositoryError>;

    async fn delete(&self, tenant_id: TenantId, name: &str) -> Result<(), RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
