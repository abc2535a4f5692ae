// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository traits in
//! [`crate::domain::repository`].
//!
//! ## In-Memory Repositories
//!
//! `HashMap`-backed storage behind `parking_lot::RwLock`, used for development,
//! tests and single-process deployments. The used-token store is a `DashMap`
//! so that insert-if-absent is a single entry operation on one shard.
//!
//! ## PostgreSQL Repositories
//!
//! - **PostgresUsedTokenRepository** - replay ledger shared by several
//!   controller replicas

pub mod postgres_used_token;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::agent::{Agent, AgentId};
use crate::domain::credential::{AccessToken, AgentKey, TokenId, UsedTokenRecord};
use crate::domain::repository::{
    AccessTokenRepository, AgentKeyRepository, AgentRepository, ApplicationRepository, MicroserviceRepository,
    RepositoryError, RouterConnectionRepository, RouterRepository, RoutingDirectiveRepository, UsedTokenRepository,
};
use crate::domain::router::{Router, RouterConnection, RouterId};
use crate::domain::routing::{Application, ApplicationId, Microservice, MicroserviceId, RoutingDirective};
use crate::domain::tenant::TenantId;

pub use postgres_used_token::PostgresUsedTokenRepository;

#[derive(Clone, Default)]
pub struct InMemoryAgentRepository {
    agents: Arc<RwLock<HashMap<AgentId, Agent>>>,
}

impl InMemoryAgentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentRepository for InMemoryAgentRepository {
    async fn save(&self, agent: &Agent) -> Result<(), RepositoryError> {
        self.agents.write().insert(agent.id, agent.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: AgentId) -> Result<Option<Agent>, RepositoryError> {
        Ok(self.agents.read().get(&id).cloned())
    }

    async fn find_by_tenant(&self, tenant_id: TenantId) -> Result<Vec<Agent>, RepositoryError> {
        let agents = self.agents.read();
        let mut found: Vec<Agent> = agents.values().filter(|a| a.tenant_id == tenant_id).cloned().collect();
        found.sort_by_key(|a| a.id);
        Ok(found)
    }

    async fn delete(&self, id: AgentId) -> Result<(), RepositoryError> {
        self.agents.write().remove(&id);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryAgentKeyRepository {
    keys: Arc<RwLock<HashMap<AgentId, AgentKey>>>,
}

impl InMemoryAgentKeyRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentKeyRepository for InMemoryAgentKeyRepository {
    async fn save(&self, key: &AgentKey) -> Result<(), RepositoryError> {
        self.keys.write().insert(key.agent_id, key.clone());
        Ok(())
    }

    async fn find_by_agent(&self, agent_id: AgentId) -> Result<Option<AgentKey>, RepositoryError> {
        Ok(self.keys.read().get(&agent_id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<AgentKey>, RepositoryError> {
        Ok(self.keys.read().values().cloned().collect())
    }

    async fn delete(&self, agent_id: AgentId) -> Result<(), RepositoryError> {
        self.keys.write().remove(&agent_id);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryAccessTokenRepository {
    tokens: Arc<RwLock<HashMap<TokenId, AccessToken>>>,
}

impl InMemoryAccessTokenRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccessTokenRepository for InMemoryAccessTokenRepository {
    async fn save(&self, token: &AccessToken) -> Result<(), RepositoryError> {
        self.tokens.write().insert(token.jti, token.clone());
        Ok(())
    }

    async fn find_by_jti(&self, jti: TokenId) -> Result<Option<AccessToken>, RepositoryError> {
        Ok(self.tokens.read().get(&jti).cloned())
    }

    async fn find_by_agent(&self, agent_id: AgentId) -> Result<Vec<AccessToken>, RepositoryError> {
        let tokens = self.tokens.read();
        let mut found: Vec<AccessToken> = tokens.values().filter(|t| t.agent_id == agent_id).cloned().collect();
        found.sort_by_key(|t| t.issued_at);
        Ok(found)
    }

    async fn delete(&self, jti: TokenId) -> Result<(), RepositoryError> {
        self.tokens.write().remove(&jti);
        Ok(())
    }

    async fn delete_by_agent(&self, agent_id: AgentId) -> Result<usize, RepositoryError> {
        let mut tokens = self.tokens.write();
        let before = tokens.len();
        tokens.retain(|_, t| t.agent_id != agent_id);
        Ok(before - tokens.len())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, RepositoryError> {
        let mut tokens = self.tokens.write();
        let before = tokens.len();
        tokens.retain(|_, t| !t.is_expired(now));
        Ok(before - tokens.len())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryUsedTokenRepository {
    records: Arc<DashMap<TokenId, UsedTokenRecord>>,
}

impl InMemoryUsedTokenRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl UsedTokenRepository for InMemoryUsedTokenRepository {
    async fn insert_if_absent(&self, record: &UsedTokenRecord, now: DateTime<Utc>) -> Result<bool, RepositoryError> {
        // The entry guard holds the shard lock, so check and insert are one step.
        match self.records.entry(record.jti) {
            Entry::Occupied(mut existing) => {
                if existing.get().is_live(now) {
                    return Ok(false);
                }
                existing.insert(record.clone());
                Ok(true)
            }
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(true)
            }
        }
    }

    async fn find(&self, jti: TokenId) -> Result<Option<UsedTokenRecord>, RepositoryError> {
        Ok(self.records.get(&jti).map(|r| r.value().clone()))
    }

    async fn force_insert(&self, record: &UsedTokenRecord) -> Result<(), RepositoryError> {
        self.records
            .entry(record.jti)
            .and_modify(|existing| {
                if record.expires_at > existing.expires_at {
                    *existing = record.clone();
                }
            })
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, RepositoryError> {
        let before = self.records.len();
        self.records.retain(|_, r| r.is_live(now));
        Ok(before.saturating_sub(self.records.len()))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryRouterRepository {
    routers: Arc<RwLock<HashMap<RouterId, Router>>>,
}

impl InMemoryRouterRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RouterRepository for InMemoryRouterRepository {
    async fn save(&self, router: &Router) -> Result<(), RepositoryError> {
        self.routers.write().insert(router.id, router.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: RouterId) -> Result<Option<Router>, RepositoryError> {
        Ok(self.routers.read().get(&id).cloned())
    }

    async fn find_by_tenant(&self, tenant_id: TenantId) -> Result<Vec<Router>, RepositoryError> {
        let routers = self.routers.read();
        let mut found: Vec<Router> = routers.values().filter(|r| r.tenant_id == tenant_id).cloned().collect();
        found.sort_by_key(|r| r.id);
        Ok(found)
    }

    async fn find_by_agent(&self, agent_id: AgentId) -> Result<Option<Router>, RepositoryError> {
        Ok(self.routers.read().values().find(|r| r.agent_id == Some(agent_id)).cloned())
    }

    async fn find_default(&self, tenant_id: TenantId) -> Result<Option<Router>, RepositoryError> {
        Ok(self
            .routers
            .read()
            .values()
            .find(|r| r.tenant_id == tenant_id && r.is_default)
            .cloned())
    }

    async fn delete(&self, id: RouterId) -> Result<(), RepositoryError> {
        self.routers.write().remove(&id);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryRouterConnectionRepository {
    connections: Arc<RwLock<HashMap<(RouterId, RouterId), RouterConnection>>>,
}

impl InMemoryRouterConnectionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RouterConnectionRepository for InMemoryRouterConnectionRepository {
    async fn save(&self, connection: &RouterConnection) -> Result<(), RepositoryError> {
        self.connections
            .write()
            .insert((connection.source, connection.target), connection.clone());
        Ok(())
    }

    async fn find(&self, source: RouterId, target: RouterId) -> Result<Option<RouterConnection>, RepositoryError> {
        Ok(self.connections.read().get(&(source, target)).cloned())
    }

    async fn find_by_tenant(&self, tenant_id: TenantId) -> Result<Vec<RouterConnection>, RepositoryError> {
        let connections = self.connections.read();
        let mut found: Vec<RouterConnection> =
            connections.values().filter(|c| c.tenant_id == tenant_id).cloned().collect();
        found.sort_by_key(|c| (c.source, c.target));
        Ok(found)
    }

    async fn find_by_router(&self, router: RouterId) -> Result<Vec<RouterConnection>, RepositoryError> {
        let connections = self.connections.read();
        let mut found: Vec<RouterConnection> = connections.values().filter(|c| c.touches(router)).cloned().collect();
        found.sort_by_key(|c| (c.source, c.target));
        Ok(found)
    }

    async fn delete(&self, source: RouterId, target: RouterId) -> Result<(), RepositoryError> {
        self.connections.write().remove(&(source, target));
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryApplicationRepository {
    applications: Arc<RwLock<HashMap<ApplicationId, Application>>>,
}

impl InMemoryApplicationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApplicationRepository for InMemoryApplicationRepository {
    async fn save(&self, application: &Application) -> Result<(), RepositoryError> {
        self.applications.write().insert(application.id, application.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: ApplicationId) -> Result<Option<Application>, RepositoryError> {
        Ok(self.applications.read().get(&id).cloned())
    }

    async fn find_by_tenant(&self, tenant_id: TenantId) -> Result<Vec<Application>, RepositoryError> {
        let applications = self.applications.read();
        let mut found: Vec<Application> =
            applications.values().filter(|a| a.tenant_id == tenant_id).cloned().collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    async fn delete(&self, id: ApplicationId) -> Result<(), RepositoryError> {
        self.applications.write().remove(&id);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryMicroserviceRepository {
    microservices: Arc<RwLock<HashMap<MicroserviceId, Microservice>>>,
}

impl InMemoryMicroserviceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn filtered(&self, pred: impl Fn(&Microservice) -> bool) -> Vec<Microservice> {
        let microservices = self.microservices.read();
        let mut found: Vec<Microservice> = microservices.values().filter(|m| pred(m)).cloned().collect();
        found.sort_by_key(|m| m.id);
        found
    }
}

#[async_trait]
impl MicroserviceRepository for InMemoryMicroserviceRepository {
    async fn save(&self, microservice: &Microservice) -> Result<(), RepositoryError> {
        self.microservices.write().insert(microservice.id, microservice.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: MicroserviceId) -> Result<Option<Microservice>, RepositoryError> {
        Ok(self.microservices.read().get(&id).cloned())
    }

    async fn find_by_tenant(&self, tenant_id: TenantId) -> Result<Vec<Microservice>, RepositoryError> {
        Ok(self.filtered(|m| m.tenant_id == tenant_id))
    }

    async fn find_by_application(&self, application_id: ApplicationId) -> Result<Vec<Microservice>, RepositoryError> {
        Ok(self.filtered(|m| m.application_id == application_id))
    }

    async fn find_by_agent(&self, agent_id: AgentId) -> Result<Vec<Microservice>, RepositoryError> {
        Ok(self.filtered(|m| m.agent_id == Some(agent_id)))
    }

    async fn delete(&self, id: MicroserviceId) -> Result<(), RepositoryError> {
        self.microservices.write().remove(&id);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryRoutingDirectiveRepository {
    directives: Arc<RwLock<HashMap<(TenantId, String), RoutingDirective>>>,
}

impl InMemoryRoutingDirectiveRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoutingDirectiveRepository for InMemoryRoutingDirectiveRepository {
    async fn save(&self, directive: &RoutingDirective) -> Result<(), RepositoryError> {
        self.directives
            .write()
            .insert((directive.tenant_id, directive.name.clone()), directive.clone());
        Ok(())
    }

    async fn find_by_name(&self, tenant_id: TenantId, name: &str) -> Result<Option<RoutingDirective>, RepositoryError> {
        Ok(self.directives.read().get(&(tenant_id, name.to_string())).cloned())
    }

    async fn find_by_tenant(&self, tenant_id: TenantId) -> Result<Vec<RoutingDirective>, RepositoryError> {
        let directives = self.directives.read();
        let mut found: Vec<RoutingDirective> =
            directives.values().filter(|d| d.tenant_id == tenant_id).cloned().collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    async fn delete(&self, tenant_id: TenantId, name: &str) -> Result<(), RepositoryError> {
        self.directives.write().remove(&(tenant_id, name.to_string()));
        Ok(())
    }
}
