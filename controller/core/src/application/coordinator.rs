// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Control-Plane Coordinator
//!
//! Process-wide façade called by the API layer. It owns the per-tenant
//! mutation locks, runs cascades across the services, recompiles the tenant
//! after every topology change and hands changed per-agent configurations to
//! the delivery collaborator.
//!
//! # Concurrency
//!
//! | Operation | Tenant lock |
//! |-----------|-------------|
//! | agent, key, router, catalog and directive mutations | write |
//! | `compile_topology` (pushes configurations) | write |
//! | `topology`, `fetch_agent_config` | read |
//! | `issue_token`, `verify_token`, `revoke_token` | none (atomic replay ledger) |
//!
//! Tenants never share a lock, so mutations of different tenants proceed
//! independently.

use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::application::credential_store::CredentialStore;
use crate::application::replay_guard::ReplayGuard;
use crate::application::repository_factory::{create_repositories, Repositories};
use crate::application::router_graph::RouterGraphService;
use crate::application::routing_resolver::RoutingResolver;
use crate::application::sweeper::ReplayGuardSweeper;
use crate::application::token_service::{StandardTokenLifecycleService, TokenLifecycleService};
use crate::domain::agent::{Agent, AgentId};
use crate::domain::clock::{Clock, SystemClock};
use crate::domain::config::{ControllerConfigManifest, ControllerConfigSpec, RemovalPolicy, ReplayGuardConfig};
use crate::domain::credential::{AccessToken, IssuedToken, KeyMaterial, TokenId};
use crate::domain::delivery::ConfigPublisher;
use crate::domain::error::ControlPlaneError;
use crate::domain::events::{TopologyEvent, TrustEvent};
use crate::domain::repository::{AgentRepository, StorageBackend};
use crate::domain::router::{Router, RouterConnection, RouterId, RouterSpec, RouterUpdate, TopologySnapshot};
use crate::domain::routing::{
    Application, ApplicationId, CompiledTopology, Microservice, MicroserviceId, RouterConfig, RoutingDirective,
};
use crate::domain::tenant::TenantId;
use crate::infrastructure::db::Database;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::jwt::TokenCodec;
use crate::infrastructure::telemetry::{CONFIG_PUSHES_TOTAL, KEY_ROTATIONS_TOTAL};

pub struct ControlPlaneCoordinator {
    agents: Arc<dyn AgentRepository>,
    credentials: Arc<CredentialStore>,
    replay_guard: Arc<ReplayGuard>,
    tokens: Arc<dyn TokenLifecycleService>,
    graph: RouterGraphService,
    resolver: RoutingResolver,
    publisher: Arc<dyn ConfigPublisher>,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
    replay_config: ReplayGuardConfig,
    tenant_locks: DashMap<TenantId, Arc<RwLock<()>>>,
    last_pushed: DashMap<(TenantId, AgentId), RouterConfig>,
}

impl ControlPlaneCoordinator {
    pub fn new(
        spec: &ControllerConfigSpec,
        repos: Repositories,
        publisher: Arc<dyn ConfigPublisher>,
        event_bus: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let credentials = Arc::new(CredentialStore::new(
            repos.agent_keys.clone(),
            repos.access_tokens.clone(),
            TokenCodec::new(spec.tokens.issuer.clone()),
            clock.clone(),
            spec.tokens.grace_span(),
        ));
        let replay_guard = Arc::new(ReplayGuard::new(repos.used_tokens.clone(), clock.clone()));
        let tokens: Arc<dyn TokenLifecycleService> = Arc::new(StandardTokenLifecycleService::new(
            repos.agents.clone(),
            credentials.clone(),
            replay_guard.clone(),
            clock.clone(),
            event_bus.clone(),
            &spec.tokens,
        ));
        let graph = RouterGraphService::new(
            repos.routers.clone(),
            repos.connections.clone(),
            clock.clone(),
            event_bus.clone(),
            spec.topology.removal_policy,
        );
        let resolver = RoutingResolver::new(
            repos.applications.clone(),
            repos.microservices.clone(),
            repos.directives.clone(),
            clock.clone(),
            event_bus.clone(),
        );

        Self {
            agents: repos.agents,
            credentials,
            replay_guard,
            tokens,
            graph,
            resolver,
            publisher,
            event_bus,
            clock,
            replay_config: spec.replay_guard.clone(),
            tenant_locks: DashMap::new(),
            last_pushed: DashMap::new(),
        }
    }

    /// Build a coordinator from a validated manifest, opening the database if configured.
    pub async fn from_config(
        manifest: &ControllerConfigManifest,
        publisher: Arc<dyn ConfigPublisher>,
    ) -> anyhow::Result<Self> {
        manifest.validate()?;
        let backend = manifest.spec.storage.to_backend()?;
        let pool = match &backend {
            StorageBackend::InMemory => None,
            StorageBackend::PostgreSQL(config) => {
                let db = Database::connect(config).await?;
                db.ensure_schema().await?;
                Some(db.pool().clone())
            }
        };
        let repos = create_repositories(&backend, pool)?;
        let event_bus = EventBus::new(manifest.spec.events.capacity);

        info!(
            name = %manifest.metadata.name,
            use_policy = ?manifest.spec.tokens.use_policy,
            removal_policy = ?manifest.spec.topology.removal_policy,
            "Control plane configured"
        );
        Ok(Self::new(&manifest.spec, repos, publisher, event_bus, Arc::new(SystemClock)))
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Background sweeper over this coordinator's replay ledger and credentials.
    pub fn sweeper(&self) -> ReplayGuardSweeper {
        ReplayGuardSweeper::new(self.replay_guard.clone(), self.credentials.clone(), self.replay_config.clone())
    }

    // ── Agents ──────────────────────────────────────────────────────────────

    pub async fn register_agent(
        &self,
        tenant_id: TenantId,
        name: &str,
        key: KeyMaterial,
    ) -> Result<Agent, ControlPlaneError> {
        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.write().await;

        let agent = Agent::new(tenant_id, name, self.clock.now());
        self.agents.save(&agent).await?;
        self.credentials.register_key(agent.id, key).await?;

        info!(%tenant_id, agent_id = %agent.id, name, "Registered agent");
        self.event_bus.publish_trust_event(TrustEvent::AgentRegistered {
            agent_id: agent.id,
            tenant_id,
            registered_at: agent.created_at,
        });
        Ok(agent)
    }

    pub async fn agent(&self, agent_id: AgentId) -> Result<Agent, ControlPlaneError> {
        self.agents
            .find_by_id(agent_id)
            .await?
            .ok_or_else(|| ControlPlaneError::not_found("agent", agent_id))
    }

    /// Revoke the agent's credentials. Its tokens stop verifying and no new ones are issued.
    pub async fn revoke_agent(&self, agent_id: AgentId, reason: &str) -> Result<Agent, ControlPlaneError> {
        let tenant_id = self.agent(agent_id).await?.tenant_id;
        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.write().await;

        let mut agent = self.agent(agent_id).await?;
        if !agent.is_revoked() {
            let now = self.clock.now();
            agent.revoke(reason, now);
            self.agents.save(&agent).await?;
            warn!(%agent_id, reason, "Revoked agent");
            self.event_bus.publish_trust_event(TrustEvent::AgentRevoked {
                agent_id,
                reason: reason.to_string(),
                revoked_at: now,
            });
        }
        Ok(agent)
    }

    /// Delete an agent with its keys, tokens, router and the microservices placed on it.
    ///
    /// Fails with `HasDependents`, before deleting anything, if the agent hosts
    /// the default router while the tenant has other routers.
    pub async fn remove_agent(&self, agent_id: AgentId) -> Result<(), ControlPlaneError> {
        let tenant_id = self.agent(agent_id).await?.tenant_id;
        let lock = self.tenant_lock(tenant_id);
        let emptied = {
            let _guard = lock.write().await;
            self.remove_agent_locked(tenant_id, agent_id).await?;
            self.tenant_is_empty(tenant_id).await?
        };
        drop(lock);
        if emptied {
            self.release_tenant_lock(tenant_id);
        }
        Ok(())
    }

    async fn remove_agent_locked(&self, tenant_id: TenantId, agent_id: AgentId) -> Result<(), ControlPlaneError> {
        self.agent(agent_id).await?;

        let router = self.graph.router_for_agent(agent_id).await?;
        if let Some(router) = &router {
            self.graph.check_removable(router).await?;
        }

        let directives = self.resolver.remove_agent_microservices(tenant_id, agent_id).await?;
        if let Some(router) = router {
            self.graph.remove_with_policy(tenant_id, router.id, RemovalPolicy::Cascade).await?;
        }
        let tokens_removed = self.credentials.purge_agent(agent_id).await?;
        self.agents.delete(agent_id).await?;
        self.last_pushed.remove(&(tenant_id, agent_id));

        info!(%tenant_id, %agent_id, tokens_removed, directives_removed = directives.len(), "Removed agent");
        self.event_bus.publish_trust_event(TrustEvent::AgentRemoved {
            agent_id,
            tokens_removed,
            removed_at: self.clock.now(),
        });

        self.recompile_and_push(tenant_id).await?;
        Ok(())
    }

    // ── Tokens & keys ───────────────────────────────────────────────────────

    pub async fn issue_token(&self, agent_id: AgentId) -> Result<IssuedToken, ControlPlaneError> {
        self.tokens.issue(agent_id).await
    }

    pub async fn verify_token(&self, token: &str) -> Result<AgentId, ControlPlaneError> {
        self.tokens.verify(token).await
    }

    pub async fn revoke_token(&self, agent_id: AgentId, jti: TokenId) -> Result<(), ControlPlaneError> {
        self.tokens.revoke(agent_id, jti).await
    }

    /// Issued tokens of the agent that have not been revoked or swept.
    pub async fn outstanding_tokens(&self, agent_id: AgentId) -> Result<Vec<AccessToken>, ControlPlaneError> {
        self.credentials.tokens_for_agent(agent_id).await
    }

    pub async fn rotate_key(&self, agent_id: AgentId, key: KeyMaterial) -> Result<(), ControlPlaneError> {
        let tenant_id = self.agent(agent_id).await?.tenant_id;
        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.write().await;

        self.credentials.rotate_key(agent_id, key).await?;
        metrics::counter!(KEY_ROTATIONS_TOTAL).increment(1);
        self.event_bus.publish_trust_event(TrustEvent::KeyRotated {
            agent_id,
            rotated_at: self.clock.now(),
        });
        Ok(())
    }

    // ── Router graph ────────────────────────────────────────────────────────

    pub async fn create_router(&self, tenant_id: TenantId, spec: RouterSpec) -> Result<Router, ControlPlaneError> {
        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.write().await;

        if let Some(agent_id) = spec.agent_id {
            self.agent_in_tenant(tenant_id, agent_id).await?;
        }
        let router = self.graph.create_router(tenant_id, spec).await?;
        self.recompile_and_push(tenant_id).await?;
        Ok(router)
    }

    pub async fn connect_routers(
        &self,
        tenant_id: TenantId,
        source: RouterId,
        target: RouterId,
    ) -> Result<RouterConnection, ControlPlaneError> {
        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.write().await;

        let connection = self.graph.connect(tenant_id, source, target).await?;
        self.recompile_and_push(tenant_id).await?;
        Ok(connection)
    }

    pub async fn disconnect_routers(
        &self,
        tenant_id: TenantId,
        source: RouterId,
        target: RouterId,
    ) -> Result<(), ControlPlaneError> {
        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.write().await;

        self.graph.disconnect(tenant_id, source, target).await?;
        self.recompile_and_push(tenant_id).await?;
        Ok(())
    }

    pub async fn update_router(
        &self,
        tenant_id: TenantId,
        router_id: RouterId,
        update: RouterUpdate,
    ) -> Result<Router, ControlPlaneError> {
        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.write().await;

        let router = self.graph.update_router(tenant_id, router_id, update).await?;
        self.recompile_and_push(tenant_id).await?;
        Ok(router)
    }

    pub async fn remove_router(&self, tenant_id: TenantId, router_id: RouterId) -> Result<Router, ControlPlaneError> {
        let lock = self.tenant_lock(tenant_id);
        let (router, emptied) = {
            let _guard = lock.write().await;

            let router = self.graph.remove_router(tenant_id, router_id).await?;
            if let Some(agent_id) = router.agent_id {
                self.last_pushed.remove(&(tenant_id, agent_id));
            }
            self.recompile_and_push(tenant_id).await?;
            (router, self.tenant_is_empty(tenant_id).await?)
        };
        drop(lock);
        if emptied {
            self.release_tenant_lock(tenant_id);
        }
        Ok(router)
    }

    pub async fn topology(&self, tenant_id: TenantId) -> Result<TopologySnapshot, ControlPlaneError> {
        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.read().await;
        self.graph.topology(tenant_id).await
    }

    // ── Applications & routing ──────────────────────────────────────────────

    pub async fn create_application(&self, tenant_id: TenantId, name: &str) -> Result<Application, ControlPlaneError> {
        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.write().await;
        self.resolver.create_application(tenant_id, name).await
    }

    pub async fn register_microservice(
        &self,
        tenant_id: TenantId,
        application_id: ApplicationId,
        name: &str,
        agent_id: Option<AgentId>,
    ) -> Result<Microservice, ControlPlaneError> {
        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.write().await;

        if let Some(agent_id) = agent_id {
            self.agent_in_tenant(tenant_id, agent_id).await?;
        }
        self.resolver
            .register_microservice(tenant_id, application_id, name, agent_id)
            .await
    }

    pub async fn remove_microservice(
        &self,
        tenant_id: TenantId,
        microservice_id: MicroserviceId,
    ) -> Result<Vec<String>, ControlPlaneError> {
        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.write().await;

        let removed = self.resolver.remove_microservice(tenant_id, microservice_id).await?;
        self.recompile_and_push(tenant_id).await?;
        Ok(removed)
    }

    pub async fn remove_application(
        &self,
        tenant_id: TenantId,
        application_id: ApplicationId,
    ) -> Result<Vec<String>, ControlPlaneError> {
        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.write().await;

        let removed = self.resolver.remove_application(tenant_id, application_id).await?;
        self.recompile_and_push(tenant_id).await?;
        Ok(removed)
    }

    pub async fn declare_routing(
        &self,
        tenant_id: TenantId,
        application_id: ApplicationId,
        name: &str,
        source: MicroserviceId,
        destination: MicroserviceId,
    ) -> Result<RoutingDirective, ControlPlaneError> {
        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.write().await;

        let directive = self
            .resolver
            .declare(tenant_id, application_id, name, source, destination)
            .await?;
        self.recompile_and_push(tenant_id).await?;
        Ok(directive)
    }

    pub async fn remove_routing(&self, tenant_id: TenantId, name: &str) -> Result<RoutingDirective, ControlPlaneError> {
        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.write().await;

        let directive = self.resolver.remove(tenant_id, name).await?;
        self.recompile_and_push(tenant_id).await?;
        Ok(directive)
    }

    /// Compile the tenant and push every agent configuration that changed.
    pub async fn compile_topology(&self, tenant_id: TenantId) -> Result<CompiledTopology, ControlPlaneError> {
        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.write().await;
        self.recompile_and_push(tenant_id).await
    }

    /// Verify an agent's token and return the compiled configuration of its router.
    pub async fn fetch_agent_config(&self, token: &str) -> Result<RouterConfig, ControlPlaneError> {
        let agent_id = self.verify_token(token).await?;
        let tenant_id = self.agent(agent_id).await?.tenant_id;
        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.read().await;

        let snapshot = self.graph.topology(tenant_id).await?;
        let compiled = self.resolver.compile(&snapshot).await?;
        compiled
            .for_agent(agent_id)
            .cloned()
            .ok_or_else(|| ControlPlaneError::not_found("router config", agent_id))
    }

    /// Number of tenants that currently have a lock entry.
    pub fn tracked_tenants(&self) -> usize {
        self.tenant_locks.len()
    }

    fn tenant_lock(&self, tenant_id: TenantId) -> Arc<RwLock<()>> {
        self.tenant_locks.entry(tenant_id).or_default().clone()
    }

    /// Drops the tenant's lock entry unless some caller still holds a handle
    /// to it. Runs under the map shard lock, so a concurrent `tenant_lock`
    /// either sees the old entry (and keeps it alive) or creates a fresh one.
    fn release_tenant_lock(&self, tenant_id: TenantId) {
        if self
            .tenant_locks
            .remove_if(&tenant_id, |_, lock| Arc::strong_count(lock) == 1)
            .is_some()
        {
            debug!(%tenant_id, "Released tenant lock");
        }
    }

    /// Must be called with the tenant's write lock held.
    async fn tenant_is_empty(&self, tenant_id: TenantId) -> Result<bool, ControlPlaneError> {
        Ok(self.agents.find_by_tenant(tenant_id).await?.is_empty() && self.graph.topology(tenant_id).await?.is_empty())
    }

    async fn agent_in_tenant(&self, tenant_id: TenantId, agent_id: AgentId) -> Result<Agent, ControlPlaneError> {
        self.agents
            .find_by_id(agent_id)
            .await?
            .filter(|a| a.tenant_id == tenant_id)
            .ok_or_else(|| ControlPlaneError::not_found("agent", agent_id))
    }

    /// Must be called with the tenant's write lock held.
    async fn recompile_and_push(&self, tenant_id: TenantId) -> Result<CompiledTopology, ControlPlaneError> {
        let snapshot = self.graph.topology(tenant_id).await?;
        let compiled = self.resolver.compile(&snapshot).await?;

        let mut pushed = 0;
        for (agent_id, config) in compiled.agent_configs() {
            let key = (tenant_id, agent_id);
            if self.last_pushed.get(&key).is_some_and(|previous| *previous == *config) {
                continue;
            }
            match self.publisher.publish(agent_id, config).await {
                Ok(()) => {
                    self.last_pushed.insert(key, config.clone());
                    metrics::counter!(CONFIG_PUSHES_TOTAL, "outcome" => "delivered").increment(1);
                    pushed += 1;
                }
                Err(e) => {
                    // Forget what was last delivered so the next compile pushes again.
                    self.last_pushed.remove(&key);
                    metrics::counter!(CONFIG_PUSHES_TOTAL, "outcome" => "failed").increment(1);
                    warn!(%agent_id, "Failed to push router config: {}", e);
                }
            }
        }

        let live: BTreeSet<AgentId> = compiled.agent_configs().map(|(agent_id, _)| agent_id).collect();
        self.last_pushed
            .retain(|(tenant, agent_id), _| *tenant != tenant_id || live.contains(agent_id));

        let unreachable: Vec<String> = compiled.warnings.iter().map(|w| w.directive.clone()).collect();
        if !unreachable.is_empty() {
            warn!(%tenant_id, ?unreachable, "Routing directives without a router path");
        }
        self.event_bus.publish_topology_event(TopologyEvent::TopologyCompiled {
            tenant_id,
            router_count: compiled.routers.len(),
            unreachable,
            pushed_agents: pushed,
            compiled_at: self.clock.now(),
        });
        Ok(compiled)
    }
}
