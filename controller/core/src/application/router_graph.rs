// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Router Graph Manager
//!
//! Maintains routers and inter-router connections and enforces the graph
//! invariants documented in [`crate::domain::router`].
//!
//! Every operation validates completely before its first write, so a rejected
//! call leaves the graph as it was. Callers serialise mutations per tenant.
//!
//! After each successful mutation, routers reachable from the default router
//! are promoted from `Created` to `Active`.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::agent::AgentId;
use crate::domain::clock::Clock;
use crate::domain::config::RemovalPolicy;
use crate::domain::error::ControlPlaneError;
use crate::domain::events::TopologyEvent;
use crate::domain::repository::{RouterConnectionRepository, RouterRepository};
use crate::domain::router::{
    Router, RouterConnection, RouterId, RouterRole, RouterSpec, RouterState, RouterUpdate, TopologySnapshot,
};
use crate::domain::tenant::TenantId;
use crate::infrastructure::event_bus::EventBus;

pub struct RouterGraphService {
    routers: Arc<dyn RouterRepository>,
    connections: Arc<dyn RouterConnectionRepository>,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
    removal_policy: RemovalPolicy,
}

impl RouterGraphService {
    pub fn new(
        routers: Arc<dyn RouterRepository>,
        connections: Arc<dyn RouterConnectionRepository>,
        clock: Arc<dyn Clock>,
        event_bus: EventBus,
        removal_policy: RemovalPolicy,
    ) -> Self {
        Self {
            routers,
            connections,
            clock,
            event_bus,
            removal_policy,
        }
    }

    /// Create a router.
    ///
    /// The tenant's first router becomes the default router. Asking for a
    /// second default fails with `DefaultExists` unless `replace_default` is
    /// set, in which case the current default is demoted. A non-default router
    /// without explicit upstreams attaches to the default router unless it is
    /// `standalone`.
    pub async fn create_router(&self, tenant_id: TenantId, spec: RouterSpec) -> Result<Router, ControlPlaneError> {
        spec.ports.validate(spec.role).map_err(ControlPlaneError::Malformed)?;
        spec.tls.validate().map_err(ControlPlaneError::Malformed)?;
        if spec.host.trim().is_empty() {
            return Err(ControlPlaneError::Malformed("router host cannot be empty".to_string()));
        }

        if let Some(agent_id) = spec.agent_id {
            if self.routers.find_by_agent(agent_id).await?.is_some() {
                return Err(ControlPlaneError::RouterExists(agent_id));
            }
        }

        let existing = self.routers.find_by_tenant(tenant_id).await?;
        let current_default = existing.iter().find(|r| r.is_default).cloned();
        let make_default = spec.is_default || current_default.is_none();
        let id = RouterId::new();

        if make_default {
            if current_default.is_some() && !spec.replace_default {
                return Err(ControlPlaneError::DefaultExists(tenant_id));
            }
            if spec.role != RouterRole::Interior {
                return Err(ControlPlaneError::InvalidUpstream(id));
            }
        }

        let upstreams = if !spec.upstream_routers.is_empty() {
            spec.upstream_routers.clone()
        } else {
            match (&current_default, make_default || spec.standalone) {
                (Some(default), false) => vec![default.id],
                _ => Vec::new(),
            }
        };

        let mut seen = BTreeSet::new();
        for upstream in &upstreams {
            let target = existing
                .iter()
                .find(|r| r.id == *upstream)
                .ok_or(ControlPlaneError::UnknownRouter(*upstream))?;
            if !target.is_interior() {
                return Err(ControlPlaneError::InvalidUpstream(*upstream));
            }
            if !seen.insert(*upstream) {
                return Err(ControlPlaneError::DuplicateConnection { from: id, to: *upstream });
            }
        }

        let now = self.clock.now();
        if make_default {
            if let Some(mut previous) = current_default {
                previous.is_default = false;
                previous.updated_at = now;
                self.routers.save(&previous).await?;
                info!(%tenant_id, previous = %previous.id, current = %id, "Replaced default router");
                self.event_bus.publish_topology_event(TopologyEvent::DefaultRouterReplaced {
                    tenant_id,
                    previous: previous.id,
                    current: id,
                    replaced_at: now,
                });
            }
        }

        let router = Router {
            id,
            tenant_id,
            agent_id: spec.agent_id,
            role: spec.role,
            host: spec.host,
            ports: spec.ports,
            tls: spec.tls,
            is_default: make_default,
            state: RouterState::Created,
            created_at: now,
            updated_at: now,
        };
        self.routers.save(&router).await?;
        for upstream in &upstreams {
            self.connections
                .save(&RouterConnection {
                    tenant_id,
                    source: id,
                    target: *upstream,
                    created_at: now,
                })
                .await?;
        }

        info!(%tenant_id, router_id = %id, role = ?router.role, is_default = make_default, upstreams = upstreams.len(), "Created router");
        self.event_bus.publish_topology_event(TopologyEvent::RouterCreated {
            tenant_id,
            router_id: id,
            agent_id: router.agent_id,
            is_default: make_default,
            created_at: now,
        });

        self.promote_reachable(tenant_id).await?;
        self.get_router(tenant_id, id).await
    }

    /// Add the connection `source -> target`, where `target` becomes an upstream of `source`.
    pub async fn connect(
        &self,
        tenant_id: TenantId,
        source: RouterId,
        target: RouterId,
    ) -> Result<RouterConnection, ControlPlaneError> {
        if source == target {
            return Err(ControlPlaneError::SelfConnection(source));
        }
        self.find_in_tenant(tenant_id, source).await?;
        let upstream = self.find_in_tenant(tenant_id, target).await?;
        if self.connections.find(source, target).await?.is_some() {
            return Err(ControlPlaneError::DuplicateConnection { from: source, to: target });
        }
        if !upstream.is_interior() {
            return Err(ControlPlaneError::InvalidUpstream(target));
        }

        let now = self.clock.now();
        let connection = RouterConnection {
            tenant_id,
            source,
            target,
            created_at: now,
        };
        self.connections.save(&connection).await?;

        info!(%tenant_id, %source, %target, "Connected routers");
        self.event_bus.publish_topology_event(TopologyEvent::RoutersConnected {
            tenant_id,
            source,
            target,
            connected_at: now,
        });

        self.promote_reachable(tenant_id).await?;
        Ok(connection)
    }

    pub async fn disconnect(&self, tenant_id: TenantId, source: RouterId, target: RouterId) -> Result<(), ControlPlaneError> {
        let connection = self
            .connections
            .find(source, target)
            .await?
            .filter(|c| c.tenant_id == tenant_id)
            .ok_or_else(|| ControlPlaneError::not_found("router connection", format!("{} -> {}", source, target)))?;
        self.connections.delete(connection.source, connection.target).await?;

        info!(%tenant_id, %source, %target, "Disconnected routers");
        self.event_bus.publish_topology_event(TopologyEvent::RoutersDisconnected {
            tenant_id,
            source,
            target,
            disconnected_at: self.clock.now(),
        });
        Ok(())
    }

    /// Change a router's host, ports or TLS settings. Role and default flag are fixed.
    pub async fn update_router(
        &self,
        tenant_id: TenantId,
        router_id: RouterId,
        update: RouterUpdate,
    ) -> Result<Router, ControlPlaneError> {
        let mut router = self.find_in_tenant(tenant_id, router_id).await?;
        if let Some(host) = update.host {
            if host.trim().is_empty() {
                return Err(ControlPlaneError::Malformed("router host cannot be empty".to_string()));
            }
            router.host = host;
        }
        if let Some(ports) = update.ports {
            ports.validate(router.role).map_err(ControlPlaneError::Malformed)?;
            router.ports = ports;
        }
        if let Some(tls) = update.tls {
            tls.validate().map_err(ControlPlaneError::Malformed)?;
            router.tls = tls;
        }
        router.updated_at = self.clock.now();
        self.routers.save(&router).await?;

        info!(%tenant_id, %router_id, "Updated router");
        self.event_bus.publish_topology_event(TopologyEvent::RouterUpdated {
            tenant_id,
            router_id,
            updated_at: router.updated_at,
        });
        Ok(router)
    }

    /// Remove a router, returning it in the `Deleted` state.
    ///
    /// The default router cannot be removed while other routers exist. Under
    /// [`RemovalPolicy::Restrict`] any remaining connection fails the call with
    /// `HasDependents`; under `Cascade` the connections go with the router.
    pub async fn remove_router(&self, tenant_id: TenantId, router_id: RouterId) -> Result<Router, ControlPlaneError> {
        self.remove_with_policy(tenant_id, router_id, self.removal_policy).await
    }

    pub(crate) async fn remove_with_policy(
        &self,
        tenant_id: TenantId,
        router_id: RouterId,
        policy: RemovalPolicy,
    ) -> Result<Router, ControlPlaneError> {
        let mut router = self.find_in_tenant(tenant_id, router_id).await?;
        self.check_removable(&router).await?;

        let attached = self.connections.find_by_router(router_id).await?;
        if policy == RemovalPolicy::Restrict && !attached.is_empty() {
            return Err(ControlPlaneError::HasDependents(router_id));
        }

        for connection in &attached {
            self.connections.delete(connection.source, connection.target).await?;
        }
        self.routers.delete(router_id).await?;

        let now = self.clock.now();
        router.state = RouterState::Deleted;
        router.updated_at = now;

        info!(%tenant_id, %router_id, connections_removed = attached.len(), "Removed router");
        self.event_bus.publish_topology_event(TopologyEvent::RouterRemoved {
            tenant_id,
            router_id,
            connections_removed: attached.len(),
            removed_at: now,
        });
        Ok(router)
    }

    /// Fail with `HasDependents` if `router` is the default router and others exist.
    pub(crate) async fn check_removable(&self, router: &Router) -> Result<(), ControlPlaneError> {
        if router.is_default {
            let others = self
                .routers
                .find_by_tenant(router.tenant_id)
                .await?
                .iter()
                .any(|r| r.id != router.id);
            if others {
                return Err(ControlPlaneError::HasDependents(router.id));
            }
        }
        Ok(())
    }

    /// Owned snapshot of the tenant's graph.
    pub async fn topology(&self, tenant_id: TenantId) -> Result<TopologySnapshot, ControlPlaneError> {
        let routers = self.routers.find_by_tenant(tenant_id).await?;
        let connections = self.connections.find_by_tenant(tenant_id).await?;
        debug!(%tenant_id, routers = routers.len(), connections = connections.len(), "Loaded topology snapshot");
        Ok(TopologySnapshot::new(tenant_id, routers, connections))
    }

    pub async fn get_router(&self, tenant_id: TenantId, router_id: RouterId) -> Result<Router, ControlPlaneError> {
        self.find_in_tenant(tenant_id, router_id).await
    }

    pub async fn router_for_agent(&self, agent_id: AgentId) -> Result<Option<Router>, ControlPlaneError> {
        Ok(self.routers.find_by_agent(agent_id).await?)
    }

    async fn find_in_tenant(&self, tenant_id: TenantId, router_id: RouterId) -> Result<Router, ControlPlaneError> {
        self.routers
            .find_by_id(router_id)
            .await?
            .filter(|r| r.tenant_id == tenant_id)
            .ok_or(ControlPlaneError::UnknownRouter(router_id))
    }

    async fn promote_reachable(&self, tenant_id: TenantId) -> Result<(), ControlPlaneError> {
        let snapshot = self.topology(tenant_id).await?;
        let Some(default) = snapshot.default_router() else {
            return Ok(());
        };

        let now = self.clock.now();
        for router_id in snapshot.reachable_from(default.id) {
            let Some(router) = snapshot.routers.get(&router_id) else {
                continue;
            };
            let mut router = router.clone();
            if router.activate(now) {
                self.routers.save(&router).await?;
                info!(%tenant_id, %router_id, "Router active");
                self.event_bus.publish_topology_event(TopologyEvent::RouterActivated {
                    tenant_id,
                    router_id,
                    activated_at: now,
                });
            }
        }
        Ok(())
    }
}
