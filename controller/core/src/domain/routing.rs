// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Routing Directives & Compiled Router Configuration
//!
//! A [`RoutingDirective`] says "messages produced by microservice A go to
//! microservice B". [`compile`] turns the tenant's directives plus a
//! [`TopologySnapshot`] into one [`RouterConfig`] per router: the listeners
//! and connectors the router process needs to join the mesh, and the local
//! routing entries that realise every directive crossing it.
//!
//! ## Compile Rules
//!
//! - Directives are processed in name order, routers in id order. Identical
//!   inputs always yield identical output.
//! - A microservice resolves to the router of the agent it is placed on; an
//!   agent without a router uses the tenant default router.
//! - The path is the shortest hop path, preferring the default router on ties
//!   (see [`TopologySnapshot::shortest_path`]).
//! - A directive without a path is reported in [`CompiledTopology::warnings`]
//!   and contributes no entries. The compile itself never fails.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::domain::agent::AgentId;
use crate::domain::error::ControlPlaneError;
use crate::domain::router::{Router, RouterId, RouterRole, TopologySnapshot};
use crate::domain::tenant::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApplicationId(pub Uuid);

impl ApplicationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ApplicationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MicroserviceId(pub Uuid);

impl MicroserviceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MicroserviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MicroserviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A group of microservices deployed together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub tenant_id: TenantId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Microservice {
    pub id: MicroserviceId,
    pub tenant_id: TenantId,
    pub application_id: ApplicationId,
    pub name: String,
    /// Agent the microservice is placed on, if scheduled
    pub agent_id: Option<AgentId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDirective {
    /// Unique within the tenant
    pub name: String,
    pub tenant_id: TenantId,
    pub application_id: ApplicationId,
    pub source: MicroserviceId,
    pub destination: MicroserviceId,
    pub created_at: DateTime<Utc>,
}

impl RoutingDirective {
    /// Message address the routers use for this directive.
    pub fn address(&self) -> String {
        format!("{}/{}", self.application_id, self.name)
    }

    pub fn references(&self, microservice: MicroserviceId) -> bool {
        self.source == microservice || self.destination == microservice
    }
}

/// Position of a router on a directive's path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HopRole {
    /// Source and destination share the router.
    Local,
    /// First hop: the source microservice attaches here.
    Ingress,
    Transit,
    /// Last hop: the destination microservice attaches here.
    Egress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingEntry {
    pub directive: String,
    pub address: String,
    pub role: HopRole,
    pub source: MicroserviceId,
    pub destination: MicroserviceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_hop: Option<RouterId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_hop: Option<RouterId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListenerRole {
    Normal,
    InterRouter,
    Edge,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    pub role: ListenerRole,
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_profile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sasl_mechanisms: Option<String>,
    pub authenticate_peer: bool,
    pub require_ssl: bool,
}

/// Outgoing link from a router to one of its upstream routers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connector {
    pub name: String,
    pub upstream: RouterId,
    pub host: String,
    pub port: u16,
    pub role: ListenerRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_profile: Option<String>,
}

/// Everything one router process needs, as pushed to its agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    pub router_id: RouterId,
    pub agent_id: Option<AgentId>,
    pub mode: RouterRole,
    pub listeners: Vec<Listener>,
    pub connectors: Vec<Connector>,
    pub entries: Vec<RoutingEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnreachableReason {
    /// Both ends resolve to routers but no path joins them.
    NoPath,
    /// The tenant has no router to attach an endpoint to.
    NoRouter,
    /// An endpoint is not placed on any agent.
    UnplacedMicroservice,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreachableDirective {
    pub directive: String,
    pub reason: UnreachableReason,
}

impl UnreachableDirective {
    pub fn into_error(self) -> ControlPlaneError {
        ControlPlaneError::Unreachable {
            directive: self.directive,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledTopology {
    pub tenant_id: TenantId,
    pub routers: BTreeMap<RouterId, RouterConfig>,
    pub warnings: Vec<UnreachableDirective>,
}

impl CompiledTopology {
    pub fn for_agent(&self, agent_id: AgentId) -> Option<&RouterConfig> {
        self.routers.values().find(|c| c.agent_id == Some(agent_id))
    }

    /// Configurations that have an agent to be delivered to.
    pub fn agent_configs(&self) -> impl Iterator<Item = (AgentId, &RouterConfig)> {
        self.routers
            .values()
            .filter_map(|c| c.agent_id.map(|agent| (agent, c)))
    }

    pub fn is_unreachable(&self, directive: &str) -> bool {
        self.warnings.iter().any(|w| w.directive == directive)
    }
}

/// Compile directives against a topology snapshot.
pub fn compile(
    snapshot: &TopologySnapshot,
    directives: &[RoutingDirective],
    microservices: &BTreeMap<MicroserviceId, Microservice>,
) -> CompiledTopology {
    let mut routers: BTreeMap<RouterId, RouterConfig> = snapshot
        .routers
        .values()
        .map(|router| (router.id, base_config(snapshot, router)))
        .collect();
    let mut warnings = Vec::new();

    let mut ordered: Vec<&RoutingDirective> = directives.iter().collect();
    ordered.sort_by(|a, b| a.name.cmp(&b.name));

    for directive in ordered {
        let endpoints = resolve_router(snapshot, microservices, directive.source)
            .and_then(|from| Ok((from, resolve_router(snapshot, microservices, directive.destination)?)));
        let (from, to) = match endpoints {
            Ok(pair) => pair,
            Err(reason) => {
                warnings.push(UnreachableDirective {
                    directive: directive.name.clone(),
                    reason,
                });
                continue;
            }
        };

        let Some(path) = snapshot.shortest_path(from, to) else {
            warnings.push(UnreachableDirective {
                directive: directive.name.clone(),
                reason: UnreachableReason::NoPath,
            });
            continue;
        };

        let last = path.len() - 1;
        for (index, hop) in path.iter().enumerate() {
            let role = match (index, path.len()) {
                (_, 1) => HopRole::Local,
                (0, _) => HopRole::Ingress,
                (i, _) if i == last => HopRole::Egress,
                _ => HopRole::Transit,
            };
            let entry = RoutingEntry {
                directive: directive.name.clone(),
                address: directive.address(),
                role,
                source: directive.source,
                destination: directive.destination,
                previous_hop: index.checked_sub(1).map(|i| path[i]),
                next_hop: path.get(index + 1).copied(),
            };
            if let Some(config) = routers.get_mut(hop) {
                config.entries.push(entry);
            }
        }
    }

    CompiledTopology {
        tenant_id: snapshot.tenant_id,
        routers,
        warnings,
    }
}

fn resolve_router(
    snapshot: &TopologySnapshot,
    microservices: &BTreeMap<MicroserviceId, Microservice>,
    id: MicroserviceId,
) -> Result<RouterId, UnreachableReason> {
    let agent = microservices
        .get(&id)
        .and_then(|ms| ms.agent_id)
        .ok_or(UnreachableReason::UnplacedMicroservice)?;
    snapshot
        .router_for_agent(agent)
        .or_else(|| snapshot.default_router())
        .map(|r| r.id)
        .ok_or(UnreachableReason::NoRouter)
}

fn base_config(snapshot: &TopologySnapshot, router: &Router) -> RouterConfig {
    let listener = |role, port| Listener {
        role,
        host: router.host.clone(),
        port,
        ssl_profile: router.tls.ssl_profile.clone(),
        sasl_mechanisms: router.tls.sasl_mechanisms.clone(),
        authenticate_peer: router.tls.authenticate_peer,
        require_ssl: router.tls.require_ssl,
    };

    let mut listeners = vec![listener(ListenerRole::Normal, router.ports.messaging_port)];
    if router.role == RouterRole::Interior {
        if let Some(port) = router.ports.inter_router_port {
            listeners.push(listener(ListenerRole::InterRouter, port));
        }
        if let Some(port) = router.ports.edge_router_port {
            listeners.push(listener(ListenerRole::Edge, port));
        }
    }

    let connectors = snapshot
        .upstreams(router.id)
        .into_iter()
        .filter_map(|upstream| {
            let (role, port) = match router.role {
                RouterRole::Edge => (ListenerRole::Edge, upstream.ports.edge_router_port?),
                RouterRole::Interior => (ListenerRole::InterRouter, upstream.ports.inter_router_port?),
            };
            Some(Connector {
                name: format!("uplink-{}", upstream.id),
                upstream: upstream.id,
                host: upstream.host.clone(),
                port,
                role,
                ssl_profile: router.tls.ssl_profile.clone(),
            })
        })
        .collect();

    RouterConfig {
        router_id: router.id,
        agent_id: router.agent_id,
        mode: router.role,
        listeners,
        connectors,
        entries: Vec::new(),
    }
}
