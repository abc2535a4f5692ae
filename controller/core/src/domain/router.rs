// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Router Graph
//!
//! Routers are the message-routing processes of the mesh; router connections
//! are directed edges from a router to one of its upstream routers. The graph
//! is kept as an explicit adjacency structure, independent of the agent
//! lifecycle, so routers can be rewired without touching agents.
//!
//! ## Router Lifecycle
//!
//! ```text
//! Created ──(reachable from the default router)──▶ Active ──(removed)──▶ Deleted
//! ```
//!
//! No back-transitions: an active router that loses its path stays `Active`
//! and is reported by [`TopologySnapshot::unreachable_routers`].
//!
//! ## Invariants
//!
//! - At most one default router per tenant, and exactly one while any router exists.
//! - Connections only join routers of the same tenant, never a router to itself,
//!   and never twice in the same direction.
//! - Upstream routers are interior routers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use uuid::Uuid;

use crate::domain::agent::AgentId;
use crate::domain::tenant::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RouterId(pub Uuid);

impl RouterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for RouterId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RouterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterRole {
    /// Serves local clients only and attaches to an interior router.
    Edge,
    /// Accepts inter-router and edge connections.
    Interior,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterState {
    Created,
    Active,
    Deleted,
}

/// Listening ports of a router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterPorts {
    /// Agent-facing AMQP port
    pub messaging_port: u16,
    /// Inter-router listener (interior routers only)
    pub inter_router_port: Option<u16>,
    /// Listener for edge routers attaching upstream (interior routers only)
    pub edge_router_port: Option<u16>,
}

impl RouterPorts {
    pub fn edge(messaging_port: u16) -> Self {
        Self {
            messaging_port,
            inter_router_port: None,
            edge_router_port: None,
        }
    }

    pub fn interior(messaging_port: u16, inter_router_port: u16, edge_router_port: u16) -> Self {
        Self {
            messaging_port,
            inter_router_port: Some(inter_router_port),
            edge_router_port: Some(edge_router_port),
        }
    }

    /// Check the ports fit the router role.
    pub fn validate(&self, role: RouterRole) -> Result<(), String> {
        if self.messaging_port == 0 {
            return Err("messaging port must be non-zero".to_string());
        }
        match role {
            RouterRole::Interior => {
                let inter = self.inter_router_port.ok_or("interior router requires an inter-router port")?;
                let edge = self.edge_router_port.ok_or("interior router requires an edge-router port")?;
                let mut seen = BTreeSet::new();
                for port in [self.messaging_port, inter, edge] {
                    if port == 0 {
                        return Err("ports must be non-zero".to_string());
                    }
                    if !seen.insert(port) {
                        return Err(format!("port {} is assigned twice", port));
                    }
                }
                Ok(())
            }
            RouterRole::Edge => {
                if self.inter_router_port.is_some() || self.edge_router_port.is_some() {
                    return Err("edge router only listens on its messaging port".to_string());
                }
                Ok(())
            }
        }
    }
}

/// TLS and SASL settings of a router's listeners.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    pub require_ssl: bool,
    /// Name of the SSL profile the router process loads
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_profile: Option<String>,
    /// SASL mechanisms, space separated (e.g. "EXTERNAL")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sasl_mechanisms: Option<String>,
    #[serde(default)]
    pub authenticate_peer: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_cert: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_key: Option<String>,
}

impl TlsConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.require_ssl && self.ssl_profile.is_none() {
            return Err("require_ssl needs an ssl_profile".to_string());
        }
        if self.ssl_profile.is_some() && (self.tls_cert.is_none() || self.tls_key.is_none()) {
            return Err("an ssl_profile needs both tls_cert and tls_key references".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Router {
    pub id: RouterId,
    pub tenant_id: TenantId,
    pub agent_id: Option<AgentId>,
    pub role: RouterRole,
    pub host: String,
    pub ports: RouterPorts,
    pub tls: TlsConfig,
    pub is_default: bool,
    pub state: RouterState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Router {
    /// Promote `Created` to `Active`. Returns true if the state changed.
    pub fn activate(&mut self, now: DateTime<Utc>) -> bool {
        if self.state == RouterState::Created {
            self.state = RouterState::Active;
            self.updated_at = now;
            return true;
        }
        false
    }

    pub fn is_interior(&self) -> bool {
        self.role == RouterRole::Interior
    }
}

/// Input for creating a router.
#[derive(Debug, Clone)]
pub struct RouterSpec {
    pub agent_id: Option<AgentId>,
    pub role: RouterRole,
    pub host: String,
    pub ports: RouterPorts,
    pub tls: TlsConfig,
    pub is_default: bool,
    /// Demote the current default instead of failing with `DefaultExists`
    pub replace_default: bool,
    /// Leave the router unconnected instead of attaching it to the default router
    pub standalone: bool,
    pub upstream_routers: Vec<RouterId>,
}

impl RouterSpec {
    pub fn interior(host: impl Into<String>, ports: RouterPorts) -> Self {
        Self {
            agent_id: None,
            role: RouterRole::Interior,
            host: host.into(),
            ports,
            tls: TlsConfig::default(),
            is_default: false,
            replace_default: false,
            standalone: false,
            upstream_routers: Vec::new(),
        }
    }

    pub fn edge(host: impl Into<String>, messaging_port: u16) -> Self {
        Self {
            role: RouterRole::Edge,
            ..Self::interior(host, RouterPorts::edge(messaging_port))
        }
    }

    pub fn on_agent(mut self, agent_id: AgentId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn with_upstreams(mut self, upstreams: Vec<RouterId>) -> Self {
        self.upstream_routers = upstreams;
        self
    }
}

/// Partial update of a router's network settings.
#[derive(Debug, Clone, Default)]
pub struct RouterUpdate {
    pub host: Option<String>,
    pub ports: Option<RouterPorts>,
    pub tls: Option<TlsConfig>,
}

/// Directed edge: `source` attaches to its upstream `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConnection {
    pub tenant_id: TenantId,
    pub source: RouterId,
    pub target: RouterId,
    pub created_at: DateTime<Utc>,
}

impl RouterConnection {
    pub fn touches(&self, router: RouterId) -> bool {
        self.source == router || self.target == router
    }
}

/// Owned, point-in-time view of one tenant's router graph.
///
/// Links carry traffic in both directions once established, so path queries
/// treat connections as undirected. Neighbours are visited in id order, which
/// makes every query deterministic.
#[derive(Debug, Clone)]
pub struct TopologySnapshot {
    pub tenant_id: TenantId,
    pub routers: BTreeMap<RouterId, Router>,
    pub connections: Vec<RouterConnection>,
    adjacency: BTreeMap<RouterId, BTreeSet<RouterId>>,
}

impl TopologySnapshot {
    pub fn new(tenant_id: TenantId, routers: Vec<Router>, mut connections: Vec<RouterConnection>) -> Self {
        let routers: BTreeMap<RouterId, Router> = routers.into_iter().map(|r| (r.id, r)).collect();
        connections.sort_by(|a, b| (a.source, a.target).cmp(&(b.source, b.target)));

        let mut adjacency: BTreeMap<RouterId, BTreeSet<RouterId>> =
            routers.keys().map(|id| (*id, BTreeSet::new())).collect();
        for conn in &connections {
            if !routers.contains_key(&conn.source) || !routers.contains_key(&conn.target) {
                continue;
            }
            adjacency.entry(conn.source).or_default().insert(conn.target);
            adjacency.entry(conn.target).or_default().insert(conn.source);
        }

        Self {
            tenant_id,
            routers,
            connections,
            adjacency,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.routers.is_empty()
    }

    pub fn default_router(&self) -> Option<&Router> {
        self.routers.values().find(|r| r.is_default)
    }

    pub fn router_for_agent(&self, agent_id: AgentId) -> Option<&Router> {
        self.routers.values().find(|r| r.agent_id == Some(agent_id))
    }

    /// Upstream routers of `router`, in id order.
    pub fn upstreams(&self, router: RouterId) -> Vec<&Router> {
        self.connections
            .iter()
            .filter(|c| c.source == router)
            .filter_map(|c| self.routers.get(&c.target))
            .collect()
    }

    /// Routers reachable from `start` over zero or more hops.
    pub fn reachable_from(&self, start: RouterId) -> BTreeSet<RouterId> {
        self.distances(start).into_keys().collect()
    }

    /// Routers that cannot be reached from the default router.
    ///
    /// Every router is unreachable when the tenant has no default router.
    pub fn unreachable_routers(&self) -> Vec<RouterId> {
        let reachable = self
            .default_router()
            .map(|d| self.reachable_from(d.id))
            .unwrap_or_default();
        self.routers
            .keys()
            .filter(|id| !reachable.contains(id))
            .copied()
            .collect()
    }

    pub fn is_connected(&self) -> bool {
        self.unreachable_routers().is_empty()
    }

    /// Shortest hop-count path from `from` to `to`, both ends included.
    ///
    /// Among equally short paths, one through the tenant's default router wins.
    pub fn shortest_path(&self, from: RouterId, to: RouterId) -> Option<Vec<RouterId>> {
        if !self.routers.contains_key(&from) || !self.routers.contains_key(&to) {
            return None;
        }
        if from == to {
            return Some(vec![from]);
        }

        let from_dist = self.distances(from);
        let total = *from_dist.get(&to)?;

        if let Some(default) = self.default_router().map(|r| r.id) {
            if default != from && default != to {
                let to_dist = self.distances(to);
                if let (Some(a), Some(b)) = (from_dist.get(&default), to_dist.get(&default)) {
                    if a + b == total {
                        let mut path = self.bfs_path(from, default)?;
                        let tail = self.bfs_path(default, to)?;
                        path.extend(tail.into_iter().skip(1));
                        return Some(path);
                    }
                }
            }
        }

        self.bfs_path(from, to)
    }

    fn distances(&self, start: RouterId) -> BTreeMap<RouterId, usize> {
        let mut dist = BTreeMap::new();
        if !self.routers.contains_key(&start) {
            return dist;
        }
        let mut queue = VecDeque::from([start]);
        dist.insert(start, 0usize);
        while let Some(current) = queue.pop_front() {
            let next = dist[&current] + 1;
            for neighbour in self.adjacency.get(&current).into_iter().flatten() {
                if !dist.contains_key(neighbour) {
                    dist.insert(*neighbour, next);
                    queue.push_back(*neighbour);
                }
            }
        }
        dist
    }

    fn bfs_path(&self, from: RouterId, to: RouterId) -> Option<Vec<RouterId>> {
        let mut parent: BTreeMap<RouterId, RouterId> = BTreeMap::new();
        let mut visited = BTreeSet::from([from]);
        let mut queue = VecDeque::from([from]);

        while let Some(current) = queue.pop_front() {
            if current == to {
                let mut path = vec![to];
                let mut cursor = to;
                while let Some(prev) = parent.get(&cursor) {
                    path.push(*prev);
                    cursor = *prev;
                }
                path.reverse();
                return Some(path);
            }
            for neighbour in self.adjacency.get(&current).into_iter().flatten() {
                if visited.insert(*neighbour) {
                    parent.insert(*neighbour, current);
                    queue.push_back(*neighbour);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router(tenant: TenantId, id: u128, is_default: bool) -> Router {
        let now = Utc::now();
        Router {
            id: RouterId(Uuid::from_u128(id)),
            tenant_id: tenant,
            agent_id: None,
            role: RouterRole::Interior,
            host: format!("router-{}", id),
            ports: RouterPorts::interior(5672, 56721, 56722),
            tls: TlsConfig::default(),
            is_default,
            state: RouterState::Created,
            created_at: now,
            updated_at: now,
        }
    }

    fn conn(tenant: TenantId, source: u128, target: u128) -> RouterConnection {
        RouterConnection {
            tenant_id: tenant,
            source: RouterId(Uuid::from_u128(source)),
            target: RouterId(Uuid::from_u128(target)),
            created_at: Utc::now(),
        }
    }

    fn rid(id: u128) -> RouterId {
        RouterId(Uuid::from_u128(id))
    }

    #[test]
    fn interior_ports_must_be_distinct() {
        let ports = RouterPorts::interior(5672, 5672, 56722);
        assert!(ports.validate(RouterRole::Interior).is_err());
        assert!(RouterPorts::interior(5672, 56721, 56722).validate(RouterRole::Interior).is_ok());
        assert!(RouterPorts::edge(5672).validate(RouterRole::Interior).is_err());
        assert!(RouterPorts::edge(5672).validate(RouterRole::Edge).is_ok());
    }

    #[test]
    fn tls_profile_requires_certificates() {
        let tls = TlsConfig {
            require_ssl: true,
            ssl_profile: Some("mesh".to_string()),
            ..Default::default()
        };
        assert!(tls.validate().is_err());
    }

    #[test]
    fn equal_length_paths_prefer_the_default_router() {
        // 1 -> {2 (default), 3} -> 4 : two paths of two hops each.
        let tenant = TenantId::new();
        let snapshot = TopologySnapshot::new(
            tenant,
            vec![
                router(tenant, 1, false),
                router(tenant, 2, false),
                router(tenant, 3, true),
                router(tenant, 4, false),
            ],
            vec![conn(tenant, 1, 2), conn(tenant, 1, 3), conn(tenant, 4, 2), conn(tenant, 4, 3)],
        );

        let path = snapshot.shortest_path(rid(1), rid(4)).unwrap();
        assert_eq!(path, vec![rid(1), rid(3), rid(4)]);
    }

    #[test]
    fn shorter_path_wins_over_default_router() {
        let tenant = TenantId::new();
        let snapshot = TopologySnapshot::new(
            tenant,
            vec![
                router(tenant, 1, false),
                router(tenant, 2, true),
                router(tenant, 3, false),
                router(tenant, 4, false),
            ],
            vec![conn(tenant, 1, 4), conn(tenant, 1, 2), conn(tenant, 2, 3), conn(tenant, 3, 4)],
        );

        assert_eq!(snapshot.shortest_path(rid(1), rid(4)).unwrap(), vec![rid(1), rid(4)]);
    }

    #[test]
    fn unreachable_routers_are_reported() {
        let tenant = TenantId::new();
        let snapshot = TopologySnapshot::new(
            tenant,
            vec![router(tenant, 1, true), router(tenant, 2, false), router(tenant, 3, false)],
            vec![conn(tenant, 2, 1)],
        );

        assert_eq!(snapshot.unreachable_routers(), vec![rid(3)]);
        assert!(!snapshot.is_connected());
        assert!(snapshot.shortest_path(rid(2), rid(3)).is_none());
        assert_eq!(snapshot.shortest_path(rid(3), rid(3)).unwrap(), vec![rid(3)]);
    }
}
