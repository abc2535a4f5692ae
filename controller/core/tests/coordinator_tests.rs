// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Coordinator tests: configuration push on change, agent removal cascade,
//! agent config fetch, domain events and the replay sweeper.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fog_controller::application::coordinator::ControlPlaneCoordinator;
use fog_controller::application::repository_factory::Repositories;
use fog_controller::domain::agent::AgentId;
use fog_controller::domain::clock::ManualClock;
use fog_controller::domain::config::ControllerConfigSpec;
use fog_controller::domain::credential::KeyMaterial;
use fog_controller::domain::delivery::ConfigPublisher;
use fog_controller::domain::error::ControlPlaneError;
use fog_controller::domain::events::{TopologyEvent, TrustEvent};
use fog_controller::domain::router::{RouterPorts, RouterSpec};
use fog_controller::domain::routing::RouterConfig;
use fog_controller::domain::tenant::TenantId;
use fog_controller::infrastructure::delivery::InMemoryConfigPublisher;
use fog_controller::infrastructure::event_bus::{DomainEvent, EventBus};

struct Harness {
    c: ControlPlaneCoordinator,
    publisher: InMemoryConfigPublisher,
    clock: Arc<ManualClock>,
    tenant: TenantId,
}

fn harness() -> Harness {
    let publisher = InMemoryConfigPublisher::new();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let c = ControlPlaneCoordinator::new(
        &ControllerConfigSpec::default(),
        Repositories::in_memory(),
        Arc::new(publisher.clone()),
        EventBus::with_default_capacity(),
        clock.clone(),
    );
    Harness {
        c,
        publisher,
        clock,
        tenant: TenantId::new(),
    }
}

async fn register(h: &Harness, name: &str, byte: u8) -> AgentId {
    h.c.register_agent(h.tenant, name, KeyMaterial::new(vec![byte; 32]).unwrap())
        .await
        .unwrap()
        .id
}

fn hub_spec(agent: AgentId) -> RouterSpec {
    RouterSpec::interior("hub.local", RouterPorts::interior(5672, 56721, 56722)).on_agent(agent)
}

/// Publisher that fails until told otherwise.
#[derive(Default)]
struct FlakyPublisher {
    healthy: AtomicBool,
    inner: InMemoryConfigPublisher,
}

#[async_trait]
impl ConfigPublisher for FlakyPublisher {
    async fn publish(&self, agent_id: AgentId, config: &RouterConfig) -> anyhow::Result<()> {
        if !self.healthy.load(Ordering::SeqCst) {
            anyhow::bail!("agent {} unreachable", agent_id);
        }
        self.inner.publish(agent_id, config).await
    }
}

#[tokio::test]
async fn test_config_is_pushed_only_when_changed() {
    let h = harness();
    let hub_agent = register(&h, "hub", 1).await;
    let edge_agent = register(&h, "edge-01", 2).await;

    let hub = h.c.create_router(h.tenant, hub_spec(hub_agent)).await.unwrap();
    assert_eq!(h.publisher.push_count(), 1);

    h.c.create_router(h.tenant, RouterSpec::edge("edge.local", 5672).on_agent(edge_agent))
        .await
        .unwrap();
    // The hub's config is unchanged by an edge attaching; only the edge is new.
    assert_eq!(h.publisher.push_count(), 2);
    let edge_config = h.publisher.take(edge_agent).unwrap();
    assert_eq!(edge_config.connectors[0].upstream, hub.id);

    h.c.compile_topology(h.tenant).await.unwrap();
    assert_eq!(h.publisher.push_count(), 2);
    assert!(h.publisher.take(edge_agent).is_none());
    assert!(h.publisher.latest(hub_agent).is_some());
}

#[tokio::test]
async fn test_failed_push_is_retried_on_next_compile() {
    let publisher = Arc::new(FlakyPublisher::default());
    let c = ControlPlaneCoordinator::new(
        &ControllerConfigSpec::default(),
        Repositories::in_memory(),
        publisher.clone(),
        EventBus::with_default_capacity(),
        Arc::new(ManualClock::new(Utc::now())),
    );
    let tenant = TenantId::new();
    let agent = c
        .register_agent(tenant, "hub", KeyMaterial::new(vec![1u8; 32]).unwrap())
        .await
        .unwrap();

    // The mutation succeeds even though delivery fails.
    c.create_router(tenant, hub_spec(agent.id)).await.unwrap();
    assert!(publisher.inner.latest(agent.id).is_none());

    publisher.healthy.store(true, Ordering::SeqCst);
    c.compile_topology(tenant).await.unwrap();
    assert!(publisher.inner.latest(agent.id).is_some());
    assert_eq!(publisher.inner.push_count(), 1);
}

#[tokio::test]
async fn test_fetch_agent_config_requires_valid_token() {
    let h = harness();
    let hub_agent = register(&h, "hub", 1).await;
    let bare_agent = register(&h, "edge-01", 2).await;
    let hub = h.c.create_router(h.tenant, hub_spec(hub_agent)).await.unwrap();

    let token = h.c.issue_token(hub_agent).await.unwrap();
    let config = h.c.fetch_agent_config(&token.value).await.unwrap();
    assert_eq!(config.router_id, hub.id);

    let replay = h.c.fetch_agent_config(&token.value).await;
    assert!(matches!(replay, Err(ControlPlaneError::AlreadyUsed(_))));

    let token = h.c.issue_token(bare_agent).await.unwrap();
    let missing = h.c.fetch_agent_config(&token.value).await;
    assert!(matches!(missing, Err(ControlPlaneError::NotFound { entity: "router config", .. })));
}

#[tokio::test]
async fn test_remove_agent_cascades() {
    let h = harness();
    let hub_agent = register(&h, "hub", 1).await;
    let edge_agent = register(&h, "edge-01", 2).await;
    h.c.create_router(h.tenant, hub_spec(hub_agent)).await.unwrap();
    let edge = h
        .c
        .create_router(h.tenant, RouterSpec::edge("edge.local", 5672).on_agent(edge_agent))
        .await
        .unwrap();

    let app = h.c.create_application(h.tenant, "telemetry").await.unwrap();
    let sensor = h.c.register_microservice(h.tenant, app.id, "sensor", Some(edge_agent)).await.unwrap();
    let sink = h.c.register_microservice(h.tenant, app.id, "sink", Some(hub_agent)).await.unwrap();
    h.c.declare_routing(h.tenant, app.id, "readings", sensor.id, sink.id).await.unwrap();
    let token = h.c.issue_token(edge_agent).await.unwrap();

    h.c.remove_agent(edge_agent).await.unwrap();

    let agent = h.c.agent(edge_agent).await;
    assert!(matches!(agent, Err(ControlPlaneError::NotFound { entity: "agent", .. })));

    let snapshot = h.c.topology(h.tenant).await.unwrap();
    assert!(!snapshot.routers.contains_key(&edge.id));
    assert!(snapshot.connections.is_empty());

    let gone = h.c.remove_routing(h.tenant, "readings").await;
    assert!(matches!(gone, Err(ControlPlaneError::NotFound { .. })));

    let verify = h.c.verify_token(&token.value).await;
    assert!(matches!(verify, Err(ControlPlaneError::InvalidSignature)));
}

#[tokio::test]
async fn test_remove_agent_hosting_default_router_is_refused() {
    let h = harness();
    let hub_agent = register(&h, "hub", 1).await;
    let edge_agent = register(&h, "edge-01", 2).await;
    let hub = h.c.create_router(h.tenant, hub_spec(hub_agent)).await.unwrap();
    h.c.create_router(h.tenant, RouterSpec::edge("edge.local", 5672).on_agent(edge_agent))
        .await
        .unwrap();

    let result = h.c.remove_agent(hub_agent).await;
    assert!(matches!(result, Err(ControlPlaneError::HasDependents(id)) if id == hub.id));

    assert!(h.c.agent(hub_agent).await.is_ok());
    assert!(h.c.topology(h.tenant).await.unwrap().routers.contains_key(&hub.id));
}

#[tokio::test]
async fn test_microservice_placement_requires_tenant_agent() {
    let h = harness();
    let app = h.c.create_application(h.tenant, "telemetry").await.unwrap();
    let foreign = h
        .c
        .register_agent(TenantId::new(), "elsewhere", KeyMaterial::new(vec![9u8; 32]).unwrap())
        .await
        .unwrap();

    let result = h.c.register_microservice(h.tenant, app.id, "sensor", Some(foreign.id)).await;
    assert!(matches!(result, Err(ControlPlaneError::NotFound { entity: "agent", .. })));

    let duplicate = h.c.create_application(h.tenant, "telemetry").await;
    assert!(matches!(duplicate, Err(ControlPlaneError::DuplicateName(_))));
}

#[tokio::test]
async fn test_events_are_published() {
    let h = harness();
    let mut events = h.c.event_bus().subscribe();
    let agent = register(&h, "hub", 1).await;
    h.c.create_router(h.tenant, hub_spec(agent)).await.unwrap();

    let mut registered = false;
    let mut compiled = false;
    while let Ok(event) = events.try_recv() {
        match event {
            DomainEvent::Trust(TrustEvent::AgentRegistered { agent_id, .. }) => registered = agent_id == agent,
            DomainEvent::Topology(TopologyEvent::TopologyCompiled {
                router_count,
                pushed_agents,
                ..
            }) => {
                compiled = router_count == 1 && pushed_agents == 1;
            }
            _ => {}
        }
    }
    assert!(registered);
    assert!(compiled);
}

#[tokio::test]
async fn test_sweeper_removes_expired_records() {
    let h = harness();
    let agent = register(&h, "edge-01", 1).await;
    let used = h.c.issue_token(agent).await.unwrap();
    h.c.issue_token(agent).await.unwrap();
    h.c.verify_token(&used.value).await.unwrap();
    assert_eq!(h.c.outstanding_tokens(agent).await.unwrap().len(), 2);

    let sweeper = h.c.sweeper();
    let report = sweeper.sweep_once().await.unwrap();
    assert_eq!(report.used_tokens, 0);
    assert_eq!(report.access_tokens, 0);

    h.clock.advance(Duration::hours(1));
    let report = sweeper.sweep_once().await.unwrap();
    assert_eq!(report.used_tokens, 1);
    assert_eq!(report.access_tokens, 2);
    assert!(h.c.outstanding_tokens(agent).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sweeper_stops_on_shutdown() {
    let h = harness();
    let sweeper = Arc::new(h.c.sweeper());
    let shutdown = sweeper.shutdown_token();

    let handle = sweeper.start();
    shutdown.cancel();

    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .expect("sweeper did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_tenant_lock_is_released_once_tenant_is_empty() {
    let h = harness();
    let hub_agent = register(&h, "hub", 1).await;
    let edge_agent = register(&h, "edge-01", 2).await;
    let hub = h.c.create_router(h.tenant, hub_spec(hub_agent)).await.unwrap();
    assert_eq!(h.c.tracked_tenants(), 1);

    h.c.remove_agent(edge_agent).await.unwrap();
    assert_eq!(h.c.tracked_tenants(), 1);

    h.c.remove_router(h.tenant, hub.id).await.unwrap();
    assert_eq!(h.c.tracked_tenants(), 1);

    h.c.remove_agent(hub_agent).await.unwrap();
    assert_eq!(h.c.tracked_tenants(), 0);

    // The tenant is usable again afterwards.
    let agent = register(&h, "hub", 3).await;
    h.c.create_router(h.tenant, hub_spec(agent)).await.unwrap();
    assert_eq!(h.c.tracked_tenants(), 1);

    let other = TenantId::new();
    let router = h
        .c
        .create_router(other, RouterSpec::interior("solo.local", RouterPorts::interior(5672, 56721, 56722)))
        .await
        .unwrap();
    assert_eq!(h.c.tracked_tenants(), 2);
    h.c.remove_router(other, router.id).await.unwrap();
    assert_eq!(h.c.tracked_tenants(), 1);
}
