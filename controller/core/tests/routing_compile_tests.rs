// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Routing directive compilation against a hub-and-spoke topology:
//! one interior default router with two edge routers attached.

use std::sync::Arc;

use fog_controller::application::coordinator::ControlPlaneCoordinator;
use fog_controller::application::repository_factory::Repositories;
use fog_controller::domain::agent::AgentId;
use fog_controller::domain::clock::SystemClock;
use fog_controller::domain::config::ControllerConfigSpec;
use fog_controller::domain::credential::KeyMaterial;
use fog_controller::domain::error::ControlPlaneError;
use fog_controller::domain::router::{RouterId, RouterPorts, RouterSpec};
use fog_controller::domain::routing::{ApplicationId, HopRole, ListenerRole, MicroserviceId};
use fog_controller::domain::tenant::TenantId;
use fog_controller::infrastructure::delivery::InMemoryConfigPublisher;
use fog_controller::infrastructure::event_bus::EventBus;

struct Mesh {
    c: ControlPlaneCoordinator,
    tenant: TenantId,
    hub: RouterId,
    r1: RouterId,
    r2: RouterId,
    a1: AgentId,
    a2: AgentId,
    app: ApplicationId,
    sensor: MicroserviceId,
    sink: MicroserviceId,
}

async fn register(c: &ControlPlaneCoordinator, tenant: TenantId, name: &str, byte: u8) -> AgentId {
    c.register_agent(tenant, name, KeyMaterial::new(vec![byte; 32]).unwrap())
        .await
        .unwrap()
        .id
}

async fn mesh() -> Mesh {
    let c = ControlPlaneCoordinator::new(
        &ControllerConfigSpec::default(),
        Repositories::in_memory(),
        Arc::new(InMemoryConfigPublisher::new()),
        EventBus::with_default_capacity(),
        Arc::new(SystemClock),
    );
    let tenant = TenantId::new();
    let a0 = register(&c, tenant, "hub", 1).await;
    let a1 = register(&c, tenant, "edge-01", 2).await;
    let a2 = register(&c, tenant, "edge-02", 3).await;

    let hub = c
        .create_router(
            tenant,
            RouterSpec::interior("hub.local", RouterPorts::interior(5672, 56721, 56722)).on_agent(a0),
        )
        .await
        .unwrap()
        .id;
    let r1 = c
        .create_router(tenant, RouterSpec::edge("edge-01.local", 5672).on_agent(a1))
        .await
        .unwrap()
        .id;
    let r2 = c
        .create_router(tenant, RouterSpec::edge("edge-02.local", 5672).on_agent(a2))
        .await
        .unwrap()
        .id;

    let app = c.create_application(tenant, "telemetry").await.unwrap().id;
    let sensor = c.register_microservice(tenant, app, "sensor", Some(a1)).await.unwrap().id;
    let sink = c.register_microservice(tenant, app, "sink", Some(a2)).await.unwrap().id;

    Mesh {
        c,
        tenant,
        hub,
        r1,
        r2,
        a1,
        a2,
        app,
        sensor,
        sink,
    }
}

#[tokio::test]
async fn test_directive_crosses_hub_between_edges() {
    let m = mesh().await;
    m.c.declare_routing(m.tenant, m.app, "readings", m.sensor, m.sink).await.unwrap();

    let compiled = m.c.compile_topology(m.tenant).await.unwrap();
    assert!(compiled.warnings.is_empty());

    let ingress = &compiled.routers[&m.r1].entries;
    assert_eq!(ingress.len(), 1);
    assert_eq!(ingress[0].role, HopRole::Ingress);
    assert_eq!(ingress[0].next_hop, Some(m.hub));
    assert_eq!(ingress[0].address, format!("{}/readings", m.app));

    let transit = &compiled.routers[&m.hub].entries;
    assert_eq!(transit[0].role, HopRole::Transit);
    assert_eq!(transit[0].previous_hop, Some(m.r1));
    assert_eq!(transit[0].next_hop, Some(m.r2));

    let egress = &compiled.routers[&m.r2].entries;
    assert_eq!(egress[0].role, HopRole::Egress);
    assert_eq!(egress[0].next_hop, None);
}

#[tokio::test]
async fn test_listeners_and_connectors_follow_router_role() {
    let m = mesh().await;
    let compiled = m.c.compile_topology(m.tenant).await.unwrap();

    let hub = &compiled.routers[&m.hub];
    let roles: Vec<ListenerRole> = hub.listeners.iter().map(|l| l.role).collect();
    assert_eq!(roles, vec![ListenerRole::Normal, ListenerRole::InterRouter, ListenerRole::Edge]);
    assert!(hub.connectors.is_empty());

    let edge = compiled.for_agent(m.a1).unwrap();
    assert_eq!(edge.router_id, m.r1);
    assert_eq!(edge.listeners.len(), 1);
    assert_eq!(edge.connectors.len(), 1);
    assert_eq!(edge.connectors[0].upstream, m.hub);
    assert_eq!(edge.connectors[0].host, "hub.local");
    assert_eq!(edge.connectors[0].port, 56722);
    assert_eq!(edge.connectors[0].role, ListenerRole::Edge);
}

#[tokio::test]
async fn test_disconnect_makes_directive_unreachable() {
    let m = mesh().await;
    m.c.declare_routing(m.tenant, m.app, "readings", m.sensor, m.sink).await.unwrap();

    m.c.disconnect_routers(m.tenant, m.r2, m.hub).await.unwrap();
    let compiled = m.c.compile_topology(m.tenant).await.unwrap();

    assert!(compiled.is_unreachable("readings"));
    assert!(compiled.routers.values().all(|config| config.entries.is_empty()));
    let error = compiled.warnings[0].clone().into_error();
    assert!(matches!(error, ControlPlaneError::Unreachable { ref directive } if directive == "readings"));

    m.c.connect_routers(m.tenant, m.r2, m.hub).await.unwrap();
    let compiled = m.c.compile_topology(m.tenant).await.unwrap();
    assert!(!compiled.is_unreachable("readings"));
}

#[tokio::test]
async fn test_colocated_microservices_route_locally() {
    let m = mesh().await;
    let local = m.c.register_microservice(m.tenant, m.app, "buffer", Some(m.a1)).await.unwrap();
    m.c.declare_routing(m.tenant, m.app, "buffered", m.sensor, local.id).await.unwrap();

    let compiled = m.c.compile_topology(m.tenant).await.unwrap();
    let entries = &compiled.routers[&m.r1].entries;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].role, HopRole::Local);
    assert!(compiled.routers[&m.hub].entries.is_empty());
}

#[tokio::test]
async fn test_agent_without_router_uses_default_router() {
    let m = mesh().await;
    let a3 = register(&m.c, m.tenant, "edge-03", 4).await;
    let remote = m.c.register_microservice(m.tenant, m.app, "archiver", Some(a3)).await.unwrap();
    m.c.declare_routing(m.tenant, m.app, "archive", m.sensor, remote.id).await.unwrap();

    let compiled = m.c.compile_topology(m.tenant).await.unwrap();
    let egress = &compiled.routers[&m.hub].entries;
    assert_eq!(egress.len(), 1);
    assert_eq!(egress[0].role, HopRole::Egress);
    assert_eq!(egress[0].previous_hop, Some(m.r1));
}

#[tokio::test]
async fn test_declare_validation() {
    let m = mesh().await;
    m.c.declare_routing(m.tenant, m.app, "readings", m.sensor, m.sink).await.unwrap();

    let duplicate = m.c.declare_routing(m.tenant, m.app, "readings", m.sink, m.sensor).await;
    assert!(matches!(duplicate, Err(ControlPlaneError::DuplicateName(ref name)) if name == "readings"));

    let unplaced = m.c.register_microservice(m.tenant, m.app, "pending", None).await.unwrap();
    let result = m.c.declare_routing(m.tenant, m.app, "pending", m.sensor, unplaced.id).await;
    assert!(matches!(result, Err(ControlPlaneError::UnknownMicroservice(id)) if id == unplaced.id));

    let unknown = MicroserviceId::new();
    let result = m.c.declare_routing(m.tenant, m.app, "ghost", unknown, m.sink).await;
    assert!(matches!(result, Err(ControlPlaneError::UnknownMicroservice(_))));
}

#[tokio::test]
async fn test_removing_microservice_drops_its_directives() {
    let m = mesh().await;
    m.c.declare_routing(m.tenant, m.app, "readings", m.sensor, m.sink).await.unwrap();
    m.c.declare_routing(m.tenant, m.app, "acks", m.sink, m.sensor).await.unwrap();

    let mut removed = m.c.remove_microservice(m.tenant, m.sink).await.unwrap();
    removed.sort();
    assert_eq!(removed, vec!["acks".to_string(), "readings".to_string()]);

    let compiled = m.c.compile_topology(m.tenant).await.unwrap();
    assert!(compiled.warnings.is_empty());
    assert!(compiled.routers.values().all(|config| config.entries.is_empty()));

    let gone = m.c.remove_routing(m.tenant, "readings").await;
    assert!(matches!(gone, Err(ControlPlaneError::NotFound { .. })));
}

#[tokio::test]
async fn test_compile_is_deterministic() {
    let m = mesh().await;
    m.c.declare_routing(m.tenant, m.app, "b-readings", m.sensor, m.sink).await.unwrap();
    m.c.declare_routing(m.tenant, m.app, "a-acks", m.sink, m.sensor).await.unwrap();

    let first = m.c.compile_topology(m.tenant).await.unwrap();
    let second = m.c.compile_topology(m.tenant).await.unwrap();
    assert_eq!(first, second);

    let names: Vec<&str> = first.routers[&m.hub].entries.iter().map(|e| e.directive.as_str()).collect();
    assert_eq!(names, vec!["a-acks", "b-readings"]);
    assert!(first.for_agent(m.a2).is_some());
}

#[tokio::test]
async fn test_two_interior_routers_reference_each_other_until_disconnected() {
    let c = ControlPlaneCoordinator::new(
        &ControllerConfigSpec::default(),
        Repositories::in_memory(),
        Arc::new(InMemoryConfigPublisher::new()),
        EventBus::with_default_capacity(),
        Arc::new(SystemClock),
    );
    let tenant = TenantId::new();
    let a1 = register(&c, tenant, "site-a", 1).await;
    let a2 = register(&c, tenant, "site-b", 2).await;

    let r1 = c
        .create_router(
            tenant,
            RouterSpec::interior("site-a.local", RouterPorts::interior(5672, 56721, 56722)).on_agent(a1),
        )
        .await
        .unwrap();
    assert!(r1.is_default);

    let mut spec = RouterSpec::interior("site-b.local", RouterPorts::interior(5672, 56721, 56722)).on_agent(a2);
    spec.standalone = true;
    let r2 = c.create_router(tenant, spec).await.unwrap();
    assert!(c.topology(tenant).await.unwrap().connections.is_empty());

    c.connect_routers(tenant, r1.id, r2.id).await.unwrap();

    let app = c.create_application(tenant, "telemetry").await.unwrap().id;
    let sensor = c.register_microservice(tenant, app, "sensor", Some(a1)).await.unwrap().id;
    let sink = c.register_microservice(tenant, app, "sink", Some(a2)).await.unwrap().id;
    c.declare_routing(tenant, app, "readings", sensor, sink).await.unwrap();

    let compiled = c.compile_topology(tenant).await.unwrap();
    assert!(compiled.warnings.is_empty());

    let first = &compiled.routers[&r1.id];
    assert_eq!(first.connectors.len(), 1);
    assert_eq!(first.connectors[0].upstream, r2.id);
    assert_eq!(first.connectors[0].host, "site-b.local");
    assert_eq!(first.connectors[0].port, 56721);
    assert_eq!(first.connectors[0].role, ListenerRole::InterRouter);
    assert_eq!(first.entries.len(), 1);
    assert_eq!(first.entries[0].role, HopRole::Ingress);
    assert_eq!(first.entries[0].next_hop, Some(r2.id));

    let second = &compiled.routers[&r2.id];
    assert!(second.connectors.is_empty());
    assert_eq!(second.entries.len(), 1);
    assert_eq!(second.entries[0].role, HopRole::Egress);
    assert_eq!(second.entries[0].previous_hop, Some(r1.id));

    c.disconnect_routers(tenant, r1.id, r2.id).await.unwrap();
    let compiled = c.compile_topology(tenant).await.unwrap();
    assert!(compiled.is_unreachable("readings"));
    assert!(compiled.routers[&r1.id].connectors.is_empty());
    let error = compiled.warnings[0].clone().into_error();
    assert!(matches!(error, ControlPlaneError::Unreachable { ref directive } if directive == "readings"));
}
