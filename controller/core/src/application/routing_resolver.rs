// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Routing Directive Resolver
//!
//! Owns the application/microservice catalog and the routing directives
//! declared between microservices, and compiles them against a router graph
//! snapshot (see [`crate::domain::routing::compile`]).
//!
//! Deleting a microservice removes every directive naming it; deleting an
//! application removes its microservices and, through them, their directives.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::agent::AgentId;
use crate::domain::clock::Clock;
use crate::domain::error::ControlPlaneError;
use crate::domain::events::TopologyEvent;
use crate::domain::repository::{ApplicationRepository, MicroserviceRepository, RoutingDirectiveRepository};
use crate::domain::router::TopologySnapshot;
use crate::domain::routing::{
    compile, Application, ApplicationId, CompiledTopology, Microservice, MicroserviceId, RoutingDirective,
};
use crate::domain::tenant::TenantId;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::telemetry::{DIRECTIVES_UNREACHABLE_TOTAL, TOPOLOGY_COMPILES_TOTAL};

pub struct RoutingResolver {
    applications: Arc<dyn ApplicationRepository>,
    microservices: Arc<dyn MicroserviceRepository>,
    directives: Arc<dyn RoutingDirectiveRepository>,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
}

impl RoutingResolver {
    pub fn new(
        applications: Arc<dyn ApplicationRepository>,
        microservices: Arc<dyn MicroserviceRepository>,
        directives: Arc<dyn RoutingDirectiveRepository>,
        clock: Arc<dyn Clock>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            applications,
            microservices,
            directives,
            clock,
            event_bus,
        }
    }

    pub async fn create_application(&self, tenant_id: TenantId, name: &str) -> Result<Application, ControlPlaneError> {
        if name.trim().is_empty() {
            return Err(ControlPlaneError::Malformed("application name cannot be empty".to_string()));
        }
        let existing = self.applications.find_by_tenant(tenant_id).await?;
        if existing.iter().any(|a| a.name == name) {
            return Err(ControlPlaneError::DuplicateName(name.to_string()));
        }

        let application = Application {
            id: ApplicationId::new(),
            tenant_id,
            name: name.to_string(),
            created_at: self.clock.now(),
        };
        self.applications.save(&application).await?;
        info!(%tenant_id, application_id = %application.id, name, "Created application");
        Ok(application)
    }

    pub async fn register_microservice(
        &self,
        tenant_id: TenantId,
        application_id: ApplicationId,
        name: &str,
        agent_id: Option<AgentId>,
    ) -> Result<Microservice, ControlPlaneError> {
        self.find_application(tenant_id, application_id).await?;

        let microservice = Microservice {
            id: MicroserviceId::new(),
            tenant_id,
            application_id,
            name: name.to_string(),
            agent_id,
            created_at: self.clock.now(),
        };
        self.microservices.save(&microservice).await?;
        info!(%tenant_id, microservice_id = %microservice.id, agent_id = ?agent_id, "Registered microservice");
        Ok(microservice)
    }

    /// Declare a directive from `source` to `destination`.
    ///
    /// Both microservices must belong to the tenant and be placed on an agent.
    pub async fn declare(
        &self,
        tenant_id: TenantId,
        application_id: ApplicationId,
        name: &str,
        source: MicroserviceId,
        destination: MicroserviceId,
    ) -> Result<RoutingDirective, ControlPlaneError> {
        if name.trim().is_empty() {
            return Err(ControlPlaneError::Malformed("directive name cannot be empty".to_string()));
        }
        if self.directives.find_by_name(tenant_id, name).await?.is_some() {
            return Err(ControlPlaneError::DuplicateName(name.to_string()));
        }
        self.find_application(tenant_id, application_id).await?;
        for endpoint in [source, destination] {
            self.find_placed(tenant_id, endpoint).await?;
        }

        let directive = RoutingDirective {
            name: name.to_string(),
            tenant_id,
            application_id,
            source,
            destination,
            created_at: self.clock.now(),
        };
        self.directives.save(&directive).await?;

        info!(%tenant_id, name, %source, %destination, "Declared routing directive");
        self.event_bus.publish_topology_event(TopologyEvent::DirectiveDeclared {
            tenant_id,
            name: directive.name.clone(),
            source,
            destination,
            declared_at: directive.created_at,
        });
        Ok(directive)
    }

    pub async fn remove(&self, tenant_id: TenantId, name: &str) -> Result<RoutingDirective, ControlPlaneError> {
        let directive = self
            .directives
            .find_by_name(tenant_id, name)
            .await?
            .ok_or_else(|| ControlPlaneError::not_found("routing directive", name))?;
        self.delete_directive(&directive).await?;
        Ok(directive)
    }

    /// Delete a microservice and the directives naming it. Returns the removed directive names.
    pub async fn remove_microservice(
        &self,
        tenant_id: TenantId,
        microservice_id: MicroserviceId,
    ) -> Result<Vec<String>, ControlPlaneError> {
        let microservice = self.find_microservice(tenant_id, microservice_id).await?;
        self.remove_microservices(tenant_id, &[microservice]).await
    }

    /// Delete an application with its microservices and their directives.
    pub async fn remove_application(
        &self,
        tenant_id: TenantId,
        application_id: ApplicationId,
    ) -> Result<Vec<String>, ControlPlaneError> {
        self.find_application(tenant_id, application_id).await?;
        let members = self.microservices.find_by_application(application_id).await?;
        let mut removed = self.remove_microservices(tenant_id, &members).await?;

        for directive in self.directives.find_by_tenant(tenant_id).await? {
            if directive.application_id == application_id {
                self.delete_directive(&directive).await?;
                removed.push(directive.name);
            }
        }
        self.applications.delete(application_id).await?;

        info!(%tenant_id, %application_id, directives_removed = removed.len(), "Removed application");
        Ok(removed)
    }

    /// Delete every microservice placed on `agent_id`, with their directives.
    pub async fn remove_agent_microservices(
        &self,
        tenant_id: TenantId,
        agent_id: AgentId,
    ) -> Result<Vec<String>, ControlPlaneError> {
        let placed = self.microservices.find_by_agent(agent_id).await?;
        self.remove_microservices(tenant_id, &placed).await
    }

    pub async fn directives(&self, tenant_id: TenantId) -> Result<Vec<RoutingDirective>, ControlPlaneError> {
        Ok(self.directives.find_by_tenant(tenant_id).await?)
    }

    /// Compile the tenant's directives against `snapshot`.
    pub async fn compile(&self, snapshot: &TopologySnapshot) -> Result<CompiledTopology, ControlPlaneError> {
        let tenant_id = snapshot.tenant_id;
        let directives = self.directives.find_by_tenant(tenant_id).await?;
        let microservices: BTreeMap<MicroserviceId, Microservice> = self
            .microservices
            .find_by_tenant(tenant_id)
            .await?
            .into_iter()
            .map(|m| (m.id, m))
            .collect();

        let compiled = compile(snapshot, &directives, &microservices);

        metrics::counter!(TOPOLOGY_COMPILES_TOTAL).increment(1);
        if !compiled.warnings.is_empty() {
            metrics::counter!(DIRECTIVES_UNREACHABLE_TOTAL).increment(compiled.warnings.len() as u64);
        }
        debug!(
            %tenant_id,
            directives = directives.len(),
            routers = compiled.routers.len(),
            unreachable = compiled.warnings.len(),
            "Compiled routing topology"
        );
        Ok(compiled)
    }

    async fn remove_microservices(
        &self,
        tenant_id: TenantId,
        members: &[Microservice],
    ) -> Result<Vec<String>, ControlPlaneError> {
        if members.is_empty() {
            return Ok(Vec::new());
        }
        let ids: BTreeSet<MicroserviceId> = members.iter().map(|m| m.id).collect();

        let mut removed = Vec::new();
        for directive in self.directives.find_by_tenant(tenant_id).await? {
            if ids.contains(&directive.source) || ids.contains(&directive.destination) {
                self.delete_directive(&directive).await?;
                removed.push(directive.name);
            }
        }
        for id in &ids {
            self.microservices.delete(*id).await?;
        }

        info!(%tenant_id, microservices_removed = ids.len(), directives_removed = removed.len(), "Removed microservices");
        Ok(removed)
    }

    async fn delete_directive(&self, directive: &RoutingDirective) -> Result<(), ControlPlaneError> {
        self.directives.delete(directive.tenant_id, &directive.name).await?;
        info!(tenant_id = %directive.tenant_id, name = %directive.name, "Removed routing directive");
        self.event_bus.publish_topology_event(TopologyEvent::DirectiveRemoved {
            tenant_id: directive.tenant_id,
            name: directive.name.clone(),
            removed_at: self.clock.now(),
        });
        Ok(())
    }

    async fn find_application(
        &self,
        tenant_id: TenantId,
        application_id: ApplicationId,
    ) -> Result<Application, ControlPlaneError> {
        self.applications
            .find_by_id(application_id)
            .await?
            .filter(|a| a.tenant_id == tenant_id)
            .ok_or_else(|| ControlPlaneError::not_found("application", application_id))
    }

    async fn find_microservice(
        &self,
        tenant_id: TenantId,
        microservice_id: MicroserviceId,
    ) -> Result<Microservice, ControlPlaneError> {
        self.microservices
            .find_by_id(microservice_id)
            .await?
            .filter(|m| m.tenant_id == tenant_id)
            .ok_or_else(|| ControlPlaneError::not_found("microservice", microservice_id))
    }

    async fn find_placed(
        &self,
        tenant_id: TenantId,
        microservice_id: MicroserviceId,
    ) -> Result<Microservice, ControlPlaneError> {
        match self.find_microservice(tenant_id, microservice_id).await {
            Ok(ms) if ms.agent_id.is_some() => Ok(ms),
            Ok(_) | Err(ControlPlaneError::NotFound { .. }) => {
                Err(ControlPlaneError::UnknownMicroservice(microservice_id))
            }
            Err(e) => Err(e),
        }
    }
}
