// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Trust and topology event fan-out.
//
// Backed by a tokio broadcast channel. Publishing never blocks and never fails
// the operation that emitted the event; slow subscribers lag and lose the
// oldest events.

use crate::domain::events::{TopologyEvent, TrustEvent};
use crate::domain::tenant::TenantId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Everything published on the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Trust(TrustEvent),
    Topology(TopologyEvent),
}

#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus; `capacity` events are buffered per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish_trust_event(&self, event: TrustEvent) {
        self.publish(DomainEvent::Trust(event));
    }

    pub fn publish_topology_event(&self, event: TopologyEvent) {
        self.publish(DomainEvent::Topology(event));
    }

    fn publish(&self, event: DomainEvent) {
        // send() only fails when nobody is subscribed
        match self.sender.send(event) {
            Ok(receivers) => debug!(receivers, "Published domain event"),
            Err(_) => debug!("Dropped domain event: no subscribers"),
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to topology events of a single tenant
    pub fn subscribe_tenant(&self, tenant_id: TenantId) -> TenantTopologyReceiver {
        TenantTopologyReceiver {
            receiver: self.sender.subscribe(),
            tenant_id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    pub fn try_recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

pub struct TenantTopologyReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
    tenant_id: TenantId,
}

impl TenantTopologyReceiver {
    /// Receive the next topology event for this tenant, skipping all others
    pub async fn recv(&mut self) -> Result<TopologyEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if let DomainEvent::Topology(topology) = event {
                if topology_tenant(&topology) == self.tenant_id {
                    return Ok(topology);
                }
            }
        }
    }
}

fn topology_tenant(event: &TopologyEvent) -> TenantId {
    match event {
        TopologyEvent::RouterCreated { tenant_id, .. }
        | TopologyEvent::RouterActivated { tenant_id, .. }
        | TopologyEvent::RouterUpdated { tenant_id, .. }
        | TopologyEvent::DefaultRouterReplaced { tenant_id, .. }
        | TopologyEvent::RouterRemoved { tenant_id, .. }
        | TopologyEvent::RoutersConnected { tenant_id, .. }
        | TopologyEvent::RoutersDisconnected { tenant_id, .. }
        | TopologyEvent::DirectiveDeclared { tenant_id, .. }
        | TopologyEvent::DirectiveRemoved { tenant_id, .. }
        | TopologyEvent::TopologyCompiled { tenant_id, .. } => *tenant_id,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}
