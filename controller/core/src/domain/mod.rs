// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Layer
//!
//! Pure domain types for agent trust and routing topology. No I/O dependencies.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`tenant`] | `TenantId` |
//! | [`agent`] | `Agent`, `AgentId`, `AgentStatus` |
//! | [`credential`] | `AgentKey`, `AccessToken`, `UsedTokenRecord`, `TokenClaims` |
//! | [`router`] | `Router`, `RouterConnection`, `TopologySnapshot` |
//! | [`routing`] | `Application`, `Microservice`, `RoutingDirective`, `CompiledTopology` |
//! | [`repository`] | Persistence contracts per aggregate |
//! | [`error`] | `ControlPlaneError` taxonomy |

pub mod tenant;
pub mod agent;
pub mod clock;
pub mod credential;
pub mod router;
pub mod routing;
pub mod events;
pub mod delivery;
pub mod repository;
pub mod error;
pub mod config;
