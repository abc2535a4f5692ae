// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `fog-controller-core`: Agent Trust & Routing Topology
//!
//! Control-plane core of the fog controller. It authenticates the agent nodes
//! that call in over the network and compiles declarative "microservice A talks
//! to microservice B" intents into per-router configuration for the message
//! router mesh.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | Aggregates, invariants, repository traits, errors, events |
//! | [`application`] | Application | Credential store, replay guard, token lifecycle, router graph, routing resolver, coordinator |
//! | [`infrastructure`] | Infrastructure | In-memory and PostgreSQL repositories, JWT codec, event bus, config delivery, telemetry |
//!
//! The HTTP layer, persistence migrations and process lifecycle live outside
//! this crate and call in through [`application::coordinator::ControlPlaneCoordinator`].

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
