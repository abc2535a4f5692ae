// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Application Layer
//!
//! Use-case services over the domain repositories.
//!
//! | Module | Service |
//! |--------|---------|
//! | [`credential_store`] | Agent keys and issued access tokens |
//! | [`replay_guard`] | Atomic single-use ledger |
//! | [`token_service`] | Issue / verify / revoke |
//! | [`router_graph`] | Router nodes and connections |
//! | [`routing_resolver`] | Applications, microservices, directives, compilation |
//! | [`sweeper`] | Background expiry of ledger and credential records |
//! | [`coordinator`] | Tenant-locked façade with config push |

pub mod credential_store;
pub mod replay_guard;
pub mod token_service;
pub mod router_graph;
pub mod routing_resolver;
pub mod repository_factory;
pub mod sweeper;
pub mod coordinator;
