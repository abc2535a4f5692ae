// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod repositories;
pub mod db;
pub mod delivery;
pub mod event_bus;
pub mod jwt;
pub mod telemetry;
