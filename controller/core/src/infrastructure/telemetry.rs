// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Logging setup and metric names.
//!
//! The core emits `tracing` events and `metrics` counters but never installs a
//! recorder itself; the hosting process picks the exporter.

use anyhow::{Context, Result};

pub const TOKENS_ISSUED_TOTAL: &str = "fog_tokens_issued_total";
pub const TOKEN_VERIFICATIONS_TOTAL: &str = "fog_token_verifications_total";
pub const TOKENS_REVOKED_TOTAL: &str = "fog_tokens_revoked_total";
pub const KEY_ROTATIONS_TOTAL: &str = "fog_key_rotations_total";
pub const REPLAY_RECORDS_SWEPT_TOTAL: &str = "fog_replay_records_swept_total";
pub const ACCESS_TOKENS_SWEPT_TOTAL: &str = "fog_access_tokens_swept_total";
pub const TOPOLOGY_COMPILES_TOTAL: &str = "fog_topology_compiles_total";
pub const DIRECTIVES_UNREACHABLE_TOTAL: &str = "fog_directives_unreachable_total";
pub const CONFIG_PUSHES_TOTAL: &str = "fog_config_pushes_total";

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins over `level` when set.
pub fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if json {
        builder
            .json()
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {}", e))?;
    } else {
        builder
            .compact()
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {}", e))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_installs_once() {
        init_logging("debug", true).unwrap();
        assert!(init_logging("info", false).is_err());
    }
}
