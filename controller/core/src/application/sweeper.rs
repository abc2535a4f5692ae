// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Replay Guard Sweeper - background housekeeping for expired credentials
//!
//! On a fixed interval, independent of request traffic:
//! - deletes used-token records whose expiry has passed,
//! - deletes expired access-token records,
//! - drops retired keys whose grace window has elapsed.
//!
//! Every record it touches is already useless, so stopping mid-cycle at
//! shutdown loses nothing.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Collaborators:** `ReplayGuard`, `CredentialStore`

use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::credential_store::CredentialStore;
use crate::application::replay_guard::ReplayGuard;
use crate::domain::config::ReplayGuardConfig;
use crate::domain::error::ControlPlaneError;
use crate::infrastructure::telemetry::{ACCESS_TOKENS_SWEPT_TOTAL, REPLAY_RECORDS_SWEPT_TOTAL};

/// What a single sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub used_tokens: usize,
    pub access_tokens: usize,
    pub retired_keys: usize,
}

pub struct ReplayGuardSweeper {
    replay_guard: Arc<ReplayGuard>,
    credentials: Arc<CredentialStore>,
    config: ReplayGuardConfig,
    shutdown_token: CancellationToken,
}

impl ReplayGuardSweeper {
    pub fn new(replay_guard: Arc<ReplayGuard>, credentials: Arc<CredentialStore>, config: ReplayGuardConfig) -> Self {
        Self {
            replay_guard,
            credentials,
            config,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Handle that stops the background loop when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        if !self.config.enabled {
            info!("Replay guard sweeper is disabled");
            return;
        }

        info!(interval = ?self.config.sweep_interval, "Starting replay guard sweeper");

        let mut tick = interval(self.config.sweep_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match self.sweep_once().await {
                        Ok(report) => debug!(?report, "Sweep cycle completed"),
                        Err(e) => warn!("Sweep cycle failed: {}", e),
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping replay guard sweeper");
                    break;
                }
            }
        }
    }

    /// Run one sweep cycle now.
    pub async fn sweep_once(&self) -> Result<SweepReport, ControlPlaneError> {
        let used_tokens = self.replay_guard.sweep().await?;
        let purge = self.credentials.purge_expired().await?;

        metrics::counter!(REPLAY_RECORDS_SWEPT_TOTAL).increment(used_tokens as u64);
        metrics::counter!(ACCESS_TOKENS_SWEPT_TOTAL).increment(purge.access_tokens as u64);

        Ok(SweepReport {
            used_tokens,
            access_tokens: purge.access_tokens,
            retired_keys: purge.retired_keys,
        })
    }
}
