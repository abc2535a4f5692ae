// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::domain::clock::Clock;
use crate::domain::credential::{TokenId, UseReason, UsedTokenRecord};
use crate::domain::error::ControlPlaneError;
use crate::domain::repository::UsedTokenRepository;

/// Single-use enforcement point for token identifiers.
///
/// Correctness rests on the repository's atomic insert-if-absent; the sweep is
/// housekeeping only.
pub struct ReplayGuard {
    repo: Arc<dyn UsedTokenRepository>,
    clock: Arc<dyn Clock>,
}

impl ReplayGuard {
    pub fn new(repo: Arc<dyn UsedTokenRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    /// Record `jti` as consumed until `expires_at`.
    ///
    /// Of any number of concurrent calls for one `jti`, exactly one succeeds;
    /// the others get `AlreadyUsed`.
    pub async fn mark_used(&self, jti: TokenId, expires_at: DateTime<Utc>) -> Result<(), ControlPlaneError> {
        let now = self.clock.now();
        let record = UsedTokenRecord {
            jti,
            expires_at,
            recorded_at: now,
            reason: UseReason::Consumed,
        };
        if self.repo.insert_if_absent(&record, now).await? {
            Ok(())
        } else {
            Err(ControlPlaneError::AlreadyUsed(jti))
        }
    }

    /// Whether a live record exists for `jti`. Does not modify anything.
    pub async fn is_used(&self, jti: TokenId) -> Result<bool, ControlPlaneError> {
        let now = self.clock.now();
        Ok(self.repo.find(jti).await?.is_some_and(|r| r.is_live(now)))
    }

    /// Record `jti` as revoked, whether or not it was already used.
    pub async fn force_mark(&self, jti: TokenId, expires_at: DateTime<Utc>) -> Result<(), ControlPlaneError> {
        let record = UsedTokenRecord {
            jti,
            expires_at,
            recorded_at: self.clock.now(),
            reason: UseReason::Revoked,
        };
        self.repo.force_insert(&record).await?;
        Ok(())
    }

    /// Delete records whose expiry has passed. Returns the number removed.
    pub async fn sweep(&self) -> Result<usize, ControlPlaneError> {
        let removed = self.repo.delete_expired(self.clock.now()).await?;
        debug!(removed, "Swept used-token records");
        Ok(removed)
    }
}
