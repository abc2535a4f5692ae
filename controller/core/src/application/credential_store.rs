// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Credential Store
//!
//! Agent keys and issued-token bookkeeping. Pure record keeping: nothing here
//! decides whether a token is acceptable.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Collaborators:** `AgentKeyRepository`, `AccessTokenRepository`, `TokenCodec`
//!
//! Key rotation is a read-modify-write of the agent's key record; callers
//! serialise rotations of one agent (the coordinator does so under the
//! tenant lock).

use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::agent::AgentId;
use crate::domain::clock::Clock;
use crate::domain::credential::{AccessToken, AgentKey, IssuedToken, KeyMaterial, TokenClaims, TokenId};
use crate::domain::error::ControlPlaneError;
use crate::domain::repository::{AccessTokenRepository, AgentKeyRepository};
use crate::infrastructure::jwt::{token_fingerprint, TokenCodec};

/// Counts returned by [`CredentialStore::purge_expired`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CredentialPurge {
    pub access_tokens: usize,
    pub retired_keys: usize,
}

pub struct CredentialStore {
    keys: Arc<dyn AgentKeyRepository>,
    tokens: Arc<dyn AccessTokenRepository>,
    codec: TokenCodec,
    clock: Arc<dyn Clock>,
    grace: Duration,
}

impl CredentialStore {
    pub fn new(
        keys: Arc<dyn AgentKeyRepository>,
        tokens: Arc<dyn AccessTokenRepository>,
        codec: TokenCodec,
        clock: Arc<dyn Clock>,
        grace: Duration,
    ) -> Self {
        Self {
            keys,
            tokens,
            codec,
            clock,
            grace,
        }
    }

    /// Install the first key of a newly registered agent.
    pub async fn register_key(&self, agent_id: AgentId, material: KeyMaterial) -> Result<AgentKey, ControlPlaneError> {
        let key = AgentKey::new(agent_id, material, self.clock.now());
        self.keys.save(&key).await?;
        debug!(%agent_id, "Registered agent key");
        Ok(key)
    }

    pub async fn get_active_key(&self, agent_id: AgentId) -> Result<KeyMaterial, ControlPlaneError> {
        self.load_key(agent_id).await.map(|key| key.material)
    }

    /// Replace the active key. The old key stays valid for the grace window.
    pub async fn rotate_key(&self, agent_id: AgentId, material: KeyMaterial) -> Result<(), ControlPlaneError> {
        let mut key = self.load_key(agent_id).await?;
        key.rotate(material, self.clock.now());
        self.keys.save(&key).await?;
        info!(%agent_id, "Rotated agent key");
        Ok(())
    }

    /// Keys a token of `agent_id` may be verified against right now, active key first.
    pub async fn verification_keys(&self, agent_id: AgentId) -> Result<Vec<KeyMaterial>, ControlPlaneError> {
        let key = self.load_key(agent_id).await?;
        Ok(key
            .verification_keys(self.clock.now(), self.grace)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Sign a new token with the agent's active key and record it.
    pub async fn issue_token(&self, agent_id: AgentId, ttl: Duration) -> Result<IssuedToken, ControlPlaneError> {
        let key = self.get_active_key(agent_id).await?;
        let issued_at = self.clock.now();
        let expires_at = issued_at + ttl;
        let jti = TokenId::new();

        let claims = TokenClaims {
            sub: agent_id.to_string(),
            jti: jti.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            iss: self.codec.issuer().to_string(),
        };
        let value = self.codec.sign(&claims, &key)?;

        self.tokens
            .save(&AccessToken {
                jti,
                agent_id,
                token_hash: token_fingerprint(&value),
                issued_at,
                expires_at,
            })
            .await?;

        Ok(IssuedToken {
            value,
            jti,
            agent_id,
            issued_at,
            expires_at,
        })
    }

    pub async fn find_token(&self, jti: TokenId) -> Result<Option<AccessToken>, ControlPlaneError> {
        Ok(self.tokens.find_by_jti(jti).await?)
    }

    pub async fn tokens_for_agent(&self, agent_id: AgentId) -> Result<Vec<AccessToken>, ControlPlaneError> {
        Ok(self.tokens.find_by_agent(agent_id).await?)
    }

    pub async fn delete_token(&self, jti: TokenId) -> Result<(), ControlPlaneError> {
        Ok(self.tokens.delete(jti).await?)
    }

    /// Drop every credential of the agent. Returns the number of tokens removed.
    pub async fn purge_agent(&self, agent_id: AgentId) -> Result<usize, ControlPlaneError> {
        let removed = self.tokens.delete_by_agent(agent_id).await?;
        self.keys.delete(agent_id).await?;
        Ok(removed)
    }

    /// Delete expired access tokens and retired keys past their grace window.
    pub async fn purge_expired(&self) -> Result<CredentialPurge, ControlPlaneError> {
        let now = self.clock.now();
        let access_tokens = self.tokens.delete_expired(now).await?;

        let mut retired_keys = 0;
        for mut key in self.keys.list_all().await? {
            if key.purge_retired(now, self.grace) {
                self.keys.save(&key).await?;
                retired_keys += 1;
            }
        }

        Ok(CredentialPurge {
            access_tokens,
            retired_keys,
        })
    }

    async fn load_key(&self, agent_id: AgentId) -> Result<AgentKey, ControlPlaneError> {
        self.keys
            .find_by_agent(agent_id)
            .await?
            .ok_or_else(|| ControlPlaneError::not_found("agent key", agent_id))
    }
}
