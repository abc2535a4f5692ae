// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Token Lifecycle
//!
//! Issues, verifies and revokes agent access tokens.
//!
//! # Verification Order
//!
//! 1. Decode the payload (`Malformed` on garbage).
//! 2. Expiry against the clock plus skew tolerance (`Expired`), before any key
//!    is looked at, so an expired token fails the same way whatever its signature.
//! 3. Agent state (`AgentRevoked`).
//! 4. Signature against the active key, then the grace-window key (`InvalidSignature`).
//! 5. Replay: fast `is_used` check, then the atomic `mark_used` under the
//!    single-use policy (`AlreadyUsed`).
//!
//! Rejections never write anything; the only write on the verify path is the
//! consuming `mark_used` itself.

use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;
use tracing::{info, warn};

use crate::application::credential_store::CredentialStore;
use crate::application::replay_guard::ReplayGuard;
use crate::domain::agent::AgentId;
use crate::domain::clock::Clock;
use crate::domain::config::TokensConfig;
use crate::domain::credential::{IssuedToken, TokenClaims, TokenId, TokenUsePolicy};
use crate::domain::error::ControlPlaneError;
use crate::domain::events::TrustEvent;
use crate::domain::repository::AgentRepository;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::jwt::TokenCodec;
use crate::infrastructure::telemetry::{TOKENS_ISSUED_TOTAL, TOKENS_REVOKED_TOTAL, TOKEN_VERIFICATIONS_TOTAL};

#[async_trait]
pub trait TokenLifecycleService: Send + Sync {
    /// Issue a token for an existing, non-revoked agent.
    async fn issue(&self, agent_id: AgentId) -> Result<IssuedToken, ControlPlaneError>;

    /// Authenticate a presented token and return the agent it belongs to.
    async fn verify(&self, token: &str) -> Result<AgentId, ControlPlaneError>;

    /// Make `jti` unusable immediately.
    async fn revoke(&self, agent_id: AgentId, jti: TokenId) -> Result<(), ControlPlaneError>;
}

pub struct StandardTokenLifecycleService {
    agents: Arc<dyn AgentRepository>,
    credentials: Arc<CredentialStore>,
    replay_guard: Arc<ReplayGuard>,
    codec: TokenCodec,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
    ttl: Duration,
    clock_skew: Duration,
    policy: TokenUsePolicy,
}

impl StandardTokenLifecycleService {
    pub fn new(
        agents: Arc<dyn AgentRepository>,
        credentials: Arc<CredentialStore>,
        replay_guard: Arc<ReplayGuard>,
        clock: Arc<dyn Clock>,
        event_bus: EventBus,
        config: &TokensConfig,
    ) -> Self {
        Self {
            agents,
            credentials,
            replay_guard,
            codec: TokenCodec::new(config.issuer.clone()),
            clock,
            event_bus,
            ttl: config.ttl_span(),
            clock_skew: config.clock_skew_span(),
            policy: config.use_policy,
        }
    }

    async fn check(&self, token: &str, claims: &TokenClaims) -> Result<AgentId, ControlPlaneError> {
        let now = self.clock.now();
        if claims.is_expired(now, self.clock_skew) {
            return Err(ControlPlaneError::Expired);
        }

        let agent_id = claims.agent_id()?;
        let jti = claims.token_id()?;

        match self.agents.find_by_id(agent_id).await? {
            Some(agent) if agent.is_revoked() => return Err(ControlPlaneError::AgentRevoked(agent_id)),
            Some(_) => {}
            None => return Err(ControlPlaneError::InvalidSignature),
        }

        let keys = match self.credentials.verification_keys(agent_id).await {
            Ok(keys) => keys,
            Err(ControlPlaneError::NotFound { .. }) => return Err(ControlPlaneError::InvalidSignature),
            Err(e) => return Err(e),
        };
        let candidates: Vec<_> = keys.iter().collect();
        let verified = self.codec.verify(token, &candidates)?;
        if verified.sub != claims.sub || verified.jti != claims.jti {
            return Err(ControlPlaneError::InvalidSignature);
        }

        if self.replay_guard.is_used(jti).await? {
            return Err(ControlPlaneError::AlreadyUsed(jti));
        }
        if self.policy == TokenUsePolicy::SingleUse {
            let record_until = claims
                .valid_until(self.clock_skew)
                .ok_or_else(|| ControlPlaneError::Malformed("exp claim out of range".to_string()))?;
            self.replay_guard.mark_used(jti, record_until).await?;
        }

        Ok(agent_id)
    }

    fn reject(&self, agent_id: Option<AgentId>, error: &ControlPlaneError) {
        metrics::counter!(TOKEN_VERIFICATIONS_TOTAL, "outcome" => error.code()).increment(1);
        warn!(agent_id = ?agent_id, reason = error.code(), "Rejected agent token");
        self.event_bus.publish_trust_event(TrustEvent::TokenRejected {
            agent_id,
            reason: error.code().to_string(),
            rejected_at: self.clock.now(),
        });
    }
}

#[async_trait]
impl TokenLifecycleService for StandardTokenLifecycleService {
    async fn issue(&self, agent_id: AgentId) -> Result<IssuedToken, ControlPlaneError> {
        let agent = self
            .agents
            .find_by_id(agent_id)
            .await?
            .ok_or_else(|| ControlPlaneError::not_found("agent", agent_id))?;
        if agent.is_revoked() {
            return Err(ControlPlaneError::AgentRevoked(agent_id));
        }

        let issued = self.credentials.issue_token(agent_id, self.ttl).await?;

        metrics::counter!(TOKENS_ISSUED_TOTAL).increment(1);
        info!(%agent_id, jti = %issued.jti, expires_at = %issued.expires_at, "Issued agent token");
        self.event_bus.publish_trust_event(TrustEvent::TokenIssued {
            agent_id,
            jti: issued.jti,
            expires_at: issued.expires_at,
        });
        Ok(issued)
    }

    async fn verify(&self, token: &str) -> Result<AgentId, ControlPlaneError> {
        let claims = match self.codec.peek(token) {
            Ok(claims) => claims,
            Err(e) => {
                self.reject(None, &e);
                return Err(e);
            }
        };

        match self.check(token, &claims).await {
            Ok(agent_id) => {
                let consumed = self.policy == TokenUsePolicy::SingleUse;
                metrics::counter!(TOKEN_VERIFICATIONS_TOTAL, "outcome" => "accepted").increment(1);
                info!(%agent_id, jti = %claims.jti, consumed, "Verified agent token");
                if let Ok(jti) = claims.token_id() {
                    self.event_bus.publish_trust_event(TrustEvent::TokenVerified {
                        agent_id,
                        jti,
                        consumed,
                        verified_at: self.clock.now(),
                    });
                }
                Ok(agent_id)
            }
            Err(e) => {
                if !matches!(e, ControlPlaneError::Repository(_)) {
                    self.reject(claims.agent_id().ok(), &e);
                }
                Err(e)
            }
        }
    }

    async fn revoke(&self, agent_id: AgentId, jti: TokenId) -> Result<(), ControlPlaneError> {
        let now = self.clock.now();
        let record = self.credentials.find_token(jti).await?;
        if let Some(record) = &record {
            if record.agent_id != agent_id {
                return Err(ControlPlaneError::not_found("access token", jti));
            }
        }

        // Without a record the token's expiry is unknown; cover the longest
        // lifetime a token could still have.
        let expires_at = record.map(|r| r.expires_at).unwrap_or(now + self.ttl) + self.clock_skew;
        self.replay_guard.force_mark(jti, expires_at).await?;
        self.credentials.delete_token(jti).await?;

        metrics::counter!(TOKENS_REVOKED_TOTAL).increment(1);
        info!(%agent_id, %jti, "Revoked agent token");
        self.event_bus.publish_trust_event(TrustEvent::TokenRevoked {
            agent_id,
            jti,
            revoked_at: now,
        });
        Ok(())
    }
}
