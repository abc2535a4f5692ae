// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Credentials
//!
//! Value objects and records behind agent authentication:
//!
//! - [`AgentKey`]: the agent's signing key plus, after a rotation, the
//!   retired predecessor that stays valid for the grace window.
//! - [`AccessToken`]: bookkeeping for a token the control plane issued. Only a
//!   fingerprint of the signed value is kept.
//! - [`UsedTokenRecord`]: replay marker keyed by `jti`.
//! - [`TokenClaims`]: the JWT payload carried by every agent token.
//!
//! ## Invariants
//!
//! - Exactly one active key per agent; at most one retired key.
//! - A retired key verifies tokens only while `now < rotated_at + grace`.
//! - A `jti` has at most one live [`UsedTokenRecord`].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::agent::AgentId;
use crate::domain::error::ControlPlaneError;

/// Shortest accepted key, in bytes (HS256 needs at least the hash width).
pub const MIN_KEY_LEN: usize = 32;

/// Unique token identifier (`jti`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TokenId(pub Uuid);

impl TokenId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for TokenId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Secret key material shared between the control plane and one agent.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial(Vec<u8>);

impl KeyMaterial {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, ControlPlaneError> {
        let bytes = bytes.into();
        if bytes.len() < MIN_KEY_LEN {
            return Err(ControlPlaneError::Malformed(format!(
                "key material must be at least {} bytes, got {}",
                MIN_KEY_LEN,
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyMaterial(<{} bytes redacted>)", self.0.len())
    }
}

/// A key that was replaced by a rotation.
#[derive(Debug, Clone)]
pub struct RetiredKey {
    pub material: KeyMaterial,
    pub rotated_at: DateTime<Utc>,
}

/// The trust anchor for one agent's tokens.
#[derive(Debug, Clone)]
pub struct AgentKey {
    pub agent_id: AgentId,
    pub material: KeyMaterial,
    pub previous: Option<RetiredKey>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentKey {
    pub fn new(agent_id: AgentId, material: KeyMaterial, now: DateTime<Utc>) -> Self {
        Self {
            agent_id,
            material,
            previous: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Make `material` the active key and retire the current one.
    ///
    /// Only the immediately prior key is retained; an older retired key is dropped.
    pub fn rotate(&mut self, material: KeyMaterial, now: DateTime<Utc>) {
        let retired = std::mem::replace(&mut self.material, material);
        self.previous = Some(RetiredKey {
            material: retired,
            rotated_at: now,
        });
        self.updated_at = now;
    }

    /// Keys a token may be verified against at `now`, active key first.
    pub fn verification_keys(&self, now: DateTime<Utc>, grace: Duration) -> Vec<&KeyMaterial> {
        let mut keys = vec![&self.material];
        if let Some(previous) = &self.previous {
            if now < previous.rotated_at + grace {
                keys.push(&previous.material);
            }
        }
        keys
    }

    /// Drop the retired key once its grace window has elapsed. Returns true if one was dropped.
    pub fn purge_retired(&mut self, now: DateTime<Utc>, grace: Duration) -> bool {
        match &self.previous {
            Some(previous) if now >= previous.rotated_at + grace => {
                self.previous = None;
                true
            }
            _ => false,
        }
    }
}

/// Record of a token issued by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub jti: TokenId,
    pub agent_id: AgentId,
    /// SHA-256 fingerprint of the signed value
    pub token_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Why a `jti` was recorded in the replay guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UseReason {
    Consumed,
    Revoked,
}

impl UseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Consumed => "consumed",
            Self::Revoked => "revoked",
        }
    }
}

/// Replay-protection marker. Live while `expires_at >= now`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsedTokenRecord {
    pub jti: TokenId,
    pub expires_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
    pub reason: UseReason,
}

impl UsedTokenRecord {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at >= now
    }
}

/// JWT payload of an agent token. Times are integer seconds since the epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Agent UUID
    pub sub: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

impl TokenClaims {
    pub fn agent_id(&self) -> Result<AgentId, ControlPlaneError> {
        AgentId::from_string(&self.sub)
            .map_err(|e| ControlPlaneError::Malformed(format!("invalid sub claim: {}", e)))
    }

    pub fn token_id(&self) -> Result<TokenId, ControlPlaneError> {
        TokenId::from_string(&self.jti)
            .map_err(|e| ControlPlaneError::Malformed(format!("invalid jti claim: {}", e)))
    }

    /// Last instant the token is accepted: `exp` plus the skew tolerance.
    ///
    /// `None` when the claim is outside the representable time range.
    pub fn valid_until(&self, skew: Duration) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)?.checked_add_signed(skew)
    }

    /// True if the token can no longer be accepted at `now`.
    ///
    /// A token with an empty validity window (`exp <= iat`) is never valid; the
    /// skew tolerance only stretches a non-empty window. The comparison is at
    /// full precision so a token expires exactly when its replay record does.
    pub fn is_expired(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        if self.exp <= self.iat {
            return true;
        }
        self.valid_until(skew).map_or(true, |limit| now > limit)
    }
}

/// A freshly issued token as handed to the agent.
#[derive(Clone)]
pub struct IssuedToken {
    pub value: String,
    pub jti: TokenId,
    pub agent_id: AgentId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedToken")
            .field("jti", &self.jti)
            .field("agent_id", &self.agent_id)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Whether a verified token is consumed.
///
/// Fixed per deployment; never chosen per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenUsePolicy {
    /// A token backs exactly one successful verification.
    #[default]
    SingleUse,
    /// A token backs any number of calls until it expires or is revoked.
    UntilExpiry,
}
