// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Token lifecycle tests through the coordinator.
//!
//! Covers issuance, single-use verification, expiry ordering, key rotation
//! grace windows, revocation and concurrent redemption of one token.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use std::sync::Arc;

use fog_controller::application::coordinator::ControlPlaneCoordinator;
use fog_controller::application::repository_factory::Repositories;
use fog_controller::domain::agent::AgentId;
use fog_controller::domain::clock::ManualClock;
use fog_controller::domain::config::{ControllerConfigSpec, TokensConfig};
use fog_controller::domain::credential::{KeyMaterial, TokenUsePolicy};
use fog_controller::domain::error::ControlPlaneError;
use fog_controller::domain::tenant::TenantId;
use fog_controller::infrastructure::delivery::InMemoryConfigPublisher;
use fog_controller::infrastructure::event_bus::EventBus;

struct Harness {
    coordinator: Arc<ControlPlaneCoordinator>,
    clock: Arc<ManualClock>,
    tenant: TenantId,
}

fn key(byte: u8) -> KeyMaterial {
    KeyMaterial::new(vec![byte; 32]).unwrap()
}

fn harness_with(tokens: TokensConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let spec = ControllerConfigSpec {
        tokens,
        ..Default::default()
    };
    let coordinator = ControlPlaneCoordinator::new(
        &spec,
        Repositories::in_memory(),
        Arc::new(InMemoryConfigPublisher::new()),
        EventBus::with_default_capacity(),
        clock.clone(),
    );
    Harness {
        coordinator: Arc::new(coordinator),
        clock,
        tenant: TenantId::new(),
    }
}

fn harness() -> Harness {
    harness_with(TokensConfig::default())
}

async fn agent(h: &Harness, name: &str, byte: u8) -> AgentId {
    h.coordinator.register_agent(h.tenant, name, key(byte)).await.unwrap().id
}

#[tokio::test]
async fn test_token_verifies_once() {
    let h = harness();
    let agent_id = agent(&h, "edge-01", 1).await;

    let token = h.coordinator.issue_token(agent_id).await.unwrap();
    assert_eq!(token.agent_id, agent_id);
    assert_eq!(h.coordinator.verify_token(&token.value).await.unwrap(), agent_id);

    let replay = h.coordinator.verify_token(&token.value).await;
    assert!(matches!(replay, Err(ControlPlaneError::AlreadyUsed(jti)) if jti == token.jti));
}

#[tokio::test]
async fn test_expired_token_rejected_before_signature_check() {
    let h = harness();
    let agent_id = agent(&h, "edge-01", 1).await;
    let token = h.coordinator.issue_token(agent_id).await.unwrap();

    h.clock.advance(Duration::minutes(20));

    let result = h.coordinator.verify_token(&token.value).await;
    assert!(matches!(result, Err(ControlPlaneError::Expired)));

    // A broken signature on an expired token still reports expiry.
    let mut parts: Vec<&str> = token.value.split('.').collect();
    parts[2] = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
    let forged = parts.join(".");
    let result = h.coordinator.verify_token(&forged).await;
    assert!(matches!(result, Err(ControlPlaneError::Expired)));
}

#[tokio::test]
async fn test_clock_skew_tolerates_just_expired_token() {
    let h = harness();
    let agent_id = agent(&h, "edge-01", 1).await;
    let token = h.coordinator.issue_token(agent_id).await.unwrap();

    h.clock.advance(Duration::minutes(15) + Duration::seconds(10));

    assert_eq!(h.coordinator.verify_token(&token.value).await.unwrap(), agent_id);
}

#[tokio::test]
async fn test_single_use_token_cannot_be_replayed_past_its_expiry() {
    let h = harness();
    let agent_id = agent(&h, "edge-01", 1).await;
    let token = h.coordinator.issue_token(agent_id).await.unwrap();

    assert_eq!(h.coordinator.verify_token(&token.value).await.unwrap(), agent_id);

    // Half a second past exp plus the default 30s skew: the replay record is
    // dead by now, so the token must be too.
    h.clock.set(token.expires_at + Duration::seconds(30) + Duration::milliseconds(500));
    let replay = h.coordinator.verify_token(&token.value).await;
    assert!(matches!(replay, Err(ControlPlaneError::Expired)));
}

#[tokio::test]
async fn test_out_of_range_exp_is_rejected_without_panicking() {
    let h = harness();
    let agent_id = agent(&h, "edge-01", 1).await;

    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = serde_json::json!({
        "sub": agent_id.to_string(),
        "jti": uuid::Uuid::new_v4().to_string(),
        "iat": 0,
        "exp": i64::MAX,
        "iss": "fog-controller",
    });
    let payload = URL_SAFE_NO_PAD.encode(payload.to_string());
    let token = format!("{}.{}.AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA", header, payload);

    let result = h.coordinator.verify_token(&token).await;
    assert!(matches!(result, Err(ControlPlaneError::Expired)));
}

#[tokio::test]
async fn test_zero_ttl_token_is_always_expired() {
    let h = harness_with(TokensConfig {
        ttl: std::time::Duration::ZERO,
        ..Default::default()
    });
    let agent_id = agent(&h, "edge-01", 1).await;

    let token = h.coordinator.issue_token(agent_id).await.unwrap();
    let result = h.coordinator.verify_token(&token.value).await;
    assert!(matches!(result, Err(ControlPlaneError::Expired)));
}

#[tokio::test]
async fn test_rotated_key_verifies_only_within_grace_window() {
    let h = harness();
    let agent_id = agent(&h, "edge-01", 1).await;
    let first = h.coordinator.issue_token(agent_id).await.unwrap();
    let second = h.coordinator.issue_token(agent_id).await.unwrap();

    h.coordinator.rotate_key(agent_id, key(2)).await.unwrap();

    assert_eq!(h.coordinator.verify_token(&first.value).await.unwrap(), agent_id);

    h.clock.advance(Duration::minutes(6));
    let result = h.coordinator.verify_token(&second.value).await;
    assert!(matches!(result, Err(ControlPlaneError::InvalidSignature)));

    let fresh = h.coordinator.issue_token(agent_id).await.unwrap();
    assert_eq!(h.coordinator.verify_token(&fresh.value).await.unwrap(), agent_id);
}

#[tokio::test]
async fn test_token_signed_with_other_agents_key_is_rejected() {
    let h = harness();
    let alice = agent(&h, "edge-01", 1).await;
    let bob = agent(&h, "edge-02", 2).await;

    let alice_token = h.coordinator.issue_token(alice).await.unwrap();
    let bob_token = h.coordinator.issue_token(bob).await.unwrap();

    // Alice's claims under Bob's signature.
    let alice_parts: Vec<&str> = alice_token.value.split('.').collect();
    let bob_parts: Vec<&str> = bob_token.value.split('.').collect();
    let spliced = format!("{}.{}.{}", alice_parts[0], alice_parts[1], bob_parts[2]);

    let result = h.coordinator.verify_token(&spliced).await;
    assert!(matches!(result, Err(ControlPlaneError::InvalidSignature)));
}

#[tokio::test]
async fn test_garbage_token_is_malformed() {
    let h = harness();
    let result = h.coordinator.verify_token("not-a-token").await;
    assert!(matches!(result, Err(ControlPlaneError::Malformed(_))));
}

#[tokio::test]
async fn test_revoked_token_is_rejected() {
    let h = harness();
    let agent_id = agent(&h, "edge-01", 1).await;
    let other = agent(&h, "edge-02", 2).await;
    let token = h.coordinator.issue_token(agent_id).await.unwrap();

    let wrong_owner = h.coordinator.revoke_token(other, token.jti).await;
    assert!(matches!(wrong_owner, Err(ControlPlaneError::NotFound { .. })));

    h.coordinator.revoke_token(agent_id, token.jti).await.unwrap();

    let result = h.coordinator.verify_token(&token.value).await;
    assert!(matches!(result, Err(ControlPlaneError::AlreadyUsed(jti)) if jti == token.jti));
}

#[tokio::test]
async fn test_revoked_agent_cannot_issue_or_verify() {
    let h = harness();
    let agent_id = agent(&h, "edge-01", 1).await;
    let token = h.coordinator.issue_token(agent_id).await.unwrap();

    let revoked = h.coordinator.revoke_agent(agent_id, "compromised").await.unwrap();
    assert!(revoked.is_revoked());

    let verify = h.coordinator.verify_token(&token.value).await;
    assert!(matches!(verify, Err(ControlPlaneError::AgentRevoked(id)) if id == agent_id));

    let issue = h.coordinator.issue_token(agent_id).await;
    assert!(matches!(issue, Err(ControlPlaneError::AgentRevoked(_))));
}

#[tokio::test]
async fn test_until_expiry_policy_allows_reuse() {
    let h = harness_with(TokensConfig {
        use_policy: TokenUsePolicy::UntilExpiry,
        ..Default::default()
    });
    let agent_id = agent(&h, "edge-01", 1).await;
    let token = h.coordinator.issue_token(agent_id).await.unwrap();

    for _ in 0..3 {
        assert_eq!(h.coordinator.verify_token(&token.value).await.unwrap(), agent_id);
    }

    h.coordinator.revoke_token(agent_id, token.jti).await.unwrap();
    assert!(h.coordinator.verify_token(&token.value).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_redemption_has_exactly_one_winner() {
    let h = harness();
    let agent_id = agent(&h, "edge-01", 1).await;
    let token = h.coordinator.issue_token(agent_id).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let coordinator = h.coordinator.clone();
        let value = token.value.clone();
        handles.push(tokio::spawn(async move { coordinator.verify_token(&value).await }));
    }

    let mut accepted = 0;
    let mut replayed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(id) => {
                assert_eq!(id, agent_id);
                accepted += 1;
            }
            Err(ControlPlaneError::AlreadyUsed(_)) => replayed += 1,
            Err(other) => panic!("unexpected rejection: {other}"),
        }
    }

    assert_eq!(accepted, 1);
    assert_eq!(replayed, 15);
}
