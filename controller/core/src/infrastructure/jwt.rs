// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sha2::{Digest, Sha256};

use crate::domain::credential::{KeyMaterial, TokenClaims};
use crate::domain::error::ControlPlaneError;

/// HS256 encoder/decoder for agent tokens.
///
/// Expiry is not checked here; the token lifecycle applies its own clock and
/// skew tolerance before any signature work.
#[derive(Debug, Clone)]
pub struct TokenCodec {
    issuer: String,
}

impl TokenCodec {
    pub fn new(issuer: impl Into<String>) -> Self {
        Self { issuer: issuer.into() }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn sign(&self, claims: &TokenClaims, key: &KeyMaterial) -> Result<String, ControlPlaneError> {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(key.as_bytes()),
        )
        .map_err(|e| ControlPlaneError::Malformed(format!("failed to sign token: {}", e)))
    }

    /// Decode the payload without checking the signature.
    ///
    /// Used to find the claimed agent (and so its keys) and to reject expired
    /// tokens early. Nothing read here is trusted until [`Self::verify`] passes.
    pub fn peek(&self, token: &str) -> Result<TokenClaims, ControlPlaneError> {
        let mut parts = token.split('.');
        let (Some(_header), Some(payload), Some(_signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ControlPlaneError::Malformed("token is not a compact JWS".to_string()));
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| ControlPlaneError::Malformed(format!("token payload is not base64url: {}", e)))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ControlPlaneError::Malformed(format!("token payload is not valid claims: {}", e)))
    }

    /// Check the signature against each candidate key in order.
    ///
    /// Returns the verified claims from the first key that matches, or
    /// `InvalidSignature` if none does.
    pub fn verify(&self, token: &str, keys: &[&KeyMaterial]) -> Result<TokenClaims, ControlPlaneError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        validation.set_issuer(&[&self.issuer]);

        for key in keys {
            match decode::<TokenClaims>(token, &DecodingKey::from_secret(key.as_bytes()), &validation) {
                Ok(data) => return Ok(data.claims),
                Err(e) => match e.kind() {
                    ErrorKind::InvalidSignature => continue,
                    ErrorKind::InvalidIssuer | ErrorKind::InvalidAlgorithm => {
                        return Err(ControlPlaneError::InvalidSignature)
                    }
                    _ => return Err(ControlPlaneError::Malformed(e.to_string())),
                },
            }
        }
        Err(ControlPlaneError::InvalidSignature)
    }
}

/// SHA-256 hex fingerprint of a token value, stored instead of the value itself.
pub fn token_fingerprint(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
