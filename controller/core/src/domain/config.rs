// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Controller Configuration Types
//
// Kubernetes-style manifest (apiVersion/kind/metadata/spec) for the control
// plane core:
// - Token issuance and verification (ttl, clock skew, key grace window, use policy)
// - Replay guard sweep schedule
// - Router removal policy
// - Storage backend selection
// - Event bus capacity

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::clock::to_span;
use crate::domain::credential::TokenUsePolicy;
use crate::domain::repository::{PostgresConfig, StorageBackend};

pub const API_VERSION: &str = "fog.controller/v1";
pub const KIND: &str = "ControllerConfig";

/// Top-level controller configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfigManifest {
    /// API version (must be "fog.controller/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "ControllerConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: ControllerConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfigSpec {
    #[serde(default)]
    pub tokens: TokensConfig,

    #[serde(default)]
    pub replay_guard: ReplayGuardConfig,

    #[serde(default)]
    pub topology: TopologyConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub events: EventsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokensConfig {
    /// Value of the `iss` claim; tokens from any other issuer are rejected
    #[serde(default = "default_issuer")]
    pub issuer: String,

    /// Lifetime of issued tokens
    #[serde(default = "default_token_ttl", with = "humantime_serde")]
    pub ttl: Duration,

    /// Tolerance added to `exp` when checking expiry
    #[serde(default = "default_clock_skew", with = "humantime_serde")]
    pub clock_skew: Duration,

    /// How long a rotated-out key keeps verifying tokens
    #[serde(default = "default_key_grace_window", with = "humantime_serde")]
    pub key_grace_window: Duration,

    #[serde(default)]
    pub use_policy: TokenUsePolicy,
}

impl TokensConfig {
    pub fn ttl_span(&self) -> chrono::Duration {
        to_span(self.ttl)
    }

    pub fn clock_skew_span(&self) -> chrono::Duration {
        to_span(self.clock_skew)
    }

    pub fn grace_span(&self) -> chrono::Duration {
        to_span(self.key_grace_window)
    }
}

impl Default for TokensConfig {
    fn default() -> Self {
        Self {
            issuer: default_issuer(),
            ttl: default_token_ttl(),
            clock_skew: default_clock_skew(),
            key_grace_window: default_key_grace_window(),
            use_policy: TokenUsePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayGuardConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for ReplayGuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval: default_sweep_interval(),
        }
    }
}

/// What `remove_router` does with connections that reference the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemovalPolicy {
    /// Delete the connections together with the router.
    #[default]
    Cascade,
    /// Refuse with `HasDependents` while any connection remains.
    Restrict,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologyConfig {
    #[serde(default)]
    pub removal_policy: RemovalPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageKind {
    #[default]
    InMemory,
    Postgres,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageKind,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,
}

impl StorageConfig {
    pub fn to_backend(&self) -> anyhow::Result<StorageBackend> {
        match self.backend {
            StorageKind::InMemory => Ok(StorageBackend::InMemory),
            StorageKind::Postgres => {
                let connection_string = self
                    .connection_string
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("spec.storage.connection_string is required for the postgres backend"))?;
                Ok(StorageBackend::PostgreSQL(PostgresConfig { connection_string }))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_issuer() -> String {
    "fog-controller".to_string()
}

fn default_token_ttl() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_clock_skew() -> Duration {
    Duration::from_secs(30)
}

fn default_key_grace_window() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_event_capacity() -> usize {
    1000
}

impl Default for ControllerConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "fog-controller".to_string(),
                labels: None,
            },
            spec: ControllerConfigSpec::default(),
        }
    }
}

impl ControllerConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. FOG_CONTROLLER_CONFIG environment variable
    /// 2. ./fog-controller.yaml (working directory)
    /// 3. ~/.fog-controller/config.yaml (user home)
    /// 4. /etc/fog-controller/config.yaml
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("FOG_CONTROLLER_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./fog-controller.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".fog-controller").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/fog-controller/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(explicit_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut config = if let Some(path) = explicit_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?
        } else if let Some(path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", path);
            Self::from_yaml_file(path)?
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides for container deployments
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("FOG_TOKEN_USE_POLICY") {
            match val.to_lowercase().as_str() {
                "single-use" => self.spec.tokens.use_policy = TokenUsePolicy::SingleUse,
                "until-expiry" => self.spec.tokens.use_policy = TokenUsePolicy::UntilExpiry,
                _ => {
                    tracing::warn!(
                        "Invalid value for FOG_TOKEN_USE_POLICY: '{}'. Expected single-use/until-expiry. Ignoring.",
                        val
                    );
                    return;
                }
            }
            tracing::info!("Environment override: FOG_TOKEN_USE_POLICY={}", val);
        }

        if let Ok(url) = std::env::var("FOG_DATABASE_URL") {
            tracing::info!("Environment override: FOG_DATABASE_URL (postgres backend)");
            self.spec.storage.backend = StorageKind::Postgres;
            self.spec.storage.connection_string = Some(url);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!("Invalid apiVersion: '{}'. Must be '{}'", self.api_version, API_VERSION);
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let tokens = &self.spec.tokens;
        if tokens.issuer.is_empty() {
            anyhow::bail!("spec.tokens.issuer cannot be empty");
        }
        if tokens.ttl.is_zero() {
            anyhow::bail!("spec.tokens.ttl must be greater than zero");
        }
        if tokens.clock_skew > Duration::from_secs(5 * 60) {
            anyhow::bail!("spec.tokens.clock_skew must not exceed 5m");
        }
        if tokens.clock_skew >= tokens.ttl {
            anyhow::bail!("spec.tokens.clock_skew must be shorter than spec.tokens.ttl");
        }

        if self.spec.replay_guard.enabled && self.spec.replay_guard.sweep_interval.is_zero() {
            anyhow::bail!("spec.replay_guard.sweep_interval must be greater than zero");
        }

        if self.spec.events.capacity == 0 {
            anyhow::bail!("spec.events.capacity must be greater than zero");
        }

        self.spec.storage.to_backend()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest_is_valid() {
        let manifest = ControllerConfigManifest::default();
        assert_eq!(manifest.api_version, API_VERSION);
        assert_eq!(manifest.spec.tokens.use_policy, TokenUsePolicy::SingleUse);
        assert_eq!(manifest.spec.topology.removal_policy, RemovalPolicy::Cascade);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_parse_manifest() {
        let yaml = r#"
apiVersion: fog.controller/v1
kind: ControllerConfig
metadata:
  name: edge-west
spec:
  tokens:
    issuer: west-controller
    ttl: 10m
    clock_skew: 15s
    key_grace_window: 2m
    use_policy: until-expiry
  replay_guard:
    sweep_interval: 30s
  topology:
    removal_policy: restrict
  storage:
    backend: postgres
    connection_string: postgres://fog@localhost/fog
"#;
        let manifest = ControllerConfigManifest::from_yaml_str(yaml).unwrap();
        assert!(manifest.validate().is_ok());
        assert_eq!(manifest.spec.tokens.ttl, Duration::from_secs(600));
        assert_eq!(manifest.spec.tokens.clock_skew_span(), chrono::Duration::seconds(15));
        assert_eq!(manifest.spec.tokens.use_policy, TokenUsePolicy::UntilExpiry);
        assert_eq!(manifest.spec.topology.removal_policy, RemovalPolicy::Restrict);
        assert!(manifest.spec.replay_guard.enabled);
        assert!(matches!(
            manifest.spec.storage.to_backend().unwrap(),
            StorageBackend::PostgreSQL(_)
        ));
        assert_eq!(manifest.spec.events.capacity, 1000);
    }

    #[test]
    fn test_validation() {
        let mut manifest = ControllerConfigManifest::default();
        manifest.kind = "NodeConfig".to_string();
        assert!(manifest.validate().is_err());

        let mut manifest = ControllerConfigManifest::default();
        manifest.spec.tokens.clock_skew = manifest.spec.tokens.ttl;
        assert!(manifest.validate().is_err());

        let mut manifest = ControllerConfigManifest::default();
        manifest.spec.storage.backend = StorageKind::Postgres;
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fog-controller.yaml");
        let manifest = ControllerConfigManifest::default();
        manifest.to_yaml_file(&path).unwrap();

        let loaded = ControllerConfigManifest::load_or_default(Some(path)).unwrap();
        assert_eq!(loaded.spec.tokens.issuer, "fog-controller");
        assert_eq!(loaded.spec.replay_guard.sweep_interval, Duration::from_secs(60));
    }
}
