//! Configuration management.
//!
//! Values come from an optional file plus `WARDEN__*` environment variables,
//! e.g. `WARDEN__ENGINE__OPERATION_TIMEOUT=2s`.

use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::error::Result;
use crate::rbac::{AutoAttachMode, NamespacePolicy};
use crate::store::OperationGuard;
use crate::telemetry::LoggingConfig;

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WardenConfig {
    /// Deployment environment (development, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub namespaces: NamespaceConfig,

    #[serde(default)]
    pub bootstrap: BootstrapConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            database: DatabaseConfig::default(),
            engine: EngineConfig::default(),
            namespaces: NamespaceConfig::default(),
            bootstrap: BootstrapConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// How long to wait for a pooled connection
    #[serde(default = "default_acquire_timeout", with = "humantime_serde")]
    pub acquire_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            acquire_timeout: default_acquire_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Upper bound for any single engine operation
    #[serde(default = "default_operation_timeout", with = "humantime_serde")]
    pub operation_timeout: Duration,

    #[serde(default)]
    pub auto_attach: AutoAttachMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            operation_timeout: default_operation_timeout(),
            auto_attach: AutoAttachMode::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NamespaceConfig {
    /// Extra permission namespaces tenants may use, on top of
    /// `tenant`, `app` and `resource`
    #[serde(default)]
    pub tenant_prefixes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapConfig {
    /// Capabilities registered by the system bootstrap
    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<CapabilitySeed>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            capabilities: default_capabilities(),
        }
    }
}

/// One system registry entry to seed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CapabilitySeed {
    pub key: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_value")]
    pub default_value: Value,

    #[serde(default)]
    pub description: String,
}

// Default value functions
fn default_environment() -> String { "production".to_string() }
fn default_database_url() -> String { "postgres://localhost:5432/warden".to_string() }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_acquire_timeout() -> Duration { Duration::from_secs(3) }
fn default_operation_timeout() -> Duration { Duration::from_secs(5) }
fn default_true() -> bool { true }
fn default_value() -> Value { json!({}) }

fn seed(key: &str, default_value: Value, description: &str) -> CapabilitySeed {
    CapabilitySeed {
        key: key.to_string(),
        enabled: true,
        default_value,
        description: description.to_string(),
    }
}

fn default_capabilities() -> Vec<CapabilitySeed> {
    vec![
        seed(
            "totp",
            json!({"digits": 6, "period": 30, "algorithm": "SHA1"}),
            "Time-based one-time passwords",
        ),
        seed(
            "webauthn",
            json!({"user_verification": "preferred"}),
            "Passkeys and security keys",
        ),
        seed("recovery_codes", json!({"count": 10}), "Single-use recovery codes"),
        seed(
            "email_otp",
            json!({"code_length": 6, "ttl_seconds": 600}),
            "One-time codes delivered by email",
        ),
    ]
}

impl WardenConfig {
    /// Load configuration from the environment.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("WARDEN").separator("__"))
            .build()?;

        let cfg: WardenConfig = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("WARDEN").separator("__"))
            .build()?;

        let cfg: WardenConfig = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Parse a TOML document without consulting the environment.
    pub fn from_toml_str(document: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(document)?)
    }

    pub fn operation_guard(&self) -> OperationGuard {
        OperationGuard::new(self.engine.operation_timeout)
    }

    /// Tenant namespace policy including the configured extra prefixes.
    pub fn namespace_policy(&self) -> Result<NamespacePolicy> {
        NamespacePolicy::with_tenant_namespaces(self.namespaces.tenant_prefixes.iter().cloned())
    }
}
