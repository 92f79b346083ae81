//! Configuration loading and validation for datascope.
//!
//! Loads `datascope.toml` (current directory or an explicit path) with
//! `DATASCOPE_*` environment variable overrides. Validates all settings at
//! startup; secrets never appear in Debug output.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The root configuration structure, mapping to `datascope.toml`.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Inference backend settings.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Analytics database settings (the SQL tool's read-only pool).
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Gateway listen settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Engine tuning.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Path to the domain context file (JSON blob describing the schema and
    /// business definitions) loaded into every new conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_file: Option<PathBuf>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Anthropic API key. Usually supplied via `DATASCOPE_API_KEY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model id for all structured calls.
    #[serde(default = "default_model")]
    pub model: String,

    /// Override the API base URL (testing, proxies).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            base_url: None,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres connection URL for the read-only analytics pool. The SQL
    /// tool is not registered when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Decisions allowed per conversation step before the run is cut off.
    #[serde(default = "default_max_steps")]
    pub max_steps: u64,

    /// Consecutive routing failures tolerated before the step terminates.
    #[serde(default = "default_routing_retry_limit")]
    pub routing_retry_limit: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            routing_retry_limit: default_routing_retry_limit(),
        }
    }
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_max_connections() -> u32 {
    8
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8000
}
fn default_max_steps() -> u64 {
    64
}
fn default_routing_retry_limit() -> u32 {
    3
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("provider", &self.provider)
            .field("database", &self.database)
            .field("gateway", &self.gateway)
            .field("engine", &self.engine)
            .field("context_file", &self.context_file)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &redact(&self.url))
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("max_steps", &self.max_steps)
            .field("routing_retry_limit", &self.routing_retry_limit)
            .finish()
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Failed to read context file at {path}: {reason}")]
    ContextError { path: PathBuf, reason: String },
}

impl AppConfig {
    /// Load configuration from `datascope.toml` in the working directory
    /// (falling back to defaults when absent), then apply environment
    /// overrides:
    ///
    /// - `DATASCOPE_API_KEY` / `ANTHROPIC_API_KEY`
    /// - `DATASCOPE_MODEL`
    /// - `DATASCOPE_DATABASE_URL`
    /// - `DATASCOPE_HOST`, `DATASCOPE_PORT`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_path(Path::new("datascope.toml"))
    }

    /// Load from an explicit path, then apply environment overrides.
    pub fn load_path(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;

        if config.provider.api_key.is_none() {
            config.provider.api_key = std::env::var("DATASCOPE_API_KEY")
                .ok()
                .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok());
        }
        if let Ok(model) = std::env::var("DATASCOPE_MODEL") {
            config.provider.model = model;
        }
        if let Ok(url) = std::env::var("DATASCOPE_DATABASE_URL") {
            config.database.url = Some(url);
        }
        if let Ok(host) = std::env::var("DATASCOPE_HOST") {
            config.gateway.host = host;
        }
        if let Ok(port) = std::env::var("DATASCOPE_PORT") {
            config.gateway.port = port.parse().map_err(|_| {
                ConfigError::ValidationError(format!("DATASCOPE_PORT is not a port: {port}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load a specific file without environment overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "provider.model must not be empty".into(),
            ));
        }
        if self.engine.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "engine.max_steps must be at least 1".into(),
            ));
        }
        if self.engine.routing_retry_limit == 0 {
            return Err(ConfigError::ValidationError(
                "engine.routing_retry_limit must be at least 1".into(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "database.max_connections must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Load the domain context blob for new conversations. Without a
    /// configured file, conversations start with an empty context object.
    pub fn load_domain_context(&self) -> Result<String, ConfigError> {
        match &self.context_file {
            None => Ok("{}".into()),
            Some(path) => {
                std::fs::read_to_string(path).map_err(|e| ConfigError::ContextError {
                    path: path.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Whether an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.provider.api_key.is_some()
    }
}
