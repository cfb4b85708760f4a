//! Configuration module - per-client n8n settings
//!
//! Settings come from a YAML file (`N8N_CONFIG`) or from environment
//! variables describing a single `default` client. Defaults mirror the
//! documented bundle defaults.

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{N8nError, Result};
use crate::registry::ClientRegistry;

/// Name of the client built from environment variables.
pub const DEFAULT_CLIENT_NAME: &str = "default";

// ═══════════════════════════════════════════════════════════════════════════
// Client Config
// ═══════════════════════════════════════════════════════════════════════════

/// Immutable settings for one n8n target.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub client_id: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_true")]
    pub enable_circuit_breaker: bool,
    #[serde(default = "default_circuit_breaker_threshold")]
    pub circuit_breaker_threshold: u32,
    #[serde(default = "default_circuit_breaker_timeout_seconds")]
    pub circuit_breaker_timeout_seconds: u64,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub default_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub proxy: Option<String>,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("timeout_seconds", &self.timeout_seconds)
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("enable_circuit_breaker", &self.enable_circuit_breaker)
            .field("circuit_breaker_threshold", &self.circuit_breaker_threshold)
            .field(
                "circuit_breaker_timeout_seconds",
                &self.circuit_breaker_timeout_seconds,
            )
            .field("dry_run", &self.dry_run)
            .field("default_headers", &self.default_headers)
            .field("proxy", &self.proxy)
            .finish()
    }
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_circuit_breaker_threshold() -> u32 {
    5
}

fn default_circuit_breaker_timeout_seconds() -> u64 {
    60
}

impl ClientConfig {
    /// Config with every optional setting at its default.
    pub fn new(base_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client_id: client_id.into(),
            auth_token: None,
            timeout_seconds: default_timeout_seconds(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            enable_circuit_breaker: true,
            circuit_breaker_threshold: default_circuit_breaker_threshold(),
            circuit_breaker_timeout_seconds: default_circuit_breaker_timeout_seconds(),
            dry_run: false,
            default_headers: BTreeMap::new(),
            proxy: None,
        }
    }

    /// `{base_url}/webhook/{workflow_id}`, ignoring trailing slashes on the base.
    pub fn webhook_url(&self, workflow_id: &str) -> String {
        format!("{}/webhook/{}", self.base_url.trim_end_matches('/'), workflow_id)
    }

    pub fn health_url(&self) -> String {
        format!("{}/health", self.base_url.trim_end_matches('/'))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn circuit_breaker_timeout(&self) -> Duration {
        Duration::from_secs(self.circuit_breaker_timeout_seconds)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(N8nError::Config("base_url must not be empty".to_string()));
        }
        if self.client_id.trim().is_empty() {
            return Err(N8nError::Config("client_id must not be empty".to_string()));
        }
        if self.timeout_seconds < 1 {
            return Err(N8nError::Config(format!(
                "timeout_seconds must be at least 1 for client '{}'",
                self.client_id
            )));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Bundle Settings
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallbackSettings {
    #[serde(default = "default_route_path")]
    pub route_path: String,
    /// Externally reachable origin of the callback server, e.g. `https://app.example`.
    #[serde(default)]
    pub public_url: Option<String>,
}

fn default_route_path() -> String {
    "/n8n/callback".to_string()
}

impl Default for CallbackSettings {
    fn default() -> Self {
        Self {
            route_path: default_route_path(),
            public_url: None,
        }
    }
}

impl CallbackSettings {
    /// Absolute callback address handed to n8n, if a public origin is known.
    pub fn callback_url(&self) -> Option<String> {
        self.public_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .map(|url| format!("{}{}", url.trim_end_matches('/'), self.route_path))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackingSettings {
    #[serde(default = "default_cleanup_interval_seconds")]
    pub cleanup_interval_seconds: u64,
    #[serde(default = "default_max_request_age_seconds")]
    pub max_request_age_seconds: u64,
}

fn default_cleanup_interval_seconds() -> u64 {
    3600
}

fn default_max_request_age_seconds() -> u64 {
    86400
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            cleanup_interval_seconds: default_cleanup_interval_seconds(),
            max_request_age_seconds: default_max_request_age_seconds(),
        }
    }
}

impl TrackingSettings {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }

    pub fn max_request_age(&self) -> Duration {
        Duration::from_secs(self.max_request_age_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DebugSettings {
    /// Collect requests and responses for `GET /n8n/debug`.
    #[serde(default)]
    pub enabled: bool,
    /// Write lifecycle events to the tracing subscriber.
    #[serde(default = "default_true")]
    pub log_requests: bool,
}

impl Default for DebugSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            log_requests: true,
        }
    }
}

/// Everything needed to build a registry of clients and the callback server.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct N8nSettings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub clients: BTreeMap<String, ClientConfig>,
    #[serde(default)]
    pub callback: CallbackSettings,
    #[serde(default)]
    pub tracking: TrackingSettings,
    #[serde(default)]
    pub debug: DebugSettings,
}

impl N8nSettings {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let settings: Self = serde_yaml::from_str(yaml)
            .map_err(|e| N8nError::Config(format!("invalid n8n settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| N8nError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_yaml_str(&yaml)
    }

    /// Load a single `default` client from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut client = ClientConfig::new(
            var("N8N_BASE_URL").unwrap_or_default(),
            var("N8N_CLIENT_ID").unwrap_or_else(|| "ada-n8n-client".to_string()),
        );
        client.auth_token = var("N8N_AUTH_TOKEN");
        client.proxy = var("N8N_PROXY");
        client.timeout_seconds = parse_var(&var, "N8N_TIMEOUT_SECONDS", client.timeout_seconds)?;
        client.retry_attempts = parse_var(&var, "N8N_RETRY_ATTEMPTS", client.retry_attempts)?;
        client.retry_delay_ms = parse_var(&var, "N8N_RETRY_DELAY_MS", client.retry_delay_ms)?;
        client.enable_circuit_breaker =
            parse_var(&var, "N8N_CIRCUIT_BREAKER", client.enable_circuit_breaker)?;
        client.circuit_breaker_threshold = parse_var(
            &var,
            "N8N_CIRCUIT_BREAKER_THRESHOLD",
            client.circuit_breaker_threshold,
        )?;
        client.circuit_breaker_timeout_seconds = parse_var(
            &var,
            "N8N_CIRCUIT_BREAKER_TIMEOUT_SECONDS",
            client.circuit_breaker_timeout_seconds,
        )?;
        client.dry_run = parse_var(&var, "N8N_DRY_RUN", client.dry_run)?;

        let mut settings = Self::default();
        settings.server.host = var("N8N_HOST").unwrap_or_else(default_host);
        settings.server.port = parse_var(&var, "N8N_PORT", settings.server.port)?;
        if let Some(path) = var("N8N_CALLBACK_PATH") {
            settings.callback.route_path = path;
        }
        settings.callback.public_url = var("N8N_CALLBACK_URL");
        settings.tracking.cleanup_interval_seconds = parse_var(
            &var,
            "N8N_CLEANUP_INTERVAL_SECONDS",
            settings.tracking.cleanup_interval_seconds,
        )?;
        settings.tracking.max_request_age_seconds = parse_var(
            &var,
            "N8N_MAX_REQUEST_AGE_SECONDS",
            settings.tracking.max_request_age_seconds,
        )?;
        settings.debug.enabled = parse_var(&var, "N8N_DEBUG", settings.debug.enabled)?;
        settings.debug.log_requests =
            parse_var(&var, "N8N_LOG_REQUESTS", settings.debug.log_requests)?;
        settings
            .clients
            .insert(DEFAULT_CLIENT_NAME.to_string(), client);

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.clients.is_empty() {
            return Err(N8nError::Config("at least one client must be configured".to_string()));
        }
        for (name, client) in &self.clients {
            client
                .validate()
                .map_err(|e| N8nError::Config(format!("client '{name}': {e}")))?;
        }
        if !self.callback.route_path.starts_with('/') {
            return Err(N8nError::Config(format!(
                "callback.route_path must start with '/', got '{}'",
                self.callback.route_path
            )));
        }
        if self.tracking.cleanup_interval_seconds < 60 {
            return Err(N8nError::Config(
                "tracking.cleanup_interval_seconds must be at least 60".to_string(),
            ));
        }
        if self.tracking.max_request_age_seconds < 300 {
            return Err(N8nError::Config(
                "tracking.max_request_age_seconds must be at least 300".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T, F>(var: &F, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| N8nError::Config(format!("{key}={raw}: {e}"))),
        None => Ok(default),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Shared State
// ═══════════════════════════════════════════════════════════════════════════

/// Shared state for the callback server.
#[derive(Debug, Clone)]
pub struct AppState {
    pub settings: Arc<N8nSettings>,
    pub registry: Arc<ClientRegistry>,
}

impl AppState {
    pub fn new(settings: N8nSettings) -> Result<Self> {
        let registry = ClientRegistry::from_settings(&settings)?;
        Ok(Self {
            settings: Arc::new(settings),
            registry: Arc::new(registry),
        })
    }
}
