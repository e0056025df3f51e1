//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.chatgate/config.json`) and environment.
//! Every section has defaults, so a missing file or an empty `{}` yields a working gateway.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Where the chat-network bridge sidecar listens.
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Credential persistence and startup behaviour.
    #[serde(default)]
    pub session: SessionConfig,

    /// Pairing (QR) challenge lifetime and display.
    #[serde(default)]
    pub pairing: PairingConfig,

    /// Reconnect backoff tuning.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Activity log sizing.
    #[serde(default)]
    pub activity: ActivityConfig,
}

/// Gateway bind, port, and auth settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// HTTP port (default 3000). Overridden by PORT env.
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,

    /// Auth settings. When absent, defaults to no auth for loopback bind.
    #[serde(default)]
    pub auth: GatewayAuthConfig,
}

/// Gateway auth: token or none (loopback-only when none).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayAuthConfig {
    /// "none" = no shared secret (only safe when bind is loopback). "token" = require a bearer token.
    #[serde(default)]
    pub mode: GatewayAuthMode,

    /// Shared secret for HTTP requests. Overridden by CHATGATE_GATEWAY_TOKEN env.
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayAuthMode {
    /// No auth; allow only when bind is loopback.
    #[default]
    None,

    /// Require `Authorization: Bearer <token>` on every route except `GET /`.
    Token,
}

fn default_gateway_port() -> u16 {
    3000
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
            auth: GatewayAuthConfig::default(),
        }
    }
}

/// Bridge sidecar connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// WebSocket URL of the bridge. Overridden by CHATGATE_BRIDGE_URL env.
    #[serde(default = "default_bridge_url")]
    pub url: String,

    /// Seconds to wait for a bridge response before treating the request as failed.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_bridge_url() -> String {
    "ws://127.0.0.1:3100/bridge".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: default_bridge_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Credential file location and startup wipe switch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Credential file (default `<config dir>/session/credentials.json`).
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,

    /// Wipe persisted credentials before connecting. Overridden by FORCE_DELETE_SESSION env.
    #[serde(default)]
    pub force_delete_on_startup: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingConfig {
    /// How long a QR code stays valid before the session is recycled.
    #[serde(default = "default_expiry_seconds")]
    pub expiry_seconds: u64,

    /// Print each accepted QR code to the log as unicode blocks.
    #[serde(default = "default_true")]
    pub print_terminal: bool,
}

fn default_expiry_seconds() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            expiry_seconds: default_expiry_seconds(),
            print_terminal: true,
        }
    }
}

impl PairingConfig {
    pub fn expiry(&self) -> Duration {
        Duration::from_secs(self.expiry_seconds.max(1))
    }
}

/// Backoff parameters: `base * growth^min(attempt, maxExponent)`, clamped to `ceilingSeconds`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectConfig {
    #[serde(default = "default_base_seconds")]
    pub base_seconds: f64,
    #[serde(default = "default_growth")]
    pub growth: f64,
    #[serde(default = "default_max_exponent")]
    pub max_exponent: u32,
    #[serde(default = "default_ceiling_seconds")]
    pub ceiling_seconds: f64,
    /// Fixed delay after an unscanned QR code expires.
    #[serde(default = "default_short_delay_seconds")]
    pub pairing_expired_delay_seconds: f64,
    /// Fixed delay after logout or delete-session before a fresh QR code is requested.
    #[serde(default = "default_short_delay_seconds")]
    pub action_delay_seconds: f64,
    /// Upper bound of random jitter added to scheduled reconnects; 0 disables it.
    #[serde(default)]
    pub jitter_ms: u64,
}

fn default_base_seconds() -> f64 {
    3.0
}

fn default_growth() -> f64 {
    1.5
}

fn default_max_exponent() -> u32 {
    5
}

fn default_ceiling_seconds() -> f64 {
    30.0
}

fn default_short_delay_seconds() -> f64 {
    3.0
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_seconds: default_base_seconds(),
            growth: default_growth(),
            max_exponent: default_max_exponent(),
            ceiling_seconds: default_ceiling_seconds(),
            pairing_expired_delay_seconds: default_short_delay_seconds(),
            action_delay_seconds: default_short_delay_seconds(),
            jitter_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityConfig {
    #[serde(default = "default_activity_capacity")]
    pub capacity: usize,
}

fn default_activity_capacity() -> usize {
    100
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            capacity: default_activity_capacity(),
        }
    }
}

/// Trimmed, non-empty value of an environment variable.
fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve the gateway token: env CHATGATE_GATEWAY_TOKEN overrides config.
pub fn resolve_gateway_token(config: &Config) -> Option<String> {
    env_non_empty("CHATGATE_GATEWAY_TOKEN").or_else(|| {
        config
            .gateway
            .auth
            .token
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Resolve the HTTP port: env PORT overrides config when it parses.
pub fn resolve_gateway_port(config: &Config) -> u16 {
    env_non_empty("PORT")
        .and_then(|p| p.parse().ok())
        .unwrap_or(config.gateway.port)
}

/// Resolve the bridge URL: env CHATGATE_BRIDGE_URL overrides config.
pub fn resolve_bridge_url(config: &Config) -> String {
    env_non_empty("CHATGATE_BRIDGE_URL").unwrap_or_else(|| config.bridge.url.clone())
}

/// Resolve the startup wipe switch: env FORCE_DELETE_SESSION ("1", "true", "yes") overrides config.
pub fn resolve_force_delete(config: &Config) -> bool {
    match env_non_empty("FORCE_DELETE_SESSION") {
        Some(v) => parse_flag(&v),
        None => config.session.force_delete_on_startup,
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("CHATGATE_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".chatgate").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

fn config_dir(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Resolve the credential file: `session.credentialsPath` (relative paths resolved against the
/// config file's parent), otherwise `session/credentials.json` next to the config file.
pub fn resolve_credentials_path(config: &Config, config_path: &Path) -> PathBuf {
    let parent = config_dir(config_path);
    match &config.session.credentials_path {
        Some(p) if !p.as_os_str().is_empty() => {
            if p.is_absolute() {
                p.clone()
            } else {
                parent.join(p)
            }
        }
        _ => parent.join("session").join("credentials.json"),
    }
}

/// Load config from the default path (or CHATGATE_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
