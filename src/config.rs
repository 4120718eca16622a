use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::live::ReconnectPolicy;
use crate::suggest::{DEFAULT_ENDPOINT, DEFAULT_MODEL};
use crate::sync::OrderingPolicy;

// ── AI section ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// Generative-language host, without the `/v1beta/...` path
    #[serde(default = "default_ai_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_ai_model")]
    pub model: String,
    /// Sent as the `key` query parameter. Suggestions are disabled without it.
    pub api_key: Option<String>,
}

fn default_ai_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_ai_model() -> String {
    DEFAULT_MODEL.to_string()
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            endpoint: default_ai_endpoint(),
            model: default_ai_model(),
            api_key: None,
        }
    }
}

// ── Live-update section ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    /// Open the push connection at all
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Reconnect with exponential backoff after the connection drops
    #[serde(default = "default_true")]
    pub reconnect: bool,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Consecutive failed attempts before giving up (unset = never give up)
    pub max_attempts: Option<u32>,
}

fn default_true() -> bool {
    true
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reconnect: true,
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_attempts: None,
        }
    }
}

impl LiveConfig {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let initial = Duration::from_millis(self.initial_backoff_ms.max(1));
        ReconnectPolicy {
            enabled: self.reconnect,
            initial_backoff: initial,
            max_backoff: Duration::from_millis(self.max_backoff_ms).max(initial),
            max_attempts: self.max_attempts,
        }
    }
}

// ── Config file ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    /// REST backend base URL
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    /// Push channel URL. Derived from `backend_url` when unset.
    pub ws_url: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// How concurrent refresh responses are applied
    #[serde(default)]
    pub ordering: OrderingPolicy,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub live: LiveConfig,
}

fn default_backend_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_request_timeout_secs() -> u64 {
    15
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            ws_url: None,
            request_timeout_secs: default_request_timeout_secs(),
            ordering: OrderingPolicy::default(),
            ai: AiConfig::default(),
            live: LiveConfig::default(),
        }
    }
}

impl ConfigFile {
    /// Load from disk, or return a default config if the file doesn't exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file at {}", path.display()))
    }

    /// Write a starter config file to disk (only if it doesn't exist).
    pub fn write_default_if_missing(path: &Path) -> Result<PathBuf> {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(path, DEFAULT_CONFIG_TOML)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path.to_path_buf())
    }
}

// ── Resolved runtime config (after merging file + CLI overrides) ──────────────

/// Values given on the command line or through the environment (clap `env`).
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub backend_url: Option<String>,
    pub ws_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub backend_url: String,
    /// `None` when live updates are disabled or no URL could be derived
    pub ws_url: Option<String>,
    pub request_timeout: Duration,
    pub ordering: OrderingPolicy,
    pub ai_endpoint: String,
    pub ai_model: String,
    pub ai_api_key: Option<String>,
    pub reconnect: ReconnectPolicy,
}

impl ResolvedConfig {
    /// Merge config file with CLI overrides.
    /// Priority: CLI args > env vars (handled by clap) > config file > built-in defaults
    pub fn resolve(file: &ConfigFile, overrides: &Overrides) -> Self {
        let backend_url = overrides
            .backend_url
            .clone()
            .unwrap_or_else(|| file.backend_url.clone());

        let ws_url = if file.live.enabled {
            overrides
                .ws_url
                .clone()
                .or_else(|| file.ws_url.clone())
                .or_else(|| derive_ws_url(&backend_url))
        } else {
            None
        };

        Self {
            ws_url,
            backend_url,
            request_timeout: Duration::from_secs(file.request_timeout_secs.max(1)),
            ordering: file.ordering,
            ai_endpoint: file.ai.endpoint.clone(),
            ai_model: overrides.model.clone().unwrap_or_else(|| file.ai.model.clone()),
            ai_api_key: overrides
                .api_key
                .clone()
                .or_else(|| file.ai.api_key.clone())
                .filter(|k| !k.trim().is_empty()),
            reconnect: file.live.reconnect_policy(),
        }
    }
}

/// `http://host:port/anything` → `ws://host:port/ws` (`https` → `wss`).
pub fn derive_ws_url(backend_url: &str) -> Option<String> {
    let url = Url::parse(backend_url).ok()?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    let host = url.host_str()?;
    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    Some(format!("{scheme}://{authority}/ws"))
}

// ── Paths ─────────────────────────────────────────────────────────────────────

pub fn config_path() -> PathBuf {
    dirs_config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskwire")
        .join("config.toml")
}

fn dirs_config_dir() -> Option<PathBuf> {
    // XDG_CONFIG_HOME or ~/.config on Linux/macOS, %APPDATA% on Windows
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| std::env::var("APPDATA").ok().map(PathBuf::from))
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        })
}

// ── Default config template written on first run ──────────────────────────────

const DEFAULT_CONFIG_TOML: &str = r#"# taskwire configuration
# Run `taskwire --init` to regenerate this file.

# REST backend serving /tasks
backend_url = "http://localhost:8080"

# Push channel for live updates. Derived from backend_url when unset
# (http → ws, https → wss, path /ws).
# ws_url = "ws://localhost:8080/ws"

request_timeout_secs = 15

# How concurrent refreshes are applied:
#   "last-response-wins" : whichever response arrives last is shown
#   "drop-stale"         : responses to requests older than the shown list are dropped
ordering = "last-response-wins"

# ── AI suggestions ───────────────────────────────────────────────────────────
[ai]
endpoint = "https://generativelanguage.googleapis.com"
model    = "gemini-pro"
# api_key = "..."        # or set TASKWIRE_AI_API_KEY

# ── Live updates ─────────────────────────────────────────────────────────────
[live]
enabled            = true
reconnect          = true
initial_backoff_ms = 500
max_backoff_ms     = 30000
# max_attempts     = 10   # give up after this many consecutive failures
"#;
