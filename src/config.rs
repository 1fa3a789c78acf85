//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `PORT`, `BASE_PATH`, `IDLE_TIMEOUT_MS`,
//!    `SWEEP_INTERVAL_MS`, `MAX_CONNECTIONS`, `SSE_HEARTBEAT_MS`,
//!    `ALLOWED_ORIGINS`
//! 2. **Config file** — path via `--config <path>`, or `sshmux.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! port = 8080
//! base_path = ""
//! max_connections = 100
//! idle_timeout_ms = 600000
//! sweep_interval_ms = 30000
//! sse_heartbeat_ms = 15000
//! allowed_origins = ["*"]
//! default_cols = 120
//! default_rows = 30
//!
//! [ssh]
//! ready_timeout_ms = 20000
//! keepalive_interval_ms = 15000
//! keepalive_max = 3
//! term = "xterm-256color"
//!
//! [logging]
//! level = "info"
//! ```

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server and session-pool settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// TCP port to bind (default 8080).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Path prefix for all routes. Normalized to a leading slash with no
    /// trailing slash; empty means no prefix.
    #[serde(default)]
    pub base_path: String,
    /// Maximum concurrent managed sessions (default 100).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Default idle budget in milliseconds before a session with no open
    /// peers is reaped (default 600 000).
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Milliseconds between idle-sweeper scans (default 30 000).
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Milliseconds between SSE liveness comments (default 15 000).
    #[serde(default = "default_sse_heartbeat_ms")]
    pub sse_heartbeat_ms: u64,
    /// Origins allowed by CORS; `*` allows any origin (default `["*"]`).
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    /// Default PTY columns for new sessions (default 120).
    #[serde(default = "default_cols")]
    pub default_cols: u16,
    /// Default PTY rows for new sessions (default 30).
    #[serde(default = "default_rows")]
    pub default_rows: u16,
}

/// SSH transport tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    /// Milliseconds to wait for transport + auth + shell (default 20 000).
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
    /// Milliseconds between transport keepalives (default 15 000).
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,
    /// Unanswered keepalives before the transport is dropped (default 3).
    #[serde(default = "default_keepalive_max")]
    pub keepalive_max: usize,
    /// TERM value requested with the PTY (default `xterm-256color`).
    #[serde(default = "default_term")]
    pub term: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_port() -> u16 {
    8080
}
fn default_max_connections() -> usize {
    100
}
fn default_idle_timeout_ms() -> u64 {
    600_000
}
fn default_sweep_interval_ms() -> u64 {
    30_000
}
fn default_sse_heartbeat_ms() -> u64 {
    15_000
}
fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}
fn default_cols() -> u16 {
    120
}
fn default_rows() -> u16 {
    30
}
fn default_ready_timeout_ms() -> u64 {
    20_000
}
fn default_keepalive_interval_ms() -> u64 {
    15_000
}
fn default_keepalive_max() -> usize {
    3
}
fn default_term() -> String {
    "xterm-256color".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            base_path: String::new(),
            max_connections: default_max_connections(),
            idle_timeout_ms: default_idle_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            sse_heartbeat_ms: default_sse_heartbeat_ms(),
            allowed_origins: default_allowed_origins(),
            default_cols: default_cols(),
            default_rows: default_rows(),
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            ready_timeout_ms: default_ready_timeout_ms(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
            keepalive_max: default_keepalive_max(),
            term: default_term(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Normalize a base path: leading slash, no trailing slash, empty stays empty.
///
/// - `""` and `"/"` → `""`
/// - `"api"` → `"/api"`
/// - `"/api/"` → `"/api"`
pub fn normalize_base_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() || trimmed == "/" {
        return String::new();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file (panics on failure). Otherwise looks
    /// for `sshmux.toml` in the current directory, falling back to compiled
    /// defaults.
    pub fn load(path: Option<&str>) -> Self {
        let mut config: Config = if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .unwrap_or_else(|e| panic!("Failed to read config file {p}: {e}"));
            toml::from_str(&content)
                .unwrap_or_else(|e| panic!("Failed to parse config file {p}: {e}"))
        } else if Path::new("sshmux.toml").exists() {
            let content =
                std::fs::read_to_string("sshmux.toml").expect("Failed to read sshmux.toml");
            toml::from_str(&content).expect("Failed to parse sshmux.toml")
        } else {
            Config {
                server: ServerConfig::default(),
                ssh: SshConfig::default(),
                logging: LoggingConfig::default(),
            }
        };

        // Env var overrides
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(port) = port.parse() {
                config.server.port = port;
            }
        }
        if let Ok(base) = std::env::var("BASE_PATH") {
            config.server.base_path = base;
        }
        if let Ok(ms) = std::env::var("IDLE_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                config.server.idle_timeout_ms = ms;
            }
        }
        if let Ok(ms) = std::env::var("SWEEP_INTERVAL_MS") {
            if let Ok(ms) = ms.parse() {
                config.server.sweep_interval_ms = ms;
            }
        }
        if let Ok(max) = std::env::var("MAX_CONNECTIONS") {
            if let Ok(max) = max.parse() {
                config.server.max_connections = max;
            }
        }
        if let Ok(ms) = std::env::var("SSE_HEARTBEAT_MS") {
            if let Ok(ms) = ms.parse() {
                config.server.sse_heartbeat_ms = ms;
            }
        }
        if let Ok(origins) = std::env::var("ALLOWED_ORIGINS") {
            config.server.allowed_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }

        config.server.base_path = normalize_base_path(&config.server.base_path);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_path_normalization() {
        assert_eq!(normalize_base_path(""), "");
        assert_eq!(normalize_base_path("/"), "");
        assert_eq!(normalize_base_path("api"), "/api");
        assert_eq!(normalize_base_path("/api"), "/api");
        assert_eq!(normalize_base_path("/api/"), "/api");
        assert_eq!(normalize_base_path("api/v1/"), "/api/v1");
        assert_eq!(normalize_base_path("  /ssh  "), "/ssh");
    }

    #[test]
    fn defaults_match_documented_values() {
        let server = ServerConfig::default();
        assert_eq!(server.port, 8080);
        assert_eq!(server.max_connections, 100);
        assert_eq!(server.idle_timeout_ms, 600_000);
        assert_eq!(server.sweep_interval_ms, 30_000);
        assert_eq!(server.sse_heartbeat_ms, 15_000);
        assert_eq!(server.allowed_origins, vec!["*".to_string()]);
        assert_eq!((server.default_cols, server.default_rows), (120, 30));

        let ssh = SshConfig::default();
        assert_eq!(ssh.ready_timeout_ms, 20_000);
        assert_eq!(ssh.keepalive_interval_ms, 15_000);
        assert_eq!(ssh.keepalive_max, 3);
        assert_eq!(ssh.term, "xterm-256color");
    }

    #[test]
    fn toml_sections_are_optional() {
        let config: Config = toml::from_str("[server]\nport = 9000\n").unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.ssh.keepalive_max, 3);
        assert_eq!(config.logging.level, "info");
    }
}
