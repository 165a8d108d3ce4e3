//! Configuration loading and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

pub const DEFAULT_SERVER_PORT: u16 = 3002;
pub const DEFAULT_RELAY_PORT: u16 = 3000;
pub const DEFAULT_HEARTBEAT_MS: u64 = 30_000;
pub const DEFAULT_SNAPSHOT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_SEND_QUEUE_CAPACITY: usize = 256;

/// Top-level tldraw-relay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay: Option<RelayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<SnapshotConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// The broadcast server that tool calls publish into.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Heartbeat interval on every open stream (default: 30000).
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_interval_ms: u64,

    /// Operations buffered per connection before it is treated as lagging
    /// and disconnected (default: 256).
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,
}

fn default_server_port() -> u16 {
    DEFAULT_SERVER_PORT
}

fn default_heartbeat_ms() -> u64 {
    DEFAULT_HEARTBEAT_MS
}

fn default_send_queue_capacity() -> usize {
    DEFAULT_SEND_QUEUE_CAPACITY
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: None,
            port: DEFAULT_SERVER_PORT,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_MS,
            send_queue_capacity: DEFAULT_SEND_QUEUE_CAPACITY,
        }
    }
}

/// The browser-facing relay proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    #[serde(default = "default_relay_port")]
    pub port: u16,

    /// Broadcast stream to attach to (default: http://localhost:3002/api/tldraw-events).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_url: Option<String>,

    /// Where snapshot posts are forwarded (default: http://localhost:3002/api/snapshot).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_url: Option<String>,
}

fn default_relay_port() -> u16 {
    DEFAULT_RELAY_PORT
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: None,
            port: DEFAULT_RELAY_PORT,
            upstream_url: None,
            snapshot_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotConfig {
    #[serde(default = "default_snapshot_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_snapshot_timeout_ms() -> u64 {
    DEFAULT_SNAPSHOT_TIMEOUT_MS
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "tldraw_relay_gateway=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| RelayError::Config(e.to_string()))?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned())
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw)?;

        json5::from_str(&substituted).map_err(|e| RelayError::Config(e.to_string()))
    }

    /// Default config file location.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn server_bind(&self) -> String {
        self.server
            .as_ref()
            .and_then(|s| s.bind.clone())
            .unwrap_or_else(|| "127.0.0.1".to_string())
    }

    pub fn server_port(&self) -> u16 {
        self.server
            .as_ref()
            .map(|s| s.port)
            .unwrap_or(DEFAULT_SERVER_PORT)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(
            self.server
                .as_ref()
                .map(|s| s.heartbeat_interval_ms)
                .unwrap_or(DEFAULT_HEARTBEAT_MS),
        )
    }

    pub fn send_queue_capacity(&self) -> usize {
        self.server
            .as_ref()
            .map(|s| s.send_queue_capacity)
            .unwrap_or(DEFAULT_SEND_QUEUE_CAPACITY)
    }

    pub fn relay_bind(&self) -> String {
        self.relay
            .as_ref()
            .and_then(|r| r.bind.clone())
            .unwrap_or_else(|| "127.0.0.1".to_string())
    }

    pub fn relay_port(&self) -> u16 {
        self.relay
            .as_ref()
            .map(|r| r.port)
            .unwrap_or(DEFAULT_RELAY_PORT)
    }

    pub fn upstream_url(&self) -> String {
        self.relay
            .as_ref()
            .and_then(|r| r.upstream_url.clone())
            .unwrap_or_else(|| format!("http://localhost:{}/api/tldraw-events", self.server_port()))
    }

    pub fn snapshot_url(&self) -> String {
        self.relay
            .as_ref()
            .and_then(|r| r.snapshot_url.clone())
            .unwrap_or_else(|| format!("http://localhost:{}/api/snapshot", self.server_port()))
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_millis(
            self.snapshot
                .as_ref()
                .map(|s| s.timeout_ms)
                .unwrap_or(DEFAULT_SNAPSHOT_TIMEOUT_MS),
        )
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if let Some(server) = &self.server {
            if server.heartbeat_interval_ms == 0 {
                errors.push("server.heartbeatIntervalMs must be greater than 0".to_string());
            } else if server.heartbeat_interval_ms > 60_000 {
                warnings.push(format!(
                    "server.heartbeatIntervalMs is {} ms; idle proxies commonly cut streams after 60 s",
                    server.heartbeat_interval_ms
                ));
            }
            if server.send_queue_capacity == 0 {
                errors.push("server.sendQueueCapacity must be greater than 0".to_string());
            }
        }

        if let Some(snapshot) = &self.snapshot {
            if snapshot.timeout_ms == 0 {
                errors.push("snapshot.timeoutMs must be greater than 0".to_string());
            }
        }

        if let Some(relay) = &self.relay {
            for (name, url) in [
                ("relay.upstreamUrl", &relay.upstream_url),
                ("relay.snapshotUrl", &relay.snapshot_url),
            ] {
                if let Some(url) = url {
                    if !url.starts_with("http://") && !url.starts_with("https://") {
                        errors.push(format!("{name} must be an http(s) URL, got '{url}'"));
                    }
                }
            }
        }

        if self.server.is_some() && self.relay.is_some() && self.server_port() == self.relay_port()
            && self.server_bind() == self.relay_bind()
        {
            errors.push(format!(
                "server and relay cannot both listen on {}:{}",
                self.server_bind(),
                self.server_port()
            ));
        }

        (warnings, errors)
    }
}

/// Base directory for tldraw-relay data: `~/.tldraw_relay/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tldraw_relay")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server_port(), 3002);
        assert_eq!(config.relay_port(), 3000);
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.snapshot_timeout(), Duration::from_millis(5000));
        assert_eq!(config.send_queue_capacity(), 256);
        assert_eq!(config.upstream_url(), "http://localhost:3002/api/tldraw-events");
        assert_eq!(config.snapshot_url(), "http://localhost:3002/api/snapshot");
    }

    #[test]
    fn test_section_defaults() {
        let config: Config = json5::from_str("{ server: {}, snapshot: {} }").unwrap();
        let server = config.server.as_ref().unwrap();
        assert_eq!(server.port, 3002);
        assert_eq!(server.heartbeat_interval_ms, 30_000);
        assert_eq!(config.snapshot.as_ref().unwrap().timeout_ms, 5000);
    }

    #[test]
    fn test_upstream_follows_server_port() {
        let config: Config = json5::from_str("{ server: { port: 4100 } }").unwrap();
        assert_eq!(config.upstream_url(), "http://localhost:4100/api/tldraw-events");
    }

    #[test]
    fn test_env_var_substitution() {
        // SAFETY: test-only; the variable name is unique to this test
        unsafe { std::env::set_var("TEST_TR_UPSTREAM", "http://draw.internal:9000/api/tldraw-events") };
        let input = r#"{"relay": {"upstreamUrl": "${TEST_TR_UPSTREAM}"}}"#;
        let result = substitute_env_vars(input).unwrap();
        assert!(result.contains("draw.internal:9000"));
        unsafe { std::env::remove_var("TEST_TR_UPSTREAM") };
    }

    #[test]
    fn test_env_var_missing() {
        let result = substitute_env_vars(r#"{"key": "${NONEXISTENT_VAR_TR_TEST}"}"#).unwrap();
        assert_eq!(result, r#"{"key": ""}"#);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                // JSON5 comments are allowed
                server: { port: 4002, heartbeatIntervalMs: 1000 },
                relay: { port: 4000 },
                logging: { format: "json" },
            }"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server_port(), 4002);
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(1));
        assert_eq!(config.relay_port(), 4000);
        assert_eq!(config.logging.unwrap().format, "json");
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let config = Config::load(Path::new("/nonexistent/tldraw-relay/config.json")).unwrap();
        assert!(config.server.is_none());
    }

    #[test]
    fn test_load_invalid_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ server: ").unwrap();
        assert!(matches!(Config::load(&path), Err(RelayError::Config(_))));
    }

    #[test]
    fn test_logging_config_defaults() {
        let config: Config = json5::from_str(r#"{ "logging": {} }"#).unwrap();
        let logging = config.logging.expect("logging should be present");
        assert_eq!(logging.format, "plain");
        assert!(logging.level.is_none());
        assert_eq!(logging.output, "stderr");
        assert!(logging.filters.is_empty());
    }

    #[test]
    fn test_validate_zero_values() {
        let config: Config = json5::from_str(
            "{ server: { heartbeatIntervalMs: 0, sendQueueCapacity: 0 }, snapshot: { timeoutMs: 0 } }",
        )
        .unwrap();
        let (_warnings, errors) = config.validate();
        assert_eq!(errors.len(), 3, "got: {errors:?}");
    }

    #[test]
    fn test_validate_bad_url_and_port_clash() {
        let config: Config = json5::from_str(
            "{ server: { port: 3100 }, relay: { port: 3100, upstreamUrl: 'ftp://nope' } }",
        )
        .unwrap();
        let (_warnings, errors) = config.validate();
        assert!(errors.iter().any(|e| e.contains("relay.upstreamUrl")), "got: {errors:?}");
        assert!(errors.iter().any(|e| e.contains("cannot both listen")), "got: {errors:?}");
    }

    #[test]
    fn test_validate_long_heartbeat_warns() {
        let config: Config = json5::from_str("{ server: { heartbeatIntervalMs: 120000 } }").unwrap();
        let (warnings, errors) = config.validate();
        assert!(errors.is_empty());
        assert_eq!(warnings.len(), 1);
    }
}
