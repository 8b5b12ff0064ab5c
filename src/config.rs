//! Application configuration.
//!
//! Defaults can be overridden by a TOML config file and `BARKEEP_*`
//! environment variables (file < environment < CLI flags).

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::session::ManagerConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub sessions: SessionsConfig,
    pub watcher: WatcherConfig,
    pub realtime: RealtimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Directory served as the SPA fallback; empty disables it.
    pub static_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8420,
            static_dir: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// CLI binary launched per session.
    pub command: String,
    /// Arguments passed to the binary.
    pub args: Vec<String>,
    /// Maximum concurrently non-terminated sessions.
    pub max_sessions: usize,
    /// Seconds between the interrupt signal and the forced kill.
    pub graceful_timeout_secs: u64,
    /// Output history kept per session.
    pub ring_capacity: usize,
    /// Queue capacity per output subscriber.
    pub subscriber_queue: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec!["--dangerously-skip-permissions".to_string()],
            max_sessions: 10,
            graceful_timeout_secs: 5,
            ring_capacity: 1000,
            subscriber_queue: 100,
        }
    }
}

impl SessionsConfig {
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            command: self.command.clone(),
            args: self.args.clone(),
            max_sessions: self.max_sessions,
            graceful_timeout: Duration::from_secs(self.graceful_timeout_secs),
            ring_capacity: self.ring_capacity,
            subscriber_queue: self.subscriber_queue,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Files-per-drink divisor for the derived metric.
    pub drink_ratio: u64,
    /// Quiet interval before a recount, in milliseconds.
    pub debounce_ms: u64,
    /// Depth limit for tree snapshots.
    pub tree_depth: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            drink_ratio: 20,
            debounce_ms: 500,
            tree_depth: 3,
        }
    }
}

impl WatcherConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Outbound frame queue capacity per client.
    pub outbound_queue: usize,
    /// Keepalive ping interval in seconds.
    pub ping_interval_secs: u64,
    /// Read deadline in seconds, refreshed on any inbound frame.
    pub read_deadline_secs: u64,
    /// Per-frame write deadline in seconds.
    pub write_deadline_secs: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            outbound_queue: 256,
            ping_interval_secs: 30,
            read_deadline_secs: 60,
            write_deadline_secs: 10,
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional TOML file plus `BARKEEP_*`
    /// environment overrides (e.g. `BARKEEP_SERVER__PORT=9000`).
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        builder = builder.add_source(Environment::with_prefix("BARKEEP").separator("__"));

        let config = builder.build().context("assembling configuration")?;
        config
            .try_deserialize()
            .context("deserializing configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_served_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.server.port, 8420);
        assert_eq!(cfg.sessions.max_sessions, 10);
        assert_eq!(cfg.sessions.graceful_timeout_secs, 5);
        assert_eq!(cfg.sessions.ring_capacity, 1000);
        assert_eq!(cfg.sessions.subscriber_queue, 100);
        assert_eq!(cfg.watcher.drink_ratio, 20);
        assert_eq!(cfg.watcher.debounce_ms, 500);
        assert_eq!(cfg.watcher.tree_depth, 3);
        assert_eq!(cfg.realtime.outbound_queue, 256);
        assert_eq!(cfg.realtime.ping_interval_secs, 30);
        assert_eq!(cfg.realtime.read_deadline_secs, 60);
        assert_eq!(cfg.realtime.write_deadline_secs, 10);
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let cfg = AppConfig::load(None).unwrap();
        assert_eq!(cfg.server.port, AppConfig::default().server.port);
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            "[server]\nport = 9999\n\n[sessions]\nmax_sessions = 3\ncommand = \"cat\"\n"
        )
        .unwrap();

        let cfg = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.server.port, 9999);
        assert_eq!(cfg.sessions.max_sessions, 3);
        assert_eq!(cfg.sessions.command, "cat");
        // Untouched sections keep their defaults.
        assert_eq!(cfg.watcher.drink_ratio, 20);
    }
}
