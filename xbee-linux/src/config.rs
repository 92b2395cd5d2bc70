//! Load config from file and environment.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Daemon configuration. File: ~/.config/xbee-relay/config.toml or /etc/xbee-relay/config.toml.
/// Env overrides: XBEE_RELAY_HOST_PORT, XBEE_RELAY_DISCOVERY_PORT, XBEE_RELAY_CHUNK_SIZE, XBEE_RELAY_MAX_FRAME_SIZE.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Host command channel port on localhost (default 7878).
    #[serde(default = "default_host_port")]
    pub host_port: u16,
    /// UDP port bridge advertisements arrive on (default 45680).
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Bridge TCP connect + handshake timeout (default 10).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle read timeout for HTTP transfer sources: max wait for the next body bytes (default 30).
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default)]
    pub relay: xbee_core::Config,
}

fn default_host_port() -> u16 {
    7878
}
fn default_discovery_port() -> u16 {
    45680
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_http_timeout_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host_port: default_host_port(),
            discovery_port: default_discovery_port(),
            connect_timeout_secs: default_connect_timeout_secs(),
            http_timeout_secs: default_http_timeout_secs(),
            relay: xbee_core::Config::default(),
        }
    }
}

impl Config {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Defaults, overlaid by the first config file found, overlaid by env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |k| std::env::var(k).ok());
    c
}

/// Apply overrides from `lookup`; unparsable values are ignored.
fn apply_env(c: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(p) = lookup("XBEE_RELAY_HOST_PORT").and_then(|s| s.parse().ok()) {
        c.host_port = p;
    }
    if let Some(p) = lookup("XBEE_RELAY_DISCOVERY_PORT").and_then(|s| s.parse().ok()) {
        c.discovery_port = p;
    }
    if let Some(n) = lookup("XBEE_RELAY_CHUNK_SIZE").and_then(|s| s.parse().ok()) {
        c.relay.chunk_size = n;
    }
    if let Some(n) = lookup("XBEE_RELAY_MAX_FRAME_SIZE").and_then(|s| s.parse().ok()) {
        c.relay.max_frame_size = n;
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/xbee-relay/config.toml"));
    }
    out.push(PathBuf::from("/etc/xbee-relay/config.toml"));
    out
}

/// First existing path wins, even if it fails to parse.
fn load_file() -> Option<Config> {
    let path = config_paths().into_iter().find(|p| p.exists())?;
    match read_file(&path) {
        Ok(c) => {
            tracing::info!(path = %path.display(), "loaded config");
            Some(c)
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), "ignoring config file: {}", e);
            None
        }
    }
}

pub fn read_file(path: &Path) -> anyhow::Result<Config> {
    let s = std::fs::read_to_string(path)?;
    Ok(toml::from_str::<Config>(&s)?)
}
