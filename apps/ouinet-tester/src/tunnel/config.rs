//! Tunnel configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    // Timeouts (seconds)
    pub connection_timeout_secs: u64,
    pub idle_timeout_secs: u64,

    /// Ports a request may target; empty allows any port not blocked.
    pub allowed_ports: Vec<u16>,
    pub blocked_ports: Vec<u16>,

    /// Refuse loopback, private and link-local destinations.
    pub block_private: bool,

    /// `host:port` as requested → address actually dialed.
    pub routes: BTreeMap<String, SocketAddr>,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            connection_timeout_secs: 10,
            idle_timeout_secs: 300, // 5 minutes
            allowed_ports: Vec::new(),
            blocked_ports: vec![25], // SMTP
            block_private: false,
            routes: BTreeMap::new(),
        }
    }
}

impl TunnelConfig {
    /// A tunnel with no traffic either way for this long is closed.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.max(1))
    }

    /// Add a route override.
    pub fn route(mut self, authority: impl Into<String>, to: SocketAddr) -> Self {
        self.routes.insert(authority.into().to_ascii_lowercase(), to);
        self
    }

    pub fn route_for(&self, host: &str, port: u16) -> Option<SocketAddr> {
        let key = if host.contains(':') {
            format!("[{}]:{}", host, port)
        } else {
            format!("{}:{}", host, port)
        };
        self.routes.get(&key.to_ascii_lowercase()).copied()
    }

    /// Overlay `OUINET_TUNNEL_*` variables, read through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("OUINET_TUNNEL_ALLOWED_PORTS") {
            self.allowed_ports = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
        }
        if let Some(b) = var("OUINET_TUNNEL_BLOCK_PRIVATE") {
            self.block_private = b == "1" || b.eq_ignore_ascii_case("true");
        }
        if let Some(val) = var("OUINET_TUNNEL_ROUTES") {
            for entry in val.split(',').map(str::trim).filter(|e| !e.is_empty()) {
                match parse_route(entry) {
                    Some((from, to)) => {
                        self.routes.insert(from, to);
                    }
                    None => warn!(%entry, "ignoring malformed tunnel route"),
                }
            }
        }
    }
}

/// `authority=addr`, e.g. `example.org:443=127.0.0.1:8443`.
pub fn parse_route(entry: &str) -> Option<(String, SocketAddr)> {
    let (from, to) = entry.split_once('=')?;
    let from = from.trim();
    if from.is_empty() || !from.contains(':') {
        return None;
    }
    let to = to.trim().parse().ok()?;
    Some((from.to_ascii_lowercase(), to))
}
