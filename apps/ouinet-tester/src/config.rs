//! Tester configuration: defaults, then an optional TOML file, then
//! `OUINET_*` environment overrides.

use crate::tunnel::TunnelConfig;
use anyhow::{Context, Result};
use core_lifecycle::{PollerConfig, ServiceConfig};
use core_tagging::{TagFormat, GROUP_HEADER};
use core_trust::{ClientAuthPolicy, TrustPolicy, CA_CERT_FILE};
use edge_client::ProxyEndpoint;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "ouinet-tester.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub proxy_host: String,
    pub proxy_port: u16,
    /// Service state directory; holds the CA certificate.
    pub repo_dir: PathBuf,
    /// Defaults to pinning `<repo_dir>/ssl-ca-cert.pem`.
    pub trust: Option<TrustPolicy>,
    pub client_auth: ClientAuthPolicy,
    pub group_header: String,
    pub tag_format: TagFormat,
    pub poll_interval_ms: u64,
    pub sample_timeout_ms: u64,
    pub request_timeout_secs: u64,
    pub log_dir: PathBuf,
    pub service: ServiceConfig,
    pub tunnel: TunnelConfig,
}

impl Default for Config {
    fn default() -> Self {
        let endpoint = ProxyEndpoint::default();
        Self {
            proxy_host: endpoint.host,
            proxy_port: endpoint.port,
            repo_dir: PathBuf::from("ouinet-repo"),
            trust: None,
            client_auth: ClientAuthPolicy::default(),
            group_header: GROUP_HEADER.to_string(),
            tag_format: TagFormat::default(),
            poll_interval_ms: 1000,
            sample_timeout_ms: 5000,
            request_timeout_secs: 30,
            log_dir: PathBuf::from("logs"),
            service: ServiceConfig::default(),
            tunnel: TunnelConfig::default(),
        }
    }
}

impl Config {
    /// Load `path`, or [`DEFAULT_CONFIG_FILE`] if present, then apply the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?,
            None => Self::default(),
        };
        cfg.apply_env(|k| std::env::var(k).ok());
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    /// Env overrides: OUINET_PROXY_PORT, OUINET_REPO_DIR, OUINET_POLL_MS,
    /// OUINET_GROUP_HEADER, OUINET_CLIENT_BIN, plus the tunnel's own.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(p) = var("OUINET_PROXY_PORT") {
            match p.parse::<u16>() {
                Ok(n) => self.proxy_port = n,
                Err(_) => warn!(value = %p, "ignoring invalid OUINET_PROXY_PORT"),
            }
        }
        if let Some(d) = var("OUINET_REPO_DIR") {
            self.repo_dir = PathBuf::from(d);
        }
        if let Some(ms) = var("OUINET_POLL_MS") {
            match ms.parse::<u64>() {
                Ok(n) if n > 0 => self.poll_interval_ms = n,
                _ => warn!(value = %ms, "ignoring invalid OUINET_POLL_MS"),
            }
        }
        if let Some(h) = var("OUINET_GROUP_HEADER") {
            self.group_header = h;
        }
        if let Some(bin) = var("OUINET_CLIENT_BIN") {
            self.service.program = PathBuf::from(bin);
        }
        self.tunnel.apply_env(&var);
    }

    pub fn endpoint(&self) -> ProxyEndpoint {
        ProxyEndpoint::new(self.proxy_host.clone(), self.proxy_port)
    }

    pub fn ca_cert_path(&self) -> PathBuf {
        self.repo_dir.join(CA_CERT_FILE)
    }

    pub fn trust_policy(&self) -> TrustPolicy {
        self.trust.clone().unwrap_or_else(|| TrustPolicy::PinnedAnchor(self.ca_cert_path()))
    }

    /// Service options with the repo dir and listen address taken from this config.
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            repo_dir: self.repo_dir.clone(),
            listen_on_tcp: self.endpoint().authority(),
            ..self.service.clone()
        }
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            sample_timeout: Duration::from_millis(self.sample_timeout_ms.max(1)),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}
