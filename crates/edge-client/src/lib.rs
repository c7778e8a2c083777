//! HTTP client bound to the local content-delivery proxy.
//!
//! Every request goes through the loopback [`ProxyEndpoint`]; TLS trust is
//! whatever the [`core_trust::TrustEvaluator`] says and nothing else.

pub mod client;
pub mod error;
pub mod response;

pub use client::{ProxyClient, ProxyClientBuilder};
pub use error::FetchError;
pub use response::FetchResponse;

/// Where the service listens for proxy traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub host: String,
    pub port: u16,
}

impl Default for ProxyEndpoint {
    fn default() -> Self {
        Self { host: String::from("127.0.0.1"), port: 8077 }
    }
}

impl ProxyEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    pub fn loopback(port: u16) -> Self {
        Self::new("127.0.0.1", port)
    }

    /// Proxy URL in the form reqwest expects.
    pub fn url(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("http://[{}]:{}", self.host, self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }

    pub fn authority(&self) -> String {
        self.url().trim_start_matches("http://").to_string()
    }
}

impl From<(String, u16)> for ProxyEndpoint {
    fn from((host, port): (String, u16)) -> Self {
        Self { host, port }
    }
}
