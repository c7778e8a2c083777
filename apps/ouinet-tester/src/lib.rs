//! Command-line tester for the pinned-trust proxy client: tag and fetch URLs
//! through the local service, watch its state, and stand in for it with a
//! loopback tunnel when the native client is not around.

pub mod config;
pub mod logging;
pub mod tunnel;

pub use config::Config;

use anyhow::{Context, Result};
use core_trust::TrustEvaluator;
use edge_client::{FetchError, FetchResponse, ProxyClient};
use std::sync::Arc;

/// Proxy client wired from `cfg`.
pub fn build_client(cfg: &Config) -> Result<ProxyClient> {
    let evaluator = Arc::new(TrustEvaluator::new(&cfg.trust_policy(), cfg.client_auth));
    ProxyClient::builder(evaluator)
        .endpoint(cfg.endpoint())
        .group_header(cfg.group_header.clone())
        .tag_format(cfg.tag_format)
        .timeout(cfg.request_timeout())
        .build()
        .context("build proxy client")
}

/// What the user sees for a finished fetch: the response headers, or the
/// error text in their place.
pub fn render_outcome(result: &Result<FetchResponse, FetchError>) -> String {
    match result {
        Ok(resp) => format!("{:?} {}\n{}", resp.version, resp.status, resp.headers_text()),
        Err(e) => format!("{e}\n"),
    }
}
