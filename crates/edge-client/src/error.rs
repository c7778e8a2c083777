//! Fetch error types.

use core_trust::{anchor_load_error, reject_reason, CertificateLoadError, RejectReason};
use std::error::Error as StdError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    CertificateLoad(#[from] CertificateLoadError),

    #[error("certificate trust failure: {reason}")]
    CertificateTrust { reason: RejectReason },

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("client configuration: {0}")]
    Config(String),
}

impl FetchError {
    /// Get type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            FetchError::CertificateLoad(_) => "certificate_load",
            FetchError::CertificateTrust { .. } => "certificate_trust",
            FetchError::Network(_) => "network",
            FetchError::Timeout => "timeout",
            FetchError::MalformedResponse(_) => "malformed_response",
            FetchError::InvalidUrl { .. } => "invalid_url",
            FetchError::Config(_) => "config",
        }
    }

    pub fn is_trust_failure(&self) -> bool {
        matches!(self, FetchError::CertificateLoad(_) | FetchError::CertificateTrust { .. })
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(tls) = tls_failure(&err) {
            return tls;
        }
        if err.is_timeout() {
            return FetchError::Timeout;
        }
        if err.is_decode() || err.is_body() || unparsable_response(&err) {
            return FetchError::MalformedResponse(chain_text(&err));
        }
        if err.is_builder() {
            let url = err.url().map(|u| u.to_string()).unwrap_or_default();
            return FetchError::InvalidUrl { url, reason: chain_text(&err) };
        }
        FetchError::Network(chain_text(&err))
    }
}

/// Find the rustls verdict buried in the hyper/io error chain, if any.
fn tls_failure(err: &(dyn StdError + 'static)) -> Option<FetchError> {
    let mut cur: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = cur {
        if let Some(tls) = e.downcast_ref::<rustls::Error>() {
            return certificate_failure(tls);
        }
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if let Some(tls) = io.get_ref().and_then(|inner| inner.downcast_ref::<rustls::Error>()) {
                return certificate_failure(tls);
            }
        }
        cur = e.source();
    }
    // rustls sometimes only survives as text once hyper has boxed it
    let text = chain_text(err);
    text.contains("invalid peer certificate")
        .then(|| FetchError::CertificateTrust { reason: RejectReason::Other(text) })
}

fn certificate_failure(tls: &rustls::Error) -> Option<FetchError> {
    if let Some(load) = anchor_load_error(tls) {
        return Some(FetchError::CertificateLoad(load.clone()));
    }
    match tls {
        rustls::Error::InvalidCertificate(_) => Some(FetchError::CertificateTrust { reason: reject_reason(tls) }),
        rustls::Error::General(msg) => Some(FetchError::CertificateTrust { reason: RejectReason::Other(msg.clone()) }),
        _ => None,
    }
}

/// The proxy answered, but not with a parsable HTTP response head.
fn unparsable_response(err: &(dyn StdError + 'static)) -> bool {
    let mut cur: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = cur {
        if let Some(h) = e.downcast_ref::<hyper::Error>() {
            return h.is_parse() || h.is_incomplete_message();
        }
        cur = e.source();
    }
    false
}

/// Full `source()` chain, joined with `: `.
fn chain_text(err: &(dyn StdError + 'static)) -> String {
    let mut out = err.to_string();
    let mut cur = err.source();
    while let Some(e) = cur {
        let s = e.to_string();
        if !out.contains(&s) {
            out.push_str(": ");
            out.push_str(&s);
        }
        cur = e.source();
    }
    out
}
