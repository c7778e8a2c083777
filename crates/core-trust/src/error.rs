//! Trust layer error types.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// The anchor file could not be turned into a usable trust root.
#[derive(Debug, Error)]
pub enum CertificateLoadError {
    #[error("trust anchor not found at {}", path.display())]
    Missing { path: PathBuf },

    #[error("trust anchor at {} is unreadable: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("trust anchor at {} is not a certificate: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("no usable trust roots: {0}")]
    NoRoots(String),
}

// io::Error is not Clone; keep the kind and message.
impl Clone for CertificateLoadError {
    fn clone(&self) -> Self {
        match self {
            CertificateLoadError::Missing { path } => CertificateLoadError::Missing { path: path.clone() },
            CertificateLoadError::Unreadable { path, source } => CertificateLoadError::Unreadable {
                path: path.clone(),
                source: io::Error::new(source.kind(), source.to_string()),
            },
            CertificateLoadError::Malformed { path, reason } => CertificateLoadError::Malformed {
                path: path.clone(),
                reason: reason.clone(),
            },
            CertificateLoadError::NoRoots(msg) => CertificateLoadError::NoRoots(msg.clone()),
        }
    }
}

impl CertificateLoadError {
    /// A missing file is expected before the service has written its CA; callers may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CertificateLoadError::Missing { .. } | CertificateLoadError::Unreadable { .. })
    }
}

/// Why a presented chain was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("no trust path to anchor")]
    NoTrustPath,
    #[error("certificate expired or not yet valid")]
    Expired,
    #[error("certificate not valid for requested name")]
    NotValidForName,
    #[error("bad certificate signature")]
    BadSignature,
    #[error("certificate not valid for this usage")]
    UnsupportedUsage,
    #[error("malformed certificate")]
    Malformed,
    #[error("empty certificate chain")]
    EmptyChain,
    #[error("{0}")]
    Other(String),
}

impl RejectReason {
    pub fn type_name(&self) -> &'static str {
        match self {
            RejectReason::NoTrustPath => "no_trust_path",
            RejectReason::Expired => "expired",
            RejectReason::NotValidForName => "name_mismatch",
            RejectReason::BadSignature => "bad_signature",
            RejectReason::UnsupportedUsage => "bad_usage",
            RejectReason::Malformed => "malformed",
            RejectReason::EmptyChain => "empty_chain",
            RejectReason::Other(_) => "other",
        }
    }
}

/// Chain validation failed for a TLS session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("certificate trust failure: {reason}")]
pub struct CertificateTrustError {
    pub reason: RejectReason,
}

impl From<RejectReason> for CertificateTrustError {
    fn from(reason: RejectReason) -> Self {
        Self { reason }
    }
}
