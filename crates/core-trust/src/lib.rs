//! Pinned TLS trust for traffic routed through the local content-delivery proxy.
//!
//! The proxy re-signs upstream certificates with its own CA, so the client
//! trusts that CA and nothing else. [`anchor`] loads it, [`evaluator`] judges
//! chains against it and [`verifier`] plugs the result into rustls.

pub mod anchor;
pub mod error;
pub mod evaluator;
pub mod policy;
pub mod verifier;

pub use anchor::{load_anchor, load_anchor_set, AnchorStore, TrustAnchor};
pub use error::{CertificateLoadError, CertificateTrustError, RejectReason};
pub use evaluator::{reject_reason, validate, CertUsage, TrustDecision, TrustEvaluator};
pub use policy::{ClientAuthPolicy, TrustPolicy};
pub use verifier::{anchor_load_error, client_config, PinnedServerVerifier};

/// File name the service writes its CA certificate to, inside its repo directory.
pub const CA_CERT_FILE: &str = "ssl-ca-cert.pem";

pub use rustls::{Certificate, ServerName};
