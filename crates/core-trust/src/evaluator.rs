//! Chain validation against the configured anchors.
//!
//! Server chains go through rustls' webpki verifier seeded with nothing but
//! our anchors. Client chains follow [`ClientAuthPolicy`].

use crate::anchor::{AnchorStore, TrustAnchor};
use crate::error::{CertificateLoadError, RejectReason};
use crate::policy::{ClientAuthPolicy, TrustPolicy};
use rustls::client::{ServerCertVerifier, WebPkiVerifier};
use rustls::server::{AllowAnyAuthenticatedClient, ClientCertVerifier};
use rustls::{Certificate, CertificateError, RootCertStore, ServerName};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

/// What the presented chain is supposed to authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertUsage {
    Server(ServerName),
    Client,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustDecision {
    Accept,
    Reject(RejectReason),
}

impl TrustDecision {
    pub fn is_accept(&self) -> bool {
        matches!(self, TrustDecision::Accept)
    }
}

pub struct TrustEvaluator {
    store: Arc<AnchorStore>,
    client_auth: ClientAuthPolicy,
}

impl std::fmt::Debug for TrustEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustEvaluator")
            .field("source", &self.store.path())
            .field("client_auth", &self.client_auth)
            .finish()
    }
}

impl TrustEvaluator {
    pub fn new(policy: &TrustPolicy, client_auth: ClientAuthPolicy) -> Self {
        Self::with_store(Arc::new(policy.store()), client_auth)
    }


    pub fn with_store(store: Arc<AnchorStore>, client_auth: ClientAuthPolicy) -> Self {
        Self { store, client_auth }
    }

    /// Evaluator pinned to one already loaded anchor.
    pub fn pinned(anchor: TrustAnchor) -> Self {
        Self::with_store(Arc::new(AnchorStore::fixed(vec![anchor])), ClientAuthPolicy::default())
    }


    pub fn store(&self) -> &Arc<AnchorStore> {
        &self.store
    }


    pub fn client_auth(&self) -> ClientAuthPolicy {
        self.client_auth
    }

    /// The anchors this evaluator will accept as issuers.
    pub fn accepted_issuers(&self) -> Result<Arc<Vec<TrustAnchor>>, CertificateLoadError> {
        self.store.anchors()
    }

    /// Judge `chain` (end entity first). Only anchor loading can fail; a bad
    /// chain is a [`TrustDecision::Reject`].
    pub fn validate(&self, chain: &[Certificate], usage: &CertUsage) -> Result<TrustDecision, CertificateLoadError> {
        self.validate_at(chain, usage, SystemTime::now())
    }


    pub fn validate_at(
        &self,
        chain: &[Certificate],
        usage: &CertUsage,
        now: SystemTime,
    ) -> Result<TrustDecision, CertificateLoadError> {
        if let (CertUsage::Client, ClientAuthPolicy::NoClientAuth) = (usage, self.client_auth) {
            debug!(certs = chain.len(), "client chain accepted without checks (no-client-auth)");
            return Ok(TrustDecision::Accept);
        }
        let anchors = self.accepted_issuers()?;
        Ok(decide(&anchors, chain, usage, now))
    }
}

/// One-shot validation against a single anchor.
pub fn validate(chain: &[Certificate], anchor: &TrustAnchor, usage: &CertUsage) -> TrustDecision {
    decide(std::slice::from_ref(anchor), chain, usage, SystemTime::now())
}

fn decide(anchors: &[TrustAnchor], chain: &[Certificate], usage: &CertUsage, now: SystemTime) -> TrustDecision {
    let Some((end_entity, intermediates)) = chain.split_first() else {
        return TrustDecision::Reject(RejectReason::EmptyChain);
    };
    log_chain(anchors, chain);
    let roots = match root_store(anchors) {
        Ok(r) => r,
        Err(reason) => return TrustDecision::Reject(reason),
    };
    let outcome = match usage {
        CertUsage::Server(name) => {
            let verifier = WebPkiVerifier::new(roots, None);
            verifier
                .verify_server_cert(end_entity, intermediates, name, &mut std::iter::empty::<&[u8]>(), &[], now)
                .map(|_| ())
        }
        CertUsage::Client => AllowAnyAuthenticatedClient::new(roots)
            .verify_client_cert(end_entity, intermediates, now)
            .map(|_| ()),
    };
    match outcome {
        Ok(()) => TrustDecision::Accept,
        Err(e) => {
            let reason = reject_reason(&e);
            warn!(reason = reason.type_name(), error = %e, "certificate chain rejected");
            TrustDecision::Reject(reason)
        }
    }
}

fn root_store(anchors: &[TrustAnchor]) -> Result<RootCertStore, RejectReason> {
    let mut roots = RootCertStore::empty();
    for a in anchors {
        if let Err(e) = roots.add(&a.certificate()) {
            warn!(subject = a.subject(), error = %e, "anchor unusable as root");
        }
    }
    if roots.is_empty() {
        return Err(RejectReason::NoTrustPath);
    }
    Ok(roots)
}

fn log_chain(anchors: &[TrustAnchor], chain: &[Certificate]) {
    for (depth, cert) in chain.iter().enumerate() {
        match x509_parser::parse_x509_certificate(&cert.0) {
            Ok((_, c)) => debug!(depth, issuer = %c.issuer(), subject = %c.subject(), "presented certificate"),
            Err(_) => debug!(depth, len = cert.0.len(), "presented certificate (unparsable)"),
        }
    }
    for a in anchors {
        debug!(issuer = a.issuer(), subject = a.subject(), "trusted issuer");
    }
}

/// Map a rustls verification error onto our reasons.
pub fn reject_reason(err: &rustls::Error) -> RejectReason {
    match err {
        rustls::Error::InvalidCertificate(ce) => match ce {
            CertificateError::UnknownIssuer => RejectReason::NoTrustPath,
            CertificateError::Expired | CertificateError::NotValidYet => RejectReason::Expired,
            CertificateError::NotValidForName => RejectReason::NotValidForName,
            CertificateError::BadSignature => RejectReason::BadSignature,
            CertificateError::BadEncoding => RejectReason::Malformed,
            CertificateError::InvalidPurpose => RejectReason::UnsupportedUsage,
            other => RejectReason::Other(format!("{other:?}")),
        },
        other => RejectReason::Other(other.to_string()),
    }
}

/// Inverse of [`reject_reason`], used when reporting back through rustls.
pub fn to_rustls_error(reason: &RejectReason) -> rustls::Error {
    let ce = match reason {
        RejectReason::NoTrustPath => CertificateError::UnknownIssuer,
        RejectReason::Expired => CertificateError::Expired,
        RejectReason::NotValidForName => CertificateError::NotValidForName,
        RejectReason::BadSignature => CertificateError::BadSignature,
        RejectReason::UnsupportedUsage => CertificateError::InvalidPurpose,
        RejectReason::Malformed | RejectReason::EmptyChain => CertificateError::BadEncoding,
        RejectReason::Other(msg) => return rustls::Error::General(msg.clone()),
    };
    rustls::Error::InvalidCertificate(ce)
}
