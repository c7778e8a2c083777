//! rustls glue: a server verifier backed by [`TrustEvaluator`] and the
//! client config built on it.

use crate::error::{CertificateLoadError, CertificateTrustError};
use crate::evaluator::{to_rustls_error, CertUsage, TrustDecision, TrustEvaluator};
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, CertificateError, ClientConfig, ServerName};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{error, info};

/// Server certificate verifier that consults only the evaluator's anchors.
#[derive(Debug)]
pub struct PinnedServerVerifier {
    evaluator: Arc<TrustEvaluator>,
}

impl PinnedServerVerifier {
    pub fn new(evaluator: Arc<TrustEvaluator>) -> Self {
        Self { evaluator }
    }
}

impl ServerCertVerifier for PinnedServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &Certificate,
        intermediates: &[Certificate],
        server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        now: SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let mut chain = Vec::with_capacity(1 + intermediates.len());
        chain.push(end_entity.clone());
        chain.extend_from_slice(intermediates);
        let usage = CertUsage::Server(server_name.clone());
        match self.evaluator.validate_at(&chain, &usage, now) {
            Ok(TrustDecision::Accept) => Ok(ServerCertVerified::assertion()),
            Ok(TrustDecision::Reject(reason)) => {
                let err = CertificateTrustError::from(reason);
                info!(server = ?server_name, error = %err, "TLS handshake refused");
                Err(to_rustls_error(&err.reason))
            }
            Err(e) => {
                error!(error = %e, "trust anchor unavailable during handshake");
                Err(rustls::Error::InvalidCertificate(CertificateError::Other(Arc::new(e))))
            }
        }
    }
}

/// The load failure a [`PinnedServerVerifier`] reported through rustls, if that is what `err` is.
pub fn anchor_load_error(err: &rustls::Error) -> Option<&CertificateLoadError> {
    match err {
        rustls::Error::InvalidCertificate(CertificateError::Other(inner)) => inner.downcast_ref::<CertificateLoadError>(),
        _ => None,
    }
}

/// TLS client config whose only trust decision is the evaluator.
pub fn client_config(evaluator: Arc<TrustEvaluator>, alpn: &[&str]) -> ClientConfig {
    let mut cfg = ClientConfig::builder()
        .with_safe_defaults()
        .with_custom_certificate_verifier(Arc::new(PinnedServerVerifier::new(evaluator)))
        .with_no_client_auth();
    cfg.alpn_protocols = alpn.iter().map(|s| s.as_bytes().to_vec()).collect();
    cfg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RejectReason;
    use crate::evaluator::{reject_reason, tests::TestCa};

    fn verify(v: &PinnedServerVerifier, leaf: &Certificate, name: &str) -> Result<ServerCertVerified, rustls::Error> {
        let name = ServerName::try_from(name).unwrap();
        v.verify_server_cert(leaf, &[], &name, &mut std::iter::empty::<&[u8]>(), &[], SystemTime::now())
    }

    #[test]
    fn verifier_follows_evaluator() {
        let ca = TestCa::new("TestCA");
        let other = TestCa::new("OtherCA");
        let v = PinnedServerVerifier::new(Arc::new(TrustEvaluator::pinned(ca.anchor())));

        assert!(verify(&v, &ca.leaf("example.org"), "example.org").is_ok());
        let err = verify(&v, &other.leaf("example.org"), "example.org").unwrap_err();
        assert_eq!(reject_reason(&err), RejectReason::NoTrustPath);
    }

    #[test]
    fn missing_anchor_surfaces_as_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let policy = crate::TrustPolicy::PinnedAnchor(dir.path().join(crate::CA_CERT_FILE));
        let v = PinnedServerVerifier::new(Arc::new(TrustEvaluator::new(&policy, crate::ClientAuthPolicy::NoClientAuth)));

        let leaf = TestCa::new("TestCA").leaf("example.org");
        let err = verify(&v, &leaf, "example.org").unwrap_err();
        let load = anchor_load_error(&err).expect("load error carried through rustls");
        assert!(matches!(load, CertificateLoadError::Missing { .. }));
        assert!(load.clone().is_retryable());

        let refused = to_rustls_error(&RejectReason::NoTrustPath);
        assert!(anchor_load_error(&refused).is_none());
    }

    #[test]
    fn client_config_sets_alpn() {
        let ca = TestCa::new("TestCA");
        let cfg = client_config(Arc::new(TrustEvaluator::pinned(ca.anchor())), &["http/1.1"]);
        assert_eq!(cfg.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }
}
