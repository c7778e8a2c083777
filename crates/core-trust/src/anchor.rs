//! Trust anchor loading and the process-wide anchor store.
//!
//! The service writes its interception CA to a PEM file before the first TLS
//! connection is attempted. Loading is lazy: nothing touches the disk until a
//! validation actually needs the anchor, and a failed load is never cached so
//! a caller can retry once the file shows up.

use crate::error::CertificateLoadError;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// A single X.509 certificate used as a root of trust.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustAnchor {
    der: Vec<u8>,
    subject: String,
    issuer: String,
    serial: String,
}

impl TrustAnchor {
    pub fn from_der(der: Vec<u8>) -> Result<Self, String> {
        let (subject, issuer, serial) = {
            let (_, cert) = x509_parser::parse_x509_certificate(&der).map_err(|e| e.to_string())?;
            (cert.subject().to_string(), cert.issuer().to_string(), cert.raw_serial_as_string())
        };
        Ok(Self { der, subject, issuer, serial })
    }

    /// Parse the first certificate of a PEM document.
    pub fn from_pem(pem: &[u8]) -> Result<Self, String> {
        let mut certs = pem_certs(pem).map_err(|e| e.to_string())?;
        if certs.is_empty() {
            return Err("no CERTIFICATE block".into());
        }
        Self::from_der(certs.swap_remove(0))
    }


    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }


    pub fn certificate(&self) -> rustls::Certificate {
        rustls::Certificate(self.der.clone())
    }
}

fn pem_certs(pem: &[u8]) -> io::Result<Vec<Vec<u8>>> {
    let mut reader = BufReader::new(pem);
    rustls_pemfile::certs(&mut reader)
}

fn looks_like_pem(bytes: &[u8]) -> bool {
    bytes.windows(10).any(|w| w == b"-----BEGIN")
}

fn read_cert_file(path: &Path) -> Result<Vec<Vec<u8>>, CertificateLoadError> {
    let bytes = std::fs::read(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            CertificateLoadError::Missing { path: path.to_path_buf() }
        } else {
            CertificateLoadError::Unreadable { path: path.to_path_buf(), source }
        }
    })?;
    if looks_like_pem(&bytes) {
        pem_certs(&bytes).map_err(|e| CertificateLoadError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    } else {
        // bare DER
        Ok(vec![bytes])
    }
}

fn parse_at(path: &Path, der: Vec<u8>) -> Result<TrustAnchor, CertificateLoadError> {
    TrustAnchor::from_der(der).map_err(|reason| CertificateLoadError::Malformed {
        path: path.to_path_buf(),
        reason,
    })
}

/// Load the anchor at `path` (first certificate if the file holds several).
pub fn load_anchor(path: &Path) -> Result<TrustAnchor, CertificateLoadError> {
    let mut certs = read_cert_file(path)?;
    if certs.is_empty() {
        return Err(CertificateLoadError::Malformed {
            path: path.to_path_buf(),
            reason: "no CERTIFICATE block".into(),
        });
    }
    let anchor = parse_at(path, certs.swap_remove(0))?;
    debug!(path = %path.display(), subject = %anchor.subject, serial = %anchor.serial, "trust anchor loaded");
    Ok(anchor)
}

/// Load every certificate in a PEM bundle.
pub fn load_anchor_set(path: &Path) -> Result<Vec<TrustAnchor>, CertificateLoadError> {
    let certs = read_cert_file(path)?;
    if certs.is_empty() {
        return Err(CertificateLoadError::Malformed {
            path: path.to_path_buf(),
            reason: "no CERTIFICATE block".into(),
        });
    }
    certs.into_iter().map(|der| parse_at(path, der)).collect()
}

fn load_native() -> Result<Vec<TrustAnchor>, CertificateLoadError> {
    let certs = rustls_native_certs::load_native_certs()
        .map_err(|e| CertificateLoadError::NoRoots(e.to_string()))?;
    let mut out = Vec::with_capacity(certs.len());
    let mut skipped = 0usize;
    for cert in certs {
        match TrustAnchor::from_der(cert.0) {
            Ok(a) => out.push(a),
            Err(_) => skipped += 1,
        }
    }
    if skipped > 0 {
        debug!(skipped, "unparsable native roots ignored");
    }
    if out.is_empty() {
        return Err(CertificateLoadError::NoRoots("platform store is empty".into()));
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Source {
    File(PathBuf),
    Bundle(PathBuf),
    Native,
    Fixed,
}

/// Lazily loaded, shareable set of anchors.
///
/// Readers take a cheap `Arc` clone of the current set. [`AnchorStore::reload`]
/// swaps in a freshly read set for CA rotation, [`AnchorStore::clear`] drops it
/// on shutdown so the next access reads the disk again.
#[derive(Debug)]
pub struct AnchorStore {
    source: Source,
    slot: RwLock<Option<Arc<Vec<TrustAnchor>>>>,
    loads: AtomicUsize,
}

impl AnchorStore {
    /// Single pinned anchor read from `path`.
    pub fn single(path: impl Into<PathBuf>) -> Self {
        Self::with_source(Source::File(path.into()), None)
    }

    /// Every certificate of the PEM bundle at `path`.
    pub fn bundle(path: impl Into<PathBuf>) -> Self {
        Self::with_source(Source::Bundle(path.into()), None)
    }

    /// Platform root store.
    pub fn native() -> Self {
        Self::with_source(Source::Native, None)
    }

    /// Already loaded anchors; reload is a no-op.
    pub fn fixed(anchors: Vec<TrustAnchor>) -> Self {
        Self::with_source(Source::Fixed, Some(Arc::new(anchors)))
    }


    fn with_source(source: Source, initial: Option<Arc<Vec<TrustAnchor>>>) -> Self {
        Self { source, slot: RwLock::new(initial), loads: AtomicUsize::new(0) }
    }


    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            Source::File(p) | Source::Bundle(p) => Some(p),
            Source::Native | Source::Fixed => None,
        }
    }

    /// Number of times the backing source was actually read.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }


    fn read_source(&self) -> Result<Vec<TrustAnchor>, CertificateLoadError> {
        let anchors = match &self.source {
            Source::File(p) => vec![load_anchor(p)?],
            Source::Bundle(p) => load_anchor_set(p)?,
            Source::Native => load_native()?,
            Source::Fixed => return Err(CertificateLoadError::NoRoots("fixed anchor set was cleared".into())),
        };
        self.loads.fetch_add(1, Ordering::Relaxed);
        Ok(anchors)
    }

    /// Current anchors, loading them on first use.
    pub fn anchors(&self) -> Result<Arc<Vec<TrustAnchor>>, CertificateLoadError> {
        if let Some(a) = self.slot.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
            return Ok(Arc::clone(a));
        }
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(a) = slot.as_ref() {
            return Ok(Arc::clone(a));
        }
        let loaded = Arc::new(self.read_source()?);
        info!(count = loaded.len(), source = ?self.source, "trust anchors initialised");
        *slot = Some(Arc::clone(&loaded));
        Ok(loaded)
    }

    /// The first anchor of the set.
    pub fn anchor(&self) -> Result<TrustAnchor, CertificateLoadError> {
        let set = self.anchors()?;
        set.first()
            .cloned()
            .ok_or_else(|| CertificateLoadError::NoRoots("anchor set is empty".into()))
    }

    /// Re-read the source. On failure the previous set stays in place.
    pub fn reload(&self) -> Result<Arc<Vec<TrustAnchor>>, CertificateLoadError> {
        if self.source == Source::Fixed {
            return self.anchors();
        }
        match self.read_source() {
            Ok(fresh) => {
                let fresh = Arc::new(fresh);
                *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&fresh));
                info!(count = fresh.len(), "trust anchors reloaded");
                Ok(fresh)
            }
            Err(e) => {
                warn!(error = %e, "trust anchor reload failed; keeping previous set");
                Err(e)
            }
        }
    }

    /// Forget the cached set.
    pub fn clear(&self) {
        if self.source == Source::Fixed {
            return;
        }
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = None;
        debug!("trust anchors cleared");
    }
}
