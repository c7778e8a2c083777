//! End-to-end fetches through the loopback tunnel against a TLS origin.
//!
//! `example.org:443` is routed to a local server whose certificate is issued
//! either by the pinned TestCA or by an unrelated OtherCA.

use core_trust::{ClientAuthPolicy, RejectReason, TrustEvaluator, TrustPolicy, CA_CERT_FILE};
use edge_client::{FetchError, ProxyClient, ProxyEndpoint};
use ouinet_tester::tunnel::{TunnelConfig, TunnelProxy};
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_rustls::TlsAcceptor;

struct Ca {
    cert: rcgen::Certificate,
    key: KeyPair,
}

impl Ca {
    fn new(cn: &str) -> Self {
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, cn);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let key = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        Self { cert, key }
    }

    fn write_anchor(&self, dir: &Path) {
        std::fs::write(dir.join(CA_CERT_FILE), self.cert.pem()).unwrap();
    }

    /// Leaf certificate and PKCS#8 key for `name`.
    fn issue(&self, name: &str) -> (rustls::Certificate, rustls::PrivateKey) {
        let mut params = CertificateParams::new(vec![name.to_string()]).unwrap();
        params.distinguished_name.push(DnType::CommonName, name);
        let key = KeyPair::generate().unwrap();
        let cert = params.signed_by(&key, &self.cert, &self.key).unwrap();
        (rustls::Certificate(cert.der().to_vec()), rustls::PrivateKey(key.serialize_der()))
    }
}

/// TLS origin for one connection. Sends back the request head it served, or
/// `None` when the handshake did not complete.
async fn tls_origin(ca: &Ca) -> (SocketAddr, oneshot::Receiver<Option<String>>) {
    let (cert, key) = ca.issue("example.org");
    let mut cfg = rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)
        .unwrap();
    cfg.alpn_protocols = vec![b"http/1.1".to_vec()];
    let acceptor = TlsAcceptor::from(Arc::new(cfg));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut tls = match acceptor.accept(tcp).await {
            Ok(s) => s,
            Err(_) => {
                let _ = tx.send(None);
                return;
            }
        };
        let mut head = Vec::new();
        let mut chunk = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = tls.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            head.extend_from_slice(&chunk[..n]);
        }
        let _ = tx.send(Some(String::from_utf8_lossy(&head).into_owned()));
        let body = b"hello";
        let resp = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nX-Served-By: origin\r\nConnection: close\r\n\r\n",
            body.len()
        );
        let _ = tls.write_all(resp.as_bytes()).await;
        let _ = tls.write_all(body).await;
        let _ = tls.shutdown().await;
    });
    (addr, rx)
}

async fn tunnel_to(origin: SocketAddr) -> ProxyEndpoint {
    let config = TunnelConfig::default().route("example.org:443", origin);
    let proxy = TunnelProxy::bind("127.0.0.1:0", config).await.unwrap();
    let port = proxy.local_addr().unwrap().port();
    proxy.spawn();
    ProxyEndpoint::loopback(port)
}

fn client(repo: &Path, endpoint: ProxyEndpoint) -> ProxyClient {
    let evaluator = TrustEvaluator::new(
        &TrustPolicy::PinnedAnchor(repo.join(CA_CERT_FILE)),
        ClientAuthPolicy::NoClientAuth,
    );
    ProxyClient::builder(Arc::new(evaluator))
        .endpoint(endpoint)
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn pinned_chain_is_fetched_with_group_header() {
    let repo = tempfile::tempdir().unwrap();
    let test_ca = Ca::new("TestCA");
    test_ca.write_anchor(repo.path());

    let (origin, served) = tls_origin(&test_ca).await;
    let client = client(repo.path(), tunnel_to(origin).await);

    let resp = client.fetch_tagged("https://example.org/page").await.unwrap();
    assert_eq!(resp.status.as_u16(), 200);
    assert_eq!(resp.header("x-served-by"), Some("origin"));
    assert_eq!(resp.header("content-type"), Some("text/plain"));
    assert_eq!(&resp.body[..], b"hello");

    let head = served.await.unwrap().expect("handshake completed").to_ascii_lowercase();
    assert!(head.starts_with("get /page http/1.1\r\n"));
    assert!(head.contains("x-ouinet-group: example.org\r\n"));
}

#[tokio::test(flavor = "multi_thread")]
async fn foreign_chain_is_refused_without_body() {
    let repo = tempfile::tempdir().unwrap();
    Ca::new("TestCA").write_anchor(repo.path());
    let other_ca = Ca::new("OtherCA");

    let (origin, served) = tls_origin(&other_ca).await;
    let client = client(repo.path(), tunnel_to(origin).await);

    let err = client.fetch_tagged("https://example.org/page").await.unwrap_err();
    match &err {
        FetchError::CertificateTrust { reason } => assert_eq!(*reason, RejectReason::NoTrustPath),
        other => panic!("expected a trust failure, got {other:?}"),
    }
    assert_eq!(err.to_string(), "certificate trust failure: no trust path to anchor");
    assert_eq!(served.await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_anchor_fails_every_tls_fetch() {
    let repo = tempfile::tempdir().unwrap();
    let client = client(repo.path(), ProxyEndpoint::loopback(9));

    for url in ["https://example.org/", "https://example.com/other"] {
        let err = client.fetch_tagged(url).await.unwrap_err();
        assert!(matches!(err, FetchError::CertificateLoad(_)), "{err:?}");
    }

    // the anchor appearing later is picked up without rebuilding the client
    let test_ca = Ca::new("TestCA");
    test_ca.write_anchor(repo.path());
    let (origin, _served) = tls_origin(&test_ca).await;
    let client = ProxyClient::builder(Arc::clone(client.evaluator()))
        .endpoint(tunnel_to(origin).await)
        .build()
        .unwrap();
    assert_eq!(client.fetch_tagged("https://example.org/").await.unwrap().status.as_u16(), 200);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_fetches_are_independent() {
    let repo = tempfile::tempdir().unwrap();
    let test_ca = Ca::new("TestCA");
    test_ca.write_anchor(repo.path());

    let (good_origin, _) = tls_origin(&test_ca).await;
    let good = client(repo.path(), tunnel_to(good_origin).await);
    let (bad_origin, _) = tls_origin(&Ca::new("OtherCA")).await;
    let bad = client(repo.path(), tunnel_to(bad_origin).await);

    let (ok, refused) = tokio::join!(
        good.fetch_tagged("https://example.org/a"),
        bad.fetch_tagged("https://example.org/b"),
    );
    assert!(ok.unwrap().is_success());
    assert!(refused.unwrap_err().is_trust_failure());
}
