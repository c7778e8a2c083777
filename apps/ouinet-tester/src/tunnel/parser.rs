//! Proxy request parser: `CONNECT host:port` and absolute-form plain HTTP.

use super::errors::{Result, TunnelError};
use url::{Host, Position, Url};

pub const MAX_REQUEST_SIZE: usize = 8192; // 8KB max for a request head

/// Hop-by-hop headers dropped when forwarding.
const HOP_HEADERS: &[&str] = &["proxy-connection", "proxy-authorization", "connection", "keep-alive"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyRequest {
    /// Open a raw tunnel.
    Connect { host: String, port: u16 },
    /// Send `head` (rewritten to origin form) to the destination.
    Forward { host: String, port: u16, head: Vec<u8> },
}

impl ProxyRequest {
    pub fn destination(&self) -> (&str, u16) {
        match self {
            ProxyRequest::Connect { host, port } | ProxyRequest::Forward { host, port, .. } => (host, *port),
        }
    }
}

/// Parse the request head at the start of `buffer`.
///
/// Returns `Ok(None)` while the head is incomplete, otherwise the request and
/// the length of the head; bytes past it belong to the payload.
pub fn parse_request(buffer: &[u8]) -> Result<Option<(ProxyRequest, usize)>> {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut req = httparse::Request::new(&mut headers);

    let status = req
        .parse(buffer)
        .map_err(|e| TunnelError::InvalidRequest(format!("Parse error: {}", e)))?;
    let header_len = match status {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial if buffer.len() >= MAX_REQUEST_SIZE => {
            return Err(TunnelError::InvalidRequest(format!(
                "Request head too large (max: {} bytes)",
                MAX_REQUEST_SIZE
            )));
        }
        httparse::Status::Partial => return Ok(None),
    };

    let method = req
        .method
        .ok_or_else(|| TunnelError::InvalidRequest("Missing method".to_string()))?;
    let target = req
        .path
        .ok_or_else(|| TunnelError::InvalidRequest("Missing target".to_string()))?;

    let request = if method.eq_ignore_ascii_case("CONNECT") {
        let (host, port) = parse_host_port(target)?;
        ProxyRequest::Connect { host, port }
    } else {
        forward_request(method, target, req.version.unwrap_or(1), req.headers)?
    };
    Ok(Some((request, header_len)))
}

fn forward_request(method: &str, target: &str, version: u8, headers: &[httparse::Header<'_>]) -> Result<ProxyRequest> {
    let url = Url::parse(target)
        .map_err(|e| TunnelError::InvalidRequest(format!("Expected absolute-form target, got '{}': {}", target, e)))?;
    if url.scheme() != "http" {
        return Err(TunnelError::InvalidRequest(format!(
            "Scheme '{}' must be tunnelled with CONNECT",
            url.scheme()
        )));
    }
    let host = match url.host() {
        Some(Host::Ipv6(addr)) => addr.to_string(),
        Some(h) => h.to_string(),
        None => return Err(TunnelError::InvalidRequest("Empty hostname".to_string())),
    };
    let port = url.port_or_known_default().unwrap_or(80);

    let mut head = format!("{} {} HTTP/1.{}\r\n", method, &url[Position::BeforePath..Position::AfterQuery], version)
        .into_bytes();
    let mut has_host = false;
    for h in headers {
        let name = h.name.to_ascii_lowercase();
        if HOP_HEADERS.contains(&name.as_str()) {
            continue;
        }
        has_host |= name == "host";
        head.extend_from_slice(h.name.as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(h.value);
        head.extend_from_slice(b"\r\n");
    }
    if !has_host {
        head.extend_from_slice(format!("Host: {}\r\n", &url[Position::BeforeHost..Position::AfterPort]).as_bytes());
    }
    // one request per tunnel connection
    head.extend_from_slice(b"Connection: close\r\n\r\n");
    Ok(ProxyRequest::Forward { host, port, head })
}

/// Parse "host:port" string into components; IPv6 literals come bracketed.
pub fn parse_host_port(target: &str) -> Result<(String, u16)> {
    let (host, port_str) = target.rsplit_once(':').ok_or_else(|| {
        TunnelError::InvalidRequest(format!(
            "Invalid target format, expected 'host:port', got '{}'",
            target
        ))
    })?;

    let port: u16 = port_str.parse().map_err(|_| {
        TunnelError::InvalidRequest(format!("Invalid port number: '{}'", port_str))
    })?;

    let host = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')).unwrap_or(host);
    if host.is_empty() {
        return Err(TunnelError::InvalidRequest("Empty hostname".to_string()));
    }

    Ok((host.to_ascii_lowercase(), port))
}
