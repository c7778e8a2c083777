//! Tunnel connection handler.

use super::config::TunnelConfig;
use super::errors::{Result, TunnelError};
use super::forwarder::forward_bidirectional;
use super::parser::{parse_request, ProxyRequest, MAX_REQUEST_SIZE};
use super::validator::validate_destination;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Handle a single proxy connection.
///
/// Flow:
/// 1. Read the request head
/// 2. Parse and validate destination
/// 3. Dial the destination (or its route override)
/// 4. CONNECT: answer "200 Connection Established"; plain HTTP: send the rewritten head
/// 5. Forward data bidirectionally
///
/// Failures before step 5 are answered with an HTTP error response.
pub async fn handle_connection<S>(mut client_stream: S, config: &TunnelConfig) -> Result<(u64, u64)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut dest_stream, pending) = match open_tunnel(&mut client_stream, config).await {
        Ok(v) => v,
        Err(e) => {
            warn!(kind = e.type_name(), error = %e, "proxy request refused");
            let _ = client_stream.write_all(&e.to_http_response()).await;
            let _ = client_stream.shutdown().await;
            return Err(e);
        }
    };

    if !pending.is_empty() {
        dest_stream.write_all(&pending).await?;
    }

    let result = forward_bidirectional(&mut client_stream, &mut dest_stream, config.idle_timeout()).await;

    match &result {
        Ok((to_dest, from_dest)) => {
            info!(bytes_to_dest = to_dest, bytes_from_dest = from_dest, "Connection completed");
        }
        Err(e) => {
            warn!(error = ?e, "Connection failed during forwarding");
        }
    }

    result
}

/// Steps 1-4. Returns the destination stream and bytes still owed to it.
async fn open_tunnel<S>(client_stream: &mut S, config: &TunnelConfig) -> Result<(TcpStream, Vec<u8>)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (request, buffer, header_len) = read_request(client_stream, config).await?;
    let (host, port) = request.destination();
    info!(host = %host, port, connect = matches!(request, ProxyRequest::Connect { .. }), "Parsed proxy request");

    validate_destination(host, port, config)?;

    let dest_stream = dial(host, port, config).await?;

    let leftover = &buffer[header_len..];
    let pending = match &request {
        ProxyRequest::Connect { .. } => {
            client_stream
                .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
                .await?;
            client_stream.flush().await?;
            debug!("Sent 200 Connection Established");
            leftover.to_vec()
        }
        ProxyRequest::Forward { head, .. } => {
            let mut out = Vec::with_capacity(head.len() + leftover.len());
            out.extend_from_slice(head);
            out.extend_from_slice(leftover);
            out
        }
    };
    Ok((dest_stream, pending))
}

async fn read_request<S>(client_stream: &mut S, config: &TunnelConfig) -> Result<(ProxyRequest, Vec<u8>, usize)>
where
    S: AsyncRead + Unpin,
{
    let timeout = Duration::from_secs(config.connection_timeout_secs);
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 2048];
    loop {
        let n = tokio::time::timeout(timeout, client_stream.read(&mut chunk))
            .await
            .map_err(|_| TunnelError::Timeout {
                timeout_secs: config.connection_timeout_secs,
            })??;
        if n == 0 {
            return Err(TunnelError::InvalidRequest(
                "Client closed connection before sending a request".to_string(),
            ));
        }
        buffer.extend_from_slice(&chunk[..n]);
        debug!(bytes_read = buffer.len(), "Read request bytes");
        if let Some((request, header_len)) = parse_request(&buffer)? {
            return Ok((request, buffer, header_len));
        }
        if buffer.len() >= MAX_REQUEST_SIZE {
            return Err(TunnelError::InvalidRequest("Request head too large".to_string()));
        }
    }
}

async fn dial(host: &str, port: u16, config: &TunnelConfig) -> Result<TcpStream> {
    let timeout = Duration::from_secs(config.connection_timeout_secs);
    let connect = match config.route_for(host, port) {
        Some(addr) => {
            debug!(host = %host, port, %addr, "Using route override");
            tokio::time::timeout(timeout, TcpStream::connect(addr)).await
        }
        None => tokio::time::timeout(timeout, TcpStream::connect((host, port))).await,
    };
    let stream = connect
        .map_err(|_| TunnelError::Timeout {
            timeout_secs: config.connection_timeout_secs,
        })?
        .map_err(|e| {
            warn!(host = %host, port, error = ?e, "Failed to connect to destination");
            TunnelError::ConnectionRefused {
                host: host.to_string(),
                port,
            }
        })?;
    info!(host = %host, port, "Connected to destination");
    Ok(stream)
}
