//! Tunnel error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Invalid proxy request: {0}")]
    InvalidRequest(String),

    #[error("Connection refused to {host}:{port}")]
    ConnectionRefused { host: String, port: u16 },

    #[error("Connection timeout after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Blocked destination: {host} - {reason}")]
    BlockedDestination { host: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TunnelError {
    /// Map to HTTP status line
    pub fn http_status_code(&self) -> &'static str {
        match self {
            TunnelError::InvalidRequest(_) => "400 Bad Request",
            TunnelError::ConnectionRefused { .. } => "502 Bad Gateway",
            TunnelError::Timeout { .. } => "504 Gateway Timeout",
            TunnelError::BlockedDestination { .. } => "403 Forbidden",
            TunnelError::Io(_) => "502 Bad Gateway",
        }
    }

    /// Get HTTP response bytes
    pub fn to_http_response(&self) -> Vec<u8> {
        let status = self.http_status_code();
        let body = format!("Error: {}\r\n", self);
        let header = format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\n",
            status,
            body.len()
        );
        format!("{}{}", header, body).into_bytes()
    }

    /// Get type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            TunnelError::InvalidRequest(_) => "invalid_request",
            TunnelError::ConnectionRefused { .. } => "connection_refused",
            TunnelError::Timeout { .. } => "timeout",
            TunnelError::BlockedDestination { .. } => "blocked_destination",
            TunnelError::Io(_) => "io_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, TunnelError>;
