//! Loopback HTTP proxy standing in for the content-delivery service.
//!
//! Accepts `CONNECT host:port` (TLS passthrough, no interception) and
//! absolute-form plain HTTP requests, and forwards them to the destination or
//! to a configured route override. Useful when developing the client without
//! the native service, and as the proxy in end-to-end tests.

mod config;
mod errors;
mod forwarder;
mod handler;
mod parser;
mod validator;

pub use config::{parse_route, TunnelConfig};
pub use errors::{Result, TunnelError};
pub use handler::handle_connection;
pub use parser::{parse_request, ProxyRequest};

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct TunnelProxy {
    listener: TcpListener,
    config: Arc<TunnelConfig>,
}

impl TunnelProxy {
    pub async fn bind(addr: impl ToSocketAddrs, config: TunnelConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, config: Arc::new(config) })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    /// Accept connections until the task is dropped or accept fails.
    pub async fn run(self) -> Result<()> {
        info!(addr = ?self.listener.local_addr().ok(), routes = self.config.routes.len(), "tunnel proxy listening");
        loop {
            let (inbound, peer) = self.listener.accept().await?;
            let config = Arc::clone(&self.config);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(inbound, &config).await {
                    debug!(%peer, kind = e.type_name(), "tunnel connection ended with error");
                }
            });
        }
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }
}
