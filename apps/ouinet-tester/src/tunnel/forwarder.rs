//! Bidirectional passthrough forwarding.

use super::errors::{Result, TunnelError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::sleep;
use tracing::debug;

const BUF_SIZE: usize = 16 * 1024;

/// Forward data bidirectionally between two streams until both sides close
/// or neither side moves a byte for `idle`. TLS is passed through untouched.
///
/// Returns (bytes_to_dest, bytes_from_dest) on success.
pub async fn forward_bidirectional<S1, S2>(client: &mut S1, dest: &mut S2, idle: Duration) -> Result<(u64, u64)>
where
    S1: AsyncRead + AsyncWrite + Unpin,
    S2: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_rd, mut client_wr) = tokio::io::split(client);
    let (mut dest_rd, mut dest_wr) = tokio::io::split(dest);
    let mut up = vec![0u8; BUF_SIZE];
    let mut down = vec![0u8; BUF_SIZE];
    let (mut to_dest, mut from_dest) = (0u64, 0u64);
    let (mut client_open, mut dest_open) = (true, true);

    while client_open || dest_open {
        // a fresh sleep each pass: the deadline restarts on every transfer
        tokio::select! {
            r = client_rd.read(&mut up), if client_open => {
                let n = r?;
                if n == 0 {
                    client_open = false;
                    dest_wr.shutdown().await?;
                } else {
                    dest_wr.write_all(&up[..n]).await?;
                    to_dest += n as u64;
                }
            }
            r = dest_rd.read(&mut down), if dest_open => {
                let n = r?;
                if n == 0 {
                    dest_open = false;
                    client_wr.shutdown().await?;
                } else {
                    client_wr.write_all(&down[..n]).await?;
                    from_dest += n as u64;
                }
            }
            _ = sleep(idle) => {
                debug!(bytes_to_dest = to_dest, bytes_from_dest = from_dest, "Connection idle timeout");
                return Err(TunnelError::Timeout {
                    timeout_secs: idle.as_secs(),
                });
            }
        }
    }

    debug!(bytes_to_dest = to_dest, bytes_from_dest = from_dest, "Connection closed normally");
    Ok((to_dest, from_dest))
}
