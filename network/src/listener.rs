//! Inbound side: accept sockets and run the acceptor handshake on each.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use crate::connection::{establish, ConnectionContext, Role};
use crate::shutdown::ShutdownSignal;
use crate::NetworkError;

/// Pause after a failed `accept` so a persistent error (e.g. fd exhaustion)
/// does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    pub async fn bind(addr: SocketAddr) -> Result<Self, NetworkError> {
        let inner = TcpListener::bind(addr).await?;
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        Ok(self.inner.local_addr()?)
    }

    /// Accept until shutdown. Each socket gets its own task.
    pub async fn run(self, ctx: ConnectionContext, mut shutdown: ShutdownSignal) {
        tracing::info!(addr = ?self.inner.local_addr().ok(), "listening for peers");
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                accepted = self.inner.accept() => match accepted {
                    Ok((stream, addr)) => {
                        tokio::spawn(serve_inbound(stream, addr, ctx.clone(), shutdown.clone()));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }
        tracing::debug!("listener stopped");
    }
}

async fn serve_inbound(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: ConnectionContext,
    shutdown: ShutdownSignal,
) {
    match establish(stream, Role::Acceptor, &ctx).await {
        Ok(established) => {
            let _ = established.run(shutdown).await;
        }
        Err(e) => {
            tracing::debug!(addr = %addr, error = %e, "inbound connection rejected");
        }
    }
}
