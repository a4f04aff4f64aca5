//! Outbound dialing with bounded retries.
//!
//! The [`ContactManager`] keeps the set of endpoints currently being dialed
//! so the same address is never dialed twice at once, and remembers the
//! identity first discovered at each endpoint so a later reconnect to the
//! same address cannot silently land on a different peer.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use witness_types::Identity;

use crate::connection::{establish, ConnectionContext, Role};
use crate::shutdown::ShutdownSignal;
use crate::NetworkError;

/// How a dial task ended.
#[derive(Debug)]
pub enum DialOutcome {
    /// Authenticated, ran, and later disconnected.
    Disconnected(Identity),
    /// TCP connected but the handshake or pool admission failed.
    Rejected(NetworkError),
    /// The retry budget ran out before a TCP connection succeeded.
    Abandoned { attempts: u32 },
    /// Shutdown fired while dialing or backing off.
    Cancelled,
}

#[derive(Default)]
struct ContactState {
    in_flight: HashSet<SocketAddr>,
    pinned: HashMap<SocketAddr, Identity>,
}

/// Dials peers, deduplicating concurrent attempts per endpoint.
#[derive(Clone)]
pub struct ContactManager {
    ctx: ConnectionContext,
    shutdown: ShutdownSignal,
    state: Arc<Mutex<ContactState>>,
}

impl ContactManager {
    pub fn new(ctx: ConnectionContext, shutdown: ShutdownSignal) -> Self {
        Self {
            ctx,
            shutdown,
            state: Arc::new(Mutex::new(ContactState::default())),
        }
    }

    /// Start dialing `addr` in the background.
    ///
    /// Returns `None` if `addr` is already being dialed or shutdown has been
    /// triggered.
    pub fn connect(&self, addr: SocketAddr) -> Option<JoinHandle<DialOutcome>> {
        if self.shutdown.is_triggered() {
            return None;
        }
        if !self.state.lock().in_flight.insert(addr) {
            tracing::debug!(addr = %addr, "already dialing");
            return None;
        }
        let guard = InFlightGuard {
            addr,
            state: Arc::clone(&self.state),
        };
        let manager = self.clone();
        Some(tokio::spawn(async move {
            let outcome = manager.dial_loop(addr).await;
            drop(guard);
            outcome
        }))
    }

    pub fn is_dialing(&self, addr: &SocketAddr) -> bool {
        self.state.lock().in_flight.contains(addr)
    }

    pub fn in_flight_count(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Identity discovered at `addr` on an earlier successful handshake.
    pub fn pinned_identity(&self, addr: &SocketAddr) -> Option<Identity> {
        self.state.lock().pinned.get(addr).copied()
    }

    async fn dial_loop(&self, addr: SocketAddr) -> DialOutcome {
        let config = Arc::clone(&self.ctx.config);
        let mut shutdown = self.shutdown.clone();
        let mut failures: u32 = 0;

        let stream = loop {
            let attempt = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr));
            let result = tokio::select! {
                _ = shutdown.recv() => return DialOutcome::Cancelled,
                result = attempt => result,
            };
            match result {
                Ok(Ok(stream)) => break stream,
                Ok(Err(e)) => {
                    tracing::debug!(addr = %addr, error = %e, "connect failed");
                }
                Err(_) => {
                    tracing::debug!(addr = %addr, "connect timed out");
                }
            }

            failures += 1;
            if failures > config.max_dial_retries {
                tracing::warn!(addr = %addr, attempts = failures, "abandoning endpoint");
                return DialOutcome::Abandoned { attempts: failures };
            }
            let delay = config.backoff_for(failures);
            tracing::trace!(addr = %addr, ?delay, "backing off before redial");
            tokio::select! {
                _ = shutdown.recv() => return DialOutcome::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        };

        let pinned = self.pinned_identity(&addr);
        let established = match establish(stream, Role::Dialer { pinned }, &self.ctx).await {
            Ok(established) => established,
            Err(e) => {
                tracing::info!(addr = %addr, error = %e, "outbound handshake rejected");
                return DialOutcome::Rejected(e);
            }
        };

        let peer = established.peer();
        self.state.lock().pinned.insert(addr, peer);
        let _ = established.run(shutdown).await;
        DialOutcome::Disconnected(peer)
    }
}

/// Frees the endpoint for future dials however the dial task ends.
struct InFlightGuard {
    addr: SocketAddr,
    state: Arc<Mutex<ContactState>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.state.lock().in_flight.remove(&self.addr);
    }
}
