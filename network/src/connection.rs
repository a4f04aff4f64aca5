//! One authenticated, bidirectional stream to a peer.
//!
//! [`establish`] runs the handshake on a fresh socket and registers the
//! result in the [`ConnectionPool`]; [`Established::run`] then drives the
//! frame receive loop until the peer disconnects, a frame fails to decode,
//! or shutdown is signalled. Outbound frames go through a bounded queue
//! drained by a single writer task, so concurrent senders never interleave
//! partial frames on the socket.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use witness_protocol::{codec, handshake, Message, ProtocolError};
use witness_types::{Identity, KeyPair, Timestamp};

use crate::config::TransportConfig;
use crate::pool::ConnectionPool;
use crate::shutdown::ShutdownSignal;
use crate::NetworkError;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Which side opened the socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

/// Handshake role for a new socket.
#[derive(Clone, Copy, Debug)]
pub enum Role {
    Acceptor,
    /// `pinned` is the identity previously discovered at the dialed endpoint.
    Dialer { pinned: Option<Identity> },
}

/// Receives every message that passed ingress validation.
pub trait InboundHandler: Send + Sync + 'static {
    fn on_message(&self, peer: &Identity, message: Message);
}

/// Everything a connection needs beyond its socket.
#[derive(Clone)]
pub struct ConnectionContext {
    pub keypair: Arc<KeyPair>,
    pub pool: ConnectionPool,
    pub inbound: Arc<dyn InboundHandler>,
    pub config: Arc<TransportConfig>,
}

/// An authenticated peer connection as seen by the pool.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    peer: Identity,
    address: SocketAddr,
    direction: Direction,
    outbound: mpsc::Sender<Arc<[u8]>>,
}

impl Connection {
    pub(crate) fn new(
        peer: Identity,
        address: SocketAddr,
        direction: Direction,
        outbound: mpsc::Sender<Arc<[u8]>>,
    ) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            peer,
            address,
            direction,
            outbound,
        }
    }

    /// Process-unique id; distinguishes two sockets to the same peer.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> &Identity {
        &self.peer
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Queue an already framed message for this peer.
    ///
    /// Returns `false` if the queue is full or the writer has stopped.
    pub fn send_frame(&self, frame: Arc<[u8]>) -> bool {
        match self.outbound.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(peer = %self.peer, "outbound queue full, dropping frame");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// A connection that passed the handshake and was admitted to the pool.
pub struct Established {
    connection: Arc<Connection>,
    reader: OwnedReadHalf,
    writer_task: JoinHandle<()>,
    ctx: ConnectionContext,
}

/// Authenticate `stream` in the given role and register it in the pool.
///
/// Fails on I/O or decode errors, handshake rejection, handshake timeout,
/// or when the pool already holds a connection for the peer's identity. On
/// failure the socket is dropped, which closes it.
pub async fn establish(
    mut stream: TcpStream,
    role: Role,
    ctx: &ConnectionContext,
) -> Result<Established, NetworkError> {
    let address = stream.peer_addr()?;
    let _ = stream.set_nodelay(true);

    let (direction, handshake) = match role {
        Role::Acceptor => (Direction::Inbound, None),
        Role::Dialer { pinned } => (Direction::Outbound, Some(pinned)),
    };
    let exchange = async {
        match handshake {
            None => handshake::accept(&mut stream, &ctx.keypair).await,
            Some(pinned) => handshake::dial(&mut stream, &ctx.keypair, pinned).await,
        }
    };
    let peer = tokio::time::timeout(ctx.config.handshake_timeout, exchange)
        .await
        .map_err(|_| NetworkError::HandshakeTimeout)??;

    let (reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::channel(ctx.config.outbound_queue_capacity.max(1));
    let connection = Arc::new(Connection::new(peer, address, direction, tx));

    if !ctx.pool.add(Arc::clone(&connection)) {
        tracing::debug!(peer = %peer, addr = %address, "refusing second connection for identity");
        return Err(NetworkError::DuplicateIdentity(peer));
    }

    let writer_task = tokio::spawn(write_loop(peer, writer, rx));
    tracing::info!(peer = %peer, addr = %address, %direction, "peer authenticated");

    Ok(Established {
        connection,
        reader,
        writer_task,
        ctx: ctx.clone(),
    })
}

impl Established {
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn peer(&self) -> Identity {
        self.connection.peer
    }

    /// Receive frames until disconnect, decode failure or shutdown.
    ///
    /// Frames from one peer are handled in arrival order. Expired or
    /// unauthenticated messages are skipped; a frame that does not decode
    /// ends the connection. The connection leaves the pool on return.
    pub async fn run(self, mut shutdown: ShutdownSignal) -> Result<(), NetworkError> {
        let Established {
            connection,
            mut reader,
            writer_task,
            ctx,
        } = self;
        let peer = connection.peer;

        let result = loop {
            let frame = tokio::select! {
                _ = shutdown.recv() => break Ok(()),
                frame = codec::read_frame(&mut reader, ctx.config.max_frame_size) => frame,
            };
            let bytes = match frame {
                Ok(bytes) => bytes,
                Err(ProtocolError::Closed) => break Ok(()),
                Err(e) => break Err(NetworkError::from(e)),
            };
            let message: Message = match codec::decode(&bytes) {
                Ok(message) => message,
                Err(e) => break Err(NetworkError::from(e)),
            };

            if message.is_expired(Timestamp::now()) {
                tracing::trace!(peer = %peer, expiration = %message.expiration, "dropping expired message");
                continue;
            }
            if !message.is_authentic() {
                tracing::trace!(peer = %peer, "dropping message with invalid sender signature");
                continue;
            }
            ctx.inbound.on_message(&peer, message);
        };

        ctx.pool.remove(&connection);
        writer_task.abort();

        match &result {
            Ok(()) => tracing::info!(peer = %peer, "peer disconnected"),
            Err(e) => tracing::warn!(peer = %peer, error = %e, "peer disconnected with error"),
        }
        result
    }
}

/// Sole writer for one socket: drains the queue frame by frame.
async fn write_loop(
    peer: Identity,
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::Receiver<Arc<[u8]>>,
) {
    while let Some(frame) = queue.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            tracing::debug!(peer = %peer, error = %e, "write failed, stopping writer");
            break;
        }
    }
    let _ = writer.shutdown().await;
}
