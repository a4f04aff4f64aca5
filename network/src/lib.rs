//! P2P transport layer for the witness node.
//!
//! Connections are mutually authenticated and indexed by peer identity. The
//! [`ConnectionPool`] holds at most one live connection per identity, the
//! [`ContactManager`] dials endpoints with bounded retries, and the
//! [`Messenger`] is the facade upper layers use to emit and subscribe.

pub mod config;
pub mod connection;
pub mod contact;
pub mod error;
pub mod listener;
pub mod messenger;
pub mod pool;
pub mod shutdown;

pub use config::TransportConfig;
pub use connection::{
    establish, Connection, ConnectionContext, Direction, Established, InboundHandler, Role,
};
pub use contact::{ContactManager, DialOutcome};
pub use error::NetworkError;
pub use listener::Listener;
pub use messenger::{MessageHandler, Messenger, Subscription};
pub use pool::ConnectionPool;
pub use shutdown::{ShutdownController, ShutdownSignal};
