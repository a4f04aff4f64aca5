//! Witness node: one process running the authenticated transport and the
//! evidence-voting protocol on top of it.
//!
//! - [`config`]: TOML configuration and its projection onto the transport
//! - [`identity`]: the persistent node key
//! - [`logging`]: tracing subscriber setup
//! - [`metrics`]: Prometheus registry
//! - [`node`]: [`WitnessNode`], which owns and wires everything

pub mod config;
pub mod error;
pub mod identity;
pub mod logging;
pub mod metrics;
pub mod node;

pub use config::NodeConfig;
pub use error::NodeError;
pub use identity::load_or_create_keypair;
pub use logging::{init_logging, LogFormat};
pub use metrics::NodeMetrics;
pub use node::WitnessNode;
