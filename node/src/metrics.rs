//! Prometheus metrics for the witness node.
//!
//! [`NodeMetrics`] owns a dedicated [`Registry`]; [`NodeMetrics::encode`]
//! renders it in the Prometheus text exposition format.

use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Encoder, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

use crate::NodeError;

pub struct NodeMetrics {
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    /// Messages that passed ingress validation, by message type.
    pub messages_received: IntCounterVec,
    /// Sessions this node has seen, issued locally or learned from peers.
    pub sessions_observed: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    /// Authenticated connections in the pool.
    pub peer_count: IntGauge,
    /// Sessions not yet finalized.
    pub sessions_active: IntGauge,
}

impl NodeMetrics {
    pub fn new() -> Result<Self, NodeError> {
        let registry = Registry::new();

        let messages_received = register_int_counter_vec_with_registry!(
            Opts::new(
                "witness_messages_received_total",
                "Messages delivered to subscribers, by type"
            ),
            &["type"],
            registry
        )?;

        let sessions_observed = register_int_counter_with_registry!(
            Opts::new(
                "witness_sessions_observed_total",
                "Election sessions observed by this node"
            ),
            registry
        )?;

        let peer_count = register_int_gauge_with_registry!(
            Opts::new("witness_peer_count", "Current number of authenticated peers"),
            registry
        )?;

        let sessions_active = register_int_gauge_with_registry!(
            Opts::new("witness_sessions_active", "Election sessions not yet finalized"),
            registry
        )?;

        Ok(Self {
            registry,
            messages_received,
            sessions_observed,
            peer_count,
            sessions_active,
        })
    }

    /// Render every metric in the text exposition format.
    pub fn encode(&self) -> Result<String, NodeError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| NodeError::Config(e.to_string()))
    }
}
