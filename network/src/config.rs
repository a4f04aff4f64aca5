//! Transport tuning knobs.

use std::time::Duration;

use witness_protocol::codec::MAX_FRAME_SIZE;

/// Timeouts, retry policy and limits for the transport.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Bound on the whole three-message handshake.
    pub handshake_timeout: Duration,
    /// Bound on a single TCP connect attempt.
    pub connect_timeout: Duration,
    /// Failed connect attempts tolerated before an endpoint is abandoned.
    pub max_dial_retries: u32,
    /// First backoff delay; doubles per failure.
    pub dial_backoff: Duration,
    pub max_dial_backoff: Duration,
    /// Largest accepted frame payload after the handshake.
    pub max_frame_size: usize,
    /// Frames queued per connection before new ones are dropped.
    pub outbound_queue_capacity: usize,
}

impl TransportConfig {
    /// Backoff before retry number `failures` (1-based), capped.
    pub fn backoff_for(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(16);
        self.dial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_dial_backoff)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            max_dial_retries: 5,
            dial_backoff: Duration::from_millis(500),
            max_dial_backoff: Duration::from_secs(30),
            max_frame_size: MAX_FRAME_SIZE,
            outbound_queue_capacity: 1024,
        }
    }
}
