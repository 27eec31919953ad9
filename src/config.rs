//! Tunnel and handshake configuration.

use std::num::NonZeroU32;
use std::time::Duration;

use crate::constants::{
    DEFAULT_BACKLOG, HANDSHAKE_ATTEMPTS, HANDSHAKE_REPLY_TIMEOUT_MS, LINK_HEADER_LEN,
    PRIORITY_CLASSES, SHUTDOWN_TIMEOUT_MS,
};
use crate::pacing::Pacer;

/// Shaping and queueing parameters for one tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    /// Byte ceiling of the egress queue.
    pub queue_capacity_bytes: usize,
    /// Preallocated queue slots.
    pub backlog: usize,
    /// Number of priority classes in the egress queue.
    pub priorities: usize,
    /// Framing cost added to every packet when pacing.
    pub overhead: u8,
    /// Egress rate in bytes per second.
    pub bandwidth: NonZeroU32,
    /// Link metadata preceding the IP header in interface frames.
    pub link_header_len: usize,
    /// How long a cancelled session waits for its pumps.
    pub shutdown_timeout: Duration,
}

impl TunnelConfig {
    pub fn new(queue_capacity_bytes: usize, overhead: u8, bandwidth: NonZeroU32) -> Self {
        Self {
            queue_capacity_bytes,
            backlog: DEFAULT_BACKLOG,
            priorities: PRIORITY_CLASSES,
            overhead,
            bandwidth,
            link_header_len: LINK_HEADER_LEN,
            shutdown_timeout: Duration::from_millis(SHUTDOWN_TIMEOUT_MS),
        }
    }

    pub fn with_backlog(mut self, backlog: usize) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn with_link_header_len(mut self, len: usize) -> Self {
        self.link_header_len = len;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn pacer(&self) -> Pacer {
        Pacer::new(self.bandwidth, self.overhead)
    }
}

/// Retry policy of the handshake initiator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeConfig {
    pub attempts: usize,
    pub reply_timeout: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            attempts: HANDSHAKE_ATTEMPTS,
            reply_timeout: Duration::from_millis(HANDSHAKE_REPLY_TIMEOUT_MS),
        }
    }
}
