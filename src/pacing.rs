//! Egress pacing to a fixed byte rate.

use std::num::NonZeroU32;

use tokio::time::{self, Duration, Instant};

/// Spaces transmissions so the egress rate stays at the configured bandwidth.
///
/// Each packet occupies the emulated link for `(len + overhead) / bandwidth`
/// seconds, counted from just before it was handed to the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacer {
    bandwidth: NonZeroU32,
    overhead: u8,
}

impl Pacer {
    pub const fn new(bandwidth: NonZeroU32, overhead: u8) -> Self {
        Self {
            bandwidth,
            overhead,
        }
    }

    /// Bytes per second.
    pub const fn bandwidth(&self) -> NonZeroU32 {
        self.bandwidth
    }

    /// Per-packet framing cost in bytes that is not part of the payload.
    pub const fn overhead(&self) -> u8 {
        self.overhead
    }

    pub fn transmit_time(&self, len: usize) -> Duration {
        let total = len as u64 + u64::from(self.overhead);
        Duration::from_micros(total * 1_000_000 / u64::from(self.bandwidth.get()))
    }

    /// Instant before which the next packet must not be sent.
    pub fn deadline(&self, started: Instant, len: usize) -> Instant {
        started + self.transmit_time(len)
    }

    /// Sleeps until the link is free again after sending `len` bytes at `started`.
    pub async fn wait(&self, started: Instant, len: usize) {
        time::sleep_until(self.deadline(started, len)).await;
    }
}
