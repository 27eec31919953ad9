//! Error types for the tunnel.
//!
//! - **Resource errors**: the queue's backing pool could not be set up. Fatal at startup.
//! - **Transport errors**: I/O failure on the socket or the interface. Fatal to the pump
//!   that hit it, never to the whole session.
//! - **Enqueue errors**: admission refused. The packet is dropped and the pump continues.
//! - **Handshake errors**: the parameter exchange did not complete.

use std::io;

use thiserror::Error;

/// Failure to build the queue's slot pool.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("queue capacity must be positive")]
    ZeroCapacity,

    #[error("queue backlog must hold at least one slot")]
    ZeroBacklog,

    #[error("queue needs at least one priority class")]
    NoPriorityClasses,

    #[error("failed to allocate a backlog of {slots} slots")]
    Allocation { slots: usize },
}

/// Admission refused by [`PacketQueue::enqueue`](crate::queue::PacketQueue::enqueue).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnqueueError {
    /// Every slot is in use and no less important packet can be evicted.
    #[error("queue saturated: no free slot for a priority {priority} packet")]
    NoFreeSlot { priority: usize },

    /// The byte ceiling cannot be met by evicting less important packets.
    #[error("queue saturated: {len} byte priority {priority} packet exceeds remaining capacity")]
    ByteCapacity { len: usize, priority: usize },

    #[error("priority class {priority} out of range (queue has {classes})")]
    UnknownPriority { priority: usize, classes: usize },
}

impl EnqueueError {
    /// True for the two saturation cases, as opposed to a caller mistake.
    pub fn is_saturated(&self) -> bool {
        matches!(self, Self::NoFreeSlot { .. } | Self::ByteCapacity { .. })
    }
}

/// I/O failure on one side of the tunnel.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to read from interface")]
    InterfaceRead(#[source] io::Error),

    #[error("failed to receive from socket")]
    SocketRecv(#[source] io::Error),

    #[error("failed to send to socket")]
    SocketSend(#[source] io::Error),
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("no acknowledgement after {attempts} attempts")]
    NoAcknowledgement { attempts: usize },

    #[error("malformed handshake datagram of {len} bytes")]
    Malformed { len: usize },

    #[error("handshake declared a bandwidth of zero")]
    ZeroBandwidth,

    #[error("handshake I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Umbrella error for callers driving a whole tunnel.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturation_classification() {
        assert!(EnqueueError::NoFreeSlot { priority: 1 }.is_saturated());
        assert!(EnqueueError::ByteCapacity { len: 10, priority: 0 }.is_saturated());
        assert!(!EnqueueError::UnknownPriority { priority: 5, classes: 2 }.is_saturated());
    }

    #[test]
    fn test_tunnel_error_from_handshake() {
        let err: TunnelError = HandshakeError::NoAcknowledgement { attempts: 3 }.into();
        assert!(matches!(err, TunnelError::Handshake(_)));
        assert_eq!(
            err.to_string(),
            "handshake error: no acknowledgement after 3 attempts"
        );
    }
}
