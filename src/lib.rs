//! Shapetun - a point-to-point IP tunnel over UDP with egress shaping.
//!
//! Frames read from a TUN interface are classified, admitted into a bounded
//! priority queue and sent to a single peer at a fixed byte rate. Datagrams
//! from that peer are written back to the interface unshaped.

pub mod classify;
pub mod config;
pub mod constants;
pub mod error;
pub mod handshake;
pub mod io;
pub mod pacing;
pub mod packet;
pub mod pump;
pub mod queue;
pub mod tunnel;

pub use classify::{Classifier, PacketType};
pub use config::{HandshakeConfig, TunnelConfig};
pub use error::{EnqueueError, HandshakeError, ResourceError, TransportError, TunnelError};
pub use handshake::LinkParams;
pub use io::{DatagramIo, TunIo};
pub use pacing::Pacer;
pub use packet::Packet;
pub use queue::{PacketQueue, QueueStats};
pub use tunnel::{PumpOutcome, SessionReport, Tunnel};
