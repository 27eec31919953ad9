/// Largest frame carried by the tunnel, including the interface's link header.
pub const MAX_PACKET_SIZE: usize = 1500;

/// Number of priority classes in the shipped configuration.
pub const PRIORITY_CLASSES: usize = 2;

/// Class for everything that is not TCP. Served first, never evicted.
pub const PRIORITY_DEFAULT: usize = 0;

/// Class for TCP. TCP retransmits on its own, so it is the first to be shed.
pub const PRIORITY_TCP: usize = 1;

/// Preallocated queue slots per tunnel.
pub const DEFAULT_BACKLOG: usize = 100;

/// Packet information header the TUN device prepends to each frame (flags + proto).
pub const LINK_HEADER_LEN: usize = 4;

/// Size of the bandwidth negotiation datagram.
pub const HANDSHAKE_LEN: usize = 5;

/// Handshake attempts before a connection attempt is declared failed.
pub const HANDSHAKE_ATTEMPTS: usize = 3;

/// How long the initiator waits for an echo on each attempt, in milliseconds.
pub const HANDSHAKE_REPLY_TIMEOUT_MS: u64 = 1000;

/// Port the server listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 5976;

/// Egress queue size on the server side, in bytes.
pub const SERVER_QUEUE_CAPACITY: usize = 16384;

/// How long a cancelled session waits for its pumps before aborting them, in milliseconds.
pub const SHUTDOWN_TIMEOUT_MS: u64 = 2000;

/// TUN MTU that keeps a full frame plus its link header within `MAX_PACKET_SIZE`.
pub const DEFAULT_TUN_MTU: u16 = (MAX_PACKET_SIZE - LINK_HEADER_LEN) as u16;
