//! Fixed-capacity frame buffer.

use std::fmt::Debug;

use crate::constants::MAX_PACKET_SIZE;

/// One raw frame read from, or destined for, the virtual interface.
///
/// The buffer has a fixed capacity so packets can live in preallocated queue
/// slots. Only the first `len` bytes are meaningful.
#[derive(Clone)]
pub struct Packet {
    len: u16,
    buffer: [u8; MAX_PACKET_SIZE],
}

impl Packet {
    pub const fn new() -> Self {
        Self {
            len: 0,
            buffer: [0u8; MAX_PACKET_SIZE],
        }
    }

    /// Copies `data` into a new packet. Returns `None` if it exceeds `MAX_PACKET_SIZE`.
    pub fn from_slice(data: &[u8]) -> Option<Self> {
        if data.len() > MAX_PACKET_SIZE {
            return None;
        }
        let mut packet = Self::new();
        packet.buffer[..data.len()].copy_from_slice(data);
        packet.len = data.len() as u16;
        Some(packet)
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer[..self.len()]
    }

    /// Whole backing buffer, for reading a frame straight into the packet.
    /// Follow with [`Packet::set_len`].
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// # Panics
    /// Panics if `len` exceeds `MAX_PACKET_SIZE`.
    pub fn set_len(&mut self, len: usize) {
        assert!(len <= MAX_PACKET_SIZE, "packet length {len} exceeds {MAX_PACKET_SIZE}");
        self.len = len as u16;
    }

    /// Overwrites this packet with the meaningful bytes of `other`.
    pub(crate) fn copy_from(&mut self, other: &Packet) {
        let len = other.len();
        self.buffer[..len].copy_from_slice(other.as_slice());
        self.len = other.len;
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet").field("len", &self.len).finish()
    }
}

impl PartialEq for Packet {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for Packet {}
