//! One-time exchange of link parameters before data-plane traffic starts.
//!
//! The initiator sends a 5 byte datagram: the bandwidth (bytes per second) it
//! wants to receive at, as a big-endian `u32`, followed by the per-packet
//! overhead in bytes. The responder echoes the same 5 bytes back and shapes
//! its own egress with those values.

use std::net::SocketAddr;
use std::num::NonZeroU32;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::time;
use tracing::{debug, info, warn};

use crate::config::HandshakeConfig;
use crate::constants::{HANDSHAKE_LEN, MAX_PACKET_SIZE};
use crate::error::HandshakeError;
use crate::io::DatagramIo;

/// Shaping parameters one side declares for the traffic it receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkParams {
    pub bandwidth: NonZeroU32,
    pub overhead: u8,
}

impl LinkParams {
    pub const fn new(bandwidth: NonZeroU32, overhead: u8) -> Self {
        Self {
            bandwidth,
            overhead,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        buf.put_u32(self.bandwidth.get());
        buf.put_u8(self.overhead);
        buf.freeze()
    }

    pub fn decode(mut datagram: &[u8]) -> Result<Self, HandshakeError> {
        if datagram.len() != HANDSHAKE_LEN {
            return Err(HandshakeError::Malformed {
                len: datagram.len(),
            });
        }
        let bandwidth = datagram.get_u32();
        let overhead = datagram.get_u8();
        let bandwidth = NonZeroU32::new(bandwidth).ok_or(HandshakeError::ZeroBandwidth)?;
        Ok(Self::new(bandwidth, overhead))
    }
}

/// Sends `params` to `peer` and waits for them to be echoed back, retrying up
/// to `config.attempts` times.
pub async fn initiate<S: DatagramIo + ?Sized>(
    socket: &S,
    peer: SocketAddr,
    params: LinkParams,
    config: &HandshakeConfig,
) -> Result<(), HandshakeError> {
    let request = params.encode();
    let mut buf = [0u8; MAX_PACKET_SIZE];

    for attempt in 1..=config.attempts {
        debug!(%peer, attempt, "sending handshake");
        if let Err(e) = socket.send_to(&request, peer).await {
            warn!(error = %e, %peer, attempt, "failed to send handshake");
            continue;
        }

        match time::timeout(
            config.reply_timeout,
            wait_for_echo(socket, peer, &request, &mut buf),
        )
        .await
        {
            Ok(Ok(())) => {
                info!(%peer, attempt, "handshake acknowledged");
                return Ok(());
            }
            Ok(Err(e)) => warn!(error = %e, %peer, attempt, "failed to receive handshake reply"),
            Err(_) => debug!(%peer, attempt, "handshake reply timed out"),
        }
    }

    Err(HandshakeError::NoAcknowledgement {
        attempts: config.attempts,
    })
}

async fn wait_for_echo<S: DatagramIo + ?Sized>(
    socket: &S,
    peer: SocketAddr,
    request: &[u8],
    buf: &mut [u8],
) -> std::io::Result<()> {
    loop {
        let (len, from) = socket.recv_from(buf).await?;
        if from == peer && &buf[..len] == request {
            return Ok(());
        }
        debug!(%from, len, "ignoring datagram while waiting for handshake echo");
    }
}

/// Waits for a well-formed handshake and returns it along with its sender.
/// Anything else is logged and ignored.
pub async fn respond<S: DatagramIo + ?Sized>(
    socket: &S,
) -> Result<(LinkParams, SocketAddr), HandshakeError> {
    let mut buf = [0u8; MAX_PACKET_SIZE];

    loop {
        let (len, from) = socket.recv_from(&mut buf).await?;
        match LinkParams::decode(&buf[..len]) {
            Ok(params) => {
                info!(
                    %from,
                    bandwidth = params.bandwidth.get(),
                    overhead = params.overhead,
                    "received handshake"
                );
                return Ok((params, from));
            }
            Err(e) => warn!(error = %e, %from, "ignoring handshake"),
        }
    }
}

/// Echoes the received parameters back to the initiator.
pub async fn acknowledge<S: DatagramIo + ?Sized>(
    socket: &S,
    peer: SocketAddr,
    params: LinkParams,
) -> Result<(), HandshakeError> {
    socket.send_to(&params.encode(), peer).await?;
    Ok(())
}
