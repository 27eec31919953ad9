//! The three loops that move packets through a tunnel.
//!
//! - **Enqueue**: interface → classify → queue.
//! - **Dequeue**: queue → socket, paced to the configured bandwidth.
//! - **Receive**: socket → interface, unshaped, peer address checked.
//!
//! Each pump runs until its own I/O fails, its source reaches EOF, or the
//! session is cancelled. A stopping pump does not stop the others.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::classify::Classifier;
use crate::constants::MAX_PACKET_SIZE;
use crate::error::TransportError;
use crate::io::{DatagramIo, TunIo};
use crate::pacing::Pacer;
use crate::packet::Packet;
use crate::queue::PacketQueue;

/// Why a pump returned without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    /// Its source reported end of stream.
    Eof,
    /// The session was cancelled.
    Cancelled,
}

pub type PumpResult = Result<PumpExit, TransportError>;

/// Reads frames from the interface and submits them to the queue.
pub async fn enqueue_pump<T: TunIo + ?Sized>(
    tun: Arc<T>,
    queue: Arc<PacketQueue>,
    classifier: Classifier,
    cancel: CancellationToken,
) -> PumpResult {
    let mut packet = Packet::new();

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => return Ok(PumpExit::Cancelled),
            read = tun.recv(packet.buffer_mut()) => read,
        };

        let len = match read {
            Ok(0) => {
                info!("interface reached EOF, stopping enqueue pump");
                return Ok(PumpExit::Eof);
            }
            Ok(len) => len.min(MAX_PACKET_SIZE),
            Err(e) => {
                error!(error = %e, "failed to read from interface, stopping enqueue pump");
                return Err(TransportError::InterfaceRead(e));
            }
        };
        packet.set_len(len);

        let Some(priority) = classifier.priority(packet.as_slice()) else {
            debug!(len, "dropping frame with unrecognized IP version");
            continue;
        };

        match queue.enqueue(&packet, priority) {
            Ok(()) => trace!(len, priority, "frame queued"),
            Err(e) => warn!(error = %e, len, priority, "dropping frame"),
        }
    }
}

/// Drains the queue to the peer, holding each packet's share of the link
/// before sending the next one.
pub async fn dequeue_pump<S: DatagramIo + ?Sized>(
    socket: Arc<S>,
    queue: Arc<PacketQueue>,
    peer: SocketAddr,
    pacer: Pacer,
    cancel: CancellationToken,
) -> PumpResult {
    loop {
        let packet = tokio::select! {
            _ = cancel.cancelled() => return Ok(PumpExit::Cancelled),
            packet = queue.dequeue() => packet,
        };

        let started = Instant::now();
        if let Err(e) = socket.send_to(packet.as_slice(), peer).await {
            error!(error = %e, %peer, "failed to send to peer, stopping dequeue pump");
            return Err(TransportError::SocketSend(e));
        }
        trace!(len = packet.len(), %peer, "packet sent");

        tokio::select! {
            _ = cancel.cancelled() => return Ok(PumpExit::Cancelled),
            _ = pacer.wait(started, packet.len()) => {}
        }
    }
}

/// Writes datagrams from the peer to the interface. Anything from another
/// address is dropped.
pub async fn receive_pump<T: TunIo + ?Sized, S: DatagramIo + ?Sized>(
    tun: Arc<T>,
    socket: Arc<S>,
    peer: SocketAddr,
    cancel: CancellationToken,
) -> PumpResult {
    let mut buf = [0u8; MAX_PACKET_SIZE];

    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => return Ok(PumpExit::Cancelled),
            received = socket.recv_from(&mut buf) => received,
        };

        let (len, from) = match received {
            Ok(received) => received,
            Err(e) => {
                error!(error = %e, "failed to receive from socket, stopping receive pump");
                return Err(TransportError::SocketRecv(e));
            }
        };

        if from != peer {
            trace!(%from, len, "ignored datagram from unexpected address");
            continue;
        }
        if len == 0 {
            info!(%peer, "peer sent an empty datagram, stopping receive pump");
            return Ok(PumpExit::Eof);
        }

        // Ingress is best effort.
        if let Err(e) = tun.send(&buf[..len]).await {
            warn!(error = %e, len, "failed to write to interface");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::num::NonZeroU32;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::constants::{PRIORITY_CLASSES, PRIORITY_DEFAULT};
    use crate::io::testing::{loopback_socket, ChannelTun, RecordingSocket};

    fn ipv4_frame(protocol: u8, len: usize, tag: u8) -> Vec<u8> {
        let mut frame = vec![tag; len];
        frame[..4].copy_from_slice(&[0, 0, 0x08, 0x00]);
        frame[4] = 0x45;
        frame[13] = protocol;
        frame
    }

    fn queue(capacity: usize, backlog: usize) -> Arc<PacketQueue> {
        Arc::new(PacketQueue::new(capacity, backlog, PRIORITY_CLASSES).unwrap())
    }

    struct BrokenTun;

    #[async_trait]
    impl TunIo for BrokenTun {
        async fn recv(&self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "device gone"))
        }

        async fn send(&self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "device gone"))
        }
    }

    #[tokio::test]
    async fn test_enqueue_pump_classifies_and_stops_on_eof() {
        let (tun, inbound, _outbound) = ChannelTun::new();
        let queue = queue(10_000, 10);

        inbound.send(ipv4_frame(6, 60, 1)).await.unwrap();
        inbound.send(vec![0, 0, 0, 0, 0x55, 0, 0, 0]).await.unwrap();
        inbound.send(ipv4_frame(17, 60, 2)).await.unwrap();
        drop(inbound);

        let exit = enqueue_pump(
            Arc::new(tun),
            queue.clone(),
            Classifier::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(exit, PumpExit::Eof);

        // The UDP frame jumps ahead of the TCP frame; the garbage is gone.
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.try_dequeue().unwrap().as_slice(), &ipv4_frame(17, 60, 2)[..]);
        assert_eq!(queue.try_dequeue().unwrap().as_slice(), &ipv4_frame(6, 60, 1)[..]);
    }

    #[tokio::test]
    async fn test_enqueue_pump_survives_saturation() {
        let (tun, inbound, _outbound) = ChannelTun::new();
        let queue = queue(10_000, 1);

        for tag in 0..3 {
            inbound.send(ipv4_frame(17, 100, tag)).await.unwrap();
        }
        drop(inbound);

        let exit = enqueue_pump(
            Arc::new(tun),
            queue.clone(),
            Classifier::default(),
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(exit, Ok(PumpExit::Eof)));

        let stats = queue.stats();
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.rejected, 2);
        assert_eq!(stats.per_class[PRIORITY_DEFAULT], 1);
    }

    #[tokio::test]
    async fn test_enqueue_pump_reports_read_error() {
        let result = enqueue_pump(
            Arc::new(BrokenTun),
            queue(10_000, 10),
            Classifier::default(),
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(TransportError::InterfaceRead(_))));
    }

    #[tokio::test]
    async fn test_enqueue_pump_stops_on_cancel() {
        let (tun, _inbound, _outbound) = ChannelTun::new();
        let cancel = CancellationToken::new();
        let pump = tokio::spawn(enqueue_pump(
            Arc::new(tun),
            queue(10_000, 10),
            Classifier::default(),
            cancel.clone(),
        ));

        cancel.cancel();
        let exit = tokio::time::timeout(Duration::from_secs(1), pump)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(exit, Ok(PumpExit::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dequeue_pump_paces_to_bandwidth() {
        let socket = Arc::new(RecordingSocket::new());
        let queue = queue(10_000, 10);
        let peer: SocketAddr = "192.0.2.1:5976".parse().unwrap();
        // (976 + 24) bytes at 10_000 B/s = 100ms per packet.
        let pacer = Pacer::new(NonZeroU32::new(10_000).unwrap(), 24);

        queue.enqueue(&Packet::from_slice(&[1u8; 976]).unwrap(), 1).unwrap();
        queue.enqueue(&Packet::from_slice(&[2u8; 976]).unwrap(), 1).unwrap();
        queue.enqueue(&Packet::from_slice(&[3u8; 976]).unwrap(), 0).unwrap();

        let cancel = CancellationToken::new();
        let pump = tokio::spawn(dequeue_pump(
            socket.clone(),
            queue.clone(),
            peer,
            pacer,
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        assert!(matches!(pump.await.unwrap(), Ok(PumpExit::Cancelled)));

        let sent = socket.sent();
        let tags: Vec<u8> = sent.iter().map(|(_, data, _)| data[0]).collect();
        assert_eq!(tags, vec![3, 1, 2]);
        assert!(sent.iter().all(|(_, _, to)| *to == peer));
        for pair in sent.windows(2) {
            assert!(pair[1].0 - pair[0].0 >= Duration::from_millis(100));
        }
    }

    #[tokio::test]
    async fn test_dequeue_pump_reports_send_error() {
        let queue = queue(10_000, 10);
        queue.enqueue(&Packet::from_slice(&[0u8; 10]).unwrap(), 0).unwrap();

        let result = dequeue_pump(
            Arc::new(RecordingSocket::failing()),
            queue,
            "192.0.2.1:5976".parse().unwrap(),
            Pacer::new(NonZeroU32::new(1_000_000).unwrap(), 0),
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(TransportError::SocketSend(_))));
    }

    #[tokio::test]
    async fn test_receive_pump_discards_foreign_datagrams() {
        let socket = Arc::new(loopback_socket().await);
        let peer = loopback_socket().await;
        let stranger = loopback_socket().await;
        let local = socket.local_addr().unwrap();

        let (tun, _inbound, mut outbound) = ChannelTun::new();
        let cancel = CancellationToken::new();
        let pump = tokio::spawn(receive_pump(
            Arc::new(tun),
            socket,
            peer.local_addr().unwrap(),
            cancel.clone(),
        ));

        stranger.send_to(b"spoofed", local).await.unwrap();
        peer.send_to(b"genuine", local).await.unwrap();

        let written = tokio::time::timeout(Duration::from_secs(1), outbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(written, b"genuine");
        assert!(outbound.try_recv().is_err());

        cancel.cancel();
        assert!(matches!(pump.await.unwrap(), Ok(PumpExit::Cancelled)));
    }

    #[tokio::test]
    async fn test_receive_pump_keeps_going_after_write_failure() {
        let socket = Arc::new(loopback_socket().await);
        let peer = loopback_socket().await;
        let local = socket.local_addr().unwrap();

        let (tun, _inbound, mut outbound) = ChannelTun::new();
        tun.fail_writes(1);
        let cancel = CancellationToken::new();
        let pump = tokio::spawn(receive_pump(
            Arc::new(tun),
            socket,
            peer.local_addr().unwrap(),
            cancel.clone(),
        ));

        peer.send_to(b"lost", local).await.unwrap();
        peer.send_to(b"delivered", local).await.unwrap();

        let written = tokio::time::timeout(Duration::from_secs(1), outbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(written, b"delivered");

        cancel.cancel();
        assert!(matches!(pump.await.unwrap(), Ok(PumpExit::Cancelled)));
    }

    #[tokio::test]
    async fn test_receive_pump_stops_on_empty_datagram_from_peer() {
        let socket = Arc::new(loopback_socket().await);
        let peer = loopback_socket().await;
        let local = socket.local_addr().unwrap();
        let (tun, _inbound, _outbound) = ChannelTun::new();

        peer.send_to(&[], local).await.unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            receive_pump(
                Arc::new(tun),
                socket,
                peer.local_addr().unwrap(),
                CancellationToken::new(),
            ),
        )
        .await
        .unwrap();
        assert!(matches!(result, Ok(PumpExit::Eof)));
    }
}
