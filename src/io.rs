//! Seams between the pumps and the OS handles they drive.
//!
//! The pumps only need "read a frame / write a frame" from the interface and
//! "receive from / send to" from the socket, so both sides are traits. The
//! real implementations are `tun_rs::AsyncDevice` and `tokio::net::UdpSocket`.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tun_rs::AsyncDevice;

/// Frame-oriented virtual interface. A read of zero bytes means EOF.
#[async_trait]
pub trait TunIo: Send + Sync + 'static {
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;
    async fn send(&self, buf: &[u8]) -> io::Result<usize>;
}

/// Datagram socket talking to the peer.
#[async_trait]
pub trait DatagramIo: Send + Sync + 'static {
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;
}

#[async_trait]
impl TunIo for AsyncDevice {
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        AsyncDevice::recv(self, buf).await
    }

    async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        AsyncDevice::send(self, buf).await
    }
}

#[async_trait]
impl DatagramIo for UdpSocket {
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, target).await
    }
}
