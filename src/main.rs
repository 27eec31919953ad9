use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use ipnet::Ipv4Net;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tun_rs::{AsyncDevice, DeviceBuilder};

use shapetun::constants::{DEFAULT_PORT, DEFAULT_TUN_MTU, MAX_PACKET_SIZE, SERVER_QUEUE_CAPACITY};
use shapetun::handshake;
use shapetun::{HandshakeConfig, LinkParams, Tunnel, TunnelConfig};

/// Bandwidth-shaped point-to-point IP tunnel over UDP.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to a server and keep the tunnel up.
    Client(ClientArgs),
    /// Wait for a client and serve one tunnel.
    Server(ServerArgs),
}

#[derive(Args, Debug)]
struct InterfaceArgs {
    /// Name of the TUN device to create.
    #[arg(long)]
    tun_name: Option<String>,

    /// Address assigned to the TUN device, e.g. 10.8.0.2/24.
    #[arg(long)]
    address: Option<Ipv4Net>,

    #[arg(long, default_value_t = DEFAULT_TUN_MTU)]
    mtu: u16,
}

#[derive(Args, Debug)]
struct ClientArgs {
    /// Server hostname or address.
    #[arg(long)]
    host: String,

    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Egress rate towards the server, in bytes per second.
    #[arg(long)]
    upload_bandwidth: NonZeroU32,

    /// Rate the server should send at, in bytes per second.
    #[arg(long)]
    download_bandwidth: NonZeroU32,

    /// Per-packet framing overhead of the underlying link, in bytes.
    #[arg(long, default_value_t = 0)]
    overhead: u8,

    #[command(flatten)]
    interface: InterfaceArgs,
}

#[derive(Args, Debug)]
struct ServerArgs {
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Byte ceiling of the egress queue.
    #[arg(long, default_value_t = SERVER_QUEUE_CAPACITY)]
    queue_capacity: usize,

    #[command(flatten)]
    interface: InterfaceArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received Ctrl-C, shutting down");
            }
            cancel.cancel();
        }
    });

    match cli.command {
        Command::Client(args) => run_client(args, cancel).await,
        Command::Server(args) => run_server(args, cancel).await,
    }
}

async fn run_client(args: ClientArgs, cancel: CancellationToken) -> Result<()> {
    let server = resolve(&args.host, args.port).await?;
    info!(%server, "resolved server");

    let socket = Arc::new(bind_udp(SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0))?);
    let tun = Arc::new(open_tun(&args.interface)?);

    // A tenth of a second of upload, but never less than one full packet.
    let capacity = (args.upload_bandwidth.get() as usize / 10).max(MAX_PACKET_SIZE);
    let config = TunnelConfig::new(capacity, args.overhead, args.upload_bandwidth);
    let tunnel = Tunnel::new(tun, socket.clone(), server, &config)
        .context("failed to initialize tunnel")?;

    let params = LinkParams::new(args.download_bandwidth, args.overhead);
    let handshake_config = HandshakeConfig::default();

    while !cancel.is_cancelled() {
        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            result = handshake::initiate(socket.as_ref(), server, params, &handshake_config) => result,
        };
        if let Err(e) = connected {
            warn!(error = %e, %server, "handshake failed, retrying");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(handshake_config.reply_timeout) => continue,
            }
        }

        info!(%server, "connected");
        let report = tunnel.run(cancel.clone()).await;
        info!(?report, stats = ?tunnel.queue().stats(), "session ended");
    }

    Ok(())
}

async fn run_server(args: ServerArgs, cancel: CancellationToken) -> Result<()> {
    let socket = Arc::new(bind_udp(SocketAddr::new(
        Ipv4Addr::UNSPECIFIED.into(),
        args.port,
    ))?);
    let tun = Arc::new(open_tun(&args.interface)?);
    info!(port = args.port, "waiting for handshake");

    let tunnel = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        result = Tunnel::accept(tun, socket, args.queue_capacity) => {
            result.context("failed to accept client")?
        }
    };
    info!(client = %tunnel.peer(), "client connected");

    let report = tunnel.run(cancel).await;
    info!(?report, stats = ?tunnel.queue().stats(), "session ended");
    Ok(())
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("failed to resolve {host}"))?
        .collect();

    match addrs.iter().find(|addr| addr.is_ipv4()) {
        Some(addr) => Ok(*addr),
        None => bail!("{host} has no IPv4 address"),
    }
}

fn bind_udp(addr: SocketAddr) -> Result<UdpSocket> {
    let domain = match addr.ip() {
        IpAddr::V4(_) => Domain::IPV4,
        IpAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .context("failed to create UDP socket")?;
    socket
        .bind(&addr.into())
        .with_context(|| format!("failed to bind {addr}"))?;
    socket
        .set_nonblocking(true)
        .context("failed to make socket non-blocking")?;

    let socket = UdpSocket::from_std(socket.into()).context("failed to register socket")?;
    info!(local = ?socket.local_addr().ok(), "socket bound");
    Ok(socket)
}

fn open_tun(args: &InterfaceArgs) -> Result<AsyncDevice> {
    let mut builder = DeviceBuilder::new()
        .mtu(args.mtu)
        .packet_information(true);
    if let Some(name) = &args.tun_name {
        builder = builder.name(name);
    }
    if let Some(net) = args.address {
        builder = builder.ipv4(net.addr(), net.netmask(), None);
    }

    let device = builder.build_async().context("failed to create TUN device")?;
    info!(
        name = %device.name().unwrap_or_else(|_| "unknown".to_string()),
        mtu = args.mtu,
        "TUN device created"
    );
    Ok(device)
}
