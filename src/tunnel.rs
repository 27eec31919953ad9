//! A tunnel session: one interface, one peer, three pumps.
//!
//! [`Tunnel`] owns the shaped egress queue, which outlives any single session.
//! [`Tunnel::run`] spawns the pumps and collects how each of them ended.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinSet};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::classify::Classifier;
use crate::config::TunnelConfig;
use crate::error::{ResourceError, TransportError, TunnelError};
use crate::handshake;
use crate::io::{DatagramIo, TunIo};
use crate::pacing::Pacer;
use crate::pump::{self, PumpExit, PumpResult};
use crate::queue::PacketQueue;

/// Identifies one of the three pumps of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pump {
    Enqueue,
    Dequeue,
    Receive,
}

/// How a pump ended.
#[derive(Debug)]
pub enum PumpOutcome {
    Exited(PumpExit),
    Failed(TransportError),
    /// The pump never reported back: it was aborted after the shutdown
    /// timeout, or it panicked.
    Aborted,
}

impl PumpOutcome {
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Exited(_))
    }
}

impl From<PumpResult> for PumpOutcome {
    fn from(result: PumpResult) -> Self {
        match result {
            Ok(exit) => Self::Exited(exit),
            Err(e) => Self::Failed(e),
        }
    }
}

/// Per-pump outcome of one session.
#[derive(Debug)]
pub struct SessionReport {
    pub enqueue: PumpOutcome,
    pub dequeue: PumpOutcome,
    pub receive: PumpOutcome,
}

impl SessionReport {
    fn new() -> Self {
        Self {
            enqueue: PumpOutcome::Aborted,
            dequeue: PumpOutcome::Aborted,
            receive: PumpOutcome::Aborted,
        }
    }

    pub fn outcome(&self, pump: Pump) -> &PumpOutcome {
        match pump {
            Pump::Enqueue => &self.enqueue,
            Pump::Dequeue => &self.dequeue,
            Pump::Receive => &self.receive,
        }
    }

    fn record(&mut self, joined: Result<(Pump, PumpResult), JoinError>) {
        let (pump, result) = match joined {
            Ok(finished) => finished,
            Err(e) if e.is_cancelled() => return,
            Err(e) => {
                error!(error = %e, "pump task panicked");
                return;
            }
        };

        match &result {
            Ok(PumpExit::Eof) => info!(?pump, "pump reached EOF"),
            Ok(PumpExit::Cancelled) => debug!(?pump, "pump cancelled"),
            Err(e) => error!(?pump, error = %e, "pump stopped"),
        }

        let outcome = PumpOutcome::from(result);
        match pump {
            Pump::Enqueue => self.enqueue = outcome,
            Pump::Dequeue => self.dequeue = outcome,
            Pump::Receive => self.receive = outcome,
        }
    }
}

/// One end of the tunnel: an interface, a socket bound to a single peer, and
/// the shaped egress queue between them.
pub struct Tunnel<T: ?Sized, S: ?Sized> {
    tun: Arc<T>,
    socket: Arc<S>,
    peer: SocketAddr,
    queue: Arc<PacketQueue>,
    classifier: Classifier,
    pacer: Pacer,
    shutdown_timeout: Duration,
}

impl<T: TunIo + ?Sized, S: DatagramIo + ?Sized> Tunnel<T, S> {
    pub fn new(
        tun: Arc<T>,
        socket: Arc<S>,
        peer: SocketAddr,
        config: &TunnelConfig,
    ) -> Result<Self, ResourceError> {
        let queue = PacketQueue::new(config.queue_capacity_bytes, config.backlog, config.priorities)?;

        info!(
            %peer,
            capacity = config.queue_capacity_bytes,
            bandwidth = config.bandwidth.get(),
            overhead = config.overhead,
            "tunnel initialized"
        );

        Ok(Self {
            tun,
            socket,
            peer,
            queue: Arc::new(queue),
            classifier: Classifier::new(config.link_header_len),
            pacer: config.pacer(),
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    /// Waits for a handshake on `socket`, then builds a tunnel to its sender
    /// that paces egress with the declared bandwidth and overhead, and
    /// acknowledges it.
    pub async fn accept(
        tun: Arc<T>,
        socket: Arc<S>,
        queue_capacity_bytes: usize,
    ) -> Result<Self, TunnelError> {
        let (params, peer) = handshake::respond(socket.as_ref()).await?;
        let config = TunnelConfig::new(queue_capacity_bytes, params.overhead, params.bandwidth);
        let tunnel = Self::new(tun, socket, peer, &config)?;
        handshake::acknowledge(tunnel.socket.as_ref(), peer, params).await?;
        Ok(tunnel)
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn queue(&self) -> &Arc<PacketQueue> {
        &self.queue
    }

    pub fn pacer(&self) -> Pacer {
        self.pacer
    }

    /// Runs the three pumps until all of them have stopped.
    ///
    /// A pump that fails or hits EOF stops alone; the others keep going.
    /// Cancelling `cancel` asks every pump to stop, and any pump still running
    /// after the shutdown timeout is aborted. The tunnel can be run again
    /// afterwards; queued packets carry over.
    pub async fn run(&self, cancel: CancellationToken) -> SessionReport {
        let session = cancel.child_token();
        let mut pumps = JoinSet::new();

        pumps.spawn({
            let tun = self.tun.clone();
            let queue = self.queue.clone();
            let classifier = self.classifier;
            let cancel = session.clone();
            async move {
                let result = pump::enqueue_pump(tun, queue, classifier, cancel).await;
                (Pump::Enqueue, result)
            }
        });

        pumps.spawn({
            let socket = self.socket.clone();
            let queue = self.queue.clone();
            let (peer, pacer) = (self.peer, self.pacer);
            let cancel = session.clone();
            async move {
                let result = pump::dequeue_pump(socket, queue, peer, pacer, cancel).await;
                (Pump::Dequeue, result)
            }
        });

        pumps.spawn({
            let tun = self.tun.clone();
            let socket = self.socket.clone();
            let peer = self.peer;
            let cancel = session.clone();
            async move {
                let result = pump::receive_pump(tun, socket, peer, cancel).await;
                (Pump::Receive, result)
            }
        });

        info!(peer = %self.peer, "tunnel session started");
        let mut report = SessionReport::new();

        loop {
            let joined = tokio::select! {
                joined = pumps.join_next() => joined,
                _ = session.cancelled() => break,
            };
            match joined {
                Some(joined) => report.record(joined),
                None => {
                    info!(peer = %self.peer, "tunnel session ended");
                    return report;
                }
            }
        }

        debug!(timeout = ?self.shutdown_timeout, "session cancelled, waiting for pumps");
        let drained = time::timeout(self.shutdown_timeout, async {
            while let Some(joined) = pumps.join_next().await {
                report.record(joined);
            }
        })
        .await;

        if drained.is_err() {
            warn!(remaining = pumps.len(), "pumps did not stop in time, aborting them");
            pumps.abort_all();
            while let Some(joined) = pumps.join_next().await {
                report.record(joined);
            }
        }

        info!(peer = %self.peer, "tunnel session ended");
        report
    }
}

impl<T: ?Sized, S: ?Sized> std::fmt::Debug for Tunnel<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel")
            .field("peer", &self.peer)
            .field("queue", &self.queue)
            .field("pacer", &self.pacer)
            .finish_non_exhaustive()
    }
}
