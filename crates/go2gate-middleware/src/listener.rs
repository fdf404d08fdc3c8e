//! [`EventListener`] – raw TCP/UDP ingest of robot event notifications.
//!
//! Binds the configured transports, frames inbound bytes into messages,
//! normalizes each one into an [`Envelope`] and publishes it on the
//! [`EventBus`]:
//!
//! * **UDP** – one datagram is one message.
//! * **TCP** – one task per accepted connection; messages are
//!   newline-delimited. When a connection stays silent for the idle timeout,
//!   closes, or the listener stops, whatever is still buffered is flushed as
//!   one final message and the connection is dropped.
//!
//! Payload problems never stop the listener: non-JSON input degrades to a
//! `{kind, source, text}` envelope. Steady-state socket errors are logged and
//! the loop carries on; only [`EventListener::stop`] ends it.

use std::net::SocketAddr;
use std::time::Duration;

use go2gate_types::{Envelope, GateError, Transport};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::bus::EventBus;

/// Default inactivity window after which a TCP connection is flushed and closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(2);

/// How long [`EventListener::stop`] waits for loops to wind down.
pub const STOP_GRACE: Duration = Duration::from_secs(2);

/// A TCP line longer than this is flushed as-is without waiting for `\n`.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

const READ_CHUNK: usize = 4096;
const MAX_DATAGRAM: usize = 65_535;
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Lifecycle of an [`EventListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Bind address and framing parameters for an [`EventListener`].
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub host: String,
    pub port: u16,
    /// Every listed transport gets its own socket on `host:port`.
    pub transports: Vec<Transport>,
    pub idle_timeout: Duration,
    /// Overwrite producer-supplied `source` fields with the observed peer.
    pub stamp_peer_source: bool,
}

impl ListenerConfig {
    pub fn new(host: impl Into<String>, port: u16, transports: Vec<Transport>) -> Self {
        Self {
            host: host.into(),
            port,
            transports,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            stamp_peer_source: false,
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self::new("0.0.0.0", 6000, vec![Transport::Tcp])
    }
}

// ---------------------------------------------------------------------------
// Ingest: bytes -> envelope -> bus
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Ingest {
    bus: EventBus,
    transport: Transport,
    stamp_peer_source: bool,
}

impl Ingest {
    fn publish(&self, frame: &[u8], peer: SocketAddr) {
        let source = format!("{}://{peer}", self.transport.scheme());
        let Some(mut envelope) = Envelope::from_frame(frame, &source) else {
            return;
        };
        if self.stamp_peer_source {
            envelope.stamp_source(&source);
        }
        debug!(
            transport = %self.transport,
            peer = %peer,
            kind = envelope.kind(),
            "event received"
        );
        self.bus.publish(envelope);
    }
}

/// Split every complete `\n`-terminated line off the front of `pending`.
///
/// The newline itself is removed; an unterminated tail stays in `pending`.
pub(crate) fn drain_lines(pending: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let mut lines = Vec::new();
    while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
        let mut line: Vec<u8> = pending.drain(..=pos).collect();
        line.pop();
        lines.push(line);
    }
    lines
}

enum BoundSocket {
    Tcp(TcpListener),
    Udp(UdpSocket),
}

// ---------------------------------------------------------------------------
// EventListener
// ---------------------------------------------------------------------------

/// TCP and/or UDP event ingest server feeding an [`EventBus`].
///
/// # Example
///
/// ```rust,no_run
/// use go2gate_middleware::{EventBus, EventListener, ListenerConfig};
/// use go2gate_types::Transport;
///
/// # async fn demo() -> Result<(), go2gate_types::GateError> {
/// let bus = EventBus::default();
/// let config = ListenerConfig::new("0.0.0.0", 6000, vec![Transport::Tcp, Transport::Udp]);
/// let mut listener = EventListener::new(config, bus.clone());
/// listener.start().await?;
/// // ...
/// listener.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct EventListener {
    config: ListenerConfig,
    bus: EventBus,
    state: ListenerState,
    shutdown: Option<CancellationToken>,
    loops: Vec<JoinHandle<()>>,
    connections: TaskTracker,
    local_addrs: Vec<(Transport, SocketAddr)>,
}

impl EventListener {
    pub fn new(config: ListenerConfig, bus: EventBus) -> Self {
        Self {
            config,
            bus,
            state: ListenerState::Stopped,
            shutdown: None,
            loops: Vec::new(),
            connections: TaskTracker::new(),
            local_addrs: Vec::new(),
        }
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ListenerState::Running
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Address actually bound for `transport`, if it is running.
    pub fn local_addr(&self, transport: Transport) -> Option<SocketAddr> {
        self.local_addrs
            .iter()
            .find(|(t, _)| *t == transport)
            .map(|(_, addr)| *addr)
    }

    /// Bind every configured transport and spawn its receive loop.
    ///
    /// No-op when already running. All sockets are bound before any loop is
    /// spawned, so a bind failure leaves the listener [`Stopped`] with nothing
    /// half-started.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Bind`] if any socket cannot be bound, or
    /// [`GateError::Config`] if no transport is configured.
    ///
    /// [`Stopped`]: ListenerState::Stopped
    pub async fn start(&mut self) -> Result<(), GateError> {
        if matches!(self.state, ListenerState::Running | ListenerState::Starting) {
            debug!("event listener already running");
            return Ok(());
        }
        self.state = ListenerState::Starting;

        let bound = match self.bind_all().await {
            Ok(bound) => bound,
            Err(e) => {
                self.state = ListenerState::Stopped;
                return Err(e);
            }
        };

        let shutdown = CancellationToken::new();
        self.connections = TaskTracker::new();
        for (transport, local, socket) in bound {
            let ingest = Ingest {
                bus: self.bus.clone(),
                transport,
                stamp_peer_source: self.config.stamp_peer_source,
            };
            let handle = match socket {
                BoundSocket::Tcp(listener) => tokio::spawn(run_tcp(
                    listener,
                    ingest,
                    shutdown.clone(),
                    self.connections.clone(),
                    self.config.idle_timeout,
                )),
                BoundSocket::Udp(socket) => {
                    tokio::spawn(run_udp(socket, ingest, shutdown.clone()))
                }
            };
            info!(transport = %transport, addr = %local, "event listener started");
            self.loops.push(handle);
            self.local_addrs.push((transport, local));
        }

        self.shutdown = Some(shutdown);
        self.state = ListenerState::Running;
        Ok(())
    }

    /// Signal every loop to exit and wait up to [`STOP_GRACE`] for them.
    ///
    /// Loops still alive at the deadline are aborted, which drops (and so
    /// closes) their sockets.
    pub async fn stop(&mut self) {
        let Some(shutdown) = self.shutdown.take() else {
            return;
        };
        self.state = ListenerState::Stopping;
        shutdown.cancel();

        let deadline = tokio::time::Instant::now() + STOP_GRACE;
        for mut handle in self.loops.drain(..) {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                warn!("listener loop missed the stop deadline, aborting");
                handle.abort();
            }
        }

        self.connections.close();
        if tokio::time::timeout_at(deadline, self.connections.wait())
            .await
            .is_err()
        {
            warn!(
                remaining = self.connections.len(),
                "tcp connections still draining after stop deadline"
            );
        }

        self.local_addrs.clear();
        self.state = ListenerState::Stopped;
        info!("event listener stopped");
    }

    async fn bind_all(&self) -> Result<Vec<(Transport, SocketAddr, BoundSocket)>, GateError> {
        if self.config.transports.is_empty() {
            return Err(GateError::Config(
                "event listener has no transports configured".to_string(),
            ));
        }

        let host = self.config.host.as_str();
        let port = self.config.port;
        let mut bound: Vec<(Transport, SocketAddr, BoundSocket)> = Vec::new();
        for &transport in &self.config.transports {
            if bound.iter().any(|(t, _, _)| *t == transport) {
                continue;
            }
            let bind_error = |e: std::io::Error| GateError::Bind {
                addr: format!("{transport}://{host}:{port}"),
                reason: e.to_string(),
            };
            let (local, socket) = match transport {
                Transport::Tcp => {
                    let listener = TcpListener::bind((host, port)).await.map_err(bind_error)?;
                    (listener.local_addr().map_err(bind_error)?, BoundSocket::Tcp(listener))
                }
                Transport::Udp => {
                    let socket = UdpSocket::bind((host, port)).await.map_err(bind_error)?;
                    (socket.local_addr().map_err(bind_error)?, BoundSocket::Udp(socket))
                }
            };
            bound.push((transport, local, socket));
        }
        Ok(bound)
    }
}

impl Drop for EventListener {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Receive loops
// ---------------------------------------------------------------------------

async fn run_udp(socket: UdpSocket, ingest: Ingest, shutdown: CancellationToken) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((n, peer)) => ingest.publish(&buf[..n], peer),
                Err(e) => {
                    warn!(error = %e, "udp receive error");
                    if back_off(&shutdown).await {
                        break;
                    }
                }
            },
        }
    }
    debug!("udp loop exited");
}

/// Pause after a socket error so a persistent failure cannot spin the loop.
/// Returns `true` when shutdown was requested during the pause.
async fn back_off(shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = tokio::time::sleep(ERROR_BACKOFF) => false,
    }
}

async fn run_tcp(
    listener: TcpListener,
    ingest: Ingest,
    shutdown: CancellationToken,
    connections: TaskTracker,
    idle_timeout: Duration,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "tcp connection accepted");
                    connections.spawn(handle_tcp_conn(
                        stream,
                        peer,
                        ingest.clone(),
                        shutdown.clone(),
                        idle_timeout,
                    ));
                }
                Err(e) => {
                    warn!(error = %e, "tcp accept error");
                    if back_off(&shutdown).await {
                        break;
                    }
                }
            },
        }
    }
    debug!("tcp accept loop exited");
}

async fn handle_tcp_conn(
    mut stream: TcpStream,
    peer: SocketAddr,
    ingest: Ingest,
    shutdown: CancellationToken,
    idle_timeout: Duration,
) {
    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let read = tokio::select! {
            _ = shutdown.cancelled() => break,
            read = tokio::time::timeout(idle_timeout, stream.read(&mut chunk)) => read,
        };
        match read {
            Err(_) => {
                debug!(peer = %peer, "tcp connection idle");
                break;
            }
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                pending.extend_from_slice(&chunk[..n]);
                for line in drain_lines(&mut pending) {
                    ingest.publish(&line, peer);
                }
                if pending.len() >= MAX_FRAME_BYTES {
                    ingest.publish(&pending, peer);
                    pending.clear();
                }
            }
            Ok(Err(e)) => {
                warn!(peer = %peer, error = %e, "tcp read error");
                break;
            }
        }
    }

    if !pending.is_empty() {
        ingest.publish(&pending, peer);
    }
    debug!(peer = %peer, "tcp connection closed");
}
