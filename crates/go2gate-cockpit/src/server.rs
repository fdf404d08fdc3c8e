//! [`CockpitServer`] – WebSocket relay from the [`EventBus`] to observers.
//!
//! Listens on `0.0.0.0:8080` by default ([`CockpitServer::with_port`],
//! [`CockpitServer::with_host`]).
//!
//! * WebSocket upgrades → one bus subscription per connection; every
//!   envelope goes out as one JSON text frame. A `Ping` frame is sent first
//!   to confirm the stream is open.
//! * Anything else → `426 Upgrade Required`.
//!
//! The subscription lives on the handler's stack, so it is released the
//! moment the connection ends, whichever way it ends.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use go2gate_middleware::EventBus;
use go2gate_types::{Envelope, GateError};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Default TCP port for the relay.
pub const DEFAULT_PORT: u16 = 8080;

const UPGRADE_REQUIRED: &str = "HTTP/1.1 426 Upgrade Required\r\n\
     Upgrade: websocket\r\n\
     Connection: close\r\n\
     Content-Type: text/plain; charset=utf-8\r\n\
     Content-Length: 33\r\n\
     \r\n\
     connect with a WebSocket client.\n";

// ---------------------------------------------------------------------------
// CockpitServer
// ---------------------------------------------------------------------------

/// Relay configuration; [`bind`](Self::bind) turns it into a live server.
///
/// # Example
///
/// ```rust,no_run
/// use go2gate_middleware::EventBus;
/// use go2gate_cockpit::CockpitServer;
///
/// # async fn demo() -> Result<(), go2gate_types::GateError> {
/// let bus = EventBus::default();
/// CockpitServer::new(bus.clone()).with_port(8080).run().await
/// # }
/// ```
pub struct CockpitServer {
    bus: EventBus,
    host: String,
    port: u16,
}

impl CockpitServer {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bind the listening socket without accepting yet.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Bind`] if the address is unavailable.
    pub async fn bind(self) -> Result<BoundCockpit, GateError> {
        let bind_error = |e: std::io::Error| GateError::Bind {
            addr: format!("ws://{}:{}", self.host, self.port),
            reason: e.to_string(),
        };
        let listener = TcpListener::bind((self.host.as_str(), self.port))
            .await
            .map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;
        info!(addr = %local_addr, "cockpit relay listening");
        Ok(BoundCockpit {
            listener,
            local_addr,
            bus: self.bus,
        })
    }

    /// Bind, then serve until the task is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Bind`] if the address is unavailable.
    pub async fn run(self) -> Result<(), GateError> {
        self.bind().await?.serve().await;
        Ok(())
    }
}

/// A bound relay, ready to [`serve`](Self::serve).
pub struct BoundCockpit {
    listener: TcpListener,
    local_addr: SocketAddr,
    bus: EventBus,
}

impl BoundCockpit {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections forever, one task per connection.
    pub async fn serve(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let bus = self.bus.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, bus).await {
                            debug!(peer = %peer, error = %e, "cockpit connection ended with error");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "cockpit accept error"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-connection handling
// ---------------------------------------------------------------------------

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    bus: EventBus,
) -> Result<(), GateError> {
    // `peek` leaves the request in the socket for the handshake to read.
    let mut buf = [0u8; 1024];
    let n = stream.peek(&mut buf).await.map_err(|e| GateError::Send {
        addr: peer.to_string(),
        reason: format!("peek failed: {e}"),
    })?;

    let head = String::from_utf8_lossy(&buf[..n]).to_lowercase();
    let is_ws_upgrade = head
        .lines()
        .any(|line| line.starts_with("upgrade:") && line.contains("websocket"));

    if is_ws_upgrade {
        relay(stream, peer, bus).await
    } else {
        reject_plain_http(stream, peer, n).await
    }
}

async fn reject_plain_http(
    mut stream: TcpStream,
    peer: SocketAddr,
    peeked: usize,
) -> Result<(), GateError> {
    debug!(peer = %peer, "plain HTTP request rejected");
    let io_error = |e: std::io::Error| GateError::Send {
        addr: peer.to_string(),
        reason: e.to_string(),
    };
    // Consume what was peeked so closing does not reset the connection.
    let mut request = vec![0u8; peeked];
    stream.read_exact(&mut request).await.map_err(io_error)?;
    stream
        .write_all(UPGRADE_REQUIRED.as_bytes())
        .await
        .map_err(io_error)?;
    stream.shutdown().await.map_err(io_error)
}

async fn relay(stream: TcpStream, peer: SocketAddr, bus: EventBus) -> Result<(), GateError> {
    let ws_error = |e: tokio_tungstenite::tungstenite::Error| GateError::Send {
        addr: peer.to_string(),
        reason: format!("websocket: {e}"),
    };

    let ws_stream = accept_async(stream).await.map_err(ws_error)?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let mut subscription = bus.subscribe();
    info!(peer = %peer, subscription = %subscription.id(), "cockpit observer connected");

    ws_tx
        .send(Message::Ping(Default::default()))
        .await
        .map_err(ws_error)?;

    loop {
        tokio::select! {
            next = subscription.recv() => {
                let Some(envelope) = next else { break };
                match envelope.to_json() {
                    Ok(json) => {
                        if ws_tx.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(peer = %peer, error = %e, "envelope serialization failed"),
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_upstream_message(text.as_str(), &bus);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(peer = %peer, error = %e, "cockpit read error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!(peer = %peer, subscription = %subscription.id(), "cockpit observer disconnected");
    Ok(())
}

// ---------------------------------------------------------------------------
// Upstream frames
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Upstream {
    Publish { event: Map<String, Value> },
}

/// Apply one text frame received from an observer.
///
/// `{"op":"publish","event":{...}}` publishes `event` as a structured
/// submission. Returns whether anything was published; every other frame is
/// ignored.
pub(crate) fn handle_upstream_message(text: &str, bus: &EventBus) -> bool {
    match serde_json::from_str::<Upstream>(text) {
        Ok(Upstream::Publish { event }) => {
            let envelope = Envelope::from_submission(event);
            debug!(kind = envelope.kind(), "observer submitted event");
            bus.publish(envelope);
            true
        }
        Err(e) => {
            debug!(error = %e, "ignoring upstream frame");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use go2gate_types::DEFAULT_KIND;
    use serde_json::json;
    use std::time::Duration;
    use tokio_tungstenite::connect_async;

    async fn spawn_relay(bus: &EventBus) -> SocketAddr {
        let bound = CockpitServer::new(bus.clone())
            .with_host("127.0.0.1")
            .with_port(0)
            .bind()
            .await
            .expect("bind relay");
        let addr = bound.local_addr();
        tokio::spawn(bound.serve());
        addr
    }

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn default_port_is_8080() {
        let server = CockpitServer::new(EventBus::default());
        assert_eq!(server.port(), DEFAULT_PORT);
    }

    #[test]
    fn with_port_overrides_default() {
        let server = CockpitServer::new(EventBus::default()).with_port(9999);
        assert_eq!(server.port(), 9999);
    }

    #[test]
    fn upgrade_required_length_matches_body() {
        let (_, body) = UPGRADE_REQUIRED.split_once("\r\n\r\n").unwrap();
        assert_eq!(body.len(), 33);
    }

    #[tokio::test]
    async fn upstream_publish_keeps_source_and_defaults_kind() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe();

        let frame = r#"{"op":"publish","event":{"source":"dashboard","level":3}}"#;
        assert!(handle_upstream_message(frame, &bus));

        let envelope = sub.recv().await.unwrap();
        assert_eq!(envelope.kind(), DEFAULT_KIND);
        assert_eq!(envelope.source(), Some("dashboard"));
        assert_eq!(envelope.get("level"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn upstream_without_source_stays_without_source() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe();

        assert!(handle_upstream_message(
            r#"{"op":"publish","event":{"kind":"note"}}"#,
            &bus
        ));
        let envelope = sub.recv().await.unwrap();
        assert_eq!(envelope.kind(), "note");
        assert_eq!(envelope.source(), None);
    }

    #[test]
    fn other_upstream_frames_are_ignored() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe();

        assert!(!handle_upstream_message("not json at all", &bus));
        assert!(!handle_upstream_message(r#"{"op":"subscribe","topic":"/x"}"#, &bus));
        assert!(!handle_upstream_message(r#"{"op":"publish","event":[1,2]}"#, &bus));
        assert!(!handle_upstream_message(r#"{"event":{"kind":"x"}}"#, &bus));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn observer_gets_ping_then_one_frame_per_envelope()
    -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let addr = spawn_relay(&bus).await;

        let (mut ws, _) = connect_async(format!("ws://{addr}")).await?;
        let first = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await?
            .ok_or("stream ended")??;
        assert!(matches!(first, Message::Ping(_)), "got {first:?}");

        // The subscription exists before the ping is sent.
        assert_eq!(bus.subscriber_count(), 1);
        for n in 0..3 {
            bus.publish(Envelope::from_submission(object(json!({"kind": "tick", "n": n}))));
        }

        for n in 0..3 {
            let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
                .await?
                .ok_or("stream ended")??;
            let Message::Text(text) = frame else {
                return Err(format!("unexpected frame {frame:?}").into());
            };
            let value: Value = serde_json::from_str(text.as_str())?;
            assert_eq!(value, json!({"kind": "tick", "n": n}));
        }
        Ok(())
    }

    #[tokio::test]
    async fn disconnect_releases_subscription() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let addr = spawn_relay(&bus).await;

        let (mut ws, _) = connect_async(format!("ws://{addr}")).await?;
        let _ping = ws.next().await;
        assert_eq!(bus.subscriber_count(), 1);

        ws.close(None).await?;
        drop(ws);

        tokio::time::timeout(Duration::from_secs(2), async {
            while bus.subscriber_count() != 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await?;
        Ok(())
    }

    #[tokio::test]
    async fn observer_can_publish_upstream() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut watcher = bus.subscribe();
        let addr = spawn_relay(&bus).await;

        let (mut ws, _) = connect_async(format!("ws://{addr}")).await?;
        let _ping = ws.next().await;
        ws.send(Message::Text(
            r#"{"op":"publish","event":{"kind":"operator_note","text":"hi"}}"#.into(),
        ))
        .await?;

        let envelope = tokio::time::timeout(Duration::from_secs(2), watcher.recv())
            .await?
            .ok_or("bus closed")?;
        assert_eq!(envelope.kind(), "operator_note");
        assert_eq!(envelope.text(), Some("hi"));
        Ok(())
    }

    #[tokio::test]
    async fn plain_http_gets_426() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let addr = spawn_relay(&bus).await;

        let mut stream = TcpStream::connect(addr).await?;
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await?;
        let mut response = String::new();
        tokio::time::timeout(Duration::from_secs(2), stream.read_to_string(&mut response))
            .await??;
        assert!(response.starts_with("HTTP/1.1 426"), "got {response}");
        assert_eq!(bus.subscriber_count(), 0);
        Ok(())
    }
}
