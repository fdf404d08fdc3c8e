//! [`RobotClient`] – network implementation of [`RobotLink`].
//!
//! Every send is independent and stateless:
//!
//! | Transport | Behaviour |
//! |---|---|
//! | `tcp` | new connection, full write, close; each resolved address is tried in turn, connect and write each bounded by the connect timeout |
//! | `udp` | one best-effort datagram to the first resolved address from an ephemeral socket, no retry |
//!
//! The payload is `{"name": <action name>, "value": <integer>}` as UTF-8
//! JSON, with non-ASCII action names written verbatim.

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use go2gate_types::{GateError, Transport};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket, lookup_host};
use tracing::{debug, info};

use crate::link::RobotLink;

/// Default bound on resolving, connecting and writing.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Encode one outbound command in its wire form.
///
/// # Errors
///
/// Returns [`GateError::Serialization`] if JSON encoding fails.
pub fn encode_command(name: &str, value: i64) -> Result<String, GateError> {
    serde_json::to_string(&json!({ "name": name, "value": value }))
        .map_err(|e| GateError::Serialization(e.to_string()))
}

/// Sends commands to a fixed robot endpoint.
#[derive(Debug, Clone)]
pub struct RobotClient {
    host: String,
    port: u16,
    transport: Transport,
    connect_timeout: Duration,
}

impl RobotClient {
    pub fn new(host: impl Into<String>, port: u16, transport: Transport) -> Self {
        Self {
            host: host.into(),
            port,
            transport,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// `host:port` as configured, before resolution.
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.connect_timeout.as_millis()).unwrap_or(u64::MAX)
    }

    /// Every address `host:port` resolves to, in resolver order.
    async fn resolve(&self) -> Result<Vec<SocketAddr>, GateError> {
        let target = self.target();
        let lookup = lookup_host((self.host.as_str(), self.port));
        let addrs: Vec<SocketAddr> = match tokio::time::timeout(self.connect_timeout, lookup).await
        {
            Err(_) => {
                return Err(GateError::Resolve {
                    target,
                    reason: format!("lookup timed out after {} ms", self.timeout_ms()),
                });
            }
            Ok(Err(e)) => {
                return Err(GateError::Resolve {
                    target,
                    reason: e.to_string(),
                });
            }
            Ok(Ok(addrs)) => addrs.collect(),
        };
        if addrs.is_empty() {
            return Err(self.no_addresses());
        }
        Ok(addrs)
    }

    fn no_addresses(&self) -> GateError {
        GateError::Resolve {
            target: self.target(),
            reason: "no addresses found".to_string(),
        }
    }

    /// Connect to the first address in `addrs` that accepts within the
    /// connect timeout. When all of them fail, the last failure is returned.
    async fn connect_any<C, F>(
        &self,
        addrs: &[SocketAddr],
        connect: C,
    ) -> Result<(TcpStream, SocketAddr), GateError>
    where
        C: Fn(SocketAddr) -> F,
        F: Future<Output = io::Result<TcpStream>>,
    {
        let mut last_error = None;
        for &addr in addrs {
            let error = match tokio::time::timeout(self.connect_timeout, connect(addr)).await {
                Ok(Ok(stream)) => return Ok((stream, addr)),
                Ok(Err(e)) => GateError::Send {
                    addr: addr.to_string(),
                    reason: e.to_string(),
                },
                Err(_) => GateError::ConnectTimeout {
                    addr: addr.to_string(),
                    timeout_ms: self.timeout_ms(),
                },
            };
            debug!(addr = %addr, error = %error, "connect attempt failed");
            last_error = Some(error);
        }
        Err(last_error.unwrap_or_else(|| self.no_addresses()))
    }

    async fn send_tcp(&self, addrs: &[SocketAddr], payload: &[u8]) -> Result<(), GateError> {
        let (mut stream, addr) = self.connect_any(addrs, TcpStream::connect::<SocketAddr>).await?;
        let send_error = |e: io::Error| GateError::Send {
            addr: addr.to_string(),
            reason: e.to_string(),
        };

        let write = async {
            stream.write_all(payload).await?;
            stream.shutdown().await
        };
        match tokio::time::timeout(self.connect_timeout, write).await {
            Err(_) => Err(GateError::Send {
                addr: addr.to_string(),
                reason: format!("write timed out after {} ms", self.timeout_ms()),
            }),
            Ok(result) => result.map_err(send_error),
        }
    }

    async fn send_udp(&self, addrs: &[SocketAddr], payload: &[u8]) -> Result<(), GateError> {
        let Some(&addr) = addrs.first() else {
            return Err(self.no_addresses());
        };
        let send_error = |e: io::Error| GateError::Send {
            addr: addr.to_string(),
            reason: e.to_string(),
        };
        let local: SocketAddr = if addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await.map_err(send_error)?;
        socket.send_to(payload, addr).await.map_err(send_error)?;
        Ok(())
    }
}

#[async_trait]
impl RobotLink for RobotClient {
    async fn send(&self, name: &str, value: i64) -> Result<(), GateError> {
        let payload = encode_command(name, value)?;
        let addrs = self.resolve().await?;
        info!(
            transport = %self.transport,
            target = %self.target(),
            resolved = addrs.len(),
            payload = %payload,
            "sending robot command"
        );
        match self.transport {
            Transport::Tcp => self.send_tcp(&addrs, payload.as_bytes()).await,
            Transport::Udp => self.send_udp(&addrs, payload.as_bytes()).await,
        }
    }

    fn describe(&self) -> String {
        format!("{}://{}", self.transport.scheme(), self.target())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn encode_keeps_non_ascii_names_verbatim() {
        assert_eq!(
            encode_command("따라가라", 1).unwrap(),
            r#"{"name":"따라가라","value":1}"#
        );
    }

    #[test]
    fn describe_includes_transport_and_target() {
        let client = RobotClient::new("10.0.0.7", 5555, Transport::Udp);
        assert_eq!(client.describe(), "udp://10.0.0.7:5555");
        assert_eq!(client.transport(), Transport::Udp);
    }

    #[tokio::test]
    async fn tcp_send_writes_one_payload_then_closes() -> Result<(), Box<dyn std::error::Error>> {
        let server = TcpListener::bind("127.0.0.1:0").await?;
        let port = server.local_addr()?.port();
        let received = tokio::spawn(async move {
            let (mut stream, _) = server.accept().await.unwrap();
            let mut buf = Vec::new();
            stream.read_to_end(&mut buf).await.unwrap();
            buf
        });

        let client = RobotClient::new("127.0.0.1", port, Transport::Tcp);
        client.send_action("길을 막아라").await?;

        let bytes = tokio::time::timeout(Duration::from_secs(2), received).await??;
        let value: serde_json::Value = serde_json::from_slice(&bytes)?;
        assert_eq!(value, json!({"name": "길을 막아라", "value": 1}));
        Ok(())
    }

    #[tokio::test]
    async fn udp_send_delivers_one_datagram() -> Result<(), Box<dyn std::error::Error>> {
        let server = UdpSocket::bind("127.0.0.1:0").await?;
        let port = server.local_addr()?.port();

        let client = RobotClient::new("127.0.0.1", port, Transport::Udp);
        client.send("scan", 5).await?;

        let mut buf = [0u8; 1024];
        let (n, _) =
            tokio::time::timeout(Duration::from_secs(2), server.recv_from(&mut buf)).await??;
        assert_eq!(&buf[..n], br#"{"name":"scan","value":5}"#);
        Ok(())
    }

    async fn unused_port() -> u16 {
        let placeholder = TcpListener::bind("127.0.0.1:0").await.unwrap();
        placeholder.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn refused_connection_is_reported() {
        let port = unused_port().await;
        let client = RobotClient::new("127.0.0.1", port, Transport::Tcp)
            .with_connect_timeout(Duration::from_millis(500));
        let err = client.send_action("follow").await.unwrap_err();
        assert!(matches!(err, GateError::Send { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn tcp_send_falls_through_to_next_resolved_address()
    -> Result<(), Box<dyn std::error::Error>> {
        let server = TcpListener::bind("127.0.0.1:0").await?;
        let live = server.local_addr()?;
        let dead: SocketAddr = ([127, 0, 0, 1], unused_port().await).into();
        let received = tokio::spawn(async move {
            let (mut stream, _) = server.accept().await.unwrap();
            let mut buf = Vec::new();
            stream.read_to_end(&mut buf).await.unwrap();
            buf
        });

        let client = RobotClient::new("robot.local", live.port(), Transport::Tcp);
        client.send_tcp(&[dead, live], b"hello").await?;

        let bytes = tokio::time::timeout(Duration::from_secs(2), received).await??;
        assert_eq!(bytes, b"hello");
        Ok(())
    }

    #[tokio::test]
    async fn every_address_failing_returns_the_last_error() {
        let refused: SocketAddr = ([127, 0, 0, 1], unused_port().await).into();
        let silent: SocketAddr = ([127, 0, 0, 1], 9).into();
        let client = RobotClient::new("robot.local", 5555, Transport::Tcp)
            .with_connect_timeout(Duration::from_millis(50));

        let err = client
            .connect_any(&[refused, silent], |addr| async move {
                if addr == refused {
                    TcpStream::connect(addr).await
                } else {
                    std::future::pending().await
                }
            })
            .await
            .unwrap_err();
        assert!(
            matches!(&err, GateError::ConnectTimeout { addr, timeout_ms: 50 } if addr == "127.0.0.1:9"),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn stalled_connect_is_a_connect_timeout() {
        let client = RobotClient::new("robot.local", 5555, Transport::Tcp)
            .with_connect_timeout(Duration::from_millis(50));
        let addr: SocketAddr = ([10, 0, 0, 5], 5555).into();

        let started = tokio::time::Instant::now();
        let err = client
            .connect_any(&[addr], |_| std::future::pending::<io::Result<TcpStream>>())
            .await
            .unwrap_err();
        assert!(
            matches!(&err, GateError::ConnectTimeout { timeout_ms: 50, .. }),
            "got {err:?}"
        );
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn empty_address_list_is_a_resolve_error() {
        let client = RobotClient::new("robot.local", 5555, Transport::Udp);
        let err = client.send_udp(&[], b"x").await.unwrap_err();
        assert!(matches!(err, GateError::Resolve { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn unresolvable_host_is_a_resolve_error() {
        let client = RobotClient::new("robot.invalid", 5555, Transport::Udp)
            .with_connect_timeout(Duration::from_millis(500));
        let err = client.send_action("follow").await.unwrap_err();
        assert!(matches!(err, GateError::Resolve { .. }), "got {err:?}");
    }
}
