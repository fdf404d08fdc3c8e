//! `robot-receiver` – stand-in robot that prints every command it receives.
//!
//! ```text
//! robot-receiver [--transport tcp|udp] [--host HOST] [--port PORT]
//! ```
//!
//! TCP connections are read to EOF and printed as one payload; each UDP
//! datagram is one payload. Payloads that parse as JSON are echoed again in
//! compact form.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use go2gate_types::Transport;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{info, warn};

const READ_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_DATAGRAM: usize = 65_535;

/// Stand-in robot that prints every command it receives.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "robot-receiver")]
struct Args {
    /// Socket type to listen on (tcp or udp)
    #[arg(long, default_value = "tcp")]
    transport: Transport,
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    #[arg(long, default_value_t = 5555)]
    port: u16,
}

/// Raw text of a payload plus its compact JSON form when it parses.
fn describe_payload(bytes: &[u8]) -> (String, Option<String>) {
    let text = String::from_utf8_lossy(bytes).into_owned();
    let json = serde_json::from_slice::<serde_json::Value>(bytes)
        .ok()
        .and_then(|v| serde_json::to_string(&v).ok());
    (text, json)
}

fn print_payload(transport: Transport, peer: SocketAddr, bytes: &[u8]) {
    let (text, json) = describe_payload(bytes);
    let stamp = chrono::Local::now().format("%H:%M:%S%.3f");
    println!(
        "{} {} {} {}",
        format!("[{stamp}]").dimmed(),
        format!("{transport}://{peer}").cyan(),
        "→".dimmed(),
        text.bold()
    );
    if let Some(json) = json {
        println!("    {} {}", "json".green(), json);
    }
}

async fn serve_tcp(args: &Args) -> std::io::Result<()> {
    let listener = TcpListener::bind((args.host.as_str(), args.port)).await?;
    info!(addr = %listener.local_addr()?, "robot receiver listening (tcp)");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(read_connection(stream, peer));
                }
                Err(e) => warn!(error = %e, "accept error"),
            },
        }
    }
}

async fn read_connection(mut stream: TcpStream, peer: SocketAddr) {
    let mut payload = Vec::new();
    match tokio::time::timeout(READ_TIMEOUT, stream.read_to_end(&mut payload)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!(peer = %peer, error = %e, "read error"),
        Err(_) => warn!(peer = %peer, "connection idle, printing what arrived"),
    }
    if !payload.is_empty() {
        print_payload(Transport::Tcp, peer, &payload);
    }
}

async fn serve_udp(args: &Args) -> std::io::Result<()> {
    let socket = UdpSocket::bind((args.host.as_str(), args.port)).await?;
    info!(addr = %socket.local_addr()?, "robot receiver listening (udp)");
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            received = socket.recv_from(&mut buf) => match received {
                Ok((n, peer)) => print_payload(Transport::Udp, peer, &buf[..n]),
                Err(e) => warn!(error = %e, "receive error"),
            },
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _telemetry = go2gate_runtime::init_tracing("robot-receiver");

    let args = Args::parse();

    println!(
        "  {} {}://{}:{}  (Ctrl-C to stop)",
        "robot-receiver".bold(),
        args.transport,
        args.host,
        args.port
    );

    let result = match args.transport {
        Transport::Tcp => serve_tcp(&args).await,
        Transport::Udp => serve_udp(&args).await,
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {e}", "robot-receiver failed".red());
            ExitCode::FAILURE
        }
    }
}
