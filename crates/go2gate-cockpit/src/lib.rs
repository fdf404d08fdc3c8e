//! `go2gate-cockpit` – live event stream for external observers.
//!
//! Boots a WebSocket server (default port `8080`) that:
//!
//! 1. **Relays** every envelope published on the [`EventBus`] to each
//!    connected observer as one JSON text frame, through a private bounded
//!    subscription per connection. A slow observer loses its own frames
//!    only.
//!
//! 2. **Accepts** upstream `{"op":"publish","event":{...}}` frames and
//!    publishes the event on the bus with its `source` untouched.
//!
//! 3. **Refuses** plain HTTP with `426 Upgrade Required`; no UI is served.
//!
//! # Usage
//!
//! ```rust,no_run
//! use go2gate_middleware::EventBus;
//! use go2gate_cockpit::CockpitServer;
//!
//! #[tokio::main]
//! async fn main() {
//!     let bus = EventBus::default();
//!     CockpitServer::new(bus.clone())
//!         .run()
//!         .await
//!         .expect("cockpit relay failed");
//! }
//! ```
//!
//! [`EventBus`]: go2gate_middleware::EventBus

pub mod server;

pub use server::{BoundCockpit, CockpitServer, DEFAULT_PORT};
