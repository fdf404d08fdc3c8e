//! `go2gate-middleware` – event plumbing between the robot and observers.
//!
//! Moves robot notifications from the wire to every interested observer
//! without caring what the notifications mean.
//!
//! # Modules
//!
//! - [`bus`] – In-process publish/subscribe fan-out with one bounded queue
//!   per subscriber; a slow observer loses its own events, never anyone
//!   else's.
//! - [`listener`] – TCP/UDP ingest server that frames raw bytes, normalizes
//!   them into envelopes and publishes them on the bus.

pub mod bus;
pub mod listener;

pub use bus::{BusStats, EventBus, Subscription, SubscriptionId};
pub use listener::{EventListener, ListenerConfig, ListenerState};
