//! `go2gate-runtime` – from model output to robot action.
//!
//! # Modules
//!
//! - [`extractor`] – ordered strategies that recover a
//!   [`StructuredCommand`][go2gate_types::StructuredCommand] from noisy text.
//! - [`dispatcher`] – [`ActionTable`] of canonical actions and the
//!   [`Dispatcher`] that turns a command into one robot send plus a reply.
//! - [`gateway`] – [`CommandGateway`]: the text-in, reply-out boundary that
//!   never fails, only answers with an `ERROR:` string.
//! - [`telemetry`] – [`init_tracing`]: global `tracing` subscriber with an
//!   optional OTLP exporter.

pub mod dispatcher;
pub mod extractor;
pub mod gateway;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::{
    ActionBinding, ActionTable, Dispatcher, ERROR_MARKER, GENERIC_ACK, is_error_reply,
};
pub use extractor::{STRATEGIES, Strategy, extract};
pub use gateway::CommandGateway;
pub use telemetry::{TracerProviderGuard, init_tracing};
