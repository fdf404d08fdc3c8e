//! `go2gate-hal` – outbound link to the robot.
//!
//! # Modules
//!
//! - [`link`] – [`RobotLink`] trait: the only surface command dispatch uses
//!   to reach the robot.
//! - [`client`] – [`RobotClient`]: TCP/UDP implementation that sends one JSON
//!   command per connection or datagram.

pub mod client;
pub mod link;

pub use client::{DEFAULT_CONNECT_TIMEOUT, RobotClient, encode_command};
pub use link::{DEFAULT_COMMAND_VALUE, RobotLink};
