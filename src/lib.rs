#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)]

pub mod command;
pub mod config;
pub mod consensus;
pub mod error;
pub mod gateway;
pub mod log;
pub mod logging;
pub mod merge;
pub mod rpc;
pub mod state_machine;
pub mod store;
pub mod transport;

#[cfg(any(test, feature = "test-util"))]
pub mod test_utils;

pub use error::{Error, Result};

/// Identifies a server/replica. The same string doubles as the `server_id`
/// carried on RPCs and as the peer-transport address key, since wiring a
/// real network transport is out of scope (see `transport` module docs).
pub type ServerId = String;
