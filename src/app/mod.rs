//! Application Layer
//!
//! This module contains:
//! - Dispatcher: per-session flow (handshake → router → connector → relay)
//! - Runtime: daemon assembly, listener and shutdown
//! - Console: operator commands against the live routing table
//! - Stats: session counters

mod console;
mod dispatcher;
mod runtime;
mod stats;

pub use console::{Console, Outcome};
pub use dispatcher::Dispatcher;
pub use runtime::{Runtime, RuntimeConfig};
pub use stats::{format_bytes, SessionStats, StatsSnapshot};
