//! Router Layer
//!
//! Responsibilities:
//! - Route selection based on the requested destination
//! - NO IO operations
//! - NO async operations
//!
//! Router is a pure function: (host, port) -> connector

pub mod routing_table;

pub use routing_table::{
    HostPattern, Pattern, PortPattern, RouteSnapshot, RoutingTable, PRIORITY_DEFAULT,
};

use std::sync::Arc;

use crate::common::Result;
use crate::connector::LabeledConnector;

/// Router trait - pure function for routing decisions
///
/// IMPORTANT: Router must NOT perform any IO or async operations.
/// The returned connector stays valid even if the route is replaced later.
pub trait Router: Send + Sync {
    fn resolve(&self, host: &str, port: u16) -> Result<Arc<LabeledConnector>>;
}
