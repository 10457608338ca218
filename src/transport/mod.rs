//! Transport Layer
//!
//! Responsibilities:
//! - Resolve host names
//! - Establish raw TCP connections and listeners
//! - NO SOCKS framing, NO routing decisions
//!
//! Everything here is reached through a [`Context`] built once at startup.

mod context;
mod resolver;
mod tcp;

pub use context::Context;
pub use resolver::Resolver;
pub use tcp::TcpTransport;

use async_trait::async_trait;

use crate::common::{Address, Result, Stream};

/// Transport trait for establishing raw connections
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to a remote address, resolving it first if needed
    async fn connect(&self, addr: &Address) -> Result<Stream>;

    /// Create a listener bound to an address
    async fn bind(&self, addr: &Address) -> Result<Box<dyn Listener>>;
}

/// Listener trait for accepting incoming connections
#[async_trait]
pub trait Listener: Send + Sync {
    /// Accept a new connection
    async fn accept(&self) -> Result<(Stream, Address)>;

    /// Get the local bound address
    fn local_addr(&self) -> Result<Address>;
}
