//! socksroute - a local SOCKS proxy with a runtime-reconfigurable routing core
//!
//! # Architecture (Layered Pipeline)
//!
//! ```text
//! Transport (TCP listener)
//! → Inbound Protocol (SOCKS4/4a/5 server handshake)
//! → Router (host, port) → LabeledConnector
//! → Connector (direct / reject / chained SOCKS hop)
//! → Transport
//! ```
//!
//! ## Core Principles
//!
//! - Each layer does ONE thing
//! - All layers abstracted via traits
//! - Router only depends on the destination, no IO
//! - Routes change at runtime through the console without touching the listener
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── common/          # Core types: Stream, Address
//! ├── endpoint.rs      # Proxy endpoint spec parsing and display
//! ├── transport/       # TCP, cached resolver, shared Context
//! ├── connector/       # Outbound connectors and ConnectorFactory
//! ├── router/          # Priority/specificity routing table
//! ├── protocol/        # Inbound SOCKS server handshake
//! └── app/             # Dispatcher, Runtime, Console
//! ```

// Core types
pub mod common;
pub mod error;

// Layered architecture
pub mod transport;
pub mod connector;
pub mod router;
pub mod protocol;
pub mod app;

// Supporting modules
pub mod config;
pub mod endpoint;

// Re-exports for convenience
pub use common::{Address, Stream};
pub use config::Config;
pub use endpoint::EndpointSpec;
pub use error::{Error, Result};

// Architecture re-exports
pub use app::{Console, Dispatcher, Runtime, RuntimeConfig};
pub use connector::{BuildReport, Connector, ConnectorFactory, LabeledConnector};
pub use protocol::InboundProtocol;
pub use router::{Router, RoutingTable};
pub use transport::{Context, Transport};
