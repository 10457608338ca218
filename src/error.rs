//! Error types for socksroute

use thiserror::Error;

/// Main error type for socksroute
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed endpoint spec, unsupported protocol version or rejected credentials
    #[error("Configuration error: {0}")]
    Config(String),

    /// No route matched; only possible if the catch-all entry went missing
    #[error("Routing error: {0}")]
    Routing(String),

    #[error("Resolve error: {0}")]
    Resolve(String),

    /// Upstream SOCKS hop refused or botched the handshake
    #[error("Proxy error: {0}")]
    Proxy(String),

    #[error("Connection rejected")]
    Rejected,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Authentication failed")]
    AuthFailed,

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl Error {
    /// Whether this error belongs to a single outbound connection attempt
    /// rather than to configuration or routing.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Resolve(_) | Error::Proxy(_) | Error::Rejected
        )
    }
}

impl From<tokio_socks::Error> for Error {
    fn from(err: tokio_socks::Error) -> Self {
        match err {
            tokio_socks::Error::Io(e) => Error::Io(e),
            other => Error::Proxy(other.to_string()),
        }
    }
}

/// Result type alias for socksroute
pub type Result<T> = std::result::Result<T, Error>;
