//! Inbound Protocol Layer
//!
//! Responsibilities:
//! - Client authentication
//! - Target address parsing
//! - Sending the final success/failure reply once the outbound side is known
//!
//! Outbound SOCKS is not handled here; see `connector`.

mod socks;

pub use socks::{SocksInbound, SocksServerConfig};

use std::io;

use async_trait::async_trait;

use crate::common::{Address, Result, Stream};
use crate::connector::SocksVersion;
use crate::error::Error;

/// A parsed CONNECT request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Version the client spoke
    pub version: SocksVersion,
    pub destination: Address,
    /// SOCKS4 user id or authenticated SOCKS5 user
    pub user: Option<String>,
}

/// Outcome reported back to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Succeeded,
    GeneralFailure,
    NotAllowed,
    HostUnreachable,
    ConnectionRefused,
}

impl Reply {
    /// Map an outbound failure to the closest reply code
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::Rejected => Reply::NotAllowed,
            Error::Resolve(_) => Reply::HostUnreachable,
            Error::Io(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                Reply::ConnectionRefused
            }
            _ => Reply::GeneralFailure,
        }
    }
}

/// Server side of an inbound proxy protocol
#[async_trait]
pub trait InboundProtocol: Send + Sync {
    /// Read the client's greeting and request. The stream is left positioned
    /// right after the request so nothing the client sent early is consumed.
    async fn handshake(&self, stream: &mut Stream) -> Result<Request>;

    /// Send the final reply for a request
    async fn reply(&self, stream: &mut Stream, request: &Request, reply: Reply) -> Result<()>;

    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_from_error() {
        assert_eq!(Reply::from_error(&Error::Rejected), Reply::NotAllowed);
        assert_eq!(
            Reply::from_error(&Error::Resolve("nope".into())),
            Reply::HostUnreachable
        );
        assert_eq!(
            Reply::from_error(&Error::Io(io::ErrorKind::ConnectionRefused.into())),
            Reply::ConnectionRefused
        );
        assert_eq!(
            Reply::from_error(&Error::Proxy("bad hop".into())),
            Reply::GeneralFailure
        );
    }
}
