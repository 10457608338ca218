//! TCP Transport implementation

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tracing::trace;

use crate::common::{Address, IntoStream, Result, Stream};
use crate::error::Error;

use super::{Listener, Resolver, Transport};

/// TCP transport - raw TCP connections
pub struct TcpTransport {
    resolver: Arc<Resolver>,
}

impl TcpTransport {
    pub fn new(resolver: Arc<Resolver>) -> Self {
        Self { resolver }
    }

    async fn socket_addrs(&self, addr: &Address) -> Result<Vec<SocketAddr>> {
        match addr {
            Address::Socket(socket_addr) => Ok(vec![*socket_addr]),
            Address::Domain(domain, port) => self.resolver.resolve(domain, *port).await,
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, addr: &Address) -> Result<Stream> {
        let candidates = self.socket_addrs(addr).await?;

        // Try each resolved address in order, keep the last failure
        let mut last_err = None;
        for candidate in candidates {
            match TcpStream::connect(candidate).await {
                Ok(stream) => {
                    // Disable Nagle's algorithm for lower latency
                    stream.set_nodelay(true)?;
                    trace!("TCP connected to {} ({})", addr, candidate);
                    return Ok(stream.into_stream());
                }
                Err(e) => {
                    trace!("TCP connect to {} ({}) failed: {}", addr, candidate, e);
                    last_err = Some(e);
                }
            }
        }

        Err(match last_err {
            Some(e) => Error::Io(e),
            None => Error::Resolve(format!("{}: no addresses found", addr)),
        })
    }

    async fn bind(&self, addr: &Address) -> Result<Box<dyn Listener>> {
        let socket_addr = self
            .socket_addrs(addr)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Config(format!("Cannot bind to {}", addr)))?;

        let listener = TcpListener::bind(socket_addr).await?;
        Ok(Box::new(TcpListenerWrapper { listener }))
    }
}

/// Wrapper for TcpListener to implement Listener trait
struct TcpListenerWrapper {
    listener: TcpListener,
}

#[async_trait]
impl Listener for TcpListenerWrapper {
    async fn accept(&self) -> Result<(Stream, Address)> {
        let (stream, addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((stream.into_stream(), Address::Socket(addr)))
    }

    fn local_addr(&self) -> Result<Address> {
        Ok(Address::Socket(self.listener.local_addr()?))
    }
}
