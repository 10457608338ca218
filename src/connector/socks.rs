//! Chained SOCKS connector
//!
//! Opens a plain connection to the upstream hop through an inner connector,
//! then asks the hop to CONNECT to the real destination. The SOCKS handshake
//! itself is done by `tokio-socks` over the already-open stream.
//!
//! Version capabilities:
//!
//! | version | credentials | remote resolution |
//! |---------|-------------|-------------------|
//! | 4       | no          | no                |
//! | 4a      | no          | yes               |
//! | 5       | yes         | yes               |

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_socks::tcp::{Socks4Stream, Socks5Stream};
use tokio_socks::TargetAddr;
use tracing::debug;

use crate::common::{Address, IntoStream, Result, Stream};
use crate::error::Error;
use crate::transport::Resolver;

use super::{Connector, ResolutionMode};

/// RFC 1929 caps both fields at one length byte
const MAX_CREDENTIAL_LEN: usize = 255;

/// SOCKS protocol version spoken to an upstream hop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocksVersion {
    V4,
    V4a,
    V5,
}

impl SocksVersion {
    /// Parse a scheme version suffix such as `"4a"`
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "4" => Some(SocksVersion::V4),
            "4a" => Some(SocksVersion::V4a),
            "5" => Some(SocksVersion::V5),
            _ => None,
        }
    }

    /// Whether the hop can be handed a host name instead of an address
    pub fn supports_remote_resolution(self) -> bool {
        !matches!(self, SocksVersion::V4)
    }

    pub fn supports_auth(self) -> bool {
        matches!(self, SocksVersion::V5)
    }
}

impl fmt::Display for SocksVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocksVersion::V4 => write!(f, "4"),
            SocksVersion::V4a => write!(f, "4a"),
            SocksVersion::V5 => write!(f, "5"),
        }
    }
}

#[derive(Clone)]
struct Credentials {
    user: String,
    pass: String,
}

/// Builder for a chained SOCKS connector
///
/// Without an explicit version the client speaks SOCKS4a, and switches to
/// SOCKS5 as soon as credentials are set.
pub struct SocksClient {
    hop: Address,
    inner: Arc<dyn Connector>,
    resolver: Arc<Resolver>,
    version: Option<SocksVersion>,
    credentials: Option<Credentials>,
    resolution: ResolutionMode,
}

impl SocksClient {
    pub fn new(hop: Address, inner: Arc<dyn Connector>, resolver: Arc<Resolver>) -> Self {
        Self {
            hop,
            inner,
            resolver,
            version: None,
            credentials: None,
            resolution: ResolutionMode::Local,
        }
    }

    /// Version that will be spoken to the hop
    pub fn version(&self) -> SocksVersion {
        self.version.unwrap_or(SocksVersion::V4a)
    }

    pub fn resolution(&self) -> ResolutionMode {
        self.resolution
    }

    pub fn set_protocol_version(&mut self, version: &str) -> Result<()> {
        let parsed = SocksVersion::parse(version).ok_or_else(|| {
            Error::Config(format!(
                "invalid protocol version: SOCKS version \"{}\" is not supported",
                version
            ))
        })?;

        if self.credentials.is_some() && !parsed.supports_auth() {
            return Err(Error::Config(format!(
                "invalid protocol version: SOCKS{} cannot carry credentials",
                parsed
            )));
        }
        if self.resolution == ResolutionMode::Remote && !parsed.supports_remote_resolution() {
            self.resolution = ResolutionMode::Local;
        }

        self.version = Some(parsed);
        Ok(())
    }

    pub fn set_auth(&mut self, user: &str, pass: &str) -> Result<()> {
        if let Some(version) = self.version {
            if !version.supports_auth() {
                return Err(Error::Config(format!(
                    "invalid authentication info: SOCKS{} does not support authentication, use SOCKS5",
                    version
                )));
            }
        }
        if user.is_empty() || pass.is_empty() {
            return Err(Error::Config(
                "invalid authentication info: SOCKS5 username and password must both be non-empty"
                    .into(),
            ));
        }
        if user.len() > MAX_CREDENTIAL_LEN || pass.len() > MAX_CREDENTIAL_LEN {
            return Err(Error::Config(format!(
                "invalid authentication info: username and password are limited to {} bytes",
                MAX_CREDENTIAL_LEN
            )));
        }

        self.version = Some(SocksVersion::V5);
        self.credentials = Some(Credentials {
            user: user.to_string(),
            pass: pass.to_string(),
        });
        Ok(())
    }

    /// Select where destination names are resolved. Callers check
    /// `version().supports_remote_resolution()` before asking for `Remote`.
    pub fn set_resolution(&mut self, mode: ResolutionMode) -> Result<()> {
        if mode == ResolutionMode::Remote && !self.version().supports_remote_resolution() {
            return Err(Error::Config(format!(
                "SOCKS{} cannot resolve host names remotely",
                self.version()
            )));
        }
        self.resolution = mode;
        Ok(())
    }

    pub fn into_connector(self) -> ChainedSocksConnector {
        let version = self.version();
        ChainedSocksConnector {
            hop: self.hop,
            inner: self.inner,
            resolver: self.resolver,
            version,
            credentials: self.credentials,
            resolution: self.resolution,
        }
    }
}

/// Connector that tunnels through an upstream SOCKS hop
pub struct ChainedSocksConnector {
    hop: Address,
    inner: Arc<dyn Connector>,
    resolver: Arc<Resolver>,
    version: SocksVersion,
    credentials: Option<Credentials>,
    resolution: ResolutionMode,
}

impl ChainedSocksConnector {
    pub fn version(&self) -> SocksVersion {
        self.version
    }

    pub fn resolution(&self) -> ResolutionMode {
        self.resolution
    }

    /// Destination as it will be sent to the hop
    async fn target(&self, host: &str, port: u16) -> Result<TargetAddr<'static>> {
        match self.resolution {
            ResolutionMode::Remote => Ok(match Address::from_host(host, port) {
                Address::Socket(addr) => TargetAddr::Ip(addr),
                Address::Domain(domain, port) => TargetAddr::Domain(Cow::Owned(domain), port),
            }),
            ResolutionMode::Local => {
                let addrs = self.resolver.resolve(host, port).await?;
                let picked = match self.version {
                    SocksVersion::V5 => addrs.into_iter().next(),
                    SocksVersion::V4 | SocksVersion::V4a => addrs.into_iter().find(|a| a.is_ipv4()),
                };
                picked.map(TargetAddr::Ip).ok_or_else(|| {
                    Error::Resolve(format!(
                        "{}: no address usable over SOCKS{}",
                        host, self.version
                    ))
                })
            }
        }
    }
}

#[async_trait]
impl Connector for ChainedSocksConnector {
    async fn connect(&self, host: &str, port: u16) -> Result<Stream> {
        let target = self.target(host, port).await?;

        debug!(
            "SOCKS{} via {} -> {}:{} (resolve {})",
            self.version, self.hop, host, port, self.resolution
        );

        let hop_host = self.hop.host();
        let stream = self.inner.connect(&hop_host, self.hop.port()).await?;

        let stream = match (self.version, &self.credentials) {
            (SocksVersion::V5, Some(creds)) => Socks5Stream::connect_with_password_and_socket(
                stream,
                target,
                &creds.user,
                &creds.pass,
            )
            .await?
            .into_stream(),
            (SocksVersion::V5, None) => {
                Socks5Stream::connect_with_socket(stream, target).await?.into_stream()
            }
            (SocksVersion::V4 | SocksVersion::V4a, _) => {
                Socks4Stream::connect_with_socket(stream, target).await?.into_stream()
            }
        };

        Ok(stream)
    }

    fn name(&self) -> &'static str {
        "socks"
    }
}
