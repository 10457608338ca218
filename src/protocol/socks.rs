//! Inbound SOCKS server handshake (SOCKS4, SOCKS4a, SOCKS5 CONNECT)

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace};

use crate::common::{Address, Result, Stream};
use crate::connector::SocksVersion;
use crate::error::Error;

use super::{InboundProtocol, Reply, Request};

const SOCKS4_VERSION: u8 = 0x04;
const SOCKS4_REPLY_VERSION: u8 = 0x00;
const SOCKS4_GRANTED: u8 = 0x5A;
const SOCKS4_REJECTED: u8 = 0x5B;

const SOCKS5_VERSION: u8 = 0x05;
const AUTH_NONE: u8 = 0x00;
const AUTH_PASSWORD: u8 = 0x02;
const AUTH_NO_ACCEPTABLE: u8 = 0xFF;
const AUTH_PASSWORD_VERSION: u8 = 0x01;

const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

const REP_SUCCESS: u8 = 0x00;
const REP_GENERAL_FAILURE: u8 = 0x01;
const REP_NOT_ALLOWED: u8 = 0x02;
const REP_HOST_UNREACHABLE: u8 = 0x04;
const REP_CONNECTION_REFUSED: u8 = 0x05;
const REP_CMD_NOT_SUPPORTED: u8 = 0x07;
const REP_ATYP_NOT_SUPPORTED: u8 = 0x08;

/// Upper bound for SOCKS4 null-terminated fields
const MAX_SOCKS4_FIELD: usize = 255;

/// Listener-side settings derived from the listen endpoint
#[derive(Debug, Clone, Default)]
pub struct SocksServerConfig {
    /// Accepted protocol family; `None` accepts every version
    pub version: Option<SocksVersion>,
    /// Username/password required from SOCKS5 clients
    pub credentials: Option<(String, String)>,
}

impl SocksServerConfig {
    /// Credentials can only be checked over SOCKS5
    pub fn validate(&self) -> Result<()> {
        match (self.version, &self.credentials) {
            (Some(version), Some(_)) if !version.supports_auth() => Err(Error::Config(format!(
                "invalid authentication info: SOCKS{} listeners cannot require credentials",
                version
            ))),
            (_, Some((user, pass))) if user.is_empty() || pass.is_empty() => Err(Error::Config(
                "invalid authentication info: username and password must both be non-empty".into(),
            )),
            _ => Ok(()),
        }
    }

    fn accepts_socks4(&self) -> bool {
        self.credentials.is_none()
            && matches!(self.version, None | Some(SocksVersion::V4) | Some(SocksVersion::V4a))
    }

    fn accepts_socks4a(&self) -> bool {
        self.credentials.is_none() && matches!(self.version, None | Some(SocksVersion::V4a))
    }

    fn accepts_socks5(&self) -> bool {
        matches!(self.version, None | Some(SocksVersion::V5))
    }
}

/// SOCKS server side of the listener
pub struct SocksInbound {
    config: SocksServerConfig,
}

impl SocksInbound {
    pub fn new(config: SocksServerConfig) -> Self {
        Self { config }
    }

    async fn handshake_v4(&self, stream: &mut Stream) -> Result<Request> {
        let mut header = [0u8; 7];
        stream.read_exact(&mut header).await?;

        let cmd = header[0];
        let port = u16::from_be_bytes([header[1], header[2]]);
        let ip = Ipv4Addr::new(header[3], header[4], header[5], header[6]);
        let user = read_null_terminated(stream).await?;

        // 0.0.0.x with x != 0 announces a SOCKS4a host name
        let is_4a = header[3..6] == [0, 0, 0] && header[6] != 0;
        let (version, destination) = if is_4a {
            let host = read_null_terminated(stream).await?;
            (SocksVersion::V4a, Address::from_host(&host, port))
        } else {
            (SocksVersion::V4, Address::Socket(SocketAddr::new(ip.into(), port)))
        };

        let accepted = match version {
            SocksVersion::V4a => self.config.accepts_socks4a(),
            _ => self.config.accepts_socks4(),
        };
        if !accepted {
            write_v4_reply(stream, SOCKS4_REJECTED).await?;
            return Err(Error::Protocol(format!(
                "SOCKS{} not accepted on this listener",
                version
            )));
        }

        if cmd != CMD_CONNECT {
            write_v4_reply(stream, SOCKS4_REJECTED).await?;
            return Err(Error::Protocol(format!("Unsupported command: {}", cmd)));
        }

        Ok(Request {
            version,
            destination,
            user: Some(user).filter(|u| !u.is_empty()),
        })
    }

    async fn handshake_v5(&self, stream: &mut Stream) -> Result<Request> {
        let mut nmethods = [0u8; 1];
        stream.read_exact(&mut nmethods).await?;
        let mut methods = vec![0u8; nmethods[0] as usize];
        stream.read_exact(&mut methods).await?;

        let selected_method = if !self.config.accepts_socks5() {
            AUTH_NO_ACCEPTABLE
        } else if self.config.credentials.is_some() {
            if methods.contains(&AUTH_PASSWORD) {
                AUTH_PASSWORD
            } else {
                AUTH_NO_ACCEPTABLE
            }
        } else if methods.contains(&AUTH_NONE) {
            AUTH_NONE
        } else {
            AUTH_NO_ACCEPTABLE
        };

        stream.write_all(&[SOCKS5_VERSION, selected_method]).await?;

        if selected_method == AUTH_NO_ACCEPTABLE {
            return Err(Error::Protocol("No acceptable auth method".into()));
        }

        let user = if selected_method == AUTH_PASSWORD {
            Some(self.authenticate(stream).await?)
        } else {
            None
        };

        let mut header = [0u8; 4];
        stream.read_exact(&mut header).await?;

        if header[0] != SOCKS5_VERSION {
            return Err(Error::Protocol("Invalid SOCKS version in request".into()));
        }

        let cmd = header[1];
        let atyp = header[3];

        let destination = match atyp {
            ATYP_IPV4 => {
                let mut addr = [0u8; 4];
                stream.read_exact(&mut addr).await?;
                let port = stream.read_u16().await?;
                Address::Socket(SocketAddr::new(Ipv4Addr::from(addr).into(), port))
            }
            ATYP_DOMAIN => {
                let len = stream.read_u8().await?;
                let mut domain = vec![0u8; len as usize];
                stream.read_exact(&mut domain).await?;
                let port = stream.read_u16().await?;
                let domain = String::from_utf8_lossy(&domain).to_string();
                Address::from_host(&domain, port)
            }
            ATYP_IPV6 => {
                let mut addr = [0u8; 16];
                stream.read_exact(&mut addr).await?;
                let port = stream.read_u16().await?;
                Address::Socket(SocketAddr::new(Ipv6Addr::from(addr).into(), port))
            }
            _ => {
                write_v5_reply(stream, REP_ATYP_NOT_SUPPORTED).await?;
                return Err(Error::Protocol(format!(
                    "Unsupported address type: {}",
                    atyp
                )));
            }
        };

        if cmd != CMD_CONNECT {
            write_v5_reply(stream, REP_CMD_NOT_SUPPORTED).await?;
            return Err(Error::Protocol(format!("Unsupported command: {}", cmd)));
        }

        Ok(Request {
            version: SocksVersion::V5,
            destination,
            user,
        })
    }

    /// RFC 1929 username/password sub-negotiation
    async fn authenticate(&self, stream: &mut Stream) -> Result<String> {
        let ver = stream.read_u8().await?;
        if ver != AUTH_PASSWORD_VERSION {
            return Err(Error::Protocol("Invalid auth version".into()));
        }

        let ulen = stream.read_u8().await?;
        let mut username = vec![0u8; ulen as usize];
        stream.read_exact(&mut username).await?;

        let plen = stream.read_u8().await?;
        let mut password = vec![0u8; plen as usize];
        stream.read_exact(&mut password).await?;

        let username = String::from_utf8_lossy(&username).to_string();
        let password = String::from_utf8_lossy(&password);

        let auth_ok = self
            .config
            .credentials
            .as_ref()
            .map(|(u, p)| *u == username && *p == password)
            .unwrap_or(false);

        if auth_ok {
            stream.write_all(&[AUTH_PASSWORD_VERSION, 0x00]).await?;
            trace!("SOCKS5 user {} authenticated", username);
            Ok(username)
        } else {
            stream.write_all(&[AUTH_PASSWORD_VERSION, 0x01]).await?;
            Err(Error::AuthFailed)
        }
    }
}

#[async_trait]
impl InboundProtocol for SocksInbound {
    async fn handshake(&self, stream: &mut Stream) -> Result<Request> {
        let version = stream.read_u8().await?;
        let request = match version {
            SOCKS4_VERSION => self.handshake_v4(stream).await?,
            SOCKS5_VERSION => self.handshake_v5(stream).await?,
            other => {
                return Err(Error::Protocol(format!(
                    "Unsupported SOCKS version: {}",
                    other
                )))
            }
        };

        debug!("SOCKS{} CONNECT {}", request.version, request.destination);
        Ok(request)
    }

    async fn reply(&self, stream: &mut Stream, request: &Request, reply: Reply) -> Result<()> {
        match request.version {
            SocksVersion::V5 => {
                let code = match reply {
                    Reply::Succeeded => REP_SUCCESS,
                    Reply::GeneralFailure => REP_GENERAL_FAILURE,
                    Reply::NotAllowed => REP_NOT_ALLOWED,
                    Reply::HostUnreachable => REP_HOST_UNREACHABLE,
                    Reply::ConnectionRefused => REP_CONNECTION_REFUSED,
                };
                write_v5_reply(stream, code).await
            }
            SocksVersion::V4 | SocksVersion::V4a => {
                let code = match reply {
                    Reply::Succeeded => SOCKS4_GRANTED,
                    _ => SOCKS4_REJECTED,
                };
                write_v4_reply(stream, code).await
            }
        }
    }

    fn name(&self) -> &'static str {
        "socks"
    }
}

async fn read_null_terminated(stream: &mut Stream) -> Result<String> {
    let mut buf = Vec::new();
    loop {
        let byte = stream.read_u8().await?;
        if byte == 0 {
            break;
        }
        if buf.len() == MAX_SOCKS4_FIELD {
            return Err(Error::Protocol("SOCKS4 field too long".into()));
        }
        buf.push(byte);
    }
    Ok(String::from_utf8_lossy(&buf).to_string())
}

async fn write_v4_reply(stream: &mut Stream, code: u8) -> Result<()> {
    stream
        .write_all(&[SOCKS4_REPLY_VERSION, code, 0, 0, 0, 0, 0, 0])
        .await?;
    stream.flush().await?;
    Ok(())
}

async fn write_v5_reply(stream: &mut Stream, code: u8) -> Result<()> {
    let reply = [SOCKS5_VERSION, code, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0];
    stream.write_all(&reply).await?;
    stream.flush().await?;
    Ok(())
}
