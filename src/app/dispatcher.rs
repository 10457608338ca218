//! Dispatcher - Core Execution Flow
//!
//! The dispatcher is the heart of the proxy system.
//! It handles the flow: inbound handshake → router → connector → relay
//!
//! Architecture:
//! ```text
//! InboundProtocol.handshake() → Request
//!                                  ↓
//!                   RoutingTable.resolve(host, port)
//!                                  ↓
//!           Connector.connect()  (client watched for close)
//!                                  ↓
//!                   InboundProtocol.reply()
//!                                  ↓
//!                         Bidirectional Relay
//! ```
//!
//! Each connection is handled in a separate tokio task.

use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error, info};

use crate::common::{Address, Result, Stream};
use crate::connector::{Connector, LabeledConnector};
use crate::error::Error;
use crate::protocol::{InboundProtocol, Reply, Request};
use crate::router::Router;

use super::stats::{format_bytes, SessionStats};

// ============================================================================
// Constants
// ============================================================================

/// Relay buffer size (32KB)
const RELAY_BUFFER_SIZE: usize = 32 * 1024;

/// Upper bound for bytes a client may send before its CONNECT completes
const MAX_EARLY_DATA: usize = 64 * 1024;

// ============================================================================
// Dispatcher
// ============================================================================

/// Dispatcher handles one inbound session at a time
///
/// The connector is resolved once per session. Replacing a route while the
/// session runs does not affect it.
pub struct Dispatcher {
    inbound: Arc<dyn InboundProtocol>,
    router: Arc<dyn Router>,
    stats: Arc<SessionStats>,
}

impl Dispatcher {
    pub fn new(
        inbound: Arc<dyn InboundProtocol>,
        router: Arc<dyn Router>,
        stats: Arc<SessionStats>,
    ) -> Self {
        Self {
            inbound,
            router,
            stats,
        }
    }

    pub fn stats(&self) -> &Arc<SessionStats> {
        &self.stats
    }

    /// Serve one inbound connection from handshake to close
    pub async fn dispatch(&self, mut stream: Stream, source: Address) -> Result<()> {
        let start = Instant::now();

        let request = self.inbound.handshake(&mut stream).await?;
        self.stats.connection_start();

        let destination = &request.destination;
        let host = destination.host();
        let port = destination.port();

        // Step 1: Router selects connector (pure function, no IO)
        let connector = match self.router.resolve(&host, port) {
            Ok(connector) => connector,
            Err(e) => {
                error!("No route for {}: {}", destination, e);
                return self.fail(&mut stream, &request, e).await;
            }
        };

        debug!(
            "{} -> {} via [{}]",
            source,
            destination,
            connector.label()
        );

        // Step 2: Connect, dropping the attempt if the client goes away
        let (outbound, early) =
            match connect_watching_client(&connector, &host, port, &mut stream).await {
                Ok(Some(connected)) => connected,
                Ok(None) => {
                    self.stats.connection_failed();
                    debug!(
                        "{} closed before {} was reached, connect cancelled",
                        source, destination
                    );
                    return Ok(());
                }
                Err(e) => return self.fail(&mut stream, &request, e).await,
            };

        if let Err(e) = self.inbound.reply(&mut stream, &request, Reply::Succeeded).await {
            self.stats.connection_failed();
            return Err(e);
        }

        info!(
            "{} -> {} via [{}]",
            source,
            destination,
            connector.label()
        );

        // Step 3: Bidirectional relay
        let (up, down) = relay(stream, outbound, early).await?;
        self.stats.connection_end(up, down);

        info!(
            "Closed: {} -> {} (↑{} ↓{} {:?})",
            source,
            destination,
            format_bytes(up),
            format_bytes(down),
            start.elapsed()
        );

        Ok(())
    }

    async fn fail(&self, stream: &mut Stream, request: &Request, err: Error) -> Result<()> {
        self.stats.connection_failed();
        let reply = Reply::from_error(&err);
        if let Err(e) = self.inbound.reply(stream, request, reply).await {
            debug!("Failure reply to client not delivered: {}", e);
        }
        Err(err)
    }
}

/// Run the outbound connect while reading whatever the client sends.
///
/// Returns `None` if the client went away first, in which case the pending
/// connect is dropped. A client that already sent data and then shuts down
/// its write side is still waiting for an answer, so reading just stops.
async fn connect_watching_client(
    connector: &LabeledConnector,
    host: &str,
    port: u16,
    client: &mut Stream,
) -> Result<Option<(Stream, Vec<u8>)>> {
    let connect = connector.connect(host, port);
    tokio::pin!(connect);

    let mut early = Vec::new();
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    let mut client_eof = false;

    loop {
        let room = (MAX_EARLY_DATA - early.len()).min(buf.len());

        tokio::select! {
            result = &mut connect => {
                return result.map(|outbound| Some((outbound, early)));
            }
            read = client.read(&mut buf[..room]), if room > 0 && !client_eof => {
                match read {
                    Ok(0) if !early.is_empty() => client_eof = true,
                    Ok(0) | Err(_) => return Ok(None),
                    Ok(n) => early.extend_from_slice(&buf[..n]),
                }
            }
        }
    }
}

// ============================================================================
// Relay Implementation
// ============================================================================

/// Relay data bidirectionally, starting with bytes buffered during connect
async fn relay(inbound: Stream, mut outbound: Stream, early: Vec<u8>) -> Result<(u64, u64)> {
    if !early.is_empty() {
        outbound.write_all(&early).await?;
        outbound.flush().await?;
    }

    let (mut in_read, mut in_write) = tokio::io::split(inbound);
    let (mut out_read, mut out_write) = tokio::io::split(outbound);

    // Upload: client → server
    let upload = async move {
        let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
        let mut total = early.len() as u64;

        loop {
            let n = match in_read.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(_) => break,
            };

            if out_write.write_all(&buf[..n]).await.is_err() {
                break;
            }
            if out_write.flush().await.is_err() {
                break;
            }

            total += n as u64;
        }

        let _ = out_write.shutdown().await;
        total
    };

    // Download: server → client
    let download = async move {
        let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
        let mut total: u64 = 0;

        loop {
            let n = match out_read.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(_) => break,
            };

            if in_write.write_all(&buf[..n]).await.is_err() {
                break;
            }
            if in_write.flush().await.is_err() {
                break;
            }

            total += n as u64;
        }

        let _ = in_write.shutdown().await;
        total
    };

    let (up, down) = tokio::join!(upload, download);
    Ok((up, down))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::IntoStream;
    use crate::connector::{ConnectorFactory, RejectConnector};
    use crate::protocol::{SocksInbound, SocksServerConfig};
    use crate::router::{Pattern, RoutingTable, PRIORITY_DEFAULT};
    use crate::transport::Context;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::io::duplex;
    use tokio::net::TcpListener;
    use tokio_socks::tcp::Socks5Stream;

    fn dispatcher(default: LabeledConnector) -> (Arc<Dispatcher>, Arc<RoutingTable>) {
        let table = Arc::new(RoutingTable::new(default));
        let inbound = Arc::new(SocksInbound::new(SocksServerConfig::default()));
        let stats = Arc::new(SessionStats::new().unwrap());
        let dispatcher = Dispatcher::new(inbound, table.clone(), stats);
        (Arc::new(dispatcher), table)
    }

    fn direct() -> LabeledConnector {
        ConnectorFactory::new(Arc::new(Context::default())).direct()
    }

    /// Echo server that also reports the first bytes it saw
    async fn first_bytes_server(expect: usize) -> (u16, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; expect];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
            buf
        });
        (port, handle)
    }

    struct SlowConnector {
        inner: LabeledConnector,
        delay: Duration,
    }

    #[async_trait]
    impl Connector for SlowConnector {
        async fn connect(&self, host: &str, port: u16) -> Result<Stream> {
            tokio::time::sleep(self.delay).await;
            self.inner.connect(host, port).await
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_direct_session_has_no_socks_framing() {
        let (port, target) = first_bytes_server(4).await;
        let (dispatcher, _) = dispatcher(direct());

        let (client, server) = duplex(4096);
        let session = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .dispatch(server.into_stream(), Address::unspecified())
                    .await
            })
        };

        let mut client = Socks5Stream::connect_with_socket(client, ("127.0.0.1", port))
            .await
            .unwrap();
        client.write_all(b"ping").await.unwrap();

        let mut echoed = [0u8; 4];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"ping");
        assert_eq!(target.await.unwrap(), b"ping");

        drop(client);
        session.await.unwrap().unwrap();

        let stats = dispatcher.stats().snapshot();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.uploaded, 4);
    }

    #[tokio::test]
    async fn test_rejected_destination() {
        let (dispatcher, table) = dispatcher(direct());
        table.register(
            Pattern::Exact("blocked.example".into()),
            Pattern::Any,
            LabeledConnector::new(RejectConnector::new(), "-reject-"),
            PRIORITY_DEFAULT,
        );

        let (client, server) = duplex(4096);
        let session = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .dispatch(server.into_stream(), Address::unspecified())
                    .await
            })
        };

        let result = Socks5Stream::connect_with_socket(client, ("blocked.example", 80)).await;
        assert!(matches!(
            result,
            Err(tokio_socks::Error::ConnectionNotAllowedByRuleset)
        ));

        assert!(matches!(session.await.unwrap(), Err(Error::Rejected)));
        assert_eq!(dispatcher.stats().snapshot().failed, 1);
    }

    #[tokio::test]
    async fn test_client_close_cancels_connect() {
        let never = SlowConnector {
            inner: direct(),
            delay: Duration::from_secs(3600),
        };
        let (dispatcher, _) = dispatcher(LabeledConnector::new(never, "never"));

        let (mut client, server) = duplex(4096);
        let session = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .dispatch(server.into_stream(), Address::unspecified())
                    .await
            })
        };

        // SOCKS4 CONNECT 127.0.0.1:80, then hang up
        client
            .write_all(&[4, 1, 0, 80, 127, 0, 0, 1, 0])
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(client);

        let result = tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .expect("session should end once the client is gone");
        result.unwrap().unwrap();

        let stats = dispatcher.stats().snapshot();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.active, 0);
    }

    #[tokio::test]
    async fn test_early_data_forwarded_after_connect() {
        let (port, target) = first_bytes_server(5).await;
        let slow = SlowConnector {
            inner: direct(),
            delay: Duration::from_millis(50),
        };
        let (dispatcher, _) = dispatcher(LabeledConnector::new(slow, "slow"));

        let (mut client, server) = duplex(4096);
        let session = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .dispatch(server.into_stream(), Address::unspecified())
                    .await
            })
        };

        // Request and payload in one write, before any reply
        let mut request = vec![4, 1];
        request.extend_from_slice(&port.to_be_bytes());
        request.extend_from_slice(&[127, 0, 0, 1, 0]);
        request.extend_from_slice(b"early");
        client.write_all(&request).await.unwrap();

        let mut reply = [0u8; 8];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], 0x5A);

        let mut echoed = [0u8; 5];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"early");
        assert_eq!(target.await.unwrap(), b"early");

        drop(client);
        session.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_half_closed_client_keeps_early_data() {
        let (port, target) = first_bytes_server(7).await;
        let slow = SlowConnector {
            inner: direct(),
            delay: Duration::from_millis(50),
        };
        let (dispatcher, _) = dispatcher(LabeledConnector::new(slow, "slow"));

        let (mut client, server) = duplex(4096);
        let session = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .dispatch(server.into_stream(), Address::unspecified())
                    .await
            })
        };

        let mut request = vec![4, 1];
        request.extend_from_slice(&port.to_be_bytes());
        request.extend_from_slice(&[127, 0, 0, 1, 0]);
        request.extend_from_slice(b"payload");
        client.write_all(&request).await.unwrap();
        // Done sending, still reading
        client.shutdown().await.unwrap();

        let mut reply = [0u8; 8];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], 0x5A);

        let mut echoed = [0u8; 7];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"payload");
        assert_eq!(target.await.unwrap(), b"payload");

        session.await.unwrap().unwrap();
        let stats = dispatcher.stats().snapshot();
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.uploaded, 7);
    }
}
