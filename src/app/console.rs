//! Operator console
//!
//! One command per line, whitespace separated:
//!
//! ```text
//! via socks5://hop:1080 example.com 443 200
//! via reject * 25
//! via remove example.com 443
//! ping example.com 443
//! ```

use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::common::Result;
use crate::connector::{Connector, ConnectorFactory};
use crate::error::Error;
use crate::router::{HostPattern, PortPattern, RoutingTable, PRIORITY_DEFAULT};

use super::stats::{format_bytes, SessionStats};

const HELP: &str = "\
commands:
  help                                           show this text
  status                                         listener and session counters
  via [list]                                     show the routing table
  via <socket|none|reject> [host] [port] [prio]  route host:port (default * * 100)
  via remove <host> [port]                       drop a route
  ping <host> [port]                             time a connect through the chosen route
  quit | exit                                    stop the daemon";

const INVALID_COMMAND: &str = "invalid command. type \"help\"?";

const DEFAULT_PING_PORT: u16 = 80;

/// What the caller should do after a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Continue(String),
    Quit(String),
}

impl Outcome {
    pub fn output(&self) -> &str {
        match self {
            Outcome::Continue(text) | Outcome::Quit(text) => text,
        }
    }
}

/// Applies operator commands to the live routing table
pub struct Console {
    router: Arc<RoutingTable>,
    factory: Arc<ConnectorFactory>,
    stats: Arc<SessionStats>,
    listen: String,
}

impl Console {
    pub fn new(
        router: Arc<RoutingTable>,
        factory: Arc<ConnectorFactory>,
        stats: Arc<SessionStats>,
        listen: impl Into<String>,
    ) -> Self {
        Self {
            router,
            factory,
            stats,
            listen: listen.into(),
        }
    }

    /// Execute one command line
    pub async fn execute(&self, line: &str) -> Outcome {
        let tokens: Vec<&str> = line.split_whitespace().collect();

        let result = match tokens.as_slice() {
            [] => Ok(String::new()),
            ["help"] => Ok(HELP.to_string()),
            ["status"] => Ok(self.status()),
            ["quit"] | ["exit"] => return Outcome::Quit("bye".to_string()),
            ["via"] | ["via", "list"] => Ok(self.list()),
            ["via", "remove", args @ ..] => self.remove(args),
            ["via", args @ ..] => self.route(args),
            ["ping", args @ ..] => self.ping(args).await,
            _ => Ok(INVALID_COMMAND.to_string()),
        };

        match result {
            Ok(text) => Outcome::Continue(text),
            Err(e) => Outcome::Continue(format!("error: {}", message(&e))),
        }
    }

    /// Read commands until `quit` or end of input
    pub async fn run<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await? {
            debug!("Console command: {}", line.trim());
            let outcome = self.execute(&line).await;

            let output = outcome.output();
            if !output.is_empty() {
                writer.write_all(output.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }

            if let Outcome::Quit(_) = outcome {
                return Ok(());
            }
        }

        debug!("Console input closed");
        Ok(())
    }

    fn status(&self) -> String {
        let stats = self.stats.snapshot();
        format!(
            "listening on {}\nsessions: {} active, {} total, {} failed\ntraffic: ↑{} ↓{}\nroutes: {}",
            self.listen,
            stats.active,
            stats.total,
            stats.failed,
            format_bytes(stats.uploaded),
            format_bytes(stats.downloaded),
            self.router.len()
        )
    }

    fn list(&self) -> String {
        let mut out = format!("{:<32} {:<6} {:>9}  {}", "HOST", "PORT", "PRIORITY", "VIA");
        for route in self.router.entries() {
            out.push('\n');
            out.push_str(&format!(
                "{:<32} {:<6} {:>9}  {}",
                route.host.to_string(),
                route.port.to_string(),
                route.priority,
                route.label
            ));
        }
        out
    }

    fn route(&self, args: &[&str]) -> Result<String> {
        let (spec, host, port, priority) = match args {
            [spec] => (*spec, "*", "*", None),
            [spec, host] => (*spec, *host, "*", None),
            [spec, host, port] => (*spec, *host, *port, None),
            [spec, host, port, priority] => (*spec, *host, *port, Some(*priority)),
            _ => {
                return Err(Error::Config(
                    "usage: via <socket|none|reject> [host] [port] [priority]".into(),
                ))
            }
        };

        // Validate everything before touching the table
        let host = HostPattern::host(host);
        let port = PortPattern::port(port)?;
        let priority = match priority {
            Some(p) => p
                .parse::<i32>()
                .map_err(|_| Error::Config(format!("invalid priority: {}", p)))?,
            None => PRIORITY_DEFAULT,
        };

        let (connector, report) = self.factory.build(spec)?;
        self.router.register(host, port, connector, priority);

        Ok(report.to_string())
    }

    fn remove(&self, args: &[&str]) -> Result<String> {
        let (host, port) = match args {
            [host] => (*host, "*"),
            [host, port] => (*host, *port),
            _ => return Err(Error::Config("usage: via remove <host> [port]".into())),
        };

        let host = HostPattern::host(host);
        let port = PortPattern::port(port)?;

        if self.router.unregister(&host, &port)? {
            Ok(format!("removed route {} {}", host, port))
        } else {
            Ok(format!("no route {} {}", host, port))
        }
    }

    /// Connect to a destination through whatever route it resolves to
    async fn ping(&self, args: &[&str]) -> Result<String> {
        let (host, port) = match args {
            [host] => (*host, DEFAULT_PING_PORT),
            [host, port] => {
                let port = port
                    .parse::<u16>()
                    .ok()
                    .filter(|p| *p != 0)
                    .ok_or_else(|| Error::Config(format!("invalid port: {}", port)))?;
                (*host, port)
            }
            _ => return Err(Error::Config("usage: ping <host> [port]".into())),
        };

        let connector = self.router.resolve(host, port)?;
        let started = Instant::now();
        let result = connector.connect(host, port).await;
        let elapsed = started.elapsed();

        Ok(match result {
            Ok(_) => format!(
                "{}:{} via {}: connected in {:?}",
                host,
                port,
                connector.label(),
                elapsed
            ),
            Err(e) => format!(
                "{}:{} via {}: {} after {:?}",
                host,
                port,
                connector.label(),
                e,
                elapsed
            ),
        })
    }
}

/// Operator-facing text of an error, without the category prefix
fn message(err: &Error) -> String {
    match err {
        Error::Config(msg) | Error::Routing(msg) => msg.clone(),
        other => other.to_string(),
    }
}
