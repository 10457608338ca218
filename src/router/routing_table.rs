//! Priority/specificity routing table

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::common::Result;
use crate::connector::LabeledConnector;
use crate::error::Error;

use super::Router;

/// Priority of the catch-all route and of routes registered without one
pub const PRIORITY_DEFAULT: i32 = 100;

/// Exact value or wildcard
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Pattern<T> {
    Any,
    Exact(T),
}

pub type HostPattern = Pattern<String>;
pub type PortPattern = Pattern<u16>;

impl<T> Pattern<T> {
    pub fn is_exact(&self) -> bool {
        matches!(self, Pattern::Exact(_))
    }
}

impl HostPattern {
    /// `*` (or empty) is the wildcard; hosts compare case-insensitively
    pub fn host(s: &str) -> Self {
        match s.trim() {
            "" | "*" => Pattern::Any,
            host => Pattern::Exact(host.to_ascii_lowercase()),
        }
    }

    /// Lowercase an exact host so case variants name the same route
    fn normalized(self) -> Self {
        match self {
            Pattern::Exact(host) => Pattern::Exact(host.to_ascii_lowercase()),
            Pattern::Any => Pattern::Any,
        }
    }

    fn matches_host(&self, host: &str) -> bool {
        match self {
            Pattern::Any => true,
            Pattern::Exact(expected) => expected.eq_ignore_ascii_case(host),
        }
    }
}

impl PortPattern {
    pub fn port(s: &str) -> Result<Self> {
        match s.trim() {
            "" | "*" => Ok(Pattern::Any),
            port => port
                .parse::<u16>()
                .map(Pattern::Exact)
                .map_err(|_| Error::Config(format!("invalid port pattern: {}", port))),
        }
    }

    fn matches_port(&self, port: u16) -> bool {
        match self {
            Pattern::Any => true,
            Pattern::Exact(expected) => *expected == port,
        }
    }
}

impl<T: fmt::Display> fmt::Display for Pattern<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Any => write!(f, "*"),
            Pattern::Exact(value) => write!(f, "{}", value),
        }
    }
}

struct RoutingEntry {
    host: HostPattern,
    port: PortPattern,
    connector: Arc<LabeledConnector>,
    priority: i32,
    /// Registration order; larger is newer
    seq: u64,
}

impl RoutingEntry {
    fn matches(&self, host: &str, port: u16) -> bool {
        self.host.matches_host(host) && self.port.matches_port(port)
    }

    fn is_catch_all(&self) -> bool {
        self.host == Pattern::Any && self.port == Pattern::Any
    }

    /// Larger ranks win: host exactness, port exactness, priority, recency
    fn rank(&self) -> (bool, bool, i32, u64) {
        (self.host.is_exact(), self.port.is_exact(), self.priority, self.seq)
    }
}

/// Read-only view of one route
#[derive(Debug, Clone)]
pub struct RouteSnapshot {
    pub host: HostPattern,
    pub port: PortPattern,
    pub priority: i32,
    pub label: String,
}

struct Entries {
    routes: Vec<RoutingEntry>,
    next_seq: u64,
}

/// Mutable routing table with a mandatory catch-all route
///
/// The lock is never held across an await point, so a mutation is atomic
/// with respect to every concurrent `resolve`.
pub struct RoutingTable {
    entries: RwLock<Entries>,
}

impl RoutingTable {
    /// Create a table whose catch-all route uses `default`
    pub fn new(default: LabeledConnector) -> Self {
        let table = Self {
            entries: RwLock::new(Entries {
                routes: Vec::new(),
                next_seq: 0,
            }),
        };
        table.register(Pattern::Any, Pattern::Any, default, PRIORITY_DEFAULT);
        table
    }

    /// Insert a route, replacing any route with the same pattern pair
    pub fn register(
        &self,
        host: HostPattern,
        port: PortPattern,
        connector: LabeledConnector,
        priority: i32,
    ) {
        let mut entries = self.entries.write();
        let seq = entries.next_seq;
        entries.next_seq += 1;

        let entry = RoutingEntry {
            host: host.normalized(),
            port,
            connector: Arc::new(connector),
            priority,
            seq,
        };

        debug!(
            "Route {}:{} -> {} (priority {})",
            entry.host,
            entry.port,
            entry.connector.label(),
            priority
        );

        match entries
            .routes
            .iter_mut()
            .find(|e| e.host == entry.host && e.port == entry.port)
        {
            Some(existing) => *existing = entry,
            None => entries.routes.push(entry),
        }
    }

    /// Remove a route. The catch-all route cannot be removed.
    pub fn unregister(&self, host: &HostPattern, port: &PortPattern) -> Result<bool> {
        if *host == Pattern::Any && *port == Pattern::Any {
            return Err(Error::Config("cannot remove the default route".into()));
        }

        let host = host.clone().normalized();
        let mut entries = self.entries.write();
        let before = entries.routes.len();
        entries
            .routes
            .retain(|e| !(e.host == host && e.port == *port));
        Ok(entries.routes.len() != before)
    }

    /// Select the connector for a destination
    pub fn resolve(&self, host: &str, port: u16) -> Result<Arc<LabeledConnector>> {
        let entries = self.entries.read();
        entries
            .routes
            .iter()
            .filter(|e| e.matches(host, port))
            .max_by_key(|e| e.rank())
            .map(|e| e.connector.clone())
            .ok_or_else(|| Error::Routing("no matching route".into()))
    }

    /// Routes in resolution order, most preferred first
    pub fn entries(&self) -> Vec<RouteSnapshot> {
        let entries = self.entries.read();
        let mut routes: Vec<&RoutingEntry> = entries.routes.iter().collect();
        routes.sort_by_key(|e| std::cmp::Reverse(e.rank()));
        routes
            .into_iter()
            .map(|e| RouteSnapshot {
                host: e.host.clone(),
                port: e.port.clone(),
                priority: e.priority,
                label: e.connector.label().to_string(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Label of the catch-all route
    pub fn default_label(&self) -> Option<String> {
        self.entries
            .read()
            .routes
            .iter()
            .find(|e| e.is_catch_all())
            .map(|e| e.connector.label().to_string())
    }
}

impl Router for RoutingTable {
    fn resolve(&self, host: &str, port: u16) -> Result<Arc<LabeledConnector>> {
        RoutingTable::resolve(self, host, port)
    }
}
