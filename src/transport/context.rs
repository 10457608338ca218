//! Process-wide network context
//!
//! Built once at startup and handed by reference to everything that issues
//! network operations. Dropped (after `shutdown`) when the runtime exits.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::{Resolver, TcpTransport, Transport};

pub struct Context {
    resolver: Arc<Resolver>,
    transport: Arc<dyn Transport>,
}

impl Context {
    pub fn new(cache_size: usize, cache_ttl: Duration) -> Self {
        let resolver = Arc::new(Resolver::new(cache_size, cache_ttl));
        let transport = Arc::new(TcpTransport::new(resolver.clone()));
        Self {
            resolver,
            transport,
        }
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Release cached state before exit
    pub fn shutdown(&self) {
        debug!(
            "Dropping {} cached DNS answers",
            self.resolver.cached_hosts()
        );
        self.resolver.clear();
    }
}

impl Default for Context {
    fn default() -> Self {
        let resolver = Arc::new(Resolver::default());
        let transport = Arc::new(TcpTransport::new(resolver.clone()));
        Self {
            resolver,
            transport,
        }
    }
}
