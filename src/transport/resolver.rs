//! DNS resolver with a small LRU cache
//!
//! Lookups go through the system resolver. Successful answers are kept for a
//! fixed TTL since the system resolver does not report record TTLs.

use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use tokio::net::lookup_host;
use tracing::{debug, trace};

use crate::common::Result;
use crate::error::Error;

/// Default number of cached host names
pub const DEFAULT_CACHE_SIZE: usize = 256;

/// Default lifetime of a cached answer
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

struct CachedLookup {
    addrs: Vec<IpAddr>,
    expires_at: Instant,
}

/// Shared host name resolver
pub struct Resolver {
    /// host (lowercase) -> addresses; `None` disables caching
    cache: Option<Mutex<LruCache<String, CachedLookup>>>,
    ttl: Duration,
}

impl Resolver {
    pub fn new(cache_size: usize, ttl: Duration) -> Self {
        let cache = NonZeroUsize::new(cache_size).map(|size| Mutex::new(LruCache::new(size)));
        Self { cache, ttl }
    }

    /// Resolver that always asks the system
    pub fn uncached() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Resolve a host to socket addresses. IP literals are returned as-is.
    pub async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>> {
        let literal = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = literal.parse::<IpAddr>() {
            return Ok(vec![SocketAddr::new(ip, port)]);
        }

        let key = host.to_ascii_lowercase();
        if let Some(addrs) = self.lookup_cached(&key) {
            trace!("DNS cache hit for {}", host);
            return Ok(with_port(&addrs, port));
        }

        let mut addrs: Vec<IpAddr> = Vec::new();
        let answers = lookup_host((host, port))
            .await
            .map_err(|e| Error::Resolve(format!("{}: {}", host, e)))?;
        for addr in answers {
            if !addrs.contains(&addr.ip()) {
                addrs.push(addr.ip());
            }
        }

        if addrs.is_empty() {
            return Err(Error::Resolve(format!("{}: no addresses found", host)));
        }

        debug!("Resolved {} to {:?}", host, addrs);
        self.store(key, &addrs);

        Ok(with_port(&addrs, port))
    }

    fn lookup_cached(&self, key: &str) -> Option<Vec<IpAddr>> {
        let mut cache = self.cache.as_ref()?.lock();
        let (expired, addrs) = cache
            .get(key)
            .map(|entry| (entry.expires_at <= Instant::now(), entry.addrs.clone()))?;
        if expired {
            cache.pop(key);
            return None;
        }
        Some(addrs)
    }

    fn store(&self, key: String, addrs: &[IpAddr]) {
        if let Some(cache) = &self.cache {
            cache.lock().put(
                key,
                CachedLookup {
                    addrs: addrs.to_vec(),
                    expires_at: Instant::now() + self.ttl,
                },
            );
        }
    }

    /// Number of cached host names
    pub fn cached_hosts(&self) -> usize {
        self.cache.as_ref().map(|c| c.lock().len()).unwrap_or(0)
    }

    /// Drop every cached answer
    pub fn clear(&self) {
        if let Some(cache) = &self.cache {
            cache.lock().clear();
        }
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_SIZE, DEFAULT_CACHE_TTL)
    }
}

fn with_port(addrs: &[IpAddr], port: u16) -> Vec<SocketAddr> {
    addrs.iter().map(|ip| SocketAddr::new(*ip, port)).collect()
}
