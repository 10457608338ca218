//! Session metrics
//!
//! Counters live in a registry owned by the stats object, so every daemon in
//! the process reports its own numbers.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

use crate::common::Result;

/// Dispatcher-level statistics backed by prometheus counters
pub struct SessionStats {
    registry: Registry,
    active: IntGauge,
    total: IntCounter,
    failed: IntCounter,
    uploaded: IntCounter,
    downloaded: IntCounter,
}

/// Point-in-time copy of [`SessionStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub active: u64,
    pub total: u64,
    pub failed: u64,
    pub uploaded: u64,
    pub downloaded: u64,
}

impl SessionStats {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let active = IntGauge::new(
            "socksroute_sessions_active",
            "Number of currently open sessions",
        )?;
        let total = IntCounter::new(
            "socksroute_sessions_total",
            "Total number of sessions past the handshake",
        )?;
        let failed = IntCounter::new(
            "socksroute_sessions_failed",
            "Sessions that never reached their destination",
        )?;
        let uploaded = IntCounter::new(
            "socksroute_traffic_bytes_uploaded_total",
            "Total bytes sent by clients",
        )?;
        let downloaded = IntCounter::new(
            "socksroute_traffic_bytes_downloaded_total",
            "Total bytes sent to clients",
        )?;

        registry.register(Box::new(active.clone()))?;
        registry.register(Box::new(total.clone()))?;
        registry.register(Box::new(failed.clone()))?;
        registry.register(Box::new(uploaded.clone()))?;
        registry.register(Box::new(downloaded.clone()))?;

        Ok(Self {
            registry,
            active,
            total,
            failed,
            uploaded,
            downloaded,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn connection_start(&self) {
        self.total.inc();
        self.active.inc();
    }

    pub fn connection_end(&self, uploaded: u64, downloaded: u64) {
        self.active.dec();
        self.uploaded.inc_by(uploaded);
        self.downloaded.inc_by(downloaded);
    }

    pub fn connection_failed(&self) {
        self.active.dec();
        self.failed.inc();
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            active: self.active.get().max(0) as u64,
            total: self.total.get(),
            failed: self.failed.get(),
            uploaded: self.uploaded.get(),
            downloaded: self.downloaded.get(),
        }
    }

    /// Render every counter in the Prometheus text format
    pub fn encode_text(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2}MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2}KB", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_counters() {
        let stats = SessionStats::new().unwrap();
        stats.connection_start();
        stats.connection_start();
        stats.connection_end(100, 2048);
        stats.connection_failed();

        assert_eq!(
            stats.snapshot(),
            StatsSnapshot {
                active: 0,
                total: 2,
                failed: 1,
                uploaded: 100,
                downloaded: 2048,
            }
        );
    }

    #[test]
    fn test_registries_are_independent() {
        let first = SessionStats::new().unwrap();
        let second = SessionStats::new().unwrap();
        first.connection_start();

        assert_eq!(first.snapshot().total, 1);
        assert_eq!(second.snapshot().total, 0);
        assert_eq!(first.registry().gather().len(), 5);
    }

    #[test]
    fn test_encode_text() {
        let stats = SessionStats::new().unwrap();
        stats.connection_start();
        stats.connection_end(7, 0);

        let text = stats.encode_text().unwrap();
        assert!(text.contains("socksroute_sessions_total 1"), "{}", text);
        assert!(text.contains("socksroute_traffic_bytes_uploaded_total 7"), "{}", text);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2.00KB");
        assert_eq!(format_bytes(3 * 1024 * 1024 / 2), "1.50MB");
    }
}
