//! Direct connector - resolve and connect straight to the target

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use crate::common::{Address, Result, Stream};
use crate::transport::Transport;

use super::Connector;

/// Plain TCP to the destination, no SOCKS framing
pub struct DirectConnector {
    transport: Arc<dyn Transport>,
}

impl DirectConnector {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl Connector for DirectConnector {
    async fn connect(&self, host: &str, port: u16) -> Result<Stream> {
        let target = Address::from_host(host, port);
        trace!("Direct connect to {}", target);
        self.transport.connect(&target).await
    }

    fn name(&self) -> &'static str {
        "direct"
    }
}
