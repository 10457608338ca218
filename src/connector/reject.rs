//! Reject connector - every connection attempt fails immediately

use async_trait::async_trait;
use tracing::trace;

use crate::common::{Result, Stream};
use crate::error::Error;

use super::Connector;

pub struct RejectConnector;

impl RejectConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RejectConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for RejectConnector {
    async fn connect(&self, host: &str, port: u16) -> Result<Stream> {
        trace!("Rejecting connection to {}:{}", host, port);
        Err(Error::Rejected)
    }

    fn name(&self) -> &'static str {
        "reject"
    }
}
