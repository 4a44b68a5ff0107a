use std::time::Duration;

use anyhow::{bail, Context};
use tracing::info;

/// Delivers one encoded payload. Any error counts as a failed delivery.
pub trait Transport: core::fmt::Debug + Send + Sync {
    fn deliver(&self, payload: &[u8]) -> anyhow::Result<()>;
}

#[derive(Debug)]
pub struct HttpTransport {
    client: ureq::Agent,
    url: String,
}
impl HttpTransport {
    /// `timeout` bounds each request end to end.
    pub fn new(url: String, timeout: Duration) -> Self {
        let client = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { client, url }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}
impl Transport for HttpTransport {
    /// Blocking I/O
    fn deliver(&self, payload: &[u8]) -> anyhow::Result<()> {
        let resp = self
            .client
            .post(&self.url)
            .set("Content-Type", "application/json")
            .send_bytes(payload)
            .with_context(|| format!("POST {}", self.url))?;
        let status = resp.status();
        if !(200..300).contains(&status) {
            bail!("POST {} answered {status}", self.url);
        }
        Ok(())
    }
}

/// Writes every payload to the log instead of the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransport;
impl Transport for LogTransport {
    fn deliver(&self, payload: &[u8]) -> anyhow::Result<()> {
        info!(payload = %String::from_utf8_lossy(payload), "collected metrics");
        Ok(())
    }
}
