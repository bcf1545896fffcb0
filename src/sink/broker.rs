use crate::core::{AssetRecord, PipelineError, Result, Sink};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    Gzip,
    Lz4,
    Snappy,
}

impl Compression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::Gzip => "gzip",
            Compression::Lz4 => "lz4",
            Compression::Snappy => "snappy",
        }
    }
}

impl FromStr for Compression {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gzip" => Ok(Compression::Gzip),
            "lz4" => Ok(Compression::Lz4),
            "snappy" => Ok(Compression::Snappy),
            other => Err(PipelineError::Config(format!("unknown compression '{other}'"))),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire-level publisher behind a [`BrokerSink`].
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    async fn connect(&mut self, topic: &str) -> Result<()>;

    async fn publish(&self, topic: &str, key: &[u8], payload: &[u8]) -> Result<()>;

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Publishes one message per record keyed by the record name, or, in
/// IP-split mode, one flattened message per interface address.
pub struct BrokerSink<T: BrokerTransport> {
    name: String,
    transport: T,
    topic: String,
    ip_split: bool,
}

impl<T: BrokerTransport> BrokerSink<T> {
    pub fn new(transport: T, topic: impl Into<String>, ip_split: bool) -> Self {
        let topic = topic.into();
        Self {
            name: format!("broker:{topic}"),
            transport,
            topic,
            ip_split,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn publish<M: Serialize + Sync>(&self, key: &str, message: &M) -> Result<()> {
        let payload = serde_json::to_vec(message)?;
        self.transport
            .publish(&self.topic, key.as_bytes(), &payload)
            .await
    }
}

#[async_trait]
impl<T: BrokerTransport> Sink for BrokerSink<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> Result<()> {
        self.transport.connect(&self.topic).await
    }

    async fn consume(&mut self, record: &AssetRecord) -> Result<()> {
        if !self.ip_split {
            return self.publish(&record.name, record).await;
        }

        let lines = record.split_by_address();
        let mut failed = 0;
        for line in &lines {
            if let Err(e) = self.publish(&record.name, line).await {
                error!(
                    sink = %self.name,
                    vm = %record.name,
                    ip = line.ip,
                    error = %e,
                    "unable to publish"
                );
                failed += 1;
            }
        }
        debug!(vm = %record.name, messages = lines.len(), failed, "published split lines");

        if failed > 0 {
            Err(PipelineError::Broker(format!(
                "{failed} of {} split messages failed",
                lines.len()
            )))
        } else {
            Ok(())
        }
    }

    async fn finalize(&mut self) -> Result<()> {
        self.transport.flush().await
    }
}
