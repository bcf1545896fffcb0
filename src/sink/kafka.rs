use crate::core::{PipelineError, Result};
use crate::sink::broker::{BrokerTransport, Compression};
use async_trait::async_trait;
use rdkafka::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{debug, info};

const SEND_TIMEOUT: Duration = Duration::from_secs(30);
const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

fn broker_error(e: KafkaError) -> PipelineError {
    PipelineError::Broker(e.to_string())
}

pub struct KafkaTransport {
    brokers: Vec<String>,
    compression: Compression,
    producer: Option<FutureProducer>,
}

impl KafkaTransport {
    pub fn new(brokers: Vec<String>, compression: Compression) -> Self {
        Self {
            brokers,
            compression,
            producer: None,
        }
    }

    fn producer(&self) -> Result<&FutureProducer> {
        self.producer
            .as_ref()
            .ok_or_else(|| PipelineError::Broker("producer is not connected".into()))
    }
}

#[async_trait]
impl BrokerTransport for KafkaTransport {
    async fn connect(&mut self, topic: &str) -> Result<()> {
        let servers = self.brokers.join(",");
        info!("connecting to Kafka brokers at {}...", servers);

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &servers)
            .set("compression.codec", self.compression.as_str())
            .set("message.send.max.retries", "5")
            .set("message.timeout.ms", SEND_TIMEOUT.as_millis().to_string());

        debug!("rdkafka configuration: {:?}", client_config);
        let producer: FutureProducer = client_config.create().map_err(broker_error)?;

        // make sure the brokers are reachable before the first record
        let probe = producer.clone();
        let topic = topic.to_string();
        tokio::task::spawn_blocking(move || {
            probe
                .client()
                .fetch_metadata(Some(topic.as_str()), Timeout::After(METADATA_TIMEOUT))
                .map(|_| ())
        })
        .await
        .map_err(|e| PipelineError::Broker(format!("metadata probe aborted: {e}")))?
        .map_err(broker_error)?;
        info!("connected to Kafka brokers");

        self.producer = Some(producer);
        Ok(())
    }

    async fn publish(&self, topic: &str, key: &[u8], payload: &[u8]) -> Result<()> {
        let record = FutureRecord::to(topic).key(key).payload(payload);
        self.producer()?
            .send(record, Timeout::After(SEND_TIMEOUT))
            .await
            .map(|_| ())
            .map_err(|(e, _)| broker_error(e))
    }

    async fn flush(&self) -> Result<()> {
        // librdkafka blocks until the queue drains
        let producer = self.producer()?.clone();
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(SEND_TIMEOUT)))
            .await
            .map_err(|e| PipelineError::Broker(format!("flush aborted: {e}")))?
            .map_err(broker_error)
    }
}
