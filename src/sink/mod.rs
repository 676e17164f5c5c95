//! Downstream publishing.
//!
//! Every poll tick ends with one publish: key = machine id bytes, value =
//! snapshot JSON bytes. The sink is a trait so the pipeline does not care
//! whether messages land on Kafka, in the log, or in a test buffer. Publishes
//! are best-effort: no outbox, no retry — the next tick supersedes the
//! message anyway under the same key.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::error::CollectorError;

/// Write-only sink for per-tick snapshot messages.
#[async_trait]
pub trait DownstreamSink: Send + Sync {
    async fn publish(&self, key: &[u8], value: &[u8]) -> Result<(), CollectorError>;
    async fn close(&self);
}

// ============================================================================
// Kafka
// ============================================================================

/// Delivery timeout for a single Kafka send.
const KAFKA_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Kafka-backed sink.
pub struct KafkaSink {
    producer: FutureProducer,
    topic: String,
}

impl KafkaSink {
    /// Build a producer from the configured brokers and topic.
    pub fn new(config: &AppConfig) -> Result<Self, CollectorError> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", config.kafka_brokers.join(","))
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| CollectorError::Downstream(format!("kafka producer init: {e}")))?;
        Ok(Self {
            producer,
            topic: config.kafka_topic.clone(),
        })
    }
}

#[async_trait]
impl DownstreamSink for KafkaSink {
    async fn publish(&self, key: &[u8], value: &[u8]) -> Result<(), CollectorError> {
        let record = FutureRecord::to(&self.topic).key(key).payload(value);
        self.producer
            .send(record, Timeout::After(KAFKA_SEND_TIMEOUT))
            .await
            .map(|_| ())
            .map_err(|(e, _)| CollectorError::Downstream(e.to_string()))
    }

    async fn close(&self) {
        // librdkafka flushes on drop; nothing beyond letting in-flight sends
        // run out their delivery timeout.
        debug!("Kafka sink closed");
    }
}

// ============================================================================
// Log
// ============================================================================

/// Fallback sink used when no Kafka brokers are configured: publishes become
/// debug log lines so a broker-less deployment still runs.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl DownstreamSink for LogSink {
    async fn publish(&self, key: &[u8], value: &[u8]) -> Result<(), CollectorError> {
        debug!(
            machine = %String::from_utf8_lossy(key),
            bytes = value.len(),
            "Snapshot publish (log sink)"
        );
        Ok(())
    }

    async fn close(&self) {}
}

// ============================================================================
// Memory
// ============================================================================

/// Records every publish; used by the integration suites to observe the
/// pipeline's downstream side.
#[derive(Debug, Default)]
pub struct MemorySink {
    messages: Mutex<Vec<(Vec<u8>, Vec<u8>)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All `(key, value)` pairs published so far.
    pub fn messages(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.messages
            .lock()
            .unwrap_or_else(|e| {
                warn!("Memory sink lock poisoned, recovering");
                e.into_inner()
            })
            .clone()
    }

    /// Keys published so far, as strings.
    pub fn keys(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .map(|(key, _)| String::from_utf8_lossy(&key).into_owned())
            .collect()
    }
}

#[async_trait]
impl DownstreamSink for MemorySink {
    async fn publish(&self, key: &[u8], value: &[u8]) -> Result<(), CollectorError> {
        self.messages
            .lock()
            .unwrap_or_else(|e| {
                warn!("Memory sink lock poisoned, recovering");
                e.into_inner()
            })
            .push((key.to_vec(), value.to_vec()));
        Ok(())
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_sink_records_messages() {
        let sink = MemorySink::new();
        sink.publish(b"M1", br#"{"MachineId":"M1"}"#).await.unwrap();
        sink.publish(b"M2", br#"{"MachineId":"M2"}"#).await.unwrap();

        let messages = sink.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].0, b"M1");
        assert_eq!(sink.keys(), vec!["M1".to_string(), "M2".to_string()]);
    }

    #[tokio::test]
    async fn test_log_sink_accepts_publishes() {
        let sink = LogSink;
        assert!(sink.publish(b"M1", b"{}").await.is_ok());
        sink.close().await;
    }
}
