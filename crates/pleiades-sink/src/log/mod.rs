//! Distributed log sink
//!
//! Publishes every event to a partitioned log topic, keyed by event id, and
//! recovers the resume checkpoint from the newest message across partitions.
//! The broker sits behind [`LogBroker`]:
//! - [`KafkaBroker`] talks to a Kafka cluster
//! - [`MockBroker`] keeps partitions in memory for tests

pub mod broker;
pub mod kafka;
pub mod mock;
pub mod partition;
pub mod timestamp;
mod writer;

pub use broker::{LogBroker, LogMessage, PartitionId};
pub use kafka::KafkaBroker;
pub use mock::MockBroker;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use pleiades_core::{Event, Metrics, Sink, SinkError, SinkKind, SinkResult};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::LogSinkConfig;
use writer::BatchWriter;

/// Time allowed for the preflight check
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Time allowed to read the latest message of one partition
pub const PARTITION_TIMEOUT: Duration = Duration::from_secs(30);

/// Time allowed for the whole resume lookup
pub const RESUME_TIMEOUT: Duration = Duration::from_secs(90);

/// Sink publishing events to a log topic
pub struct LogSink {
    broker: Arc<dyn LogBroker>,
    writer: BatchWriter,
    metrics: Metrics,
    last_persisted: Option<String>,
    partition_timeout: Duration,
    resume_timeout: Duration,
}

impl LogSink {
    /// Create a sink on top of an existing broker.
    ///
    /// Spawns the background writer, so it must be called from within a tokio
    /// runtime.
    pub fn new(broker: Arc<dyn LogBroker>, config: &LogSinkConfig, metrics: Metrics) -> Self {
        let writer = BatchWriter::spawn(
            broker.clone(),
            config.batch_size,
            config.linger,
            metrics.clone(),
        );
        Self {
            broker,
            writer,
            metrics,
            last_persisted: None,
            partition_timeout: PARTITION_TIMEOUT,
            resume_timeout: RESUME_TIMEOUT,
        }
    }

    /// Connect to Kafka and create a sink for the configured topic
    pub async fn connect(config: &LogSinkConfig, metrics: Metrics) -> SinkResult<Self> {
        let broker = KafkaBroker::connect(&config.brokers, &config.topic).await?;
        Ok(Self::new(Arc::new(broker), config, metrics))
    }

    /// Override the resume lookup deadlines
    pub fn with_resume_timeouts(mut self, per_partition: Duration, overall: Duration) -> Self {
        self.partition_timeout = per_partition;
        self.resume_timeout = overall;
        self
    }

    pub fn topic(&self) -> &str {
        self.broker.topic()
    }

    async fn latest_per_partition(&self) -> SinkResult<Vec<LogMessage>> {
        let partitions = timeout(self.partition_timeout, self.broker.partitions())
            .await
            .map_err(|_| SinkError::Timeout("listing topic partitions".into()))??;
        debug!(topic = %self.topic(), ?partitions, "Looking up latest message per partition");

        let lookups = partitions.iter().map(|&partition| {
            let broker = self.broker.clone();
            let deadline = self.partition_timeout;
            async move {
                let result = match timeout(deadline, broker.latest_message(partition)).await {
                    Ok(result) => result,
                    Err(_) => Err(SinkError::Timeout(format!(
                        "reading latest message of partition {partition}"
                    ))),
                };
                (partition, result)
            }
        });

        let results = timeout(self.resume_timeout, join_all(lookups))
            .await
            .map_err(|_| SinkError::Timeout("looking up latest messages".into()))?;

        let mut messages = Vec::new();
        let mut failures = Vec::new();
        for (partition, result) in results {
            match result {
                Ok(Some(message)) => messages.push(message),
                Ok(None) => debug!(partition, "Partition is empty"),
                Err(e) => {
                    warn!(partition, error = %e, "Failed to read latest message");
                    failures.push(partition);
                }
            }
        }

        if !failures.is_empty() {
            return Err(SinkError::Connectivity(format!(
                "failed to read partitions {failures:?}"
            )));
        }
        Ok(messages)
    }
}

#[async_trait]
impl Sink for LogSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Log
    }

    async fn process_event(&mut self, event: Event) -> SinkResult<()> {
        let id = event.id;
        self.writer
            .publish(LogMessage {
                key: id.clone(),
                value: event.data,
            })
            .await?;

        self.metrics
            .events_published
            .with_label_values(&[SinkKind::Log.as_str()])
            .inc();
        if let Some(lag) = timestamp::lag_ms(&id, Utc::now()) {
            self.metrics.publish_lag_ms.set(lag as f64);
        }
        self.last_persisted = Some(id);
        Ok(())
    }

    async fn resume_id(&self) -> String {
        let messages = match self.latest_per_partition().await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(topic = %self.topic(), error = %e, "Unable to determine resume id");
                return String::new();
            }
        };

        if messages.is_empty() {
            info!(topic = %self.topic(), "Topic is empty, nothing to resume from");
            return String::new();
        }

        timestamp::select_latest(&messages)
    }

    async fn validate_connection(&self) -> SinkResult<()> {
        match timeout(PROBE_TIMEOUT, self.broker.probe()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(SinkError::Connectivity(reason))) => Err(SinkError::Connectivity(reason)),
            Ok(Err(e)) => Err(SinkError::Connectivity(e.to_string())),
            Err(_) => Err(SinkError::Connectivity(format!(
                "no answer from leader of {}/0 within {PROBE_TIMEOUT:?}",
                self.topic()
            ))),
        }
    }

    fn last_persisted_id(&self) -> Option<&str> {
        self.last_persisted.as_deref()
    }

    async fn flush(&mut self) -> SinkResult<()> {
        self.writer.flush().await
    }
}
