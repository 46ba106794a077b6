//! Kafka broker backed by rskafka

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use pleiades_core::{SinkError, SinkResult};
use rskafka::client::partition::{Compression, OffsetAt, PartitionClient, UnknownTopicHandling};
use rskafka::client::{Client, ClientBuilder};
use rskafka::record::Record;
use tokio::time::timeout;
use tracing::{debug, info};

use super::broker::{LogBroker, LogMessage, PartitionId};

/// Time allowed to reach the bootstrap brokers
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound for a single fetch response
const MAX_FETCH_BYTES: i32 = 10 * 1024 * 1024;
const FETCH_MAX_WAIT_MS: i32 = 1_000;

/// Broker for one Kafka topic
pub struct KafkaBroker {
    client: Client,
    topic: String,
    brokers: Vec<String>,
    partition_clients: Mutex<HashMap<PartitionId, Arc<PartitionClient>>>,
}

impl fmt::Debug for KafkaBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KafkaBroker")
            .field("brokers", &self.brokers)
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

impl KafkaBroker {
    /// Connect to the bootstrap brokers and fetch the cluster metadata
    pub async fn connect(brokers: &[String], topic: &str) -> SinkResult<Self> {
        let brokers: Vec<String> = brokers
            .iter()
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .collect();
        if brokers.is_empty() {
            return Err(SinkError::Configuration(
                "at least one kafka broker is required".into(),
            ));
        }

        info!(brokers = %brokers.join(","), topic, "Connecting to kafka");
        let client = timeout(DIAL_TIMEOUT, ClientBuilder::new(brokers.clone()).build())
            .await
            .map_err(|_| {
                SinkError::Timeout(format!("connecting to kafka brokers {}", brokers.join(",")))
            })?
            .map_err(|e| {
                SinkError::Connectivity(format!(
                    "connecting to kafka brokers {}: {e}",
                    brokers.join(",")
                ))
            })?;

        Ok(Self {
            client,
            topic: topic.to_string(),
            brokers,
            partition_clients: Mutex::new(HashMap::new()),
        })
    }

    async fn partition_client(&self, partition: PartitionId) -> SinkResult<Arc<PartitionClient>> {
        let cached = self.partition_clients.lock().get(&partition).cloned();
        if let Some(client) = cached {
            return Ok(client);
        }

        let client = self
            .client
            .partition_client(self.topic.clone(), partition, UnknownTopicHandling::Error)
            .await
            .map_err(|e| {
                SinkError::Connectivity(format!(
                    "connecting to leader of {}/{partition}: {e}",
                    self.topic
                ))
            })?;
        let client = Arc::new(client);
        self.partition_clients
            .lock()
            .insert(partition, client.clone());
        Ok(client)
    }

    fn forget(&self, partition: PartitionId) {
        self.partition_clients.lock().remove(&partition);
    }
}

#[async_trait]
impl LogBroker for KafkaBroker {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn probe(&self) -> SinkResult<()> {
        // Protocol versions are negotiated when the leader connection opens
        let client = self.partition_client(0).await?;
        client.get_offset(OffsetAt::Latest).await.map_err(|e| {
            self.forget(0);
            SinkError::Connectivity(format!("querying leader of {}/0: {e}", self.topic))
        })?;
        debug!(topic = %self.topic, "Kafka leader for partition 0 reachable");
        Ok(())
    }

    async fn partitions(&self) -> SinkResult<Vec<PartitionId>> {
        let topics = self
            .client
            .list_topics()
            .await
            .map_err(|e| SinkError::Connectivity(format!("listing kafka topics: {e}")))?;

        topics
            .into_iter()
            .find(|t| t.name == self.topic)
            .map(|t| t.partitions.into_iter().collect())
            .ok_or_else(|| {
                SinkError::Connectivity(format!("topic {} not found on brokers", self.topic))
            })
    }

    async fn latest_message(&self, partition: PartitionId) -> SinkResult<Option<LogMessage>> {
        let client = self.partition_client(partition).await?;
        let read_error = |e: rskafka::client::error::Error| {
            self.forget(partition);
            SinkError::Connectivity(format!(
                "reading partition {}/{partition}: {e}",
                self.topic
            ))
        };

        let earliest = client.get_offset(OffsetAt::Earliest).await.map_err(read_error)?;
        let latest = client.get_offset(OffsetAt::Latest).await.map_err(read_error)?;
        if latest <= earliest {
            return Ok(None);
        }

        let offset = latest - 1;
        let (records, _high_watermark) = client
            .fetch_records(offset, 1..MAX_FETCH_BYTES, FETCH_MAX_WAIT_MS)
            .await
            .map_err(read_error)?;

        let record = records
            .into_iter()
            .find(|r| r.offset == offset)
            .ok_or_else(|| {
                SinkError::Connectivity(format!(
                    "no record at offset {offset} of {}/{partition}",
                    self.topic
                ))
            })?
            .record;

        let key = record.key.unwrap_or_default();
        Ok(Some(LogMessage {
            key: String::from_utf8_lossy(&key).into_owned(),
            value: Bytes::from(record.value.unwrap_or_default()),
        }))
    }

    async fn produce(&self, partition: PartitionId, batch: Vec<LogMessage>) -> SinkResult<()> {
        let client = self.partition_client(partition).await?;
        let now = Utc::now();
        let records = batch
            .into_iter()
            .map(|m| Record {
                key: Some(m.key.into_bytes()),
                value: Some(m.value.to_vec()),
                headers: BTreeMap::new(),
                timestamp: now,
            })
            .collect();

        client
            .produce(records, Compression::NoCompression)
            .await
            .map_err(|e| {
                self.forget(partition);
                SinkError::Persistence(format!(
                    "producing to {}/{partition}: {e}",
                    self.topic
                ))
            })?;
        Ok(())
    }
}
