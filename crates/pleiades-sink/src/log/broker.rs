//! Broker abstraction for the distributed log sink

use async_trait::async_trait;
use bytes::Bytes;
use pleiades_core::SinkResult;

/// Partition index within a topic
pub type PartitionId = i32;

/// One keyed record of the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    /// Event id
    pub key: String,
    /// Event payload
    pub value: Bytes,
}

impl LogMessage {
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Access to a single topic of a partitioned append log.
///
/// Implementations are shared between the sink and its background writer, so
/// every method takes `&self`.
#[async_trait]
pub trait LogBroker: Send + Sync {
    /// Topic this broker reads and writes
    fn topic(&self) -> &str;

    /// Reach the leader of partition 0 and negotiate the protocol
    async fn probe(&self) -> SinkResult<()>;

    /// Partitions of the topic, in ascending order
    async fn partitions(&self) -> SinkResult<Vec<PartitionId>>;

    /// Last message written to `partition`, `None` if the partition is empty
    async fn latest_message(&self, partition: PartitionId) -> SinkResult<Option<LogMessage>>;

    /// Append a batch to `partition` in one request
    async fn produce(&self, partition: PartitionId, batch: Vec<LogMessage>) -> SinkResult<()>;
}
