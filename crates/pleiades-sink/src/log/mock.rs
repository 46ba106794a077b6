//! In-memory broker for testing

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use pleiades_core::{SinkError, SinkResult};

use super::broker::{LogBroker, LogMessage, PartitionId};

/// Mock broker keeping every partition in memory
pub struct MockBroker {
    topic: String,
    partitions: RwLock<BTreeMap<PartitionId, Vec<LogMessage>>>,
    /// Partitions whose reads fail
    failing: RwLock<HashSet<PartitionId>>,
    /// Partitions whose reads never complete
    stalled: RwLock<HashSet<PartitionId>>,
    reachable: AtomicBool,
    fail_produce: AtomicBool,
    produce_calls: AtomicUsize,
}

impl MockBroker {
    pub fn new(topic: impl Into<String>, partition_count: PartitionId) -> Self {
        let partitions = (0..partition_count).map(|p| (p, Vec::new())).collect();
        Self {
            topic: topic.into(),
            partitions: RwLock::new(partitions),
            failing: RwLock::new(HashSet::new()),
            stalled: RwLock::new(HashSet::new()),
            reachable: AtomicBool::new(true),
            fail_produce: AtomicBool::new(false),
            produce_calls: AtomicUsize::new(0),
        }
    }

    /// Append a message directly (simulates an earlier run)
    pub fn append(&self, partition: PartitionId, message: LogMessage) {
        self.partitions
            .write()
            .entry(partition)
            .or_default()
            .push(message);
    }

    /// Messages stored in one partition
    pub fn messages(&self, partition: PartitionId) -> Vec<LogMessage> {
        self.partitions
            .read()
            .get(&partition)
            .cloned()
            .unwrap_or_default()
    }

    /// Messages of every partition, in partition order
    pub fn all_messages(&self) -> Vec<LogMessage> {
        self.partitions.read().values().flatten().cloned().collect()
    }

    /// Make reads of `partition` fail
    pub fn fail_partition(&self, partition: PartitionId) {
        self.failing.write().insert(partition);
    }

    /// Make reads of `partition` hang
    pub fn stall_partition(&self, partition: PartitionId) {
        self.stalled.write().insert(partition);
    }

    /// Simulate the brokers going away or coming back
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Make produce requests fail
    pub fn set_fail_produce(&self, fail: bool) {
        self.fail_produce.store(fail, Ordering::SeqCst);
    }

    /// Number of successful produce requests
    pub fn produce_calls(&self) -> usize {
        self.produce_calls.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> SinkResult<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SinkError::Connectivity("mock broker unreachable".into()))
        }
    }
}

#[async_trait]
impl LogBroker for MockBroker {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn probe(&self) -> SinkResult<()> {
        self.check_reachable()?;
        if self.partitions.read().contains_key(&0) {
            Ok(())
        } else {
            Err(SinkError::Connectivity(format!(
                "no leader for partition 0 of {}",
                self.topic
            )))
        }
    }

    async fn partitions(&self) -> SinkResult<Vec<PartitionId>> {
        self.check_reachable()?;
        Ok(self.partitions.read().keys().copied().collect())
    }

    async fn latest_message(&self, partition: PartitionId) -> SinkResult<Option<LogMessage>> {
        self.check_reachable()?;
        let stalled = self.stalled.read().contains(&partition);
        if stalled {
            std::future::pending::<()>().await;
        }
        if self.failing.read().contains(&partition) {
            return Err(SinkError::Connectivity(format!(
                "reading last offset of partition {partition}"
            )));
        }
        Ok(self
            .partitions
            .read()
            .get(&partition)
            .and_then(|messages| messages.last().cloned()))
    }

    async fn produce(&self, partition: PartitionId, batch: Vec<LogMessage>) -> SinkResult<()> {
        self.check_reachable()?;
        if self.fail_produce.load(Ordering::SeqCst) {
            return Err(SinkError::Persistence(format!(
                "produce to partition {partition} rejected"
            )));
        }

        let mut partitions = self.partitions.write();
        let Some(messages) = partitions.get_mut(&partition) else {
            return Err(SinkError::Persistence(format!(
                "unknown partition {partition}"
            )));
        };
        messages.extend(batch);
        self.produce_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
