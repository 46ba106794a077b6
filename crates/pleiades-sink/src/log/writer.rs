//! Background batch writer for the log sink
//!
//! Messages are queued and sent in per-partition batches once `batch_size`
//! messages are pending or the linger interval elapses; a zero linger sends
//! every message as soon as it is queued. Produce failures are recorded and
//! handed back to the caller on its next publish or flush.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pleiades_core::{Metrics, SinkError, SinkKind, SinkResult};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, warn};

use super::broker::{LogBroker, LogMessage, PartitionId};
use super::partition::partition_for;

enum Command {
    Publish(LogMessage),
    Flush(oneshot::Sender<SinkResult<()>>),
}

/// Handle to the background writer task
pub(crate) struct BatchWriter {
    tx: mpsc::Sender<Command>,
    failure: Arc<Mutex<Option<SinkError>>>,
}

impl BatchWriter {
    pub(crate) fn spawn(
        broker: Arc<dyn LogBroker>,
        batch_size: usize,
        linger: Duration,
        metrics: Metrics,
    ) -> Self {
        let batch_size = batch_size.max(1);
        let (tx, rx) = mpsc::channel(batch_size * 2);
        let failure = Arc::new(Mutex::new(None));

        let task = WriterTask {
            broker,
            batch_size,
            linger,
            metrics,
            failure: failure.clone(),
            partitions: Vec::new(),
        };
        // Drains whatever is queued once the last sender is dropped
        tokio::spawn(task.run(rx));

        Self { tx, failure }
    }

    /// Queue a message, then return any failure recorded since the last call.
    ///
    /// The message is queued even when an earlier batch failed.
    pub(crate) async fn publish(&self, message: LogMessage) -> SinkResult<()> {
        self.tx
            .send(Command::Publish(message))
            .await
            .map_err(|_| SinkError::Persistence("kafka writer is no longer running".into()))?;
        self.take_failure()
    }

    /// Send everything pending and wait for the result
    pub(crate) async fn flush(&self) -> SinkResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Flush(reply_tx))
            .await
            .map_err(|_| SinkError::Persistence("kafka writer is no longer running".into()))?;
        reply_rx
            .await
            .map_err(|_| SinkError::Persistence("kafka writer stopped during flush".into()))?
    }

    fn take_failure(&self) -> SinkResult<()> {
        match self.failure.lock().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Next linger tick, never resolving without a ticker
async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

struct WriterTask {
    broker: Arc<dyn LogBroker>,
    batch_size: usize,
    linger: Duration,
    metrics: Metrics,
    failure: Arc<Mutex<Option<SinkError>>>,
    /// Cached partition list of the topic
    partitions: Vec<PartitionId>,
}

impl WriterTask {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        let mut pending: Vec<LogMessage> = Vec::with_capacity(self.batch_size);
        let mut ticker = (!self.linger.is_zero()).then(|| {
            let mut ticker = tokio::time::interval(self.linger);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Publish(message)) => {
                        pending.push(message);
                        if ticker.is_none() || pending.len() >= self.batch_size {
                            self.write(&mut pending).await;
                        }
                    }
                    Some(Command::Flush(reply)) => {
                        self.write(&mut pending).await;
                        let result = match self.failure.lock().take() {
                            Some(e) => Err(e),
                            None => Ok(()),
                        };
                        let _ = reply.send(result);
                    }
                    None => {
                        self.write(&mut pending).await;
                        debug!("Kafka writer stopped");
                        return;
                    }
                },
                _ = next_tick(&mut ticker) => {
                    if !pending.is_empty() {
                        self.write(&mut pending).await;
                    }
                }
            }
        }
    }

    async fn write(&mut self, pending: &mut Vec<LogMessage>) {
        if pending.is_empty() {
            return;
        }
        let batch = std::mem::take(pending);

        if self.partitions.is_empty() {
            match self.broker.partitions().await {
                Ok(partitions) if !partitions.is_empty() => self.partitions = partitions,
                Ok(_) => {
                    let e = SinkError::Persistence(format!(
                        "topic {} has no partitions",
                        self.broker.topic()
                    ));
                    self.fail(batch.len(), e);
                    return;
                }
                Err(e) => {
                    self.fail(batch.len(), e);
                    return;
                }
            }
        }

        let mut by_partition: BTreeMap<PartitionId, Vec<LogMessage>> = BTreeMap::new();
        for message in batch {
            let partition =
                partition_for(message.key.as_bytes(), &self.partitions).unwrap_or_default();
            by_partition.entry(partition).or_default().push(message);
        }

        for (partition, messages) in by_partition {
            let count = messages.len();
            match self.broker.produce(partition, messages).await {
                Ok(()) => {
                    self.metrics.log_writes.inc();
                    debug!(partition, count, "Wrote batch to kafka");
                }
                Err(e) => {
                    // Partition layout may have changed
                    self.partitions.clear();
                    self.fail(count, e);
                }
            }
        }
    }

    fn fail(&self, dropped: usize, e: SinkError) {
        error!(error = %e, dropped, "Failed to write messages to kafka");
        self.metrics
            .publish_errors
            .with_label_values(&[SinkKind::Log.as_str(), e.label()])
            .inc();

        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(e);
        } else {
            warn!("Earlier kafka write failure not yet reported, dropping this one");
        }
    }
}
