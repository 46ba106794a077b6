//! Sink trait - the durable-write destination for events

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{SinkError, SinkResult};
use crate::event::Event;

/// Which sink variant is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkKind {
    /// One file per event in a directory
    File,
    /// Partitioned append log (Kafka topic)
    Log,
}

impl SinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::File => "file",
            SinkKind::Log => "kafka",
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A consumption cycle stopped on the first persistence failure
#[derive(Debug, Error)]
#[error("error processing event after {processed} events: {source}")]
pub struct ReadAndPublishError {
    /// Events taken from the channel in this cycle, including the failed one
    pub processed: u64,
    #[source]
    pub source: SinkError,
}

/// Durable destination for events.
///
/// Implementations persist events ([`Sink::process_event`]), recover the id of
/// the last persisted event after a restart ([`Sink::resume_id`]) and can probe
/// their destination before ingestion starts ([`Sink::validate_connection`]).
#[async_trait]
pub trait Sink: Send + Sync {
    /// Variant of this sink, used for logging and metric labels
    fn kind(&self) -> SinkKind;

    /// Persist one event and record its id as the last persisted id
    async fn process_event(&mut self, event: Event) -> SinkResult<()>;

    /// Id of the most recently persisted event, derived from the sink's own
    /// durable state. Returns an empty string when nothing can be determined.
    async fn resume_id(&self) -> String;

    /// Preflight reachability check
    async fn validate_connection(&self) -> SinkResult<()> {
        Ok(())
    }

    /// Id of the last event this instance persisted, if any
    fn last_persisted_id(&self) -> Option<&str>;

    /// Push out anything buffered. Called when the channel closes cleanly.
    async fn flush(&mut self) -> SinkResult<()> {
        Ok(())
    }

    /// Consume events until the channel is closed.
    ///
    /// Returns the number of events taken from the channel. Stops at the first
    /// event that fails to persist; that event is not retried.
    async fn read_and_publish(
        &mut self,
        events: &mut mpsc::Receiver<Event>,
    ) -> Result<u64, ReadAndPublishError> {
        debug!(sink = %self.kind(), "Sink starting to process events");
        let mut processed = 0u64;

        while let Some(event) = events.recv().await {
            processed += 1;
            if let Err(source) = self.process_event(event).await {
                return Err(ReadAndPublishError { processed, source });
            }
        }

        self.flush()
            .await
            .map_err(|source| ReadAndPublishError { processed, source })?;

        debug!(sink = %self.kind(), processed, "Sink channel closed");
        Ok(processed)
    }
}
