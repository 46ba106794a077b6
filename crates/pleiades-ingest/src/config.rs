//! Coordinator options

use std::time::Duration;

use pleiades_sink::SinkConfig;
use pleiades_sse::StreamConfig;

use crate::error::{CoordinatorError, CoordinatorResult};

/// Public recent-changes feed
pub const DEFAULT_URI: &str = "https://stream.wikimedia.org/v2/stream/recentchange";

/// Events buffered between the stream client and the sink
pub const DEFAULT_CHANNEL_CAPACITY: usize = 32;

/// Everything the coordinator needs to run one pipeline
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Upstream event stream
    pub uri: String,
    /// Ask the sink for a checkpoint before connecting
    pub resume: bool,
    pub sink: SinkConfig,
    pub channel_capacity: usize,
    /// Pause between two stream connections
    pub reconnect_delay: Duration,
    pub stream: StreamConfig,
    /// Show a spinner when stdout is a terminal
    pub progress: bool,
}

impl IngestOptions {
    pub fn new(uri: impl Into<String>, sink: SinkConfig) -> Self {
        Self {
            uri: uri.into(),
            resume: true,
            sink,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            reconnect_delay: Duration::ZERO,
            stream: StreamConfig::default(),
            progress: false,
        }
    }

    pub fn validate(&self) -> CoordinatorResult<()> {
        if self.uri.trim().is_empty() {
            return Err(CoordinatorError::Configuration("stream uri is empty".into()));
        }
        if self.channel_capacity == 0 {
            return Err(CoordinatorError::Configuration(
                "channel capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
