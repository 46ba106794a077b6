//! Sink configuration

use std::path::PathBuf;
use std::time::Duration;

use pleiades_core::{SinkError, SinkResult};

/// Default number of messages per produce request
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default time a partial batch waits before it is sent
pub const DEFAULT_LINGER: Duration = Duration::from_secs(1);

/// Which sink to build, with its settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkConfig {
    File(FileSinkConfig),
    Log(LogSinkConfig),
}

/// One-file-per-event sink settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSinkConfig {
    /// Directory receiving the event files
    pub destination: PathBuf,
}

/// Distributed log sink settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSinkConfig {
    /// Bootstrap brokers, `host:port`
    pub brokers: Vec<String>,
    pub topic: String,
    pub batch_size: usize,
    pub linger: Duration,
}

impl LogSinkConfig {
    pub fn new(brokers: Vec<String>, topic: impl Into<String>) -> Self {
        Self {
            brokers,
            topic: topic.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            linger: DEFAULT_LINGER,
        }
    }

    fn validate(&self) -> SinkResult<()> {
        if self.brokers.iter().all(|b| b.trim().is_empty()) {
            return Err(SinkError::Configuration(
                "at least one kafka broker is required".into(),
            ));
        }
        if self.topic.trim().is_empty() {
            return Err(SinkError::Configuration("kafka topic is empty".into()));
        }
        if self.batch_size == 0 {
            return Err(SinkError::Configuration(
                "batch size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl SinkConfig {
    /// Build the configuration from the two sink switches.
    ///
    /// Exactly one sink must be selected.
    pub fn from_selection(
        file: Option<FileSinkConfig>,
        log: Option<LogSinkConfig>,
    ) -> SinkResult<Self> {
        match (file, log) {
            (Some(file), None) => {
                if file.destination.as_os_str().is_empty() {
                    return Err(SinkError::Configuration(
                        "file publisher destination is empty".into(),
                    ));
                }
                Ok(SinkConfig::File(file))
            }
            (None, Some(log)) => {
                log.validate()?;
                Ok(SinkConfig::Log(log))
            }
            (Some(_), Some(_)) => Err(SinkError::Configuration(
                "only one of the file and kafka sinks can be enabled".into(),
            )),
            (None, None) => Err(SinkError::Configuration(
                "one of the file and kafka sinks must be enabled".into(),
            )),
        }
    }
}
