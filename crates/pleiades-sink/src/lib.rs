//! pleiades-sink - Durable destinations for ingested events
//!
//! Two [`Sink`] implementations:
//! - [`FileSink`] writes one file per event into a directory
//! - [`LogSink`] publishes to a partitioned log topic (Kafka)
//!
//! # Example
//!
//! ```ignore
//! use pleiades_sink::{create_sink, FileSinkConfig, SinkConfig};
//!
//! let config = SinkConfig::from_selection(
//!     Some(FileSinkConfig { destination: "./events".into() }),
//!     None,
//! )?;
//! let sink = create_sink(&config, metrics).await?;
//! let checkpoint = sink.resume_id().await;
//! ```

pub mod config;
pub mod file;
pub mod log;

pub use config::{FileSinkConfig, LogSinkConfig, SinkConfig};
pub use file::FileSink;
pub use log::{LogBroker, LogMessage, LogSink, MockBroker};

use pleiades_core::{Metrics, Sink, SinkResult};

/// Create the sink selected by the configuration
pub async fn create_sink(config: &SinkConfig, metrics: Metrics) -> SinkResult<Box<dyn Sink>> {
    match config {
        SinkConfig::File(cfg) => {
            let sink = FileSink::new(cfg, metrics).await?;
            Ok(Box::new(sink))
        }
        SinkConfig::Log(cfg) => {
            let sink = LogSink::connect(cfg, metrics).await?;
            Ok(Box::new(sink))
        }
    }
}
