//! pleiades-ingest - Resumable SSE ingestion into a durable sink
//!
//! The [`Coordinator`] reads the resume checkpoint from the configured sink,
//! connects the stream client from there and keeps both running until it is
//! stopped.
//!
//! # Example
//!
//! ```ignore
//! use pleiades_ingest::{Coordinator, IngestOptions, DEFAULT_URI};
//!
//! let coordinator = Coordinator::new(IngestOptions::new(DEFAULT_URI, sink_config), metrics);
//! let stop = coordinator.stop_handle();
//! tokio::spawn(async move {
//!     let _ = tokio::signal::ctrl_c().await;
//!     stop.stop();
//! });
//! let last_id = coordinator.run().await?;
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod progress;

pub use config::{IngestOptions, DEFAULT_CHANNEL_CAPACITY, DEFAULT_URI};
pub use coordinator::{Coordinator, CoordinatorState, STREAM_COMPONENT};
pub use error::{CoordinatorError, CoordinatorResult};
