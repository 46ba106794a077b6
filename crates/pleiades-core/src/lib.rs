//! pleiades-core - Core traits and types for the Pleiades ingest pipeline
//!
//! This crate provides the abstractions shared by the stream client, the sinks
//! and the coordinator: the [`Event`] passed between stages, the [`Sink`] trait,
//! the cooperative stop signal and the per-pipeline [`Metrics`].

pub mod error;
pub mod event;
pub mod metrics;
pub mod sink;
pub mod stop;

pub use error::{SinkError, SinkResult};
pub use event::Event;
pub use metrics::Metrics;
pub use sink::{ReadAndPublishError, Sink, SinkKind};
pub use stop::{stop_channel, StopHandle, StopSignal};
