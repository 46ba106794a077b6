//! Resumable Server-Sent Events client
//!
//! Connects to an upstream `text/event-stream`, decodes it into
//! [`pleiades_core::Event`]s and hands them to a channel.
//!
//! # Example
//!
//! ```no_run
//! use pleiades_core::{stop_channel, Metrics};
//! use pleiades_sse::StreamClient;
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = StreamClient::new(Metrics::new()?)?;
//! let (tx, mut rx) = mpsc::channel::<pleiades_core::Event>(32);
//! let (stop, mut signal) = stop_channel();
//!
//! tokio::spawn(async move {
//!     while let Some(event) = rx.recv().await {
//!         println!("{} {}", event.id, event.data_lossy());
//!     }
//! });
//!
//! // Resume after the last event we persisted
//! let (last_id, result) = client
//!     .connect("https://stream.wikimedia.org/v2/stream/recentchange", "", &tx, &mut signal)
//!     .await;
//! println!("stopped at {last_id}: {result:?}");
//! # stop.stop();
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
pub mod parser;
pub mod testing;

pub use client::{StreamClient, StreamConfig, EVENT_STREAM, LAST_EVENT_ID};
pub use error::{StreamError, StreamResult, TimeoutPhase};
pub use parser::SseParser;
