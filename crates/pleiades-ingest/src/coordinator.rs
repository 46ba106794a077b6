//! Coordinator - wires the stream client to a sink
//!
//! Lifecycle: the sink is created and validated, its checkpoint is read, then
//! two supervised tasks run until stop: the stream loop (re)connecting to the
//! upstream and the sink loop persisting what arrives on the shared channel.
//! Shutdown stops the stream loop first, closes the channel, then lets the
//! sink drain it.

use std::fmt;
use std::time::Duration;

use pleiades_core::{stop_channel, Event, Metrics, Sink, StopHandle, StopSignal};
use pleiades_sink::create_sink;
use pleiades_sse::{StreamClient, StreamError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::IngestOptions;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::progress;

/// Restart counter label of the stream loop
pub const STREAM_COMPONENT: &str = "stream_client";

/// Lifecycle of a [`Coordinator`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CoordinatorState::Idle => "idle",
            CoordinatorState::Starting => "starting",
            CoordinatorState::Running => "running",
            CoordinatorState::Stopping => "stopping",
            CoordinatorState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Runs one ingest pipeline
pub struct Coordinator {
    options: IngestOptions,
    metrics: Metrics,
    sink: Option<Box<dyn Sink>>,
    stop: StopHandle,
    signal: StopSignal,
    state: watch::Sender<CoordinatorState>,
}

impl Coordinator {
    pub fn new(options: IngestOptions, metrics: Metrics) -> Self {
        let (stop, signal) = stop_channel();
        let (state, _) = watch::channel(CoordinatorState::Idle);
        Self {
            options,
            metrics,
            sink: None,
            stop,
            signal,
            state,
        }
    }

    /// Use an already constructed sink instead of building one from the options
    pub fn with_sink(mut self, sink: Box<dyn Sink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Handle that stops the pipeline
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Observe lifecycle transitions
    pub fn state(&self) -> watch::Receiver<CoordinatorState> {
        self.state.subscribe()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    fn transition(&self, next: CoordinatorState) {
        debug!(state = %next, "Coordinator state change");
        self.state.send_replace(next);
    }

    /// Run the pipeline until the stop handle fires.
    ///
    /// Returns the last event id seen by the stream client, or the resume
    /// checkpoint if no event arrived. Setup failures abort the run.
    pub async fn run(mut self) -> CoordinatorResult<String> {
        self.transition(CoordinatorState::Starting);
        let started = self.start().await;
        let (sink, resume_id, client) = match started {
            Ok(parts) => parts,
            Err(e) => {
                error!(error = %e, "Ingest startup failed");
                self.transition(CoordinatorState::Stopped);
                return Err(e);
            }
        };

        let (events_tx, events_rx) = mpsc::channel(self.options.channel_capacity);

        self.transition(CoordinatorState::Running);
        info!(uri = %self.options.uri, sink = %sink.kind(), "Ingest running");

        let mut sink_task = tokio::spawn(sink_loop(
            sink,
            events_rx,
            self.signal.clone(),
            self.metrics.clone(),
        ));
        let mut stream_task = tokio::spawn(stream_loop(
            client,
            self.options.uri.clone(),
            resume_id,
            events_tx,
            self.signal.clone(),
            self.metrics.clone(),
            self.options.reconnect_delay,
        ));
        let progress_task = if self.options.progress {
            progress::spawn(self.metrics.clone(), self.signal.clone())
        } else {
            None
        };

        // Run until stopped, or until one of the loops gives up on its own
        let mut stream_done = None;
        let mut sink_done = None;
        tokio::select! {
            _ = self.signal.stopped() => {}
            joined = &mut stream_task => stream_done = Some(joined),
            joined = &mut sink_task => sink_done = Some(joined),
        }

        self.transition(CoordinatorState::Stopping);
        info!("Stopping ingest");
        self.stop.stop();

        let joined = match stream_done {
            Some(joined) => joined,
            None => stream_task.await,
        };
        let (last_id, events_tx) = match joined {
            Ok(parts) => parts,
            Err(e) => {
                self.transition(CoordinatorState::Stopped);
                return Err(CoordinatorError::task("stream client", e));
            }
        };
        debug!("Stream client task finished");

        join_progress(progress_task).await;

        // Closing the channel lets the sink drain what is buffered and return
        drop(events_tx);
        let joined = match sink_done {
            Some(joined) => joined,
            None => sink_task.await,
        };
        let processed = match joined {
            Ok(processed) => processed,
            Err(e) => {
                self.transition(CoordinatorState::Stopped);
                return Err(CoordinatorError::task("sink", e));
            }
        };
        debug!(processed, "Sink task finished");

        self.transition(CoordinatorState::Stopped);
        Ok(last_id)
    }

    async fn start(&mut self) -> CoordinatorResult<(Box<dyn Sink>, String, StreamClient)> {
        self.options.validate()?;

        let sink = match self.sink.take() {
            Some(sink) => sink,
            None => create_sink(&self.options.sink, self.metrics.clone()).await?,
        };
        sink.validate_connection().await?;

        let resume_id = if self.options.resume {
            let id = sink.resume_id().await;
            if id.is_empty() {
                info!("No resume checkpoint found, starting from the live edge");
            } else {
                info!(resume_id = %id, "Resuming from checkpoint");
            }
            id
        } else {
            info!("Resume disabled");
            String::new()
        };

        let client = StreamClient::with_config(self.options.stream.clone(), self.metrics.clone())?;
        Ok((sink, resume_id, client))
    }
}

/// Wait for the progress indicator, logging instead of propagating a failure
async fn join_progress(task: Option<JoinHandle<()>>) {
    if let Some(task) = task {
        if let Err(e) = task.await {
            warn!(error = %e, "Progress indicator task failed");
        }
    }
}

/// Persist events until the channel is closed or a failure happens after stop.
///
/// Returns the number of events taken from the channel.
async fn sink_loop(
    mut sink: Box<dyn Sink>,
    mut events: mpsc::Receiver<Event>,
    stop: StopSignal,
    metrics: Metrics,
) -> u64 {
    let component = sink.kind().as_str();
    let mut total = 0u64;

    loop {
        let closed = match sink.read_and_publish(&mut events).await {
            Ok(processed) => {
                total += processed;
                info!(sink = component, processed, "Sink channel closed");
                true
            }
            Err(e) => {
                total += e.processed;
                error!(
                    sink = component,
                    processed = e.processed,
                    error = %e.source,
                    "Error publishing events"
                );
                false
            }
        };
        metrics.restarts.with_label_values(&[component]).inc();

        if closed || stop.is_stopped() {
            break;
        }
        debug!(sink = component, "Restarting sink");
    }

    total
}

/// Keep the stream client connected until stop fires.
///
/// Returns the last id seen together with the channel sender, so the caller
/// decides when the channel closes.
async fn stream_loop(
    mut client: StreamClient,
    uri: String,
    mut resume_id: String,
    events: mpsc::Sender<Event>,
    mut stop: StopSignal,
    metrics: Metrics,
    reconnect_delay: Duration,
) -> (String, mpsc::Sender<Event>) {
    loop {
        if stop.is_stopped() {
            break;
        }

        let (last_seen, result) = client.connect(&uri, &resume_id, &events, &mut stop).await;
        if !last_seen.is_empty() {
            resume_id = last_seen;
        }
        metrics.restarts.with_label_values(&[STREAM_COMPONENT]).inc();

        match result {
            Ok(()) => debug!("Stream client returned"),
            Err(StreamError::ChannelClosed) => {
                error!("Event channel closed, nobody is consuming events");
                break;
            }
            Err(e) => warn!(error = %e, "Stream client failed"),
        }

        if stop.is_stopped() {
            break;
        }

        if !reconnect_delay.is_zero() {
            tokio::select! {
                biased;
                _ = stop.stopped() => break,
                _ = tokio::time::sleep(reconnect_delay) => {}
            }
        }
        info!(resume_id = %resume_id, "Reconnecting to stream");
    }

    (resume_id, events)
}
