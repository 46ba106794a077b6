//! Resumable SSE client

use std::time::Duration;

use futures::StreamExt;
use pleiades_core::{Event, Metrics, StopSignal};
use reqwest::header::ACCEPT;
use reqwest::Client;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{StreamError, StreamResult, TimeoutPhase};
use crate::parser::SseParser;

/// Header carrying the resume checkpoint
pub const LAST_EVENT_ID: &str = "Last-Event-ID";

/// Media type requested from the upstream
pub const EVENT_STREAM: &str = "text/event-stream";

/// Deadlines for a streaming connection
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Maximum time until the response headers arrive
    pub connect_timeout: Duration,
    /// Maximum time between two body reads
    pub read_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(60),
            read_timeout: Duration::from_secs(60),
        }
    }
}

/// Client for a single upstream SSE stream.
///
/// The client remembers the last `id:` it saw across [`StreamClient::connect`]
/// calls, so one instance should be used per pipeline.
#[derive(Debug)]
pub struct StreamClient {
    http: Client,
    config: StreamConfig,
    metrics: Metrics,
    last_seen_id: String,
}

impl StreamClient {
    /// Create a client with default deadlines
    pub fn new(metrics: Metrics) -> StreamResult<Self> {
        Self::with_config(StreamConfig::default(), metrics)
    }

    /// Create a client with custom deadlines
    pub fn with_config(config: StreamConfig, metrics: Metrics) -> StreamResult<Self> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            http,
            config,
            metrics,
            last_seen_id: String::new(),
        })
    }

    /// Last event id seen on the wire by this client
    pub fn last_seen_id(&self) -> &str {
        &self.last_seen_id
    }

    /// Stream events from `uri` into `events_out` until EOF, error or stop.
    ///
    /// A non-empty `resume_id` is sent as `Last-Event-ID`. Returns the last id
    /// seen on the wire together with the outcome; EOF and stop are both
    /// `Ok(())`. This call blocks for the lifetime of the connection and is
    /// meant to run on its own task.
    pub async fn connect(
        &mut self,
        uri: &str,
        resume_id: &str,
        events_out: &mpsc::Sender<Event>,
        stop: &mut StopSignal,
    ) -> (String, StreamResult<()>) {
        let result = self.stream(uri, resume_id, events_out, stop).await;
        if let Err(e) = &result {
            self.metrics.recv_errors.with_label_values(&[e.label()]).inc();
        }
        (self.last_seen_id.clone(), result)
    }

    async fn stream(
        &mut self,
        uri: &str,
        resume_id: &str,
        events_out: &mpsc::Sender<Event>,
        stop: &mut StopSignal,
    ) -> StreamResult<()> {
        if events_out.is_closed() {
            return Err(StreamError::ChannelClosed);
        }

        let url = Url::parse(uri).map_err(|source| StreamError::InvalidUri {
            uri: uri.to_string(),
            source,
        })?;

        let mut request = self.http.get(url).header(ACCEPT, EVENT_STREAM);
        if resume_id.is_empty() {
            info!("Starting new subscription");
        } else {
            info!(resume_id, "Requesting subscription to resume");
            request = request.header(LAST_EVENT_ID, resume_id);
        }

        debug!("Connecting to SSE stream: {}", uri);
        let response = tokio::select! {
            biased;
            _ = stop.stopped() => {
                debug!("SSE consumer stopped before connecting");
                return Ok(());
            }
            sent = timeout(self.config.connect_timeout, request.send()) => match sent {
                Err(_) => return Err(StreamError::Timeout(TimeoutPhase::Connect)),
                Ok(response) => response?,
            },
        };

        // Check response status
        if !response.status().is_success() {
            let status = response.status().as_u16();
            warn!(uri, status, "Upstream responded with an error status");
            return Err(StreamError::UpstreamStatus {
                uri: uri.to_string(),
                status,
            });
        }

        // The body is released when `body` drops, on every return path below
        let mut body = response.bytes_stream();
        let mut parser = SseParser::new(uri).with_metrics(self.metrics.clone());

        loop {
            let next = tokio::select! {
                biased;
                _ = stop.stopped() => {
                    debug!("SSE consumer stopped");
                    return Ok(());
                }
                next = timeout(self.config.read_timeout, body.next()) => next,
            };

            let chunk = match next {
                Err(_) => {
                    warn!("Timeout reading from response body");
                    return Err(StreamError::Timeout(TimeoutPhase::Read));
                }
                Ok(None) => {
                    parser.finish();
                    self.remember_last_id(&parser);
                    self.metrics.recv_errors.with_label_values(&["eof"]).inc();
                    warn!("Encountered EOF while reading server response - consumer terminating");
                    return Ok(());
                }
                Ok(Some(Err(e))) => return Err(StreamError::Request(e)),
                Ok(Some(Ok(chunk))) => chunk,
            };

            let events = parser.feed(&chunk);
            self.remember_last_id(&parser);

            for event in events {
                tokio::select! {
                    biased;
                    _ = stop.stopped() => {
                        debug!("SSE consumer stopped while handing over an event");
                        return Ok(());
                    }
                    sent = events_out.send(event) => {
                        if sent.is_err() {
                            return Err(StreamError::ChannelClosed);
                        }
                    }
                }
            }
        }
    }

    fn remember_last_id(&mut self, parser: &SseParser) {
        if let Some(id) = parser.last_id() {
            if id != self.last_seen_id {
                self.last_seen_id = id.to_string();
            }
        }
    }
}
