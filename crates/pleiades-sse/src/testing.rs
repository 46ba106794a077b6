//! Test utilities for pleiades-sse
//!
//! Provides a scripted SSE server for exercising the stream client and the
//! pipeline against a real HTTP connection.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;

use crate::client::{EVENT_STREAM, LAST_EVENT_ID};

/// What the server sends on one connection
#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    /// HTTP status code
    pub status: u16,
    /// Lines to send, each followed by `\n`, one chunk per line
    pub lines: Vec<String>,
    /// Keep the connection open after the last line instead of closing it
    pub hold_open: bool,
    /// Wait this long before sending the response headers
    pub header_delay: Option<Duration>,
}

impl ScriptedResponse {
    /// A 200 response sending `lines` and then closing the stream
    pub fn lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            status: 200,
            lines: lines.into_iter().map(Into::into).collect(),
            hold_open: false,
            header_delay: None,
        }
    }

    /// An empty response with the given status
    pub fn status(status: u16) -> Self {
        Self {
            status,
            lines: Vec::new(),
            hold_open: false,
            header_delay: None,
        }
    }

    /// Keep the connection open after the scripted lines
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Delay the response headers
    pub fn with_header_delay(mut self, delay: Duration) -> Self {
        self.header_delay = Some(delay);
        self
    }
}

/// Headers of one request received by the test server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub last_event_id: Option<String>,
    pub accept: Option<String>,
}

struct ServerState {
    responses: Vec<ScriptedResponse>,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// An SSE server that automatically shuts down when dropped.
///
/// Connection `n` is answered with `responses[n]`; once the script runs out
/// the last response is repeated.
pub struct TestStreamServer {
    pub addr: SocketAddr,
    state: Arc<ServerState>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestStreamServer {
    /// Start a server answering `/stream` with the scripted responses
    pub async fn start(responses: Vec<ScriptedResponse>) -> std::io::Result<Self> {
        let state = Arc::new(ServerState {
            responses,
            requests: Mutex::new(Vec::new()),
        });

        let router = Router::new()
            .route("/stream", get(stream_handler))
            .with_state(state.clone());

        // Bind to any available port
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        // Spawn the server
        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Ok(Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// URI of the event stream
    pub fn uri(&self) -> String {
        format!("http://{}/stream", self.addr)
    }

    /// Requests received so far, in order
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().clone()
    }

    /// Number of connections accepted so far
    pub fn connection_count(&self) -> usize {
        self.state.requests.lock().len()
    }

    /// Shutdown the server, dropping held-open connections after a grace period
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(mut handle) = self.handle.take() {
            if tokio::time::timeout(Duration::from_secs(1), &mut handle)
                .await
                .is_err()
            {
                handle.abort();
            }
        }
    }
}

impl Drop for TestStreamServer {
    fn drop(&mut self) {
        // Send shutdown signal if not already done
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        // Abort the task if still running
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn stream_handler(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    };

    let script = {
        let mut requests = state.requests.lock();
        let index = requests.len().min(state.responses.len().saturating_sub(1));
        requests.push(RecordedRequest {
            last_event_id: header(LAST_EVENT_ID),
            accept: header(ACCEPT.as_str()),
        });
        state.responses.get(index).cloned()
    };

    let Some(script) = script else {
        return StatusCode::NOT_FOUND.into_response();
    };

    if let Some(delay) = script.header_delay {
        tokio::time::sleep(delay).await;
    }

    let status = StatusCode::from_u16(script.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let chunks: Vec<Result<Bytes, Infallible>> = script
        .lines
        .iter()
        .map(|line| Ok(Bytes::from(format!("{line}\n"))))
        .collect();

    let body = if script.hold_open {
        Body::from_stream(stream::iter(chunks).chain(stream::pending()))
    } else {
        Body::from_stream(stream::iter(chunks))
    };

    (status, [(CONTENT_TYPE, EVENT_STREAM)], body).into_response()
}

/// Wait for a condition with timeout
pub async fn wait_for<F>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;

    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    condition()
}
