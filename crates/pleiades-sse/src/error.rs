//! Error types for the stream client

use std::fmt;

use thiserror::Error;

/// Result type for streaming operations
pub type StreamResult<T> = std::result::Result<T, StreamError>;

/// Which deadline was exceeded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    /// Waiting for the response headers
    Connect,
    /// Waiting for the next chunk of the body
    Read,
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutPhase::Connect => f.write_str("performing HTTP request"),
            TimeoutPhase::Read => f.write_str("reading from response body"),
        }
    }
}

/// Errors that can occur during streaming
#[derive(Debug, Error)]
pub enum StreamError {
    /// Nobody is receiving from the event channel
    #[error("Event channel is closed")]
    ChannelClosed,

    /// The stream URI could not be parsed
    #[error("Invalid stream URI {uri}: {source}")]
    InvalidUri {
        uri: String,
        #[source]
        source: url::ParseError,
    },

    /// Server answered with a non-2xx status
    #[error("non 2xx status code from request for {uri}: {status}")]
    UpstreamStatus { uri: String, status: u16 },

    /// A deadline was exceeded
    #[error("Timeout while {0}")]
    Timeout(TimeoutPhase),

    /// HTTP/connection error
    #[error("Error performing request: {0}")]
    Request(#[from] reqwest::Error),
}

impl StreamError {
    /// Short label used for the `type` dimension of error counters
    pub fn label(&self) -> &'static str {
        match self {
            StreamError::ChannelClosed => "channel_closed",
            StreamError::InvalidUri { .. } => "invalid_uri",
            StreamError::UpstreamStatus { .. } => "status",
            StreamError::Timeout(TimeoutPhase::Connect) => "request_timeout",
            StreamError::Timeout(TimeoutPhase::Read) => "body_read_timeout",
            StreamError::Request(_) => "read_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_contains_code() {
        let err = StreamError::UpstreamStatus {
            uri: "http://localhost/stream".into(),
            status: 404,
        };
        assert!(err.to_string().contains("404"));
        assert!(err.to_string().contains("non 2xx status code"));
    }

    #[test]
    fn test_timeout_messages() {
        assert_eq!(
            StreamError::Timeout(TimeoutPhase::Read).to_string(),
            "Timeout while reading from response body"
        );
        assert_eq!(
            StreamError::Timeout(TimeoutPhase::Connect).label(),
            "request_timeout"
        );
    }
}
