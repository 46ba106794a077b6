//! Common error types for sinks

use std::path::PathBuf;

use thiserror::Error;

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// Errors that can occur in sinks
#[derive(Debug, Error)]
pub enum SinkError {
    /// Sink is misconfigured (fatal at startup)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Destination path exists and is not a directory
    #[error("Destination path {} exists as file", .0.display())]
    DestinationIsFile(PathBuf),

    /// Broker or endpoint unreachable
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Writing an event failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Timeout waiting for the destination
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SinkError {
    /// Short label used for the `type` dimension of error counters
    pub fn label(&self) -> &'static str {
        match self {
            SinkError::Configuration(_) => "configuration",
            SinkError::DestinationIsFile(_) => "configuration",
            SinkError::Connectivity(_) => "connectivity",
            SinkError::Persistence(_) => "write",
            SinkError::Timeout(_) => "timeout",
            SinkError::Io(_) => "io",
        }
    }

    /// Whether this error should abort startup rather than trigger a restart
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SinkError::Configuration(_) | SinkError::DestinationIsFile(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_is_file_message() {
        let err = SinkError::DestinationIsFile(PathBuf::from("/tmp/events"));
        assert_eq!(err.to_string(), "Destination path /tmp/events exists as file");
        assert!(err.is_configuration());
    }

    #[test]
    fn test_labels() {
        assert_eq!(SinkError::Persistence("x".into()).label(), "write");
        assert_eq!(SinkError::Timeout("x".into()).label(), "timeout");
        assert!(!SinkError::Connectivity("x".into()).is_configuration());
    }
}
