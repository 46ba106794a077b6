//! Prometheus metrics for one pipeline instance
//!
//! Every [`Metrics`] value owns its own [`Registry`], so independent pipelines
//! (and tests) never share counters.

use prometheus::{Encoder, Gauge, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

const NAMESPACE: &str = "pleiades";

/// Counters and gauges exported by the ingest pipeline
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    /// Restarts of supervised tasks, by component
    pub restarts: IntCounterVec,
    /// Events emitted by the stream client
    pub events_received: IntCounter,
    /// Wire lines read, by line type (id, event, data, comment, unknown)
    pub lines_received: IntCounterVec,
    /// Stream client failures, by type
    pub recv_errors: IntCounterVec,
    /// Events handed to a sink, by sink kind
    pub events_published: IntCounterVec,
    /// Sink failures, by sink kind and error type
    pub publish_errors: IntCounterVec,
    /// Batched produce requests sent to the log
    pub log_writes: IntCounter,
    /// Milliseconds between now and the timestamp embedded in the last published id
    pub publish_lag_ms: Gauge,
}

impl Metrics {
    /// Create a metrics set with all metrics registered
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let restarts = IntCounterVec::new(
            Opts::new(
                "task_restarts_total",
                "Total numbers of restarts of pipeline tasks",
            )
            .namespace(NAMESPACE),
            &["component"],
        )?;
        let events_received = IntCounter::with_opts(
            Opts::new("recv_events_total", "The total number of events received")
                .namespace(NAMESPACE),
        )?;
        let lines_received = IntCounterVec::new(
            Opts::new(
                "recv_event_lines_total",
                "Total numbers of lines read from server",
            )
            .namespace(NAMESPACE),
            &["type"],
        )?;
        let recv_errors = IntCounterVec::new(
            Opts::new(
                "recv_errors_total",
                "Total numbers of errors encountered during events receive",
            )
            .namespace(NAMESPACE),
            &["type"],
        )?;
        let events_published = IntCounterVec::new(
            Opts::new(
                "publish_events_total",
                "The total number of events handed to the sink",
            )
            .namespace(NAMESPACE),
            &["sink"],
        )?;
        let publish_errors = IntCounterVec::new(
            Opts::new(
                "publish_errors_total",
                "Total numbers of errors encountered while publishing",
            )
            .namespace(NAMESPACE),
            &["sink", "type"],
        )?;
        let log_writes = IntCounter::with_opts(
            Opts::new(
                "kafka_publish_writes_total",
                "The total number of writes performed to kafka",
            )
            .namespace(NAMESPACE),
        )?;
        let publish_lag_ms = Gauge::with_opts(
            Opts::new(
                "kafka_publish_lag_milliseconds",
                "Time delay between publish time and timestamp of latest event",
            )
            .namespace(NAMESPACE),
        )?;

        registry.register(Box::new(restarts.clone()))?;
        registry.register(Box::new(events_received.clone()))?;
        registry.register(Box::new(lines_received.clone()))?;
        registry.register(Box::new(recv_errors.clone()))?;
        registry.register(Box::new(events_published.clone()))?;
        registry.register(Box::new(publish_errors.clone()))?;
        registry.register(Box::new(log_writes.clone()))?;
        registry.register(Box::new(publish_lag_ms.clone()))?;

        Ok(Self {
            registry,
            restarts,
            events_received,
            lines_received,
            recv_errors,
            events_published,
            publish_errors,
            log_writes,
            publish_lag_ms,
        })
    }

    /// Registry holding every metric of this instance
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Current restart count for a component
    pub fn restart_count(&self, component: &str) -> u64 {
        self.restarts.with_label_values(&[component]).get()
    }

    /// Render all metrics in the Prometheus text exposition format
    pub fn encode_text(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("events_received", &self.events_received.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instances_are_independent() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.restarts.with_label_values(&["stream_client"]).inc();
        assert_eq!(a.restart_count("stream_client"), 1);
        assert_eq!(b.restart_count("stream_client"), 0);
    }

    #[test]
    fn test_encode_text() {
        let metrics = Metrics::new().unwrap();
        metrics.events_received.inc_by(3);
        metrics.restarts.with_label_values(&["file"]).inc();
        let text = metrics.encode_text().unwrap();
        assert!(text.contains("pleiades_recv_events_total 3"));
        assert!(text.contains("pleiades_task_restarts_total{component=\"file\"} 1"));
    }
}
