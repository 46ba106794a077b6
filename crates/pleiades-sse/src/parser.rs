//! SSE (Server-Sent Events) parser
//!
//! Turns the `text/event-stream` wire format into [`Event`]s. Input may arrive
//! in arbitrary chunks; incomplete lines are buffered until their newline shows
//! up.

use bytes::{Bytes, BytesMut};
use pleiades_core::{Event, Metrics};
use tracing::{trace, warn};

/// The closed set of fields the pipeline understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Id,
    Event,
    Data,
}

impl Field {
    fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"id" => Some(Field::Id),
            b"event" => Some(Field::Event),
            b"data" => Some(Field::Data),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Field::Id => "id",
            Field::Event => "event",
            Field::Data => "data",
        }
    }
}

/// Classification of one wire line (without its line terminator)
#[derive(Debug, PartialEq, Eq)]
pub enum Line<'a> {
    /// Record terminator
    Blank,
    /// Starts with `:`
    Comment,
    /// `field: value`, value trimmed of surrounding whitespace
    Field(Field, &'a [u8]),
    /// Anything else
    Unrecognized(&'a [u8]),
}

impl<'a> Line<'a> {
    pub fn classify(line: &'a [u8]) -> Self {
        if line.is_empty() {
            return Line::Blank;
        }
        if line[0] == b':' {
            return Line::Comment;
        }

        // A field with no colon has an empty value
        let (name, value) = match line.iter().position(|&b| b == b':') {
            Some(pos) => (&line[..pos], &line[pos + 1..]),
            None => (line, &line[line.len()..]),
        };

        match Field::from_name(name) {
            Some(field) => Line::Field(field, value.trim_ascii()),
            None => Line::Unrecognized(line),
        }
    }
}

/// Record under construction
#[derive(Debug, Default)]
struct PendingEvent {
    id: String,
    event_type: String,
    data: BytesMut,
}

impl PendingEvent {
    fn is_empty(&self) -> bool {
        self.id.is_empty() && self.event_type.is_empty() && self.data.is_empty()
    }
}

/// SSE parser state
#[derive(Debug)]
pub struct SseParser {
    /// Stream URI stamped onto every event
    source_uri: String,
    /// Buffer for incomplete lines
    buffer: Vec<u8>,
    /// Current event being accumulated
    current: PendingEvent,
    /// Most recent `id:` value, whether or not its record was emitted
    last_id: Option<String>,
    metrics: Option<Metrics>,
}

impl SseParser {
    /// Create a new SSE parser
    pub fn new(source_uri: impl Into<String>) -> Self {
        Self {
            source_uri: source_uri.into(),
            buffer: Vec::new(),
            current: PendingEvent::default(),
            last_id: None,
            metrics: None,
        }
    }

    /// Count lines by type into the given metrics
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Most recent id seen on the wire
    pub fn last_id(&self) -> Option<&str> {
        self.last_id.as_deref()
    }

    /// Feed bytes into the parser and extract any complete events
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Event> {
        let mut events = Vec::new();

        // Append new bytes to buffer
        self.buffer.extend_from_slice(bytes);

        // Process complete lines
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let line = self.buffer[start..end].to_vec();
            start = end + 1;

            // Handle \r\n line endings
            let line = line.strip_suffix(b"\r").unwrap_or(&line);

            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }
        self.buffer.drain(..start);

        events
    }

    /// Process whatever is left in the buffer as a final, unterminated line.
    ///
    /// Used when the stream ends. The pending record is not emitted since no
    /// blank line terminated it.
    pub fn finish(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let line = std::mem::take(&mut self.buffer);
        let line = line.strip_suffix(b"\r").unwrap_or(&line);
        let _ = self.process_line(line);
    }

    /// Process a single line of SSE data
    fn process_line(&mut self, line: &[u8]) -> Option<Event> {
        match Line::classify(line) {
            Line::Blank => self.dispatch_event(),
            Line::Comment => {
                trace!("SSE keepalive/comment");
                self.count_line("comment");
                None
            }
            Line::Field(field, value) => {
                self.count_line(field.label());
                self.apply(field, value);
                None
            }
            Line::Unrecognized(raw) => {
                self.count_line("unknown");
                warn!(
                    line = %String::from_utf8_lossy(raw),
                    "Encountered non-SSE-compliant line in server response"
                );
                None
            }
        }
    }

    fn apply(&mut self, field: Field, value: &[u8]) {
        match field {
            Field::Id => {
                let id = String::from_utf8_lossy(value).into_owned();
                self.last_id = Some(id.clone());
                self.current.id = id;
            }
            Field::Event => {
                self.current.event_type = String::from_utf8_lossy(value).into_owned();
            }
            Field::Data => {
                // Multiple data lines are joined with newlines
                if !self.current.data.is_empty() {
                    self.current.data.extend_from_slice(b"\n");
                }
                self.current.data.extend_from_slice(value);
            }
        }
    }

    /// Dispatch the accumulated event
    fn dispatch_event(&mut self) -> Option<Event> {
        if self.current.is_empty() {
            return None;
        }

        let pending = std::mem::take(&mut self.current);
        if let Some(metrics) = &self.metrics {
            metrics.events_received.inc();
        }

        Some(Event {
            source_uri: self.source_uri.clone(),
            event_type: pending.event_type,
            id: pending.id,
            data: Bytes::from(pending.data),
        })
    }

    fn count_line(&self, kind: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.lines_received.with_label_values(&[kind]).inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    const URI: &str = "http://localhost/stream";

    #[test]
    fn test_parse_simple_event() {
        let mut parser = SseParser::new(URI);

        let input = b"id: E1\nevent: message\ndata: {\"a\":1}\n\n";
        let events = parser.feed(input);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "E1");
        assert_eq!(events[0].event_type, "message");
        assert_eq!(&events[0].data[..], b"{\"a\":1}");
        assert_eq!(events[0].source_uri, URI);
        assert_eq!(parser.last_id(), Some("E1"));
    }

    #[test]
    fn test_multiline_data_joined_with_newline() {
        let mut parser = SseParser::new(URI);

        let input = b"data:  first \ndata:second\ndata: third  \n\n";
        let events = parser.feed(input);

        assert_eq!(events.len(), 1);
        assert_eq!(&events[0].data[..], b"first\nsecond\nthird");
    }

    #[test]
    fn test_parse_chunked_data() {
        let mut parser = SseParser::new(URI);

        // First chunk - incomplete
        let events1 = parser.feed(b"id: 7\ndata: {\"ts\":1,\"seq\":");
        assert_eq!(events1.len(), 0);

        // Second chunk - completes the event
        let events2 = parser.feed(b"1}\n\n");
        assert_eq!(events2.len(), 1);
        assert_eq!(&events2[0].data[..], b"{\"ts\":1,\"seq\":1}");
    }

    #[test]
    fn test_crlf_line_endings() {
        let mut parser = SseParser::new(URI);

        let events = parser.feed(b"id: 1\r\nevent: message\r\ndata: x\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "1");
        assert_eq!(events[0].event_type, "message");
        assert_eq!(&events[0].data[..], b"x");
    }

    #[test]
    fn test_empty_record_not_emitted_but_id_tracked() {
        let mut parser = SseParser::new(URI);

        assert!(parser.feed(b"\n\n: keepalive\n\n").is_empty());

        // An id-only record is still a record
        let events = parser.feed(b"id: only-id\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(parser.last_id(), Some("only-id"));
    }

    #[test]
    fn test_id_updates_last_id_even_if_record_is_unfinished() {
        let mut parser = SseParser::new(URI);

        assert!(parser.feed(b"id: dangling").is_empty());
        parser.finish();
        assert_eq!(parser.last_id(), Some("dangling"));
    }

    #[test]
    fn test_ignore_comments_and_unknown_fields() {
        let metrics = Metrics::new().unwrap();
        let mut parser = SseParser::new(URI).with_metrics(metrics.clone());

        let input = b":ok\nretry: 1000\nnot sse at all\ndata: payload\n\n";
        let events = parser.feed(input);

        assert_eq!(events.len(), 1);
        assert_eq!(&events[0].data[..], b"payload");
        assert_eq!(events[0].id, "");
        assert_eq!(metrics.lines_received.with_label_values(&["comment"]).get(), 1);
        assert_eq!(metrics.lines_received.with_label_values(&["unknown"]).get(), 2);
        assert_eq!(metrics.lines_received.with_label_values(&["data"]).get(), 1);
        assert_eq!(metrics.events_received.get(), 1);
    }

    #[test]
    fn test_records_are_independent() {
        let mut parser = SseParser::new(URI);

        let events = parser.feed(b"id: 1\nevent: a\ndata: one\n\ndata: two\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].id, "");
        assert_eq!(events[1].event_type, "");
        assert_eq!(&events[1].data[..], b"two");
        assert_eq!(parser.last_id(), Some("1"));
    }

    #[rstest]
    #[case(b"" as &[u8], Line::Blank)]
    #[case(b":comment", Line::Comment)]
    #[case(b": ", Line::Comment)]
    #[case(b"id: abc", Line::Field(Field::Id, b"abc"))]
    #[case(b"id:abc", Line::Field(Field::Id, b"abc"))]
    #[case(b"event:  message  ", Line::Field(Field::Event, b"message"))]
    #[case(b"data", Line::Field(Field::Data, b""))]
    #[case(b"data: a: b", Line::Field(Field::Data, b"a: b"))]
    #[case(b"retry: 10", Line::Unrecognized(b"retry: 10"))]
    #[case(b"garbage", Line::Unrecognized(b"garbage"))]
    fn test_classify(#[case] input: &[u8], #[case] expected: Line<'static>) {
        assert_eq!(Line::classify(input), expected);
    }
}
