//! Event - one decoded message from the upstream stream

use bytes::Bytes;

/// A single server-sent event, decoded from the wire.
///
/// Created by the stream client when a blank line terminates a record, moved
/// through the shared channel, and consumed by exactly one sink.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
    /// URI of the stream this event was read from
    pub source_uri: String,
    /// Value of the `event:` field (empty if the record had none)
    pub event_type: String,
    /// Value of the `id:` field, opaque to the pipeline
    pub id: String,
    /// Accumulated `data:` lines joined by `\n`
    pub data: Bytes,
}

impl Event {
    pub fn new(
        source_uri: impl Into<String>,
        event_type: impl Into<String>,
        id: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            source_uri: source_uri.into(),
            event_type: event_type.into(),
            id: id.into(),
            data: data.into(),
        }
    }

    /// Payload as UTF-8, replacing invalid sequences
    pub fn data_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}
