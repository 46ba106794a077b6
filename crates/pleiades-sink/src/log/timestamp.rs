//! Timestamps embedded in upstream event ids
//!
//! Event ids of the upstream feed are JSON documents of per-partition
//! positions such as `[{"topic":"...","partition":0,"timestamp":1596207527001}]`.
//! The millisecond timestamp orders ids across log partitions.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use super::broker::LogMessage;

static TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""timestamp"\s*:\s*([0-9]+)"#).expect("Invalid timestamp regex")
});

/// Millisecond timestamp embedded in `id`, if any
pub fn timestamp_of(id: &str) -> Option<i64> {
    TIMESTAMP
        .captures(id)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Milliseconds between `now` and the timestamp embedded in `id`
pub fn lag_ms(id: &str, now: DateTime<Utc>) -> Option<i64> {
    timestamp_of(id).map(|ts| now.timestamp_millis() - ts)
}

/// Pick the key of the most recent message among the latest message of each
/// partition.
///
/// Keys with a parsable timestamp compete and the strictly greatest wins; keys
/// without one and ties are skipped with a warning. When no key carries a
/// timestamp a single candidate is still returned, several give `""`.
pub fn select_latest(candidates: &[LogMessage]) -> String {
    let mut best: Option<(i64, &str)> = None;

    for message in candidates {
        let Some(ts) = timestamp_of(&message.key) else {
            warn!(key = %message.key, "Unable to parse timestamp from message key");
            continue;
        };

        match best {
            Some((best_ts, _)) if ts == best_ts => {
                warn!(timestamp = ts, "Duplicate timestamp across partitions, keeping the first");
            }
            Some((best_ts, _)) if ts < best_ts => {}
            _ => best = Some((ts, message.key.as_str())),
        }
    }

    match best {
        Some((_, key)) => key.to_string(),
        None if candidates.len() == 1 => candidates[0].key.clone(),
        None => String::new(),
    }
}
