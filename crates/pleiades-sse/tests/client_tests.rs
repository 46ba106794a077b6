//! Integration tests for the stream client
//!
//! These tests run the client against a scripted SSE server over a real
//! HTTP connection.

use std::time::Duration;

use pleiades_core::{stop_channel, Event, Metrics};
use pleiades_sse::testing::{ScriptedResponse, TestStreamServer};
use pleiades_sse::{StreamClient, StreamConfig, StreamError, TimeoutPhase, EVENT_STREAM};
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;

const WMF_ID: &str = r#"[{"topic":"eqiad.mediawiki.recentchange","partition":0,"timestamp":1596207527001},{"topic":"codfw.mediawiki.recentchange","partition":0,"offset":-1}]"#;

fn wmf_lines() -> Vec<String> {
    vec![
        ":ok".to_string(),
        "event: message".to_string(),
        format!("id: {WMF_ID}"),
        r#"data: {"$schema":"/mediawiki/recentchange/1.0.0","type":"edit","wiki":"hewiki"}"#
            .to_string(),
        String::new(),
        "event: message".to_string(),
        format!("id: {WMF_ID}"),
        r#"data: {"$schema":"/mediawiki/recentchange/1.0.0","#.to_string(),
        r#"data: "type":"edit","wiki":"hewiki"}"#.to_string(),
        String::new(),
        String::new(),
    ]
}

fn client_with(config: StreamConfig) -> (StreamClient, Metrics) {
    let metrics = Metrics::new().unwrap();
    let client = StreamClient::with_config(config, metrics.clone()).unwrap();
    (client, metrics)
}

/// Collect everything the client sends until the sender side goes away
fn collector(capacity: usize) -> (mpsc::Sender<Event>, tokio::task::JoinHandle<Vec<Event>>) {
    let (tx, mut rx) = mpsc::channel(capacity);
    let handle = tokio::spawn(async move {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    });
    (tx, handle)
}

#[tokio::test]
async fn test_single_event_then_eof() {
    let server = TestStreamServer::start(vec![ScriptedResponse::lines([
        "id: E1",
        "event: message",
        r#"data: {"a":1}"#,
        "",
    ])])
    .await
    .unwrap();

    let (mut client, metrics) = client_with(StreamConfig::default());
    let (tx, events) = collector(8);
    let (_stop, mut signal) = stop_channel();

    let (last_id, result) = client.connect(&server.uri(), "", &tx, &mut signal).await;
    drop(tx);
    let events = events.await.unwrap();

    assert!(result.is_ok(), "unexpected error: {result:?}");
    assert_eq!(last_id, "E1");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, "E1");
    assert_eq!(events[0].event_type, "message");
    assert_eq!(&events[0].data[..], br#"{"a":1}"#);
    assert_eq!(events[0].source_uri, server.uri());
    assert_eq!(metrics.events_received.get(), 1);
}

#[tokio::test]
async fn test_reads_and_processes_events() {
    let server = TestStreamServer::start(vec![ScriptedResponse::lines(wmf_lines())])
        .await
        .unwrap();

    let (mut client, _) = client_with(StreamConfig::default());
    let (tx, events) = collector(8);
    let (_stop, mut signal) = stop_channel();

    let (last_id, result) = client.connect(&server.uri(), "", &tx, &mut signal).await;
    drop(tx);
    let events = events.await.unwrap();

    assert!(result.is_ok());
    assert_eq!(last_id, WMF_ID);
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.event_type == "message"));
    assert!(events.iter().all(|e| e.id == WMF_ID));
    assert_eq!(
        events[1].data_lossy(),
        "{\"$schema\":\"/mediawiki/recentchange/1.0.0\",\n\"type\":\"edit\",\"wiki\":\"hewiki\"}"
    );

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].last_event_id, None);
    assert_eq!(requests[0].accept.as_deref(), Some(EVENT_STREAM));
}

#[tokio::test]
async fn test_resumes_when_requested() {
    let server = TestStreamServer::start(vec![ScriptedResponse::lines(wmf_lines())])
        .await
        .unwrap();

    let (mut client, _) = client_with(StreamConfig::default());
    let (tx, events) = collector(8);
    let (_stop, mut signal) = stop_channel();

    let (_, result) = client
        .connect(&server.uri(), "some-event-id", &tx, &mut signal)
        .await;
    drop(tx);
    assert!(result.is_ok());
    assert_eq!(events.await.unwrap().len(), 2);

    let requests = server.requests();
    assert_eq!(requests[0].last_event_id.as_deref(), Some("some-event-id"));
}

#[tokio::test]
async fn test_non_2xx_status_emits_nothing() {
    let server = TestStreamServer::start(vec![ScriptedResponse::status(404)])
        .await
        .unwrap();

    let (mut client, metrics) = client_with(StreamConfig::default());
    let (tx, events) = collector(8);
    let (_stop, mut signal) = stop_channel();

    let (last_id, result) = client.connect(&server.uri(), "", &tx, &mut signal).await;
    drop(tx);

    let err = result.unwrap_err();
    assert!(matches!(err, StreamError::UpstreamStatus { status: 404, .. }));
    assert!(err.to_string().contains("404"));
    assert_eq!(last_id, "");
    assert!(events.await.unwrap().is_empty());
    assert_eq!(metrics.recv_errors.with_label_values(&["status"]).get(), 1);
}

#[tokio::test]
async fn test_stop_while_read_is_pending() {
    let server = TestStreamServer::start(vec![ScriptedResponse::lines([
        "id: E1",
        "data: first",
        "",
    ])
    .hold_open()])
    .await
    .unwrap();

    let (mut client, _) = client_with(StreamConfig::default());
    let (tx, events) = collector(8);
    let (stop, mut signal) = stop_channel();

    let uri = server.uri();
    let connect = tokio::spawn(async move {
        let outcome = client.connect(&uri, "", &tx, &mut signal).await;
        drop(tx);
        outcome
    });

    // Let the first event through, then stop while the read is pending
    tokio::time::sleep(Duration::from_millis(200)).await;
    stop.stop();

    let (last_id, result) = tokio::time::timeout(Duration::from_secs(5), connect)
        .await
        .expect("connect did not return after stop")
        .unwrap();

    assert!(result.is_ok());
    assert_eq!(last_id, "E1");
    assert_eq!(events.await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_stop_while_blocked_on_full_channel() {
    let server = TestStreamServer::start(vec![ScriptedResponse::lines([
        "id: 1", "data: a", "", "id: 2", "data: b", "", "id: 3", "data: c", "",
    ])
    .hold_open()])
    .await
    .unwrap();

    let (mut client, _) = client_with(StreamConfig::default());
    // Nobody reads: the second send blocks
    let (tx, _rx) = mpsc::channel(1);
    let (stop, mut signal) = stop_channel();

    let uri = server.uri();
    let connect = tokio::spawn(async move { client.connect(&uri, "", &tx, &mut signal).await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    stop.stop();

    let (_, result) = tokio::time::timeout(Duration::from_secs(5), connect)
        .await
        .expect("connect deadlocked on a full channel")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_read_timeout() {
    let server = TestStreamServer::start(vec![ScriptedResponse::lines(["id: E9"]).hold_open()])
        .await
        .unwrap();

    let (mut client, metrics) = client_with(StreamConfig {
        connect_timeout: Duration::from_secs(5),
        read_timeout: Duration::from_millis(200),
    });
    let (tx, _events) = collector(8);
    let (_stop, mut signal) = stop_channel();

    let (last_id, result) = client.connect(&server.uri(), "", &tx, &mut signal).await;

    assert!(matches!(
        result,
        Err(StreamError::Timeout(TimeoutPhase::Read))
    ));
    assert_eq!(last_id, "E9");
    assert_eq!(
        metrics.recv_errors.with_label_values(&["body_read_timeout"]).get(),
        1
    );
}

#[tokio::test]
async fn test_connect_timeout() {
    let server = TestStreamServer::start(vec![ScriptedResponse::lines(["data: late", ""])
        .with_header_delay(Duration::from_secs(5))])
    .await
    .unwrap();

    let (mut client, _) = client_with(StreamConfig {
        connect_timeout: Duration::from_millis(200),
        read_timeout: Duration::from_secs(5),
    });
    let (tx, events) = collector(8);
    let (_stop, mut signal) = stop_channel();

    let (_, result) = client.connect(&server.uri(), "", &tx, &mut signal).await;
    drop(tx);

    assert!(matches!(
        result,
        Err(StreamError::Timeout(TimeoutPhase::Connect))
    ));
    assert!(events.await.unwrap().is_empty());
}

#[tokio::test]
async fn test_closed_channel_is_rejected() {
    let (mut client, _) = client_with(StreamConfig::default());
    let (tx, rx) = mpsc::channel::<Event>(1);
    drop(rx);
    let (_stop, mut signal) = stop_channel();

    let (_, result) = client
        .connect("http://127.0.0.1:9/stream", "", &tx, &mut signal)
        .await;
    assert!(matches!(result, Err(StreamError::ChannelClosed)));
}

#[tokio::test]
async fn test_transport_failure_is_request_error() {
    // Bind and drop to get a port nobody listens on
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let (mut client, _) = client_with(StreamConfig::default());
    let (tx, _events) = collector(1);
    let (_stop, mut signal) = stop_channel();

    let (_, result) = client
        .connect(&format!("http://127.0.0.1:{port}/stream"), "", &tx, &mut signal)
        .await;
    assert!(matches!(result, Err(StreamError::Request(_))));
}

#[tokio::test]
async fn test_last_seen_id_survives_reconnects() {
    let server = TestStreamServer::start(vec![
        ScriptedResponse::lines(["id: A", "data: x", ""]),
        ScriptedResponse::lines([": nothing new", ""]),
    ])
    .await
    .unwrap();

    let (mut client, _) = client_with(StreamConfig::default());
    let (tx, _events) = collector(8);
    let (_stop, mut signal) = stop_channel();

    let (first, _) = client.connect(&server.uri(), "", &tx, &mut signal).await;
    let (second, _) = client.connect(&server.uri(), &first, &tx, &mut signal).await;

    assert_eq!(first, "A");
    assert_eq!(second, "A");
    assert_eq!(client.last_seen_id(), "A");
    assert_eq!(server.requests()[1].last_event_id.as_deref(), Some("A"));
}
