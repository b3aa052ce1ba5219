//! The six end-to-end scenarios from spec §8, each driven over an
//! in-memory duplex so no real socket is needed.

mod support;

use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;

use ocpp_rpc::{
    CallFailure, CallOptions, ConnectFailure, Connector, HandlerOutcome, HandlerRegistry, Peer,
    PeerConfigBuilder, PeerEvent, PeerState, RpcErrorCode, Stack,
};

use support::duplex_pair;

fn events_channel() -> (mpsc::UnboundedSender<PeerEvent>, mpsc::UnboundedReceiver<PeerEvent>) {
    mpsc::unbounded_channel()
}

/// Scenario 1: boot round-trip.
#[tokio::test]
async fn boot_round_trip() {
    let (client_transport, server_transport) = duplex_pair();

    let mut handlers = HandlerRegistry::new();
    handlers
        .register("Heartbeat", |_params| async move {
            Ok(HandlerOutcome::Reply(json!({ "currentTime": "2024-01-01T00:00:00Z" })))
        })
        .unwrap();

    let server = Peer::from_accepted(
        Box::new(server_transport),
        "ocpp1.6".to_owned(),
        Default::default(),
        handlers,
        Stack::default(),
        None,
        None,
    );

    let client = Peer::from_accepted(
        Box::new(client_transport),
        "ocpp1.6".to_owned(),
        Default::default(),
        HandlerRegistry::new(),
        Stack::default(),
        None,
        None,
    );

    let result = timeout(
        Duration::from_secs(2),
        client.call("Heartbeat", json!({}), CallOptions::default()),
    )
    .await
    .expect("call did not time out")
    .expect("call resolved");

    assert_eq!(result, json!({ "currentTime": "2024-01-01T00:00:00Z" }));

    server.close(Default::default()).await;
    client.close(Default::default()).await;
}

/// Scenario 2: unknown method.
#[tokio::test]
async fn unknown_method_rejects_with_not_implemented() {
    let (client_transport, server_transport) = duplex_pair();

    let server = Peer::from_accepted(
        Box::new(server_transport),
        "ocpp1.6".to_owned(),
        Default::default(),
        HandlerRegistry::new(),
        Stack::default(),
        None,
        None,
    );
    let client = Peer::from_accepted(
        Box::new(client_transport),
        "ocpp1.6".to_owned(),
        Default::default(),
        HandlerRegistry::new(),
        Stack::default(),
        None,
        None,
    );

    let err = timeout(
        Duration::from_secs(2),
        client.call("DoesNotExist", json!({}), CallOptions::default()),
    )
    .await
    .expect("call did not time out")
    .expect_err("unknown method must reject");

    match err {
        CallFailure::Rpc { code, .. } => assert_eq!(code, RpcErrorCode::NotImplemented),
        other => panic!("expected Rpc(NotImplemented), got {other:?}"),
    }

    server.close(Default::default()).await;
    client.close(Default::default()).await;
}

/// Scenario 3: duplicate msgId while the first is still in flight.
#[tokio::test]
async fn duplicate_message_id_is_rejected() {
    let (client_transport, server_transport) = duplex_pair();

    let mut handlers = HandlerRegistry::new();
    handlers
        .register("Heartbeat", |_params| async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            Ok(HandlerOutcome::Reply(json!({})))
        })
        .unwrap();

    let server = Peer::from_accepted(
        Box::new(server_transport),
        "ocpp1.6".to_owned(),
        Default::default(),
        handlers,
        Stack::default(),
        None,
        None,
    );
    let (events_tx, mut events_rx) = events_channel();
    let client = Peer::from_accepted(
        Box::new(client_transport),
        "ocpp1.6".to_owned(),
        Default::default(),
        HandlerRegistry::new(),
        Stack::default(),
        None,
        Some(events_tx),
    );

    client
        .send_raw(r#"[2,"dup","Heartbeat",{}]"#.to_owned())
        .expect("first send");
    tokio::time::sleep(Duration::from_millis(20)).await;
    client
        .send_raw(r#"[2,"dup","Heartbeat",{}]"#.to_owned())
        .expect("second send");

    // Neither frame was sent through `call()`, so the client never tracks
    // "dup" as a pending call and the classified CallResult/CallError
    // events never fire; inspect the raw inbound wire text instead.
    let mut saw_rejection = false;
    let mut saw_completion = false;
    while !(saw_rejection && saw_completion) {
        match timeout(Duration::from_secs(2), events_rx.recv())
            .await
            .expect("events did not stall")
        {
            Some(PeerEvent::Message { outbound: false, raw }) => {
                if raw.contains("RpcFrameworkError") {
                    saw_rejection = true;
                } else if raw.starts_with(r#"[3,"dup""#) {
                    saw_completion = true;
                }
            }
            Some(_) => {}
            None => panic!("event channel closed early"),
        }
    }

    server.close(Default::default()).await;
    client.close(Default::default()).await;
}

/// Scenario 4: malformed input.
#[tokio::test]
async fn malformed_input_emits_bad_message_and_one_callerror() {
    let (client_transport, server_transport) = duplex_pair();

    let (server_events_tx, mut server_events_rx) = events_channel();
    let server = Peer::from_accepted(
        Box::new(server_transport),
        "ocpp1.6".to_owned(),
        Default::default(),
        HandlerRegistry::new(),
        Stack::default(),
        None,
        Some(server_events_tx),
    );
    let (events_tx, mut events_rx) = events_channel();
    let client = Peer::from_accepted(
        Box::new(client_transport),
        "ocpp1.6".to_owned(),
        Default::default(),
        HandlerRegistry::new(),
        Stack::default(),
        None,
        Some(events_tx),
    );

    client
        .send_raw(r#"[2, "x1", "BootNotification", {]"#.to_owned())
        .expect("send malformed frame");

    let mut saw_bad_message = false;
    while !saw_bad_message {
        match timeout(Duration::from_secs(2), server_events_rx.recv())
            .await
            .expect("server events did not stall")
        {
            Some(PeerEvent::BadMessage { count }) => {
                assert_eq!(count, 1);
                saw_bad_message = true;
            }
            Some(_) => {}
            None => panic!("server event channel closed before BadMessage"),
        }
    }

    // The client never issued this msgId through `call()`, so the
    // classified CallError event never fires; inspect the recovered
    // CALLERROR frame on the raw inbound wire text instead.
    let mut saw_call_error = false;
    while !saw_call_error {
        match timeout(Duration::from_secs(2), events_rx.recv())
            .await
            .expect("events did not stall")
        {
            Some(PeerEvent::Message { outbound: false, raw }) => {
                if raw.contains("FormatViolation") && raw.contains(r#""x1""#) {
                    saw_call_error = true;
                }
            }
            Some(_) => {}
            None => panic!("event channel closed before CallError"),
        }
    }
    assert!(saw_call_error);

    server.close(Default::default()).await;
    client.close(Default::default()).await;
}

/// Scenario 5: call timeout; the late CALLRESULT is dropped silently.
#[tokio::test]
async fn call_times_out_and_late_result_is_dropped() {
    let (client_transport, server_transport) = duplex_pair();

    let mut handlers = HandlerRegistry::new();
    handlers
        .register("SlowMethod", |_params| async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(HandlerOutcome::Reply(json!({})))
        })
        .unwrap();

    let server = Peer::from_accepted(
        Box::new(server_transport),
        "ocpp1.6".to_owned(),
        Default::default(),
        handlers,
        Stack::default(),
        None,
        None,
    );
    let client = Peer::from_accepted(
        Box::new(client_transport),
        "ocpp1.6".to_owned(),
        Default::default(),
        HandlerRegistry::new(),
        Stack::default(),
        None,
        None,
    );

    let started = tokio::time::Instant::now();
    let result = client
        .call(
            "SlowMethod",
            json!({}),
            CallOptions {
                timeout: Some(Duration::from_millis(100)),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(result, Err(CallFailure::Timeout)));
    assert!(started.elapsed() < Duration::from_millis(400));

    // The peer stays healthy after the stray late CALLRESULT arrives.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(client.state(), PeerState::Open);

    server.close(Default::default()).await;
    client.close(Default::default()).await;
}

struct AlwaysFailsConnector;

impl Connector for AlwaysFailsConnector {
    fn connect(&self) -> futures::future::BoxFuture<'_, Result<(Box<dyn ocpp_rpc::Transport>, String), ConnectFailure>> {
        Box::pin(async { Err(ConnectFailure::new("connection refused")) })
    }
}

/// Scenario 6: reconnection storm exhausts `maxReconnects` and closes
/// with 1001.
#[tokio::test]
async fn reconnection_storm_exhausts_and_closes() {
    let config = PeerConfigBuilder::default()
        .reconnect(true)
        .max_reconnects(3u32)
        .backoff_min(Duration::from_millis(100))
        .backoff_max(Duration::from_millis(400))
        .build()
        .unwrap();

    let (events_tx, mut events_rx) = events_channel();
    let client = Peer::connect(
        config,
        HandlerRegistry::new(),
        Stack::default(),
        None,
        Box::new(AlwaysFailsConnector),
        Some(events_tx),
    );

    let mut reconnect_attempts = 0u32;
    let close = loop {
        match timeout(Duration::from_secs(5), events_rx.recv())
            .await
            .expect("events did not stall")
        {
            Some(PeerEvent::Reconnect { attempt, .. }) => {
                reconnect_attempts = reconnect_attempts.max(attempt);
            }
            Some(PeerEvent::Close { code, reason }) => break (code, reason),
            Some(_) => {}
            None => panic!("event channel closed before Close"),
        }
    };

    assert_eq!(reconnect_attempts, 3);
    assert_eq!(close.0, 1001);
    assert_eq!(client.state(), PeerState::Closed);
}
