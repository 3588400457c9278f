//! Connector lifecycle against scripted peers

mod common;

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use common::{eventually, scripted_config, RecordingInvoker, ScriptedDialer};
use gatehouse::connector::{CallbackContext, ConnectorRuntime, PooledConnector};
use gatehouse::transport::Frame;
use gatehouse::GatehouseError;
use tokio::time::Instant;

const SETTLE: Duration = Duration::from_secs(1);

fn connector_with(
    config: gatehouse::connector::ConnectorConfig,
) -> (
    Arc<PooledConnector>,
    Arc<ScriptedDialer>,
    tokio::sync::mpsc::UnboundedReceiver<common::Peer>,
    Arc<RecordingInvoker>,
) {
    let (dialer, peers) = ScriptedDialer::new();
    let invoker = Arc::new(RecordingInvoker::default());
    let runtime = ConnectorRuntime::new(dialer.clone(), invoker.clone());
    (PooledConnector::new(config, runtime), dialer, peers, invoker)
}

#[tokio::test(start_paused = true)]
async fn test_connect_invokes_on_connect() {
    let (connector, _dialer, mut peers, invoker) = connector_with(scripted_config(1, "crm"));
    connector.start();

    let _peer = peers.recv().await.unwrap();
    eventually(SETTLE, || invoker.count("on.connect") == 1).await;
    assert_eq!(connector.pool().stats().live, 1);
    assert_eq!(
        invoker.calls()[0].1,
        CallbackContext::Connected {
            connector: "crm".into(),
            handle: 1,
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_deleted_handle_is_not_replaced() {
    let (connector, dialer, mut peers, invoker) = connector_with(scripted_config(1, "crm"));
    connector.start();

    let mut peer = peers.recv().await.unwrap();
    eventually(SETTLE, || connector.pool().stats().live == 1).await;

    let id = connector.pool().live_handles()[0].id();
    assert!(connector.delete_handle(id));
    assert!(!connector.delete_handle(id));

    match peer.next_data().await {
        Some(Frame::Close(Some(frame))) => assert_eq!(frame.code, 1000),
        other => panic!("expected a close frame, got {:?}", other),
    }

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(dialer.dials(), 1);
    assert_eq!(invoker.count("on.close"), 0);
    assert_eq!(connector.pool().stats().live, 0);
}

#[tokio::test(start_paused = true)]
async fn test_deleted_connector_closes_everything_without_reconnect() {
    let mut config = scripted_config(1, "crm");
    config.pool_size = 2;
    let (connector, dialer, mut peers, invoker) = connector_with(config);
    connector.start();

    let mut first = peers.recv().await.unwrap();
    let mut second = peers.recv().await.unwrap();
    eventually(SETTLE, || connector.pool().stats().live == 2).await;

    connector.delete();
    for peer in [&mut first, &mut second] {
        assert!(matches!(peer.next_data().await, Some(Frame::Close(_))));
    }

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(dialer.dials(), 2);
    assert_eq!(invoker.count("on.close"), 0);
    assert!(matches!(
        connector.send("late", Duration::from_secs(1)).await,
        Err(GatehouseError::PoolExhausted(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_peer_reset_reconnects_exactly_once() {
    let mut config = scripted_config(1, "crm");
    config.reconnect_delay_ms = 2_000;
    let (connector, dialer, mut peers, invoker) = connector_with(config);
    connector.start();

    let mut peer = peers.recv().await.unwrap();
    eventually(SETTLE, || connector.pool().stats().live == 1).await;

    peer.reset();
    eventually(SETTLE, || invoker.count("on.close") == 1).await;
    let closed_at = Instant::now();

    // The reconnect is scheduled right after on-close, so it fires within the
    // polling step before `closed_at + delay`.
    tokio::time::sleep_until(closed_at + Duration::from_millis(1_950)).await;
    assert_eq!(dialer.dials(), 1);
    tokio::time::sleep_until(closed_at + Duration::from_millis(2_050)).await;
    assert_eq!(dialer.dials(), 2);

    let _replacement = peers.recv().await.unwrap();
    eventually(SETTLE, || connector.pool().stats().live == 1).await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(dialer.dials(), 2);
    assert_eq!(invoker.count("on.close"), 1);
    assert_eq!(connector.status().reconnects, 1);

    let closed = invoker
        .calls()
        .into_iter()
        .find(|(service, _)| service == "on.close")
        .map(|(_, ctx)| ctx);
    match closed {
        Some(CallbackContext::Closed { handle, code, reason, .. }) => {
            assert_eq!(handle, 1);
            assert_eq!(code, Some(1011));
            assert!(reason.contains("connection reset"));
        }
        other => panic!("unexpected close context {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_peer_close_frame_reaches_on_close() {
    let (connector, dialer, mut peers, invoker) = connector_with(scripted_config(1, "crm"));
    connector.start();

    let peer = peers.recv().await.unwrap();
    eventually(SETTLE, || connector.pool().stats().live == 1).await;

    peer.close(1001, "going away");
    eventually(SETTLE, || invoker.count("on.close") == 1).await;
    let _replacement = peers.recv().await.unwrap();

    let codes: Vec<Option<u16>> = invoker
        .calls()
        .into_iter()
        .filter_map(|(_, ctx)| match ctx {
            CallbackContext::Closed { code, .. } => Some(code),
            _ => None,
        })
        .collect();
    assert_eq!(codes, vec![Some(1001)]);
    assert_eq!(dialer.dials(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_no_reconnect_when_disabled() {
    let mut config = scripted_config(1, "crm");
    config.has_auto_reconnect = false;
    let (connector, dialer, mut peers, invoker) = connector_with(config);
    connector.start();

    let mut peer = peers.recv().await.unwrap();
    eventually(SETTLE, || connector.pool().stats().live == 1).await;

    peer.reset();
    eventually(SETTLE, || invoker.count("on.close") == 1).await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(dialer.dials(), 1);
    assert_eq!(connector.pool().stats().live, 0);
}

#[tokio::test(start_paused = true)]
async fn test_refused_connect_is_retried() {
    let (connector, dialer, mut peers, invoker) = connector_with(scripted_config(1, "crm"));
    dialer.refuse_next(1);
    connector.start();

    let _peer = peers.recv().await.unwrap();
    eventually(SETTLE, || connector.pool().stats().live == 1).await;

    eventually(SETTLE, || invoker.count("on.connect") == 1).await;
    assert_eq!(dialer.dials(), 2);
    assert_eq!(invoker.count("on.close"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_silent_peer_hits_liveness_timeout() {
    let mut config = scripted_config(1, "crm");
    config.ping_interval_secs = Some(1);
    config.pings_missed_threshold = Some(2);
    let (connector, dialer, mut peers, invoker) = connector_with(config);
    connector.start();

    let mut peer = peers.recv().await.unwrap();
    assert_eq!(peer.next_frame().await, Some(Frame::Ping(Vec::new())));
    assert_eq!(peer.next_frame().await, Some(Frame::Ping(Vec::new())));
    match peer.next_frame().await {
        Some(Frame::Close(Some(frame))) => assert_eq!(frame.code, 1011),
        other => panic!("expected a close frame, got {:?}", other),
    }

    eventually(SETTLE, || invoker.count("on.close") == 1).await;
    let _replacement = peers.recv().await.unwrap();
    assert_eq!(dialer.dials(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_answering_peer_stays_connected() {
    let mut config = scripted_config(1, "crm");
    config.ping_interval_secs = Some(1);
    config.pings_missed_threshold = Some(2);
    let (connector, dialer, mut peers, invoker) = connector_with(config);
    connector.start();

    let mut peer = peers.recv().await.unwrap();
    let responder = tokio::spawn(async move {
        while let Some(frame) = peer.next_frame().await {
            if let Frame::Ping(data) = frame {
                peer.send(Frame::Pong(data));
            }
        }
    });

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(dialer.dials(), 1);
    assert_eq!(invoker.count("on.close"), 0);
    assert_eq!(connector.pool().stats().live, 1);

    connector.delete();
    responder.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_inbound_json_reaches_on_message() {
    let (connector, _dialer, mut peers, invoker) = connector_with(scripted_config(1, "crm"));
    connector.start();

    let peer = peers.recv().await.unwrap();
    peer.send(Frame::Text(r#"{"order": 42}"#.into()));
    peer.send(Frame::Text("plain words".into()));

    eventually(SETTLE, || invoker.count("on.message") == 2).await;
    let data: Vec<_> = invoker
        .calls()
        .into_iter()
        .filter_map(|(_, ctx)| match ctx {
            CallbackContext::Message { data, .. } => Some(data),
            _ => None,
        })
        .collect();
    assert_eq!(data, vec![json!({"order": 42}), json!("plain words")]);
}

#[tokio::test(start_paused = true)]
async fn test_send_with_zero_timeout_fails_fast_when_exhausted() {
    let (connector, _dialer, mut peers, _invoker) = connector_with(scripted_config(1, "crm"));

    let started = tokio::time::Instant::now();
    assert!(matches!(
        connector.send("nobody home", Duration::ZERO).await,
        Err(GatehouseError::PoolExhausted(_))
    ));
    assert_eq!(started.elapsed(), Duration::ZERO);

    connector.start();
    let mut peer = peers.recv().await.unwrap();
    eventually(SETTLE, || connector.pool().stats().live == 1).await;

    let held = connector.pool().acquire(Duration::from_secs(1)).await.unwrap();
    assert!(matches!(
        connector.send("busy", Duration::ZERO).await,
        Err(GatehouseError::PoolExhausted(_))
    ));
    drop(held);

    connector.send("hello", Duration::ZERO).await.unwrap();
    assert_eq!(peer.next_data().await, Some(Frame::Text("hello".into())));
}

#[tokio::test(start_paused = true)]
async fn test_waiting_sender_gets_released_connection() {
    let (connector, _dialer, mut peers, _invoker) = connector_with(scripted_config(1, "crm"));
    connector.start();
    let mut peer = peers.recv().await.unwrap();
    eventually(SETTLE, || connector.pool().stats().live == 1).await;

    let held = connector.pool().acquire(Duration::from_secs(1)).await.unwrap();
    let waiting = {
        let connector = Arc::clone(&connector);
        tokio::spawn(async move { connector.send("queued", Duration::from_secs(5)).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(held);

    waiting.await.unwrap().unwrap();
    assert_eq!(peer.next_data().await, Some(Frame::Text("queued".into())));
}

#[tokio::test(start_paused = true)]
async fn test_connect_failing_after_delete_stays_quiet() {
    let (connector, dialer, _peers, invoker) = connector_with(scripted_config(1, "crm"));
    let gate = dialer.hold_dials();
    dialer.refuse_next(1);
    connector.start();

    eventually(SETTLE, || connector.pool().stats().building == 1).await;
    connector.delete();
    gate.notify_one();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(invoker.count("on.close"), 0);
    assert_eq!(dialer.dials(), 1);
    assert_eq!(connector.status().reconnects, 0);
    assert_eq!(connector.pool().stats().building, 0);
}

#[tokio::test(start_paused = true)]
async fn test_closing_session_is_never_lent_out() {
    let (connector, dialer, mut peers, invoker) = connector_with(scripted_config(1, "crm"));
    dialer.stall_goodbyes();
    connector.start();

    let mut peer = peers.recv().await.unwrap();
    eventually(SETTLE, || connector.pool().stats().live == 1).await;

    peer.reset();
    eventually(SETTLE, || connector.pool().stats().live == 0).await;

    // The closing handshake is still stuck on the goodbye frame.
    assert_eq!(invoker.count("on.close"), 0);
    let started = Instant::now();
    assert!(matches!(
        connector.send("late", Duration::ZERO).await,
        Err(GatehouseError::PoolExhausted(_))
    ));
    assert_eq!(started.elapsed(), Duration::ZERO);

    eventually(Duration::from_secs(15), || invoker.count("on.close") == 1).await;
}

#[tokio::test(start_paused = true)]
async fn test_write_queued_before_delete_is_delivered() {
    use tokio_test::{assert_pending, assert_ready, task};

    let (connector, _dialer, mut peers, _invoker) = connector_with(scripted_config(1, "crm"));
    connector.start();
    let mut peer = peers.recv().await.unwrap();
    eventually(SETTLE, || connector.pool().stats().live == 1).await;

    let conn = connector.pool().acquire(Duration::ZERO).await.unwrap();
    let mut write = task::spawn(conn.send("queued".into()));
    assert_pending!(write.poll());

    // The slot sees the close request and the queued frame in the same poll.
    connector.delete();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(write.is_woken());
    assert_ready!(write.poll()).unwrap();

    assert_eq!(peer.next_data().await, Some(Frame::Text("queued".into())));
    match peer.next_data().await {
        Some(Frame::Close(Some(frame))) => assert_eq!(frame.code, 1000),
        other => panic!("expected a close frame, got {:?}", other),
    }
}
