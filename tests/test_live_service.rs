//! End-to-end behavior of the live data service against a mock broker link
//!
//! Covers the reconnection lifecycle, subscription re-arming, device switching
//! and actuator commands while the link is down.


use agrolink::error::{CommandError, ConnectionError};
use agrolink::model::{PumpStatus, ReadingKind};
use agrolink::protocol::FrameType;
use agrolink::testing::MockTransport;
use agrolink::transport::{ConnectionState, Transport};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use test_helpers::{test_scheme, test_service, wait_for_state, WAIT};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

fn subscribe_topics(transport: &MockTransport) -> BTreeSet<String> {
    transport
        .frames_of(FrameType::Subscribe)
        .into_iter()
        .map(|f| f.topic)
        .collect()
}

#[tokio::test]
async fn test_connection_drop_rearms_subscription_exactly_once() {
    let transport = Arc::new(MockTransport::new());
    let service = test_service(transport.clone(), 10);
    service.start().unwrap();
    wait_for_state(&service, ConnectionState::Connected).await;

    let (consumer, mut events) = mpsc::unbounded_channel();
    service.subscribe_device("field-7", consumer).await.unwrap();
    assert_eq!(transport.frames_of(FrameType::Subscribe).len(), 3);
    transport.clear_sent();

    assert!(transport.drop_connection("keep-alive timeout"));
    assert!(
        transport
            .wait_until(
                |t| t.connect_calls() == 2 && t.frames_of(FrameType::Subscribe).len() == 3,
                WAIT
            )
            .await,
        "subscription was not re-armed"
    );

    // Nothing else arrives once the link settles
    sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.frames_of(FrameType::Subscribe).len(), 3);
    let expected: BTreeSet<String> = test_scheme().device_topics("field-7").into_iter().collect();
    assert_eq!(subscribe_topics(&transport), expected);
    assert_eq!(service.connection_state(), ConnectionState::Connected);

    // The original consumer keeps receiving after the reconnect
    transport.inject_frame("farm/field-7/stream/moisture", "38.5");
    let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(event.device_id, "field-7");
    assert_eq!(service.live_state().moisture(), Some(38.5));

    service.stop().await;
}

#[tokio::test]
async fn test_subscribe_while_disconnected_waits_for_link() {
    let transport = Arc::new(MockTransport::new());
    transport.set_connect_delay(Duration::from_millis(100));
    let service = test_service(transport.clone(), 10);
    service.start().unwrap();

    let (consumer, _events) = mpsc::unbounded_channel();
    service.subscribe_device("field-7", consumer).await.unwrap();
    assert!(transport.frames_of(FrameType::Subscribe).is_empty());
    assert_eq!(
        service.live_state().device_id.as_deref(),
        Some("field-7")
    );

    wait_for_state(&service, ConnectionState::Connected).await;
    assert!(
        transport
            .wait_until(|t| t.frames_of(FrameType::Subscribe).len() == 3, WAIT)
            .await
    );
    sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.frames_of(FrameType::Subscribe).len(), 3);

    service.stop().await;
}

#[tokio::test]
async fn test_switching_devices_filters_previous_device() {
    let transport = Arc::new(MockTransport::new());
    let service = test_service(transport.clone(), 10);
    service.start().unwrap();
    wait_for_state(&service, ConnectionState::Connected).await;

    let (consumer_a, mut events_a) = mpsc::unbounded_channel();
    service.subscribe_device("field-a", consumer_a).await.unwrap();
    let (consumer_b, mut events_b) = mpsc::unbounded_channel();
    service.subscribe_device("field-b", consumer_b).await.unwrap();

    let unsubscribed: BTreeSet<String> = transport
        .frames_of(FrameType::Unsubscribe)
        .into_iter()
        .map(|f| f.topic)
        .collect();
    let expected: BTreeSet<String> = test_scheme().device_topics("field-a").into_iter().collect();
    assert_eq!(unsubscribed, expected);

    // A late frame from the old device must never reach the new consumer
    transport.inject_frame("farm/field-a/stream/moisture", "12");
    transport.inject_frame("farm/field-b/stream/moisture", "55");

    let event = timeout(WAIT, events_b.recv()).await.unwrap().unwrap();
    assert_eq!(event.device_id, "field-b");
    assert_eq!(service.live_state().device_id.as_deref(), Some("field-b"));
    assert_eq!(service.live_state().moisture(), Some(55.0));

    // The old consumer was released when the device switched
    assert!(timeout(WAIT, events_a.recv()).await.unwrap().is_none());

    service.stop().await;
}

#[tokio::test]
async fn test_command_while_offline_is_rejected() {
    let transport = Arc::new(MockTransport::new());
    transport.set_connect_delay(Duration::from_secs(60));
    let service = test_service(transport.clone(), 10);
    service.start().unwrap();

    assert_eq!(
        service.send_command("field-7", ReadingKind::PumpStatus, "on"),
        Err(CommandError::Offline)
    );
    assert!(transport.frames_of(FrameType::Publish).is_empty());

    service.stop().await;
}

#[tokio::test]
async fn test_command_when_connected_targets_command_topic() {
    let transport = Arc::new(MockTransport::new());
    let service = test_service(transport.clone(), 10);
    service.start().unwrap();
    wait_for_state(&service, ConnectionState::Connected).await;

    let receipt = service
        .send_command("field-7", ReadingKind::PumpStatus, "on")
        .unwrap();
    assert_eq!(receipt.topic, "farm/field-7/state/motor/set");

    let published = transport.frames_of(FrameType::Publish);
    assert_eq!(published.len(), 1);
    let body = published[0].payload.as_deref().unwrap();
    let payload: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(payload["power"], PumpStatus::On.wire_value());

    service.stop().await;
}

#[tokio::test]
async fn test_backoff_exhaustion_degrades_then_retry_recovers() {
    let transport = Arc::new(MockTransport::failing(
        3,
        ConnectionError::network("connection refused"),
    ));
    let service = test_service(transport.clone(), 3);
    service.start().unwrap();

    wait_for_state(&service, ConnectionState::Degraded).await;
    assert_eq!(transport.connect_calls(), 3);
    let reason = service.degraded_reason().unwrap();
    assert!(reason.contains("3 attempts"), "unexpected reason: {reason}");

    // Degraded is terminal until asked
    sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.connect_calls(), 3);

    service.retry().await.unwrap();
    wait_for_state(&service, ConnectionState::Connected).await;
    assert_eq!(transport.connect_calls(), 4);
    assert_eq!(service.degraded_reason(), None);

    service.stop().await;
}

#[tokio::test]
async fn test_rejected_credentials_never_retry() {
    let transport = Arc::new(MockTransport::failing(
        1,
        ConnectionError::auth("bad username or password"),
    ));
    let service = test_service(transport.clone(), 10);
    service.start().unwrap();

    wait_for_state(&service, ConnectionState::Degraded).await;
    sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.connect_calls(), 1);

    service.stop().await;
}

#[tokio::test]
async fn test_stop_never_reconnects() {
    let transport = Arc::new(MockTransport::new());
    let service = test_service(transport.clone(), 10);
    service.start().unwrap();
    wait_for_state(&service, ConnectionState::Connected).await;

    let mut connected = service.on_connection_change();
    service.stop().await;
    assert!(!transport.is_connected());
    assert!(!*connected.borrow_and_update());

    sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.connect_calls(), 1);
    assert_eq!(service.connection_state(), ConnectionState::Disconnected);
    assert!(!service.live_state().is_connected);
}

#[tokio::test]
async fn test_service_restarts_after_stop() {
    let transport = Arc::new(MockTransport::new());
    let service = test_service(transport.clone(), 10);

    service.start().unwrap();
    wait_for_state(&service, ConnectionState::Connected).await;
    service.stop().await;

    service.start().unwrap();
    wait_for_state(&service, ConnectionState::Connected).await;
    assert_eq!(transport.connect_calls(), 2);
    service.stop().await;
}

#[tokio::test]
async fn test_unparseable_frames_are_dropped() {
    let transport = Arc::new(MockTransport::new());
    let service = test_service(transport.clone(), 10);
    service.start().unwrap();
    wait_for_state(&service, ConnectionState::Connected).await;

    let (consumer, mut events) = mpsc::unbounded_channel();
    service.subscribe_device("field-7", consumer).await.unwrap();

    transport.inject_frame("farm/field-7/stream/moisture", "not a reading");
    transport.inject_frame("farm/field-7/stream/temp", "21.5");

    let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(event.readings()[0].0, ReadingKind::Temperature);
    assert!(service.live_state().moisture().is_none());

    service.stop().await;
}
