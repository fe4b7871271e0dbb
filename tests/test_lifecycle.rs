//! Lifecycle tests for the shared message stream
//!
//! Drives the orchestrator through a mock protocol client and checks what
//! observers see: messages, completion and terminal errors, plus the
//! cleanup that follows each of them.


use mqtt_rx::error::AdapterError;
use mqtt_rx::protocol::{QoSLevel, TopicFilter};
use mqtt_rx::service::LifecycleState;
use mqtt_rx::testing::MockProtocolClient;
use mqtt_rx::transport::{BrokerEndpoint, ClientError, ClientEvent, ProtocolClient};
use std::time::Duration;
use test_helpers::{mock_stream, wait_for_state, wait_until};

#[tokio::test]
async fn test_connect_subscribe_then_receive() {
    let (client, stream, handle) = mock_stream(MockProtocolClient::new());
    assert_eq!(handle.state(), LifecycleState::Idle);
    assert_eq!(client.connect_calls(), 0, "Connect must wait for an observer");

    let mut messages = stream.subscribe();
    wait_for_state(&handle, LifecycleState::Connected).await;
    wait_until(|| client.subscriptions().len() == 1).await;

    let options = &client.connect_options()[0];
    assert_eq!(
        options.endpoint,
        BrokerEndpoint::Tcp {
            host: "broker".to_string(),
            port: 1883
        }
    );
    assert!(options.clean_session);
    assert_eq!(client.subscriptions()[0], vec![TopicFilter::from("a/b")]);

    client.emit_message("a/b", b"hello", 1, true);

    let message = messages.recv().await.unwrap().unwrap();
    assert_eq!(message.topic, "a/b");
    assert_eq!(&message.payload[..], b"hello");
    assert_eq!(message.qos, QoSLevel::AtLeastOnce);
    assert!(message.retain);
    assert!(handle.is_connected());
}

#[tokio::test]
async fn test_messages_arrive_in_order() {
    let (client, stream, handle) = mock_stream(MockProtocolClient::new());
    let mut messages = stream.subscribe();
    wait_for_state(&handle, LifecycleState::Connected).await;

    for payload in [&b"1"[..], b"2", b"3"] {
        client.emit(ClientEvent::MessageReceived(mqtt_rx::transport::NativeMessage {
            topic: "a/b".to_string(),
            payload: bytes::Bytes::copy_from_slice(payload),
            qos: 0,
            retain: false,
        }));
    }

    for expected in ["1", "2", "3"] {
        let message = messages.recv().await.unwrap().unwrap();
        assert_eq!(message.payload_str(), expected);
    }
}

#[tokio::test]
async fn test_empty_filter_set_skips_subscribe() {
    let client = std::sync::Arc::new(MockProtocolClient::new());
    let (stream, handle) = mqtt_rx::MqttService::create_stream_with_client(
        client.clone(),
        test_helpers::tcp_options(),
        Vec::new(),
        None,
    );

    let _messages = stream.subscribe();
    wait_for_state(&handle, LifecycleState::Connected).await;
    tokio::task::yield_now().await;

    assert!(client.subscriptions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_before_connect_is_ignored() {
    let (client, stream, handle) =
        mock_stream(MockProtocolClient::new().with_connect_delay(Duration::from_secs(1)));

    let mut messages = stream.subscribe();
    wait_until(|| client.listener_count() > 0).await;
    assert_eq!(handle.state(), LifecycleState::Connecting);

    client.emit(ClientEvent::Disconnected {
        reason: "stale event from an earlier attempt".to_string(),
    });

    wait_for_state(&handle, LifecycleState::Connected).await;
    client.emit_message("a/b", b"still here", 0, false);

    let message = messages.recv().await.unwrap().unwrap();
    assert_eq!(message.payload_str(), "still here");
    assert_eq!(client.disconnect_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_messages_before_connect_are_dropped() {
    let (client, stream, handle) =
        mock_stream(MockProtocolClient::new().with_connect_delay(Duration::from_secs(1)));

    let mut messages = stream.subscribe();
    wait_until(|| client.listener_count() > 0).await;
    client.emit_message("a/b", b"early", 0, false);

    wait_for_state(&handle, LifecycleState::Connected).await;
    client.emit_message("a/b", b"on time", 0, false);

    let message = messages.recv().await.unwrap().unwrap();
    assert_eq!(message.payload_str(), "on time");
}

#[tokio::test]
async fn test_broker_disconnect_completes_stream() {
    let (client, stream, handle) = mock_stream(MockProtocolClient::new());
    let mut messages = stream.subscribe();
    wait_for_state(&handle, LifecycleState::Connected).await;

    client.emit(ClientEvent::Disconnected {
        reason: "broker went away".to_string(),
    });

    assert!(messages.recv().await.is_none(), "Stream should complete without error");

    stream.wait_for_teardown().await;
    assert_eq!(handle.state(), LifecycleState::Closed);
    assert!(!handle.is_connected());
    assert_eq!(client.disconnect_calls(), 1);
}

#[tokio::test]
async fn test_connect_failure_errors_stream() {
    let (client, stream, handle) = mock_stream(
        MockProtocolClient::new()
            .with_connect_failure(ClientError::Connection("connection refused".to_string())),
    );

    let mut messages = stream.subscribe();

    match messages.recv().await {
        Some(Err(AdapterError::ConnectFailure(ClientError::Connection(reason)))) => {
            assert_eq!(reason, "connection refused");
        }
        other => panic!("Expected ConnectFailure, got {other:?}"),
    }
    assert!(messages.recv().await.is_none(), "Error must be the last item");

    stream.wait_for_teardown().await;
    assert_eq!(handle.state(), LifecycleState::Errored);
    assert!(!handle.is_connected());
    assert_eq!(
        client.disconnect_calls(),
        0,
        "Cleanup is a no-op when never connected"
    );
}

#[tokio::test]
async fn test_subscribe_failure_errors_stream_and_disconnects() {
    let (client, stream, handle) = mock_stream(
        MockProtocolClient::new()
            .with_subscribe_failure(ClientError::Request("not authorized".to_string())),
    );

    let mut messages = stream.subscribe();

    assert!(matches!(
        messages.recv().await,
        Some(Err(AdapterError::SubscribeFailure(_)))
    ));
    assert!(messages.recv().await.is_none());

    stream.wait_for_teardown().await;
    assert_eq!(handle.state(), LifecycleState::Errored);
    assert_eq!(client.disconnect_calls(), 1);
    assert!(!client.is_connected());
    assert!(!handle.is_connected());
}

#[tokio::test]
async fn test_unknown_qos_errors_stream() {
    let (client, stream, handle) = mock_stream(MockProtocolClient::new());
    let mut messages = stream.subscribe();
    wait_for_state(&handle, LifecycleState::Connected).await;

    client.emit_message("a/b", b"corrupt", 7, false);

    assert!(matches!(
        messages.recv().await,
        Some(Err(AdapterError::UnknownQoSLevel(7)))
    ));
    assert!(messages.recv().await.is_none());

    stream.wait_for_teardown().await;
    assert_eq!(handle.state(), LifecycleState::Errored);
    assert_eq!(client.disconnect_calls(), 1);
}

#[tokio::test]
async fn test_unsupported_protocol_version_errors_stream() {
    let client = std::sync::Arc::new(MockProtocolClient::new());
    let options = test_helpers::tcp_options()
        .with_protocol_version(mqtt_rx::protocol::ProtocolVersion::V500);
    let (stream, handle) =
        mqtt_rx::MqttService::create_stream_with_client(client.clone(), options, Vec::new(), None);

    let mut messages = stream.subscribe();

    assert!(matches!(
        messages.recv().await,
        Some(Err(AdapterError::UnsupportedProtocolVersion(_)))
    ));
    stream.wait_for_teardown().await;
    assert_eq!(handle.state(), LifecycleState::Errored);
    assert_eq!(client.connect_calls(), 0, "Translation fails before connecting");
}

#[tokio::test]
async fn test_dispose_disconnects_without_error() {
    let (client, stream, handle) = mock_stream(MockProtocolClient::new());
    let messages = stream.subscribe();
    wait_for_state(&handle, LifecycleState::Connected).await;

    drop(messages);
    stream.wait_for_teardown().await;

    assert_eq!(handle.state(), LifecycleState::Closed);
    assert_eq!(client.disconnect_calls(), 1);
    assert!(!handle.is_connected());
    assert_eq!(client.listener_count(), 0, "Session must unregister its event listener");
}

#[tokio::test]
async fn test_reconnect_event_resubscribes() {
    let (client, stream, handle) = mock_stream(MockProtocolClient::new());
    let _messages = stream.subscribe();
    wait_for_state(&handle, LifecycleState::Connected).await;
    wait_until(|| client.subscriptions().len() == 1).await;

    // Client-level reconnect after a transparent network blip
    client.emit(ClientEvent::Connected);

    wait_until(|| client.subscriptions().len() == 2).await;
    assert_eq!(client.connect_calls(), 1);
}

#[tokio::test]
async fn test_subscribes_when_connect_resolves_without_event() {
    let (client, stream, handle) = mock_stream(MockProtocolClient::new().with_silent_connect());
    let mut messages = stream.subscribe();

    wait_for_state(&handle, LifecycleState::Connected).await;
    wait_until(|| client.subscriptions().len() == 1).await;

    client.emit_message("a/b", b"no ack event needed", 0, false);
    assert_eq!(
        messages.recv().await.unwrap().unwrap().payload_str(),
        "no ack event needed"
    );

    client.emit(ClientEvent::Connected);
    wait_until(|| client.subscriptions().len() == 2).await;
}

#[tokio::test]
async fn test_initial_connect_subscribes_once() {
    let (client, stream, handle) = mock_stream(MockProtocolClient::new());
    let mut messages = stream.subscribe();
    wait_for_state(&handle, LifecycleState::Connected).await;

    // Round-trip a message so any duplicate subscribe would already have run
    client.emit_message("a/b", b"settled", 0, false);
    messages.recv().await.unwrap().unwrap();

    assert_eq!(client.subscriptions().len(), 1);
}
