//! Impure I/O operations for the MQTT client
//!
//! This module owns the rumqttc client and event loop, drives the event loop
//! on a background task, and republishes what it sees as [`ClientEvent`]s.
//! It never reconnects on its own: a lost connection is reported once as
//! `Disconnected` and the event loop task stops.
//!
//! Only `connect` sets the connected flag, and only after the session is
//! stored. An event loop whose `connect` was dropped is aborted, which closes
//! its socket, so an abandoned attempt can't complete in the background.

use super::message_handler::{EventRoute, MessageHandler};
use crate::protocol::TopicFilter;
use crate::transport::{
    BrokerEndpoint, ClientError, ClientEvent, NativeMessage, NativeOptions,
    NativeProtocolVersion, ProtocolClient,
};
use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop, LastWill, MqttOptions, QoS, SubscribeFilter, Transport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

/// Capacity of the rumqttc request channel
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Capacity of the event fan-out channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long `disconnect` waits for the event loop task to wind down
const EVENT_LOOP_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Live rumqttc session
struct Session {
    client: AsyncClient,
    event_loop_handle: JoinHandle<()>,
}

/// Aborts the event loop task on drop until disarmed
struct AbortOnDrop(Option<AbortHandle>);

impl AbortOnDrop {
    fn disarm(&mut self) {
        self.0 = None;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            debug!(target: "mqtt_transport", "Connect abandoned, stopping event loop");
            handle.abort();
        }
    }
}

/// Protocol client backed by rumqttc (MQTT 3.1.1)
pub struct RumqttcClient {
    session: Mutex<Option<Session>>,
    connected: Arc<AtomicBool>,
    events_tx: broadcast::Sender<ClientEvent>,
}

impl RumqttcClient {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            session: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            events_tx,
        }
    }

    /// Build rumqttc options from native options
    fn build_mqtt_options(options: &NativeOptions) -> Result<MqttOptions, ClientError> {
        if options.protocol_version == NativeProtocolVersion::V310 {
            return Err(ClientError::Unsupported(
                "MQTT 3.1 is not supported by the rumqttc client".to_string(),
            ));
        }

        let mut mqtt_options = match &options.endpoint {
            BrokerEndpoint::Tcp { host, port } => {
                MqttOptions::new(options.client_id.clone(), host.clone(), *port)
            }
            BrokerEndpoint::WebSocket { url } => {
                let port = url::Url::parse(url)
                    .ok()
                    .and_then(|parsed| parsed.port_or_known_default())
                    .unwrap_or(80);
                MqttOptions::new(options.client_id.clone(), url.clone(), port)
            }
        };

        mqtt_options.set_clean_session(options.clean_session);
        // rumqttc rejects non-zero keep-alives under one second
        mqtt_options.set_keep_alive(options.keep_alive.max(Duration::from_secs(1)));

        if let Some((username, password)) = &options.credentials {
            mqtt_options.set_credentials(username.clone(), password.clone());
        }

        if let Some(will) = &options.will {
            let qos = to_rumqttc_qos(will.qos)?;
            mqtt_options.set_last_will(LastWill::new(
                will.topic.clone(),
                will.payload.to_vec(),
                qos,
                will.retain,
            ));
        }

        if let Some(transport) = Self::select_transport(options) {
            mqtt_options.set_transport(transport);
        }

        Ok(mqtt_options)
    }

    fn select_transport(options: &NativeOptions) -> Option<Transport> {
        let tls = &options.tls;
        if tls.allow_untrusted_certificates || tls.ignore_certificate_chain_errors {
            warn!("rumqttc verifies broker certificates; relaxed TLS flags are ignored");
        }

        let is_websocket = matches!(options.endpoint, BrokerEndpoint::WebSocket { .. });
        match (tls.enabled, is_websocket) {
            (false, false) => None,
            (false, true) => Some(Transport::Ws),
            (true, websocket) => {
                let tls_transport = if tls.certificates.is_empty() {
                    Transport::tls_with_default_config()
                } else {
                    // Chain blobs are concatenated into one PEM bundle of trust anchors
                    Transport::tls(tls.certificates.concat(), None, None)
                };
                match (websocket, tls_transport) {
                    (true, Transport::Tls(config)) => Some(Transport::Wss(config)),
                    (_, transport) => Some(transport),
                }
            }
        }
    }

    /// Drive the event loop until the connection ends
    async fn run_event_loop(
        mut event_loop: EventLoop,
        events_tx: broadcast::Sender<ClientEvent>,
        connected: Arc<AtomicBool>,
        connack_tx: oneshot::Sender<Result<(), ClientError>>,
    ) {
        let mut connack_tx = Some(connack_tx);

        loop {
            match event_loop.poll().await {
                Ok(event) => match MessageHandler::route_mqtt_event(&event) {
                    EventRoute::ConnectionAcknowledged => {
                        // Announce before `connect` can resolve
                        let _ = events_tx.send(ClientEvent::Connected);
                        if let Some(tx) = connack_tx.take() {
                            let _ = tx.send(Ok(()));
                        }
                    }
                    EventRoute::ConnectionRefused(code) => {
                        if let Some(tx) = connack_tx.take() {
                            let _ = tx.send(Err(ClientError::Connection(format!(
                                "broker refused connection: {code}"
                            ))));
                        }
                        break;
                    }
                    EventRoute::MessageReceived(message) => {
                        debug!(target: "mqtt_transport", "Received MQTT message on topic: {}", message.topic);
                        let _ = events_tx.send(ClientEvent::MessageReceived(message));
                    }
                    EventRoute::Disconnected(reason) => {
                        Self::mark_disconnected(&connected, &events_tx, reason);
                        break;
                    }
                    EventRoute::DisconnectSent => {
                        Self::mark_disconnected(
                            &connected,
                            &events_tx,
                            "Client disconnected".to_string(),
                        );
                        break;
                    }
                    EventRoute::SubscriptionConfirmed { packet_id, failed } => {
                        if failed {
                            warn!("Broker rejected a subscription (packet {})", packet_id);
                        } else {
                            debug!(target: "mqtt_transport", "Subscription confirmed: {}", packet_id);
                        }
                    }
                    EventRoute::InfrastructureEvent(event_str) => {
                        debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
                    }
                    EventRoute::OutgoingEvent => {}
                },
                Err(e) => {
                    if let Some(tx) = connack_tx.take() {
                        let _ = tx.send(Err(ClientError::Connection(e.to_string())));
                    } else {
                        error!("MQTT event loop error: {}", e);
                        Self::mark_disconnected(&connected, &events_tx, e.to_string());
                    }
                    break;
                }
            }
        }

        debug!(target: "mqtt_transport", "MQTT event loop stopped");
    }

    fn mark_disconnected(
        connected: &AtomicBool,
        events_tx: &broadcast::Sender<ClientEvent>,
        reason: String,
    ) {
        if connected.swap(false, Ordering::SeqCst) {
            info!("MQTT connection closed: {}", reason);
            let _ = events_tx.send(ClientEvent::Disconnected { reason });
        }
    }

    async fn with_client<F, Fut>(&self, op: F) -> Result<(), ClientError>
    where
        F: FnOnce(AsyncClient) -> Fut,
        Fut: std::future::Future<Output = Result<(), rumqttc::ClientError>>,
    {
        let client = {
            let session = self.session.lock().await;
            match session.as_ref() {
                Some(session) if self.is_connected() => session.client.clone(),
                _ => return Err(ClientError::NotConnected),
            }
        };
        op(client)
            .await
            .map_err(|e| ClientError::Request(e.to_string()))
    }
}

impl Default for RumqttcClient {
    fn default() -> Self {
        Self::new()
    }
}

fn to_rumqttc_qos(level: u8) -> Result<QoS, ClientError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(ClientError::Request(format!("invalid QoS level {other}"))),
    }
}

#[async_trait]
impl ProtocolClient for RumqttcClient {
    async fn connect(&self, options: NativeOptions) -> Result<(), ClientError> {
        let mut session = self.session.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        if let Some(stale) = session.take() {
            stale.event_loop_handle.abort();
        }

        let mqtt_options = Self::build_mqtt_options(&options)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
        let (connack_tx, connack_rx) = oneshot::channel();

        info!(client_id = %options.client_id, endpoint = ?options.endpoint, "Connecting to MQTT broker");
        let event_loop_handle = tokio::spawn(Self::run_event_loop(
            event_loop,
            self.events_tx.clone(),
            self.connected.clone(),
            connack_tx,
        ));

        let mut guard = AbortOnDrop(Some(event_loop_handle.abort_handle()));

        let outcome = match tokio::time::timeout(options.communication_timeout, connack_rx).await
        {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::Connection(
                "event loop stopped before ConnAck".to_string(),
            )),
            Err(_) => Err(ClientError::Timeout(options.communication_timeout)),
        };
        outcome?;

        if event_loop_handle.is_finished() {
            return Err(ClientError::Connection(
                "connection closed right after ConnAck".to_string(),
            ));
        }

        *session = Some(Session {
            client,
            event_loop_handle,
        });
        self.connected.store(true, Ordering::SeqCst);
        guard.disarm();
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ClientError> {
        let Some(session) = self.session.lock().await.take() else {
            Self::mark_disconnected(
                &self.connected,
                &self.events_tx,
                "Client disconnected".to_string(),
            );
            return Ok(());
        };

        let result = session
            .client
            .disconnect()
            .await
            .map_err(|e| ClientError::Request(e.to_string()));

        match tokio::time::timeout(EVENT_LOOP_SHUTDOWN_GRACE, session.event_loop_handle).await {
            Ok(Ok(())) => debug!(target: "mqtt_transport", "Event loop task shut down gracefully"),
            Ok(Err(e)) if !e.is_cancelled() => warn!("Event loop task ended with error: {}", e),
            Err(_) => warn!("Event loop task didn't shut down gracefully"),
            _ => {}
        }

        Self::mark_disconnected(
            &self.connected,
            &self.events_tx,
            "Client disconnected".to_string(),
        );
        result
    }

    async fn subscribe(&self, filters: Vec<TopicFilter>) -> Result<(), ClientError> {
        let filters = filters
            .into_iter()
            .map(|filter| {
                to_rumqttc_qos(filter.qos.as_u8())
                    .map(|qos| SubscribeFilter::new(filter.filter, qos))
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.with_client(|client| async move { client.subscribe_many(filters).await })
            .await
    }

    async fn unsubscribe(&self, topics: Vec<String>) -> Result<(), ClientError> {
        self.with_client(|client| async move {
            for topic in topics {
                client.unsubscribe(topic).await?;
            }
            Ok(())
        })
        .await
    }

    async fn publish(&self, message: NativeMessage) -> Result<(), ClientError> {
        let qos = to_rumqttc_qos(message.qos)?;
        self.with_client(|client| async move {
            client
                .publish_bytes(message.topic, qos, message.retain, message.payload)
                .await
        })
        .await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events_tx.subscribe()
    }
}

impl Drop for RumqttcClient {
    fn drop(&mut self) {
        // Can't disconnect from Drop; only stop the background task
        if let Ok(mut session) = self.session.try_lock() {
            if let Some(session) = session.take() {
                session.event_loop_handle.abort();
            }
        }
    }
}
