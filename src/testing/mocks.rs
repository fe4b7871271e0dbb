//! Mock protocol client for testing
//!
//! Records every call, can be told to fail or stall, and lets tests raise
//! client events by hand.

use crate::protocol::TopicFilter;
use crate::transport::{ClientError, ClientEvent, NativeMessage, NativeOptions, ProtocolClient};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};

const MOCK_EVENT_CAPACITY: usize = 64;

/// Mock protocol client
///
/// `connect` marks the client connected and raises [`ClientEvent::Connected`]
/// the way a real client reports the broker's acknowledgment. With
/// [`with_background_connect`](Self::with_background_connect) the handshake
/// runs on its own task and completes even if the `connect` future is
/// dropped, like a client whose connect is not cancel-safe.
pub struct MockProtocolClient {
    connected: Arc<AtomicBool>,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    events_tx: broadcast::Sender<ClientEvent>,
    connect_options: Mutex<Vec<NativeOptions>>,
    subscriptions: Mutex<Vec<Vec<TopicFilter>>>,
    unsubscriptions: Mutex<Vec<Vec<String>>>,
    published: Mutex<Vec<NativeMessage>>,
    connect_failure: Option<ClientError>,
    subscribe_failure: Option<ClientError>,
    disconnect_failure: bool,
    connect_delay: Option<Duration>,
    subscribe_delay: Option<Duration>,
    disconnect_delay: Option<Duration>,
    background_connect: bool,
    silent_connect: bool,
}

impl Default for MockProtocolClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProtocolClient {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(MOCK_EVENT_CAPACITY);
        Self {
            connected: Arc::new(AtomicBool::new(false)),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            events_tx,
            connect_options: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            unsubscriptions: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            connect_failure: None,
            subscribe_failure: None,
            disconnect_failure: false,
            connect_delay: None,
            subscribe_delay: None,
            disconnect_delay: None,
            background_connect: false,
            silent_connect: false,
        }
    }

    pub fn with_connect_failure(mut self, error: ClientError) -> Self {
        self.connect_failure = Some(error);
        self
    }

    pub fn with_subscribe_failure(mut self, error: ClientError) -> Self {
        self.subscribe_failure = Some(error);
        self
    }

    pub fn with_disconnect_failure(mut self) -> Self {
        self.disconnect_failure = true;
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    pub fn with_subscribe_delay(mut self, delay: Duration) -> Self {
        self.subscribe_delay = Some(delay);
        self
    }

    pub fn with_disconnect_delay(mut self, delay: Duration) -> Self {
        self.disconnect_delay = Some(delay);
        self
    }

    pub fn with_background_connect(mut self) -> Self {
        self.background_connect = true;
        self
    }

    /// Resolve `connect` without raising [`ClientEvent::Connected`]
    pub fn with_silent_connect(mut self) -> Self {
        self.silent_connect = true;
        self
    }

    /// Force the connected flag, bypassing `connect`
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Raise an event as if the client produced it; returns the number of listeners
    pub fn emit(&self, event: ClientEvent) -> usize {
        self.events_tx.send(event).unwrap_or(0)
    }

    /// Raise an inbound application message
    pub fn emit_message(&self, topic: &str, payload: &'static [u8], qos: u8, retain: bool) -> usize {
        self.emit(ClientEvent::MessageReceived(NativeMessage {
            topic: topic.to_string(),
            payload: bytes::Bytes::from_static(payload),
            qos,
            retain,
        }))
    }

    /// Number of event listeners currently registered
    pub fn listener_count(&self) -> usize {
        self.events_tx.receiver_count()
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn connect_options(&self) -> Vec<NativeOptions> {
        lock(&self.connect_options).clone()
    }

    pub fn subscriptions(&self) -> Vec<Vec<TopicFilter>> {
        lock(&self.subscriptions).clone()
    }

    pub fn unsubscriptions(&self) -> Vec<Vec<String>> {
        lock(&self.unsubscriptions).clone()
    }

    pub fn published(&self) -> Vec<NativeMessage> {
        lock(&self.published).clone()
    }
}

async fn handshake(
    connected: Arc<AtomicBool>,
    events_tx: broadcast::Sender<ClientEvent>,
    delay: Option<Duration>,
    failure: Option<ClientError>,
    announce: bool,
) -> Result<(), ClientError> {
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    if let Some(error) = failure {
        return Err(error);
    }

    connected.store(true, Ordering::SeqCst);
    if announce {
        let _ = events_tx.send(ClientEvent::Connected);
    }
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl ProtocolClient for MockProtocolClient {
    async fn connect(&self, options: NativeOptions) -> Result<(), ClientError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.connect_options).push(options);

        let handshake = handshake(
            self.connected.clone(),
            self.events_tx.clone(),
            self.connect_delay,
            self.connect_failure.clone(),
            !self.silent_connect,
        );
        if !self.background_connect {
            return handshake.await;
        }

        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = done_tx.send(handshake.await);
        });
        done_rx.await.unwrap_or(Err(ClientError::Closed))
    }

    async fn disconnect(&self) -> Result<(), ClientError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.disconnect_delay {
            tokio::time::sleep(delay).await;
        }
        if self.disconnect_failure {
            return Err(ClientError::Connection("mock disconnect failure".to_string()));
        }

        self.connected.store(false, Ordering::SeqCst);
        let _ = self.events_tx.send(ClientEvent::Disconnected {
            reason: "Client disconnected".to_string(),
        });
        Ok(())
    }

    async fn subscribe(&self, filters: Vec<TopicFilter>) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        if let Some(delay) = self.subscribe_delay {
            tokio::time::sleep(delay).await;
        }
        lock(&self.subscriptions).push(filters);
        match &self.subscribe_failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn unsubscribe(&self, topics: Vec<String>) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        lock(&self.unsubscriptions).push(topics);
        Ok(())
    }

    async fn publish(&self, message: NativeMessage) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        lock(&self.published).push(message);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events_tx.subscribe()
    }
}
