//! Entry point tying a protocol client, an orchestrator and the shared stream together

use super::orchestrator::{LifecycleOrchestrator, LifecycleState};
use super::shared::SharedMessageStream;
use crate::error::AdapterError;
use crate::mqtt_span;
use crate::protocol::{ConnectionOptions, QoSLevel, TopicFilter, WillMessage};
use crate::transport::{MqttTransport, NativeMessage, ProtocolClient};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, Instrument};

/// Builds shared message streams
pub struct MqttService;

impl MqttService {
    /// Create a stream backed by a fresh rumqttc client
    ///
    /// Nothing touches the network until the first observer subscribes to
    /// the returned stream.
    pub fn create_stream(
        options: ConnectionOptions,
        topic_filters: Vec<TopicFilter>,
        will: Option<WillMessage>,
    ) -> (SharedMessageStream<MqttTransport>, ConnectionHandle<MqttTransport>) {
        Self::create_stream_with_client(Arc::new(MqttTransport::new()), options, topic_filters, will)
    }

    /// Create a stream backed by the given client
    ///
    /// The client must not be driven by anything else; the new orchestrator
    /// starts with its connection flag false.
    pub fn create_stream_with_client<C: ProtocolClient>(
        client: Arc<C>,
        options: ConnectionOptions,
        topic_filters: Vec<TopicFilter>,
        will: Option<WillMessage>,
    ) -> (SharedMessageStream<C>, ConnectionHandle<C>) {
        debug!(
            uri = %options.uri,
            filters = topic_filters.len(),
            has_will = will.is_some(),
            "Creating shared message stream"
        );
        let orchestrator = Arc::new(LifecycleOrchestrator::new(
            client,
            options,
            topic_filters,
            will,
        ));

        let stream = SharedMessageStream::new(orchestrator.clone());
        let handle = ConnectionHandle { orchestrator };
        (stream, handle)
    }
}

/// Imperative operations against the stream's live connection
///
/// Operations fail with [`AdapterError::NotConnected`] unless a session
/// currently holds an acknowledged connection.
pub struct ConnectionHandle<C: ProtocolClient> {
    orchestrator: Arc<LifecycleOrchestrator<C>>,
}

impl<C: ProtocolClient> Clone for ConnectionHandle<C> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: self.orchestrator.clone(),
        }
    }
}

impl<C: ProtocolClient> ConnectionHandle<C> {
    pub fn is_connected(&self) -> bool {
        self.orchestrator.is_connected()
    }

    pub fn state(&self) -> LifecycleState {
        self.orchestrator.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<LifecycleState> {
        self.orchestrator.watch_state()
    }

    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.orchestrator.watch_connected()
    }

    fn live_client(&self) -> Result<&Arc<C>, AdapterError> {
        if !self.orchestrator.is_connected() {
            return Err(AdapterError::NotConnected {
                state: self.orchestrator.state(),
            });
        }
        Ok(self.orchestrator.client())
    }

    pub async fn publish(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        qos: QoSLevel,
        retain: bool,
    ) -> Result<(), AdapterError> {
        let client = self.live_client()?;
        let message = NativeMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos: qos.as_u8(),
            retain,
        };
        let span = mqtt_span!(operation = "publish", topic = %message.topic);
        client
            .publish(message)
            .instrument(span)
            .await
            .map_err(AdapterError::PublishFailure)
    }

    pub async fn subscribe(&self, filters: Vec<TopicFilter>) -> Result<(), AdapterError> {
        let client = self.live_client()?;
        let span = mqtt_span!(operation = "subscribe", filters = filters.len());
        client
            .subscribe(filters)
            .instrument(span)
            .await
            .map_err(AdapterError::SubscribeFailure)
    }

    pub async fn unsubscribe(&self, topics: Vec<String>) -> Result<(), AdapterError> {
        let client = self.live_client()?;
        let span = mqtt_span!(operation = "unsubscribe", topics = topics.len());
        client
            .unsubscribe(topics)
            .instrument(span)
            .await
            .map_err(AdapterError::UnsubscribeFailure)
    }
}
