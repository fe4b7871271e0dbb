//! Protocol client abstraction
//!
//! The adapter never speaks MQTT itself. It drives an injected
//! [`ProtocolClient`], which owns the socket, the wire codec and TLS, and
//! reports its lifecycle through a single event channel.

use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

pub mod mqtt;

/// Events raised by a protocol client
///
/// Connect acknowledgment, inbound application messages and disconnect
/// notifications travel on one channel so that a single consumer sees them
/// in the order the client produced them.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Broker acknowledged the connection
    Connected,
    /// Application message received on a subscribed topic
    MessageReceived(NativeMessage),
    /// Connection closed, by either side
    Disconnected { reason: String },
}

/// Application message in the client's own representation
///
/// The QoS is the raw numeric level so that an out-of-range value coming
/// from the library stays representable and can be rejected by the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: u8,
    pub retain: bool,
}

/// Where the broker lives and how to reach it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEndpoint {
    Tcp { host: String, port: u16 },
    WebSocket { url: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeProtocolVersion {
    V310,
    V311,
}

/// TLS settings handed to the protocol client
///
/// The relaxation flags are requests, not guarantees. [`mqtt::RumqttcClient`]
/// always verifies the broker chain with rustls: it logs a warning and ignores
/// `allow_untrusted_certificates` and `ignore_certificate_chain_errors`, and
/// rustls performs no revocation checks, so `ignore_certificate_revocation_errors`
/// changes nothing there. Trust a private CA through `certificates` instead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsSettings {
    pub enabled: bool,
    /// Accept certificates that don't chain to a trusted root (ignored by rumqttc)
    pub allow_untrusted_certificates: bool,
    /// Accept chain validation errors (ignored by rumqttc)
    pub ignore_certificate_chain_errors: bool,
    pub ignore_certificate_revocation_errors: bool,
    /// Extra certificates, in chain order; empty means none
    pub certificates: Vec<Vec<u8>>,
}

/// Connection options in the form the protocol client consumes
#[derive(Debug, Clone, PartialEq)]
pub struct NativeOptions {
    pub endpoint: BrokerEndpoint,
    pub client_id: String,
    pub clean_session: bool,
    pub credentials: Option<(String, String)>,
    pub tls: TlsSettings,
    pub protocol_version: NativeProtocolVersion,
    pub communication_timeout: Duration,
    pub keep_alive: Duration,
    pub will: Option<NativeMessage>,
}

/// Errors reported by a protocol client
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("request rejected: {0}")]
    Request(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("unsupported by this client: {0}")]
    Unsupported(String),
    #[error("client is not connected")]
    NotConnected,
    #[error("client closed")]
    Closed,
}

/// Event-driven publish/subscribe client driven by the adapter
///
/// Implementations must be safe to share between the lifecycle task and the
/// imperative connection handle, so every operation takes `&self`.
#[async_trait::async_trait]
pub trait ProtocolClient: Send + Sync + 'static {
    /// Connect and resolve once the broker has acknowledged
    ///
    /// Implementations should raise [`ClientEvent::Connected`] before resolving.
    /// Dropping the returned future before it resolves must not leave a
    /// connection open behind the caller's back.
    async fn connect(&self, options: NativeOptions) -> Result<(), ClientError>;

    /// Disconnect from the broker
    async fn disconnect(&self) -> Result<(), ClientError>;

    /// Subscribe to all filters in one request
    async fn subscribe(&self, filters: Vec<crate::protocol::TopicFilter>)
    -> Result<(), ClientError>;

    /// Remove subscriptions for the given topics
    async fn unsubscribe(&self, topics: Vec<String>) -> Result<(), ClientError>;

    /// Publish an application message
    async fn publish(&self, message: NativeMessage) -> Result<(), ClientError>;

    /// Whether the client currently holds an acknowledged connection
    fn is_connected(&self) -> bool;

    /// Register for lifecycle and message events; drop the receiver to unregister
    fn events(&self) -> broadcast::Receiver<ClientEvent>;
}

/// Type alias for the rumqttc-backed client
pub type MqttTransport = mqtt::RumqttcClient;
