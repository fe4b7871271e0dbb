//! Protocol-agnostic connection options
//!
//! These are the caller-facing settings. They are translated once per
//! connection attempt into the protocol client's native options by
//! [`crate::transport::mqtt::connection::translate_options`].

use std::time::Duration;
use url::Url;

/// Transport used to reach the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionType {
    #[default]
    Tcp,
    WebSocket,
}

/// MQTT protocol revision requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    /// MQTT 3.1
    V310,
    /// MQTT 3.1.1
    #[default]
    V311,
    /// MQTT 5.0, accepted in configuration but not supported by the adapter
    V500,
}

impl ProtocolVersion {
    /// Parse the dotted form used in configuration files ("3.1", "3.1.1", "5.0")
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "3.1" | "3.1.0" => Some(ProtocolVersion::V310),
            "3.1.1" => Some(ProtocolVersion::V311),
            "5" | "5.0" => Some(ProtocolVersion::V500),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::V310 => "3.1",
            ProtocolVersion::V311 => "3.1.1",
            ProtocolVersion::V500 => "5.0",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

/// Settings for one broker connection
///
/// `Duration::ZERO` in either timeout field means "unset" and is replaced by
/// the defaults (10s communication timeout, 5s keep-alive) at translation time.
///
/// # Examples
/// ```
/// use mqtt_rx::protocol::{ConnectionOptions, ConnectionType};
///
/// let options = ConnectionOptions::new("tcp://broker:1883".parse().unwrap(), ConnectionType::Tcp);
/// assert!(options.client_id.is_none());
/// assert!(options.clean_session);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionOptions {
    pub uri: Url,
    pub connection_type: ConnectionType,
    /// `None` generates a fresh identifier per connection attempt
    pub client_id: Option<String>,
    pub clean_session: bool,
    pub credentials: Option<Credentials>,
    pub allow_untrusted_certificates: bool,
    pub ignore_certificate_chain_errors: bool,
    /// Opaque certificate blobs, in chain order
    pub certificates: Vec<Vec<u8>>,
    pub protocol_version: ProtocolVersion,
    pub communication_timeout: Duration,
    pub keep_alive_period: Duration,
}

impl ConnectionOptions {
    pub fn new(uri: Url, connection_type: ConnectionType) -> Self {
        Self {
            uri,
            connection_type,
            client_id: None,
            clean_session: true,
            credentials: None,
            allow_untrusted_certificates: false,
            ignore_certificate_chain_errors: false,
            certificates: Vec::new(),
            protocol_version: ProtocolVersion::default(),
            communication_timeout: Duration::ZERO,
            keep_alive_period: Duration::ZERO,
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password,
        });
        self
    }

    pub fn with_protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = version;
        self
    }
}
