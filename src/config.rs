//! TOML configuration for the stream service
//!
//! A config file describes one broker connection, the filters to subscribe
//! to once connected, and an optional last will. Credentials are never
//! stored in the file; it only names the environment variables holding them.

use crate::protocol::{
    ConnectionOptions, ConnectionType, Credentials, ProtocolVersion, QoSLevel, TopicFilter,
    WillMessage,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    pub connection: ConnectionSection,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionEntry>,
    pub will: Option<WillSection>,
}

/// Transport named in the config file
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Tcp,
    Websocket,
}

impl From<TransportKind> for ConnectionType {
    fn from(kind: TransportKind) -> Self {
        match kind {
            TransportKind::Tcp => ConnectionType::Tcp,
            TransportKind::Websocket => ConnectionType::WebSocket,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionSection {
    /// Broker URI, e.g. `tcp://broker:1883` or `wss://broker/mqtt`
    pub uri: String,
    #[serde(default)]
    pub connection_type: TransportKind,
    /// Fixed client id; a random one is generated per connection when absent
    pub client_id: Option<String>,
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default)]
    pub allow_untrusted_certificates: bool,
    #[serde(default)]
    pub ignore_certificate_chain_errors: bool,
    /// PEM or DER files, read in order into the certificate chain
    #[serde(default)]
    pub certificate_paths: Vec<PathBuf>,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    /// Seconds; 0 selects the client default
    #[serde(default)]
    pub communication_timeout_secs: u64,
    /// Seconds; 0 selects the client default
    #[serde(default)]
    pub keep_alive_secs: u64,
}

fn default_clean_session() -> bool {
    true
}

fn default_protocol_version() -> String {
    ProtocolVersion::V311.as_str().to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionEntry {
    pub topic: String,
    #[serde(default)]
    pub qos: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WillSection {
    pub topic: String,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub retain: bool,
    #[serde(default)]
    pub qos: u8,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid broker URI '{uri}': {source}")]
    InvalidUri {
        uri: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Invalid QoS level {qos} for '{topic}'")]
    InvalidQoS { topic: String, qos: u8 },
    #[error("Unknown protocol version: {0}")]
    InvalidProtocolVersion(String),
    #[error("Failed to read certificate {path}: {source}")]
    CertificateRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ServiceConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check everything that can be checked without touching the filesystem
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.broker_uri()?;
        self.protocol_version()?;
        self.topic_filters()?;
        self.will_message()?;
        Ok(())
    }

    fn broker_uri(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.connection.uri).map_err(|source| ConfigError::InvalidUri {
            uri: self.connection.uri.clone(),
            source,
        })
    }

    fn protocol_version(&self) -> Result<ProtocolVersion, ConfigError> {
        ProtocolVersion::parse(&self.connection.protocol_version).ok_or_else(|| {
            ConfigError::InvalidProtocolVersion(self.connection.protocol_version.clone())
        })
    }

    /// Username from the configured environment variable, if set
    pub fn username(&self) -> Option<String> {
        get_env_var_optional(self.connection.username_env.as_deref())
    }

    /// Password from the configured environment variable, if set
    pub fn password(&self) -> Option<String> {
        get_env_var_optional(self.connection.password_env.as_deref())
    }

    /// Build connection options, resolving credentials and reading certificates
    pub fn connection_options(&self) -> Result<ConnectionOptions, ConfigError> {
        let section = &self.connection;

        let certificates = section
            .certificate_paths
            .iter()
            .map(|path| {
                std::fs::read(path).map_err(|source| ConfigError::CertificateRead {
                    path: path.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ConnectionOptions {
            uri: self.broker_uri()?,
            connection_type: section.connection_type.into(),
            client_id: section.client_id.clone(),
            clean_session: section.clean_session,
            credentials: self.username().map(|username| Credentials {
                username,
                password: self.password(),
            }),
            allow_untrusted_certificates: section.allow_untrusted_certificates,
            ignore_certificate_chain_errors: section.ignore_certificate_chain_errors,
            certificates,
            protocol_version: self.protocol_version()?,
            communication_timeout: Duration::from_secs(section.communication_timeout_secs),
            keep_alive_period: Duration::from_secs(section.keep_alive_secs),
        })
    }

    pub fn topic_filters(&self) -> Result<Vec<TopicFilter>, ConfigError> {
        self.subscriptions
            .iter()
            .map(|entry| {
                Ok(TopicFilter::new(
                    entry.topic.clone(),
                    qos_level(&entry.topic, entry.qos)?,
                ))
            })
            .collect()
    }

    pub fn will_message(&self) -> Result<Option<WillMessage>, ConfigError> {
        self.will
            .as_ref()
            .map(|will| {
                Ok(WillMessage::new(
                    will.topic.clone(),
                    will.payload.clone(),
                    qos_level(&will.topic, will.qos)?,
                    will.retain,
                ))
            })
            .transpose()
    }
}

fn qos_level(topic: &str, qos: u8) -> Result<QoSLevel, ConfigError> {
    QoSLevel::try_from(qos).map_err(|_| ConfigError::InvalidQoS {
        topic: topic.to_string(),
        qos,
    })
}

fn get_env_var_optional(env_var_name: Option<&str>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}
