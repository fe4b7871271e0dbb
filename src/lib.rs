//! mqtt-rx - MQTT connections as shared message streams
//!
//! Turns an event-driven MQTT client (connected, message-received and
//! disconnected events) into one lazily-started stream of decoded messages
//! that any number of observers can share.
//!
//! # Overview
//!
//! - The first observer to subscribe connects the client and subscribes to
//!   the configured topic filters.
//! - Every observer sees the messages published after it attached.
//! - The stream completes when the broker disconnects and fails on connect,
//!   subscribe or decode errors.
//! - When the last observer goes away the client is disconnected, waiting at
//!   most five seconds.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use mqtt_rx::protocol::{ConnectionOptions, ConnectionType, TopicFilter};
//! use mqtt_rx::service::MqttService;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let options = ConnectionOptions::new("tcp://localhost:1883".parse()?, ConnectionType::Tcp);
//! let (stream, handle) = MqttService::create_stream(options, vec![TopicFilter::from("a/b")], None);
//!
//! let mut messages = stream.subscribe();
//! while let Some(message) = messages.next().await {
//!     let message = message?;
//!     println!("{}: {}", message.topic, message.payload_str());
//! }
//! # drop(handle);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod service;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, ServiceConfig};
pub use error::{AdapterError, AdapterResult};
pub use protocol::*;
pub use service::{ConnectionHandle, LifecycleState, MessageStream, MqttService, SharedMessageStream};
pub use transport::{ClientError, ClientEvent, ProtocolClient};
