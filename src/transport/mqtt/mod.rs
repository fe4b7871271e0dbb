//! MQTT protocol client built on rumqttc
//!
//! Split the same way as the rest of the transport layer: pure functions
//! separated from I/O so that translation and routing are testable without
//! a broker.
//!
//! - [`connection`] - Pure option translation (defaults, client ids, endpoints)
//! - [`message_handler`] - Pure event routing and message decoding
//! - [`client`] - Impure I/O around the rumqttc event loop
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_rx::protocol::{ConnectionOptions, ConnectionType};
//! use mqtt_rx::transport::mqtt::{translate_options, RumqttcClient};
//! use mqtt_rx::transport::ProtocolClient;
//!
//! # tokio_test::block_on(async {
//! let options = ConnectionOptions::new("tcp://localhost:1883".parse()?, ConnectionType::Tcp);
//! let client = RumqttcClient::new();
//! client.connect(translate_options(&options, None)?).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::RumqttcClient;
pub use connection::{
    generate_client_id, translate_options, translate_protocol_version, translate_will,
    DEFAULT_COMMUNICATION_TIMEOUT, DEFAULT_KEEP_ALIVE_PERIOD,
};
pub use message_handler::{EventRoute, MessageHandler};
