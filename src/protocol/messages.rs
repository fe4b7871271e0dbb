//! Message value types exchanged with stream consumers
//!
//! Defines the normalized message delivered on the shared stream, the
//! optional last-will message, topic filters, and the QoS enum with its
//! strict conversion to and from the wire-level numeric levels.

use crate::error::AdapterError;
use bytes::Bytes;
use std::fmt;

/// Delivery guarantee level for a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QoSLevel {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QoSLevel {
    /// Numeric level as carried on the wire (0, 1 or 2)
    pub fn as_u8(self) -> u8 {
        match self {
            QoSLevel::AtMostOnce => 0,
            QoSLevel::AtLeastOnce => 1,
            QoSLevel::ExactlyOnce => 2,
        }
    }
}

impl From<QoSLevel> for u8 {
    fn from(qos: QoSLevel) -> Self {
        qos.as_u8()
    }
}

/// Strict conversion: anything outside 0..=2 is a library/version mismatch
/// and must never be coerced to a nearby level.
impl TryFrom<u8> for QoSLevel {
    type Error = AdapterError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(QoSLevel::AtMostOnce),
            1 => Ok(QoSLevel::AtLeastOnce),
            2 => Ok(QoSLevel::ExactlyOnce),
            other => Err(AdapterError::UnknownQoSLevel(other)),
        }
    }
}

impl fmt::Display for QoSLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QoSLevel::AtMostOnce => "at-most-once",
            QoSLevel::AtLeastOnce => "at-least-once",
            QoSLevel::ExactlyOnce => "exactly-once",
        };
        write!(f, "{name}")
    }
}

/// A decoded inbound message as seen by stream observers
///
/// Created once per inbound publish. Two messages with equal fields are
/// indistinguishable; no deduplication happens at this layer.
///
/// # Examples
/// ```
/// use mqtt_rx::protocol::{NormalizedMessage, QoSLevel};
///
/// let message = NormalizedMessage::new("sensors/temp", &b"21.5"[..], QoSLevel::AtLeastOnce, false);
/// assert_eq!(message.topic, "sensors/temp");
/// assert_eq!(message.payload_str(), "21.5");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMessage {
    pub topic: String,
    pub payload: Bytes,
    pub retain: bool,
    pub qos: QoSLevel,
}

impl NormalizedMessage {
    pub fn new(
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        qos: QoSLevel,
        retain: bool,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain,
            qos,
        }
    }

    /// Payload rendered as UTF-8, replacing invalid sequences
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Message the broker publishes on our behalf if we vanish without a clean disconnect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WillMessage {
    pub topic: String,
    pub payload: Bytes,
    pub retain: bool,
    pub qos: QoSLevel,
}

impl WillMessage {
    pub fn new(
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        qos: QoSLevel,
        retain: bool,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain,
            qos,
        }
    }
}

/// Subscription filter handed through to the protocol client untouched
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicFilter {
    pub filter: String,
    pub qos: QoSLevel,
}

impl TopicFilter {
    pub fn new(filter: impl Into<String>, qos: QoSLevel) -> Self {
        Self {
            filter: filter.into(),
            qos,
        }
    }
}

impl From<&str> for TopicFilter {
    fn from(filter: &str) -> Self {
        Self::new(filter, QoSLevel::AtMostOnce)
    }
}
