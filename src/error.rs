//! Error types for the stream adapter
//!
//! Every connect, subscribe and decode failure is surfaced to observers as a
//! terminal stream error. `DisconnectTimeout` is the one variant that never
//! reaches an observer: cleanup logs it and carries on.

use crate::service::LifecycleState;
use crate::transport::ClientError;
use std::time::Duration;
use thiserror::Error;

/// Main error type for adapter operations
///
/// `Clone` so a single terminal error can be delivered to every observer of
/// a shared stream.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    #[error("Connection failed: {0}")]
    ConnectFailure(#[source] ClientError),

    #[error("Subscription failed: {0}")]
    SubscribeFailure(#[source] ClientError),

    #[error("Unsubscribe failed: {0}")]
    UnsubscribeFailure(#[source] ClientError),

    #[error("Publishing failed: {0}")]
    PublishFailure(#[source] ClientError),

    #[error("Unsupported protocol version: {0}")]
    UnsupportedProtocolVersion(String),

    #[error("Unknown QoS level: {0}")]
    UnknownQoSLevel(u8),

    #[error("Disconnect did not complete within {0:?}")]
    DisconnectTimeout(Duration),

    #[error("Invalid broker URI: {0}")]
    InvalidBrokerUri(String),

    #[error("Event stream lagged, {0} events were dropped")]
    EventStreamLagged(u64),

    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: LifecycleState },
}

/// Result type for adapter operations
pub type AdapterResult<T> = Result<T, AdapterError>;
