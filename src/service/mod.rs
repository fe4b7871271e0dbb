//! Lifecycle orchestration, connection sharing and the service entry point
//!
//! - [`orchestrator`] - Per-session state machine and bounded cleanup
//! - [`shared`] - Reference-counted multiplexing of one session to many observers
//! - [`facade`] - `MqttService::create_stream` and the connection handle

pub mod facade;
pub mod orchestrator;
pub mod shared;

pub use facade::{ConnectionHandle, MqttService};
pub use orchestrator::{
    cleanup, CleanupOutcome, LifecycleOrchestrator, LifecycleState, DISCONNECT_TIMEOUT,
};
pub use shared::{Fanout, MessageStream, SharedMessageStream, StreamItem};
