//! Testing utilities and mock implementations
//!
//! Lets the lifecycle and sharing logic be exercised without an MQTT broker.

pub mod mocks;

pub use mocks::*;
