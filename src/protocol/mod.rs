//! Caller-facing value types
//!
//! Connection options, the normalized message delivered to observers, the
//! optional last-will message and the QoS enum.

pub mod messages;
pub mod options;

pub use messages::*;
pub use options::*;
