//! MQTT message types and topic rules
//!
//! This module holds the value types that flow between transports, the session
//! manager and handlers, plus topic validation and wildcard matching.

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
