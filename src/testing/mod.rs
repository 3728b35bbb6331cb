//! Testing utilities and mock implementations
//!
//! This module provides a mock transport so the session manager can be
//! exercised without an MQTT broker.

pub mod mocks;

pub use mocks::*;
