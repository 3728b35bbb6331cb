//! Resilient MQTT session
//!
//! [`SessionManager`] owns one logical broker connection. The pure pieces it
//! is built from live in their own modules:
//!
//! - [`state`]: connection state machine
//! - [`reconnect`]: backoff and retry decisions
//! - [`subscriptions`]: desired subscription set replayed after reconnect
//! - [`dispatch`]: handler registry and isolated delivery
//! - [`stats`]: counters

pub mod dispatch;
pub mod manager;
pub mod reconnect;
pub mod state;
pub mod stats;
pub mod subscriptions;

pub use dispatch::{DeliveryReport, HandlerError, HandlerFn, HandlerRegistry};
pub use manager::SessionManager;
pub use reconnect::{should_attempt_reconnection, ReconnectionDecision};
pub use state::{ConnectionState, LifecycleEvent};
pub use stats::{SessionStats, StatsSnapshot};
pub use subscriptions::{SubscriptionChange, SubscriptionSet};
