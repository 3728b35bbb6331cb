//! MQTT Session - resilient MQTT client sessions
//!
//! A session manager that keeps one logical connection to an MQTT broker
//! alive across network failures.
//!
//! # Overview
//!
//! This crate provides:
//! - Connect and automatic reconnect with capped exponential backoff
//! - A desired subscription set that is replayed after every reconnect
//! - Named message handlers keyed by topic filter, isolated from each other
//! - A `Transport` abstraction with a rumqttc implementation (MQTT 3.1.1 and 5)
//!   and a mock for tests
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mqtt_session::transport::mqtt::RumqttcTransport;
//! use mqtt_session::{QoS, SessionConfig, SessionManager};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig::default();
//! let session = SessionManager::new(config.clone(), Arc::new(RumqttcTransport::new(config)));
//!
//! session.on_message("printer", "home/#", |msg| {
//!     println!("{}: {}", msg.topic, msg.payload);
//!     Ok(())
//! })?;
//! session.connect().await?;
//! session.subscribe(&["home/kitchen/light"], QoS::ExactlyOnce).await?;
//! session
//!     .publish_str("home/kitchen/light", r#"{"msg": "hello"}"#, QoS::AtLeastOnce, false)
//!     .await?;
//! session.wait_for_shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod session;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, ProtocolVersion, ReconnectConfig, SessionConfig};
pub use error::{SessionError, SessionResult};
pub use protocol::{InboundMessage, Message, QoS};
pub use session::{ConnectionState, SessionManager, StatsSnapshot, SubscriptionSet};
pub use transport::{Transport, TransportError, TransportEvent};
