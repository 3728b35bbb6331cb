//! rumqttc-backed MQTT transport
//!
//! This module separates pure functions from I/O operations:
//!
//! - [`options`] - Pure option building (protocol version, TLS, credentials)
//! - [`event_router`] - Pure routing of rumqttc events
//! - [`client`] - Impure I/O: the client, its event-loop driver and the
//!   [`Transport`](crate::transport::Transport) implementation
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_session::transport::mqtt::RumqttcTransport;
//! use mqtt_session::{SessionConfig, SessionManager};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig::default();
//! let transport = Arc::new(RumqttcTransport::new(config.clone()));
//! let session = SessionManager::new(config, transport);
//! session.connect().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod event_router;
pub mod options;

// Re-export public types for convenience
pub use client::RumqttcTransport;
pub use event_router::{route_v4_event, route_v5_event, EventRoute};
pub use options::{build_tls_transport, build_v4_options, build_v5_options};
