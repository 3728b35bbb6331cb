//! Transport layer for the session manager
//!
//! This module provides the transport abstraction the session manager drives
//! and the rumqttc-backed MQTT implementation of it.

use crate::protocol::{InboundMessage, QoS};
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod mqtt;

/// Events produced by one transport connection
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// PUBLISH received from the broker
    Message(InboundMessage),
    /// Connection closed without being asked to (network error, broker
    /// DISCONNECT, keep-alive timeout)
    Closed(String),
}

/// Stream of events for a single connection
///
/// The sending half is dropped when the connection ends, so a `None` from
/// `recv()` means the same thing as [`TransportEvent::Closed`].
pub type EventStream = mpsc::UnboundedReceiver<TransportEvent>;

/// Transport-level errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Transport is not connected")]
    NotConnected,
    #[error("TLS configuration error: {0}")]
    Tls(String),
    #[error("Request failed")]
    Request(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// Some filters were unsubscribed before a request failed
    #[error("Unsubscribe stopped with {} filter(s) not sent", .unsent.len())]
    PartialUnsubscribe {
        unsent: Vec<String>,
        #[source]
        source: Box<TransportError>,
    },
}

/// Transport trait for the session manager
///
/// This trait provides an abstraction over the MQTT client library so the
/// session manager can be driven by a fake in tests.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection and wait for the broker handshake
    ///
    /// Any previous connection is torn down first. The returned stream carries
    /// the inbound messages and the close notification for this connection.
    async fn connect(&self, clean_session: bool) -> Result<EventStream, TransportError>;

    /// Disconnect from the broker
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Publish a message on a topic
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError>;

    /// Subscribe to all filters in a single request
    async fn subscribe(&self, filters: &[(String, QoS)]) -> Result<(), TransportError>;

    /// Unsubscribe from all filters
    ///
    /// Transports that send one request per filter report a failure after
    /// the first filter as [`TransportError::PartialUnsubscribe`].
    async fn unsubscribe(&self, filters: &[String]) -> Result<(), TransportError>;
}
