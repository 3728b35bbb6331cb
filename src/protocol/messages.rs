//! Message value types shared by the session manager and its transports
//!
//! [`InboundMessage`] is what a transport hands to the session; [`Message`] is
//! the decoded form that registered handlers receive.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::Utf8Error;

/// MQTT quality-of-service level
///
/// # Examples
/// ```
/// use mqtt_session::protocol::QoS;
///
/// let qos = QoS::try_from(2u8).unwrap();
/// assert_eq!(qos, QoS::ExactlyOnce);
/// assert_eq!(u8::from(qos), 2);
/// assert!(QoS::try_from(3u8).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    /// 0 - at most once
    AtMostOnce,
    /// 1 - at least once
    AtLeastOnce,
    /// 2 - exactly once
    ExactlyOnce,
}

/// Returned when a number is not a valid QoS level
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Invalid QoS level: {0} (expected 0, 1 or 2)")]
pub struct InvalidQos(pub u8);

impl TryFrom<u8> for QoS {
    type Error = InvalidQos;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(InvalidQos(other)),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// Raw message as delivered by a transport
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: QoS, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        }
    }

    /// Decode the payload as UTF-8 text
    pub fn decode(&self) -> Result<Message, Utf8Error> {
        let payload = std::str::from_utf8(&self.payload)?.to_string();
        Ok(Message {
            topic: self.topic.clone(),
            payload,
            qos: self.qos,
            retain: self.retain,
        })
    }
}

/// Decoded message handed to registered handlers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
}
