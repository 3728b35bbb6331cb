//! Pure routing of rumqttc events
//!
//! The event-loop driver only needs to know a handful of things about each
//! packet; these functions reduce both protocol versions to one
//! [`EventRoute`].

use super::options::{from_v4_qos, from_v5_qos};
use crate::protocol::InboundMessage;

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// PUBLISH from the broker
    MessageReceived(InboundMessage),
    /// Broker sent DISCONNECT
    Disconnected(String),
    /// Infrastructure event (PingResp, SubAck, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

/// Route an MQTT 3.1.1 event
pub fn route_v4_event(event: &rumqttc::Event) -> EventRoute {
    use rumqttc::{Event, Packet};

    match event {
        Event::Incoming(Packet::ConnAck(_)) => EventRoute::ConnectionAcknowledged,
        Event::Incoming(Packet::Publish(publish)) => EventRoute::MessageReceived(InboundMessage::new(
            publish.topic.clone(),
            publish.payload.clone(),
            from_v4_qos(publish.qos),
            publish.retain,
        )),
        Event::Incoming(Packet::Disconnect) => {
            EventRoute::Disconnected("broker sent DISCONNECT".to_string())
        }
        Event::Incoming(other) => EventRoute::InfrastructureEvent(format!("{other:?}")),
        Event::Outgoing(_) => EventRoute::OutgoingEvent,
    }
}

/// Route an MQTT 5 event
pub fn route_v5_event(event: &rumqttc::v5::Event) -> EventRoute {
    use rumqttc::v5::mqttbytes::v5::Packet;
    use rumqttc::v5::Event;

    match event {
        Event::Incoming(Packet::ConnAck(_)) => EventRoute::ConnectionAcknowledged,
        Event::Incoming(Packet::Publish(publish)) => EventRoute::MessageReceived(InboundMessage::new(
            String::from_utf8_lossy(&publish.topic).to_string(),
            publish.payload.clone(),
            from_v5_qos(publish.qos),
            publish.retain,
        )),
        Event::Incoming(Packet::Disconnect(disconnect)) => EventRoute::Disconnected(format!(
            "broker sent DISCONNECT ({:?})",
            disconnect.reason_code
        )),
        Event::Incoming(other) => EventRoute::InfrastructureEvent(format!("{other:?}")),
        Event::Outgoing(_) => EventRoute::OutgoingEvent,
    }
}
