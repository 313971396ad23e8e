//! Pure routing of rumqttc events
//!
//! The poll task in [`super::client`] asks [`MessageHandler`] what an event
//! means and acts on the answer; nothing here performs I/O.

use crate::error::ConnectionError;
use crate::protocol::frames::QosLevel;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet};
use rumqttc::v5::{mqttbytes::QoS, Event};
use std::time::Duration;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(ack) if ack.code == ConnectReturnCode::Success => {
                    EventRoute::ConnectionAcknowledged
                }
                Packet::ConnAck(ack) => EventRoute::ConnectionRefused(ack.code),
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).into_owned(),
                    payload: String::from_utf8_lossy(&publish.payload).into_owned(),
                    retain: publish.retain,
                },
                Packet::Disconnect(disconnect) => EventRoute::Disconnected {
                    reason: format!("{:?}", disconnect.reason_code),
                },
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    return_codes: suback
                        .return_codes
                        .iter()
                        .map(|code| format!("{code:?}"))
                        .collect(),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Classify a rumqttc connection error
    ///
    /// Refusals for bad credentials or missing authorization are `Auth`;
    /// network timeouts are `Timeout`; everything else is `Network`.
    pub fn classify_error(
        error: &rumqttc::v5::ConnectionError,
        handshake_timeout: Duration,
    ) -> ConnectionError {
        match error {
            rumqttc::v5::ConnectionError::ConnectionRefused(code) => Self::classify_refusal(*code),
            rumqttc::v5::ConnectionError::Timeout(_) => ConnectionError::Timeout(handshake_timeout),
            other => ConnectionError::Network(other.to_string()),
        }
    }

    /// Classify a ConnAck refusal code
    pub fn classify_refusal(code: ConnectReturnCode) -> ConnectionError {
        match code {
            ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized => {
                ConnectionError::Auth(format!("broker refused credentials: {code:?}"))
            }
            other => ConnectionError::Network(format!("broker refused connection: {other:?}")),
        }
    }

    /// Map frame QoS onto the rumqttc level
    pub fn to_qos(level: QosLevel) -> QoS {
        match level {
            QosLevel::AtMostOnce => QoS::AtMostOnce,
            QosLevel::AtLeastOnce => QoS::AtLeastOnce,
            QosLevel::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// ConnAck carried a failure code
    ConnectionRefused(ConnectReturnCode),
    /// Message received on subscribed topic
    MessageReceived {
        topic: String,
        payload: String,
        retain: bool,
    },
    /// Broker sent a Disconnect packet
    Disconnected { reason: String },
    /// Subscription confirmed with return codes
    SubscriptionConfirmed {
        packet_id: u16,
        return_codes: Vec<String>,
    },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}
