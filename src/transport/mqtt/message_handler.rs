//! Pure message routing and decoding
//!
//! Routing turns raw rumqttc events into routing decisions for the client
//! task. Decoding turns a native application message into the
//! [`NormalizedMessage`] delivered to stream observers.

use crate::error::AdapterError;
use crate::protocol::{NormalizedMessage, QoSLevel};
use crate::transport::NativeMessage;
use rumqttc::{ConnectReturnCode, Event, Outgoing, Packet, SubscribeReasonCode};

/// Pure message routing and decoding decisions
pub struct MessageHandler;

impl MessageHandler {
    /// Decode a native message into the normalized form
    ///
    /// Fails with [`AdapterError::UnknownQoSLevel`] when the client reports a
    /// QoS outside 0..=2.
    pub fn decode(message: NativeMessage) -> Result<NormalizedMessage, AdapterError> {
        let qos = QoSLevel::try_from(message.qos)?;
        Ok(NormalizedMessage {
            topic: message.topic,
            payload: message.payload,
            retain: message.retain,
            qos,
        })
    }

    /// Route a rumqttc event to the appropriate handler
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => match connack.code {
                    ConnectReturnCode::Success => EventRoute::ConnectionAcknowledged,
                    code => EventRoute::ConnectionRefused(format!("{code:?}")),
                },
                Packet::Publish(publish) => EventRoute::MessageReceived(NativeMessage {
                    topic: publish.topic.clone(),
                    payload: publish.payload.clone(),
                    qos: publish.qos as u8,
                    retain: publish.retain,
                }),
                Packet::Disconnect => EventRoute::Disconnected("Broker disconnected".to_string()),
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    failed: suback
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure)),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }
}

/// Routing decisions for rumqttc events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// ConnAck with a success code
    ConnectionAcknowledged,
    /// ConnAck with a refusal code
    ConnectionRefused(String),
    /// Application message on a subscribed topic
    MessageReceived(NativeMessage),
    /// Broker closed the session
    Disconnected(String),
    /// Our own DISCONNECT left the socket
    DisconnectSent,
    /// SubAck, with whether any filter was rejected
    SubscriptionConfirmed { packet_id: u16, failed: bool },
    /// PingResp, PubAck and the like
    InfrastructureEvent(String),
    /// Other outgoing traffic
    OutgoingEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rumqttc::{ConnAck, Publish, QoS, SubAck};

    fn native(qos: u8) -> NativeMessage {
        NativeMessage {
            topic: "a/b".to_string(),
            payload: Bytes::from_static(b"hello"),
            qos,
            retain: true,
        }
    }

    #[test]
    fn test_decode_maps_all_fields() {
        let message = MessageHandler::decode(native(1)).unwrap();
        assert_eq!(message.topic, "a/b");
        assert_eq!(&message.payload[..], b"hello");
        assert_eq!(message.qos, QoSLevel::AtLeastOnce);
        assert!(message.retain);
    }

    #[test]
    fn test_decode_rejects_unknown_qos() {
        let result = MessageHandler::decode(native(3));
        assert!(matches!(result, Err(AdapterError::UnknownQoSLevel(3))));
    }

    #[test]
    fn test_route_connack() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::Success,
            false,
        )));
        assert_eq!(
            MessageHandler::route_mqtt_event(&connack),
            EventRoute::ConnectionAcknowledged
        );

        let refused = Event::Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::NotAuthorized,
            false,
        )));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&refused),
            EventRoute::ConnectionRefused(_)
        ));
    }

    #[test]
    fn test_route_publish() {
        let mut publish = Publish::new("sensors/temp", QoS::ExactlyOnce, "21.5");
        publish.retain = true;

        match MessageHandler::route_mqtt_event(&Event::Incoming(Packet::Publish(publish))) {
            EventRoute::MessageReceived(message) => {
                assert_eq!(message.topic, "sensors/temp");
                assert_eq!(&message.payload[..], b"21.5");
                assert_eq!(message.qos, 2);
                assert!(message.retain);
            }
            other => panic!("Expected MessageReceived route, got {other:?}"),
        }
    }

    #[test]
    fn test_route_disconnects() {
        assert!(matches!(
            MessageHandler::route_mqtt_event(&Event::Incoming(Packet::Disconnect)),
            EventRoute::Disconnected(_)
        ));
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::Disconnect)),
            EventRoute::DisconnectSent
        );
    }

    #[test]
    fn test_route_suback() {
        let ok = SubAck::new(7, vec![SubscribeReasonCode::Success(QoS::AtLeastOnce)]);
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Incoming(Packet::SubAck(ok))),
            EventRoute::SubscriptionConfirmed {
                packet_id: 7,
                failed: false
            }
        );

        let rejected = SubAck::new(
            8,
            vec![
                SubscribeReasonCode::Success(QoS::AtMostOnce),
                SubscribeReasonCode::Failure,
            ],
        );
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Incoming(Packet::SubAck(rejected))),
            EventRoute::SubscriptionConfirmed {
                packet_id: 8,
                failed: true
            }
        );
    }

    #[test]
    fn test_route_infrastructure() {
        assert!(matches!(
            MessageHandler::route_mqtt_event(&Event::Incoming(Packet::PingResp)),
            EventRoute::InfrastructureEvent(_)
        ));
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::PingReq)),
            EventRoute::OutgoingEvent
        );
    }
}
