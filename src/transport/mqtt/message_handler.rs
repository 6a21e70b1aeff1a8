//! Pure message routing and payload handling for MQTT events
//!
//! This module contains pure functions for classifying broker events,
//! encoding outbound items and answering RPC requests.

use super::connection::TopicBuilder;
use crate::transport::{DataItem, SubscriptionSet};
use rumqttc::{Event, Packet, SubscribeReasonCode};
use serde::Deserialize;
use serde_json::{json, Map, Value as JsonValue};
use tracing::{debug, warn};

/// Pure routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(Packet::ConnAck(_)) => EventRoute::ConnectionAcknowledged,
            Event::Incoming(Packet::SubAck(ack)) => EventRoute::SubscriptionConfirmed {
                accepted: Self::subscription_accepted(&ack.return_codes),
            },
            Event::Incoming(Packet::Publish(publish)) => {
                match TopicBuilder::parse_rpc_request_id(&publish.topic) {
                    Some(request_id) => EventRoute::RpcRequest {
                        request_id: request_id.to_string(),
                        payload: publish.payload.to_vec(),
                    },
                    None => EventRoute::Ignored(publish.topic.clone()),
                }
            }
            Event::Incoming(Packet::Disconnect) => EventRoute::Disconnected,
            Event::Incoming(other) => EventRoute::Infrastructure(format!("{other:?}")),
            Event::Outgoing(_) => EventRoute::Outgoing,
        }
    }

    /// Whether every requested filter was granted
    pub fn subscription_accepted(return_codes: &[SubscribeReasonCode]) -> bool {
        !return_codes.is_empty()
            && return_codes
                .iter()
                .all(|code| !matches!(code, SubscribeReasonCode::Failure))
    }

    /// Encode items as a flat JSON object; later duplicates win
    pub fn encode_items(items: &[DataItem]) -> Result<String, serde_json::Error> {
        let mut object = Map::with_capacity(items.len());
        for item in items {
            object.insert(item.key.clone(), serde_json::to_value(&item.value)?);
        }
        serde_json::to_string(&object)
    }

    /// Run the handler registered for an RPC request and build the response body
    pub fn answer_rpc(subscriptions: &SubscriptionSet, payload: &[u8]) -> JsonValue {
        let request: RpcRequest = match serde_json::from_slice(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!("Malformed RPC request: {}", e);
                return json!({"error": "malformed request"});
            }
        };

        match subscriptions.find(&request.method) {
            Some(handler) => {
                debug!(method = %request.method, "Dispatching RPC request");
                handler(&request.params)
            }
            None => {
                warn!(method = %request.method, "No handler for RPC method");
                json!({"error": format!("unknown method {}", request.method)})
            }
        }
    }
}

/// ThingsBoard server-side RPC request body
#[derive(Debug, Deserialize)]
struct RpcRequest {
    method: String,
    #[serde(default)]
    params: JsonValue,
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// CONNACK received
    ConnectionAcknowledged,
    /// SUBACK received
    SubscriptionConfirmed { accepted: bool },
    /// Server-side RPC call addressed to this device
    RpcRequest { request_id: String, payload: Vec<u8> },
    /// Broker closed the session
    Disconnected,
    /// Publish on a topic nobody handles
    Ignored(String),
    /// PingResp, PubAck and friends
    Infrastructure(String),
    /// Outgoing packet notifications
    Outgoing,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{ConnAck, ConnectReturnCode, Publish, QoS, SubAck};

    #[test]
    fn test_route_connack() {
        let event = Event::Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::Success,
            false,
        )));
        assert_eq!(
            MessageHandler::route_event(&event),
            EventRoute::ConnectionAcknowledged
        );
    }

    #[test]
    fn test_route_rpc_request() {
        let publish = Publish::new(
            "v1/devices/me/rpc/request/17",
            QoS::AtLeastOnce,
            br#"{"method":"ping"}"#.to_vec(),
        );
        let route = MessageHandler::route_event(&Event::Incoming(Packet::Publish(publish)));
        assert_eq!(
            route,
            EventRoute::RpcRequest {
                request_id: "17".to_string(),
                payload: br#"{"method":"ping"}"#.to_vec(),
            }
        );
    }

    #[test]
    fn test_route_unrelated_publish_is_ignored() {
        let publish = Publish::new("v1/devices/me/attributes", QoS::AtMostOnce, vec![]);
        assert!(matches!(
            MessageHandler::route_event(&Event::Incoming(Packet::Publish(publish))),
            EventRoute::Ignored(_)
        ));
    }

    #[test]
    fn test_route_suback() {
        let granted = SubAck::new(1, vec![SubscribeReasonCode::Success(QoS::AtLeastOnce)]);
        assert_eq!(
            MessageHandler::route_event(&Event::Incoming(Packet::SubAck(granted))),
            EventRoute::SubscriptionConfirmed { accepted: true }
        );

        let rejected = SubAck::new(2, vec![SubscribeReasonCode::Failure]);
        assert_eq!(
            MessageHandler::route_event(&Event::Incoming(Packet::SubAck(rejected))),
            EventRoute::SubscriptionConfirmed { accepted: false }
        );
    }

    #[test]
    fn test_route_disconnect() {
        assert_eq!(
            MessageHandler::route_event(&Event::Incoming(Packet::Disconnect)),
            EventRoute::Disconnected
        );
    }

    #[test]
    fn test_encode_items_flat_object() {
        let items = vec![
            DataItem::new("rssi", -67i32),
            DataItem::new("connected", true),
            DataItem::new("rssi", -60i32),
        ];
        let encoded: JsonValue =
            serde_json::from_str(&MessageHandler::encode_items(&items).unwrap()).unwrap();
        assert_eq!(encoded, json!({"rssi": -60, "connected": true}));
    }

    #[test]
    fn test_answer_rpc_dispatches_to_handler() {
        let subscriptions = SubscriptionSet::builder()
            .method("double", |params| json!(params["x"].as_i64().unwrap_or(0) * 2))
            .build();
        let response =
            MessageHandler::answer_rpc(&subscriptions, br#"{"method":"double","params":{"x":21}}"#);
        assert_eq!(response, json!(42));
    }

    #[test]
    fn test_answer_rpc_unknown_method() {
        let response =
            MessageHandler::answer_rpc(&SubscriptionSet::default(), br#"{"method":"nope"}"#);
        assert!(response["error"].as_str().unwrap().contains("nope"));
    }

    #[test]
    fn test_answer_rpc_malformed_payload() {
        let response = MessageHandler::answer_rpc(&SubscriptionSet::default(), b"not json");
        assert_eq!(response, json!({"error": "malformed request"}));
    }
}
