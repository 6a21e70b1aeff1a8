//! Impure I/O operations for the MQTT transport
//!
//! This module owns the rumqttc client and event loop. Sessions are created
//! only by [`MqttTransport::connect`]; when the event loop reports an error the
//! session is dropped instead of letting rumqttc reconnect on its own, so that
//! every reconnection goes through the controller's backoff ladder.

use super::connection::{configure_mqtt_options, MqttSettings, TopicBuilder, REQUEST_CAPACITY};
use super::message_handler::{EventRoute, MessageHandler};
use crate::transport::{BrokerAddress, BrokerTransport, DataItem, SubscriptionSet, TransportError};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, Packet, QoS};
use tracing::{debug, info, warn};

/// One established broker session
struct Session {
    client: AsyncClient,
    event_loop: EventLoop,
    address: BrokerAddress,
}

/// ThingsBoard MQTT transport backed by rumqttc
pub struct MqttTransport {
    settings: MqttSettings,
    session: Option<Session>,
    subscriptions: SubscriptionSet,
}

impl MqttTransport {
    pub fn new(settings: MqttSettings) -> Self {
        Self {
            settings,
            session: None,
            subscriptions: SubscriptionSet::default(),
        }
    }

    pub fn settings(&self) -> &MqttSettings {
        &self.settings
    }

    /// Drop the current session, asking the broker for a clean disconnect
    pub fn close_session(&mut self) {
        if let Some(session) = self.session.take() {
            // Best effort; the event loop is dropped right after
            let _ = session.client.try_disconnect();
            info!(broker = %session.address, "MQTT session closed");
        }
    }

    fn live_session(&mut self) -> Result<&mut Session, TransportError> {
        self.session.as_mut().ok_or(TransportError::NotConnected)
    }

    fn publish_items(&mut self, topic: &str, items: &[DataItem]) -> Result<(), TransportError> {
        let session = self.live_session()?;
        let payload = MessageHandler::encode_items(items).map_err(TransportError::Serialization)?;
        session
            .client
            .try_publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| TransportError::PublishFailed(Box::new(e)))?;
        debug!(topic, count = items.len(), "Queued publish");
        Ok(())
    }

    /// Answer an RPC request through the session's client
    fn respond_rpc(
        client: &AsyncClient,
        subscriptions: &SubscriptionSet,
        request_id: &str,
        payload: &[u8],
    ) {
        let response = MessageHandler::answer_rpc(subscriptions, payload);
        let topic = TopicBuilder::build_rpc_response_topic(request_id);
        match serde_json::to_vec(&response) {
            Ok(body) => {
                if let Err(e) = client.try_publish(&topic, QoS::AtLeastOnce, false, body) {
                    warn!(request_id, "Failed to queue RPC response: {}", e);
                }
            }
            Err(e) => warn!(request_id, "Failed to encode RPC response: {}", e),
        }
    }
}

#[async_trait]
impl BrokerTransport for MqttTransport {
    async fn connect(&mut self, address: &BrokerAddress, token: &str) -> Result<(), TransportError> {
        self.close_session();

        let options = configure_mqtt_options(&self.settings, address, token);
        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let timeout = self.settings.connect_timeout;

        // The first poll opens the socket and sends CONNECT
        let ack = tokio::time::timeout(timeout, async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => return Ok(ack),
                    Ok(_) => continue,
                    Err(e) => return Err(e),
                }
            }
        })
        .await;

        match ack {
            Err(_) => Err(TransportError::Timeout(timeout)),
            Ok(Err(e)) => Err(TransportError::ConnectionFailed(Box::new(e))),
            Ok(Ok(ack)) if ack.code != ConnectReturnCode::Success => {
                Err(TransportError::Refused(format!("{:?}", ack.code)))
            }
            Ok(Ok(_)) => {
                info!(broker = %address, "MQTT session established");
                self.session = Some(Session {
                    client,
                    event_loop,
                    address: address.clone(),
                });
                Ok(())
            }
        }
    }

    fn connected(&self) -> bool {
        self.session.is_some()
    }

    async fn subscribe(&mut self, subscriptions: &SubscriptionSet) -> Result<(), TransportError> {
        let timeout = self.settings.connect_timeout;
        let session = self.session.as_mut().ok_or(TransportError::NotConnected)?;
        session
            .client
            .try_subscribe(TopicBuilder::RPC_REQUEST_FILTER, QoS::AtLeastOnce)
            .map_err(|e| TransportError::SubscriptionFailed(Box::new(e)))?;

        let event_loop = &mut session.event_loop;
        let confirmation = tokio::time::timeout(timeout, async {
            loop {
                match event_loop.poll().await {
                    Ok(event) => {
                        if let EventRoute::SubscriptionConfirmed { accepted } =
                            MessageHandler::route_event(&event)
                        {
                            return Ok(accepted);
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
        })
        .await;

        match confirmation {
            Err(_) => Err(TransportError::Timeout(timeout)),
            Ok(Err(e)) => {
                self.session = None;
                Err(TransportError::SubscriptionFailed(Box::new(e)))
            }
            Ok(Ok(false)) => Err(TransportError::SubscriptionRejected),
            Ok(Ok(true)) => {
                self.subscriptions = subscriptions.clone();
                info!(methods = subscriptions.len(), "Subscribed to RPC requests");
                Ok(())
            }
        }
    }

    async fn send_telemetry(&mut self, items: &[DataItem]) -> Result<(), TransportError> {
        self.publish_items(TopicBuilder::TELEMETRY, items)
    }

    async fn send_attributes(&mut self, items: &[DataItem]) -> Result<(), TransportError> {
        self.publish_items(TopicBuilder::ATTRIBUTES, items)
    }

    async fn poll(&mut self) -> Result<(), TransportError> {
        let budget = self.settings.poll_budget;
        let max_events = self.settings.max_events_per_poll;
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };

        let mut failure = None;
        for _ in 0..max_events {
            let event = match tokio::time::timeout(budget, session.event_loop.poll()).await {
                // Nothing ready within the budget
                Err(_) => break,
                Ok(Ok(event)) => event,
                Ok(Err(e)) => {
                    failure = Some(TransportError::ConnectionFailed(Box::new(e)));
                    break;
                }
            };

            match MessageHandler::route_event(&event) {
                EventRoute::RpcRequest {
                    request_id,
                    payload,
                } => Self::respond_rpc(&session.client, &self.subscriptions, &request_id, &payload),
                EventRoute::Disconnected => {
                    failure = Some(TransportError::NotConnected);
                    break;
                }
                EventRoute::Ignored(topic) => debug!(topic, "Ignoring publish"),
                EventRoute::Infrastructure(packet) => debug!(packet, "MQTT event"),
                _ => {}
            }
        }

        match failure {
            Some(e) => {
                warn!(broker = %session.address, "MQTT session lost: {}", e);
                self.session = None;
                Err(e)
            }
            None => Ok(()),
        }
    }
}
