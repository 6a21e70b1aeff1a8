//! Pure connection configuration for the MQTT transport
//!
//! This module contains pure functions for building client options and the
//! ThingsBoard device API topic names.

use crate::transport::BrokerAddress;
use rumqttc::MqttOptions;
use std::time::Duration;

/// Capacity of the request channel between `AsyncClient` and `EventLoop`
pub const REQUEST_CAPACITY: usize = 32;

/// Tunables for the MQTT transport
#[derive(Debug, Clone)]
pub struct MqttSettings {
    /// Prefix of the MQTT client id; a random suffix is appended per session
    pub client_name: String,
    /// Upper bound on waiting for CONNACK and SUBACK
    pub connect_timeout: Duration,
    /// MQTT keep alive interval
    pub keep_alive: Duration,
    /// How long `poll` waits for a ready event before yielding
    pub poll_budget: Duration,
    /// Upper bound on events handled per `poll` call
    pub max_events_per_poll: usize,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            client_name: "broker-link".to_string(),
            connect_timeout: Duration::from_secs(5),
            keep_alive: Duration::from_secs(60),
            poll_budget: Duration::from_millis(10),
            max_events_per_poll: 16,
        }
    }
}

/// Build client options for one session (pure apart from the random client id)
pub fn configure_mqtt_options(
    settings: &MqttSettings,
    address: &BrokerAddress,
    token: &str,
) -> MqttOptions {
    // Fresh client id per attempt so a half-open old session never collides
    let client_id = format!("{}-{}", settings.client_name, uuid::Uuid::new_v4().simple());
    let mut options = MqttOptions::new(client_id, address.host(), address.port());

    // ThingsBoard authenticates devices by access token sent as the username
    options.set_credentials(token, "");
    options.set_keep_alive(settings.keep_alive);
    options.set_clean_session(true);
    options
}

/// ThingsBoard device API topics
pub struct TopicBuilder;

impl TopicBuilder {
    pub const TELEMETRY: &'static str = "v1/devices/me/telemetry";
    pub const ATTRIBUTES: &'static str = "v1/devices/me/attributes";
    pub const RPC_REQUEST_FILTER: &'static str = "v1/devices/me/rpc/request/+";
    const RPC_REQUEST_PREFIX: &'static str = "v1/devices/me/rpc/request/";

    /// Build RPC response topic: `v1/devices/me/rpc/response/{request_id}`
    pub fn build_rpc_response_topic(request_id: &str) -> String {
        format!("v1/devices/me/rpc/response/{request_id}")
    }

    /// Extract the request id from an RPC request topic
    pub fn parse_rpc_request_id(topic: &str) -> Option<&str> {
        topic
            .strip_prefix(Self::RPC_REQUEST_PREFIX)
            .filter(|id| !id.is_empty() && !id.contains('/'))
    }
}
