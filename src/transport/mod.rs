//! Transport layer for broker communication
//!
//! The connection controller never touches the network directly. It drives a
//! [`BrokerTransport`], which owns the session with the telemetry broker, and
//! hands it plain [`DataItem`] lists and a [`SubscriptionSet`] of RPC handlers.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub mod mqtt;

/// Port used when a broker URL does not carry one
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Broker transport abstraction
///
/// Implementations must bound `connect` by their own connect timeout; the
/// controller awaits it inline and never cancels it.
#[async_trait]
pub trait BrokerTransport: Send {
    /// Open a new session with the broker at `address`, authenticating with `token`
    async fn connect(&mut self, address: &BrokerAddress, token: &str) -> Result<(), TransportError>;

    /// Whether a session is currently established
    fn connected(&self) -> bool;

    /// Register RPC handlers with the broker
    async fn subscribe(&mut self, subscriptions: &SubscriptionSet) -> Result<(), TransportError>;

    /// Queue a telemetry message; does not wait for acknowledgement
    async fn send_telemetry(&mut self, items: &[DataItem]) -> Result<(), TransportError>;

    /// Queue a client attributes message; does not wait for acknowledgement
    async fn send_attributes(&mut self, items: &[DataItem]) -> Result<(), TransportError>;

    /// Service pending network events without blocking
    async fn poll(&mut self) -> Result<(), TransportError>;
}

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid broker address: {0}")]
    InvalidAddress(String),
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Connection refused by broker: {0}")]
    Refused(String),
    #[error("No acknowledgement from broker within {0:?}")]
    Timeout(Duration),
    #[error("Not connected")]
    NotConnected,
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription rejected by broker")]
    SubscriptionRejected,
    #[error("Serialization error")]
    Serialization(#[source] serde_json::Error),
}

/// Candidate broker endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    host: String,
    port: u16,
}

impl BrokerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse an `mqtt://host[:port]` URL
    pub fn parse(raw: &str) -> Result<Self, TransportError> {
        let invalid = || TransportError::InvalidAddress(raw.to_string());
        let url = Url::parse(raw).map_err(|_| invalid())?;
        if url.scheme() != "mqtt" {
            return Err(invalid());
        }
        let host = url.host_str().filter(|h| !h.is_empty()).ok_or_else(invalid)?;
        let port = url.port().unwrap_or(DEFAULT_MQTT_PORT);
        Ok(Self::new(host, port))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Value of a telemetry measure or attribute
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Real(f64),
    Text(String),
    /// Not yet known; encoded as `null`
    Missing,
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(v.into())
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Real(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Missing, Into::into)
    }
}

/// One key/value pair of a telemetry or attributes message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataItem {
    pub key: String,
    pub value: Value,
}

impl DataItem {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Handler invoked for an inbound RPC request; receives the request params
/// and returns the response body
pub type RpcHandler = Arc<dyn Fn(&serde_json::Value) -> serde_json::Value + Send + Sync>;

/// A named RPC method and its handler
#[derive(Clone)]
pub struct Subscription {
    method: String,
    handler: RpcHandler,
}

impl Subscription {
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn handler(&self) -> &RpcHandler {
        &self.handler
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

/// RPC handlers supplied once by the owner and re-submitted on every
/// reconnection. Cloning shares the same handler list.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionSet {
    entries: Arc<Vec<Subscription>>,
}

impl SubscriptionSet {
    pub fn new(entries: Vec<Subscription>) -> Self {
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Start an empty builder
    pub fn builder() -> SubscriptionSetBuilder {
        SubscriptionSetBuilder::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.iter()
    }

    /// Look up the handler registered for `method`
    pub fn find(&self, method: &str) -> Option<&RpcHandler> {
        self.entries
            .iter()
            .find(|s| s.method == method)
            .map(|s| &s.handler)
    }
}

#[derive(Default)]
pub struct SubscriptionSetBuilder {
    entries: Vec<Subscription>,
}

impl SubscriptionSetBuilder {
    pub fn method<F>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&serde_json::Value) -> serde_json::Value + Send + Sync + 'static,
    {
        self.entries.push(Subscription {
            method: method.into(),
            handler: Arc::new(handler),
        });
        self
    }

    pub fn build(self) -> SubscriptionSet {
        SubscriptionSet::new(self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_broker_address_parse_with_port() {
        let address = BrokerAddress::parse("mqtt://tb.example.com:1884").unwrap();
        assert_eq!(address.host(), "tb.example.com");
        assert_eq!(address.port(), 1884);
        assert_eq!(address.to_string(), "tb.example.com:1884");
    }

    #[test]
    fn test_broker_address_default_port() {
        let address = BrokerAddress::parse("mqtt://10.0.0.5").unwrap();
        assert_eq!(address.host(), "10.0.0.5");
        assert_eq!(address.port(), DEFAULT_MQTT_PORT);
    }

    #[test]
    fn test_broker_address_rejects_other_schemes() {
        assert!(matches!(
            BrokerAddress::parse("http://tb.example.com"),
            Err(TransportError::InvalidAddress(_))
        ));
        assert!(matches!(
            BrokerAddress::parse("not a url"),
            Err(TransportError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(-3i32), Value::Int(-3));
        assert_eq!(Value::from(7u32), Value::UInt(7));
        assert_eq!(Value::from("abc"), Value::Text("abc".to_string()));
        assert_eq!(Value::from(None::<u64>), Value::Missing);
        assert_eq!(Value::from(Some(2.5f64)), Value::Real(2.5));
    }

    #[test]
    fn test_value_serializes_untagged() {
        let items = vec![
            DataItem::new("flag", true),
            DataItem::new("count", 3u64),
            DataItem::new("name", "gw"),
            DataItem::new("unknown", Value::Missing),
        ];
        let encoded = serde_json::to_value(&items).unwrap();
        assert_eq!(
            encoded,
            json!([
                {"key": "flag", "value": true},
                {"key": "count", "value": 3},
                {"key": "name", "value": "gw"},
                {"key": "unknown", "value": null},
            ])
        );
    }

    #[test]
    fn test_subscription_set_lookup() {
        let set = SubscriptionSet::builder()
            .method("ping", |_| json!({"pong": true}))
            .method("echo", |params| params.clone())
            .build();

        assert_eq!(set.len(), 2);
        let echo = set.find("echo").expect("echo registered");
        assert_eq!(echo(&json!({"a": 1})), json!({"a": 1}));
        assert!(set.find("missing").is_none());

        let shared = set.clone();
        assert_eq!(shared.len(), set.len());
    }

    #[test]
    fn test_empty_subscription_set() {
        assert!(SubscriptionSet::default().is_empty());
    }
}
