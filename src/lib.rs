//! Broker Link - resilient telemetry broker connection
//!
//! Keeps an IoT gateway connected to a ThingsBoard-style MQTT broker over an
//! unreliable network link.
//!
//! # Overview
//!
//! - Staged backoff ladder with no jitter, driven by a monotonic clock
//! - Failover to a second broker address after repeated exhausted ladders
//! - Device restart escalation once every address is exhausted
//! - RPC re-subscription and change-gated attribute publishing after reconnects
//! - Statistics about failed attempts, published as telemetry
//! - rumqttc transport speaking the ThingsBoard device API
//!
//! # Quick Start
//!
//! ```rust
//! use broker_link::controller::{ConnectionController, ControllerSettings, Servers};
//! use broker_link::testing::{ManualClock, MockLink, MockRestart, MockTransport};
//! use broker_link::transport::BrokerAddress;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let servers = Servers::single(BrokerAddress::new("tb.local", 1883), "token");
//! let mut controller = ConnectionController::new(
//!     ControllerSettings::default(),
//!     servers,
//!     MockTransport::new(),
//!     MockLink::new(),
//!     Arc::new(ManualClock::new()),
//!     MockRestart::new(),
//! );
//!
//! controller.tick().await.unwrap();
//! assert!(controller.is_connected());
//! # });
//! ```

pub mod config;
pub mod controller;
pub mod device;
pub mod driver;
pub mod error;
pub mod gateway;
pub mod link;
pub mod observability;
pub mod params;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, LinkConfig};
pub use controller::{
    ConnectionController, ConnectionHooks, ConnectionState, ConnectionStats, ControllerSettings,
    Publisher, Servers, Stage,
};
pub use error::{LinkError, LinkResult, ResultCode};
pub use transport::mqtt::MqttTransport;
pub use transport::{BrokerAddress, BrokerTransport, DataItem, Value};
