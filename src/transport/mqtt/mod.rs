//! ThingsBoard MQTT transport
//!
//! This module provides the rumqttc-backed [`BrokerTransport`](crate::transport::BrokerTransport),
//! split the same way as the rest of the transport layer:
//!
//! - [`connection`] - Pure client options and topic construction
//! - [`message_handler`] - Pure event routing, payload encoding and RPC dispatch
//! - [`client`] - Impure session management and I/O
//!
//! # Usage
//!
//! ```rust,no_run
//! use broker_link::transport::mqtt::{MqttSettings, MqttTransport};
//! use broker_link::transport::{BrokerAddress, BrokerTransport, DataItem};
//!
//! # tokio_test::block_on(async {
//! let mut transport = MqttTransport::new(MqttSettings::default());
//! let address = BrokerAddress::parse("mqtt://tb.example.com:1883")?;
//! transport.connect(&address, "device-access-token").await?;
//! transport.send_telemetry(&[DataItem::new("temperature", 21.5)]).await?;
//! transport.poll().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::MqttTransport;
pub use connection::{configure_mqtt_options, MqttSettings, TopicBuilder};
pub use message_handler::{EventRoute, MessageHandler};
