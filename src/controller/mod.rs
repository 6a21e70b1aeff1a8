//! Connection resilience controller
//!
//! Keeps a session with the telemetry broker alive over an unreliable link.
//! The pieces, leaves first:
//!
//! - [`backoff`] - failure count to wait period and stage
//! - [`state`] - candidate addresses and backoff bookkeeping
//! - [`stats`] - counters about failed attempts
//! - [`hooks`] - transition callbacks
//! - [`subscription`] - RPC re-subscription after reconnects
//! - [`publish`] - change-gated attribute and telemetry publishing
//! - [`machine`] - the state machine tying them together
//!
//! # Usage
//!
//! ```rust,no_run
//! use broker_link::controller::{ConnectionController, ControllerSettings, Servers};
//! use broker_link::device::{ProcessRestart, SystemClock};
//! use broker_link::link::AlwaysUp;
//! use broker_link::transport::mqtt::{MqttSettings, MqttTransport};
//! use broker_link::transport::BrokerAddress;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let servers = Servers::single(BrokerAddress::parse("mqtt://tb.example.com")?, "token");
//! let mut controller = ConnectionController::new(
//!     ControllerSettings::default(),
//!     servers,
//!     MqttTransport::new(MqttSettings::default()),
//!     AlwaysUp,
//!     Arc::new(SystemClock),
//!     ProcessRestart::new(75),
//! );
//! let report = controller.service().await;
//! println!("connected: {}", report.is_connected());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod backoff;
pub mod hooks;
pub mod machine;
pub mod publish;
pub mod state;
pub mod stats;
pub mod subscription;

pub use backoff::{BackoffError, BackoffLadder, Stage, StageDecision};
pub use hooks::{ConnectionHooks, NoHooks};
pub use machine::{ConnectionController, ControllerSettings, ServiceReport};
pub use publish::{
    DirtyFlags, NullPublisher, PeriodicTimer, PublishClass, PublishGate, PublishOutcome,
    PublishReport, Publisher,
};
pub use state::{
    ConnectionState, ConnectionStatus, LinkDownPolicy, Servers, ServersError, MAX_SERVERS,
};
pub use stats::{ConnectionStats, StatsSnapshot};
pub use subscription::SubscriptionManager;
