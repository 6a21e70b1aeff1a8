//! Gateway publisher
//!
//! The [`Publisher`] the binary hands to the controller. It reports what the
//! gateway knows about itself and about its broker connection:
//!
//! - static attributes: firmware version, device name, hostname, brokers
//! - dynamic attributes: telemetry period and the connection failure flag,
//!   sent only when they changed
//! - telemetry: link state and the connection statistics (`conn*` keys)
//!
//! [`rpc_subscriptions`] provides the matching server-side RPC methods.

use crate::controller::publish::{DirtyFlags, PublishClass, Publisher};
use crate::controller::state::Servers;
use crate::controller::stats::ConnectionStats;
use crate::link::LinkProvider;
use crate::params::ParameterSet;
use crate::transport::{DataItem, SubscriptionSet};
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::info;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Queue of one-off events, shared between the publisher and its producers
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    items: Arc<Mutex<Vec<DataItem>>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: DataItem) {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(item);
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn drain(&self) -> Vec<DataItem> {
        std::mem::take(&mut *self.items.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Publisher reporting gateway identity and connection health
pub struct GatewayPublisher {
    statics: ParameterSet,
    dynamics: ParameterSet,
    stats: Arc<ConnectionStats>,
    link: Box<dyn LinkProvider>,
    flags: DirtyFlags,
    events: EventQueue,
    telemetry_interval: Duration,
}

impl GatewayPublisher {
    /// `flags` must be the controller's [`DirtyFlags`] handle
    pub fn new(
        device_name: &str,
        servers: &Servers,
        telemetry_interval: Duration,
        stats: Arc<ConnectionStats>,
        link: impl LinkProvider + 'static,
        flags: DirtyFlags,
    ) -> Self {
        let mut statics = ParameterSet::new();
        statics.set("version", VERSION);
        statics.set("deviceName", device_name);
        statics.set("hostname", hostname());
        statics.set(
            "brokers",
            servers
                .addresses()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(","),
        );

        let mut publisher = Self {
            statics,
            dynamics: ParameterSet::new(),
            stats,
            link: Box::new(link),
            flags,
            events: EventQueue::new(),
            telemetry_interval,
        };
        publisher.refresh_dynamics();
        publisher.flags.mark_dynamic();
        publisher
    }

    /// Handle for queueing events from elsewhere
    pub fn event_queue(&self) -> EventQueue {
        self.events.clone()
    }

    pub fn set_telemetry_interval(&mut self, interval: Duration) {
        self.telemetry_interval = interval;
        if self.refresh_dynamics() {
            self.flags.mark_dynamic();
        }
    }

    /// Pull current values into the dynamic parameters; true if any changed
    fn refresh_dynamics(&mut self) -> bool {
        self.dynamics
            .set("periodPublish", self.telemetry_interval.as_secs());
        self.dynamics
            .set("connFail", self.stats.had_recent_failure());
        self.dynamics.has_pending()
    }
}

impl Publisher for GatewayPublisher {
    fn static_attributes(&mut self) -> Vec<DataItem> {
        self.statics.all_items()
    }

    fn dynamic_attributes(&mut self) -> Vec<DataItem> {
        self.refresh_dynamics();
        self.dynamics.pending_items()
    }

    fn telemetry(&mut self) -> Vec<DataItem> {
        // Failure flag changes surface through the next dynamic attribute pass
        if self.refresh_dynamics() {
            self.flags.mark_dynamic();
        }

        let snapshot = self.stats.snapshot();
        vec![
            DataItem::new("linkUp", self.link.is_link_up()),
            DataItem::new("connRetries", snapshot.retries),
            DataItem::new("connErrors", snapshot.errors),
            DataItem::new("connCnt", snapshot.attempts),
            DataItem::new("connCur", snapshot.current_ms),
            DataItem::new("connMin", snapshot.min_ms),
            DataItem::new("connMax", snapshot.max_ms),
        ]
    }

    fn events(&mut self) -> Vec<DataItem> {
        self.events.drain()
    }

    fn on_published(&mut self, class: PublishClass, success: bool) {
        if !success {
            return;
        }
        match class {
            PublishClass::StaticAttributes => self.statics.commit(),
            PublishClass::DynamicAttributes => self.dynamics.commit(),
            PublishClass::Events | PublishClass::Telemetry => {}
        }
    }

    /// Broker state is unknown after a new session, so send every dynamic value
    fn on_connected(&mut self) {
        self.dynamics.invalidate();
        self.flags.mark_dynamic();
    }
}

/// Server-side RPC methods of the gateway
///
/// - `ping` answers with the firmware version
/// - `getStats` returns the connection statistics snapshot
/// - `resetConnFail` clears the failure flag and queues a `connFailReset` event
pub fn rpc_subscriptions(
    stats: Arc<ConnectionStats>,
    flags: DirtyFlags,
    events: EventQueue,
) -> SubscriptionSet {
    let stats_for_get = stats.clone();
    SubscriptionSet::builder()
        .method("ping", |_| json!({ "pong": true, "version": VERSION }))
        .method("getStats", move |_| {
            serde_json::to_value(stats_for_get.snapshot())
                .unwrap_or_else(|e| json!({ "error": e.to_string() }))
        })
        .method("resetConnFail", move |_| {
            stats.reset_failure_flag();
            flags.mark_dynamic();
            events.push(DataItem::new("connFailReset", true));
            info!("Connection failure flag reset by RPC");
            json!({ "connFail": false })
        })
        .build()
}

/// Best-effort host name of the gateway
pub fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/proc/sys/kernel/hostname").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockLink;
    use crate::transport::{BrokerAddress, Value};

    fn publisher(stats: Arc<ConnectionStats>, flags: DirtyFlags) -> GatewayPublisher {
        let servers = Servers::new(
            vec![
                BrokerAddress::new("tb.example.com", 1883),
                BrokerAddress::new("10.0.0.5", 1883),
            ],
            "token",
        )
        .unwrap();
        GatewayPublisher::new(
            "greenhouse-gw",
            &servers,
            Duration::from_secs(60),
            stats,
            MockLink::new(),
            flags,
        )
    }

    fn value_of(items: &[DataItem], key: &str) -> Option<Value> {
        items.iter().find(|i| i.key == key).map(|i| i.value.clone())
    }

    #[test]
    fn test_static_attributes() {
        let mut publisher = publisher(Arc::new(ConnectionStats::new()), DirtyFlags::new());
        let items = publisher.static_attributes();
        assert_eq!(value_of(&items, "version"), Some(Value::from(VERSION)));
        assert_eq!(value_of(&items, "deviceName"), Some(Value::from("greenhouse-gw")));
        assert_eq!(
            value_of(&items, "brokers"),
            Some(Value::from("tb.example.com:1883,10.0.0.5:1883"))
        );
    }

    #[test]
    fn test_dynamics_marked_dirty_on_creation() {
        let flags = DirtyFlags::new();
        let mut publisher = publisher(Arc::new(ConnectionStats::new()), flags.clone());
        assert!(flags.is_dynamic_dirty());

        let items = publisher.dynamic_attributes();
        assert_eq!(value_of(&items, "periodPublish"), Some(Value::UInt(60)));
        assert_eq!(value_of(&items, "connFail"), Some(Value::Bool(false)));
    }

    #[test]
    fn test_only_changed_dynamics_resent() {
        let stats = Arc::new(ConnectionStats::new());
        let flags = DirtyFlags::new();
        let mut publisher = publisher(stats.clone(), flags.clone());

        publisher.dynamic_attributes();
        publisher.on_published(PublishClass::DynamicAttributes, true);
        assert!(publisher.dynamic_attributes().is_empty());

        stats.record_failed_attempt(Duration::from_millis(100));
        let items = publisher.dynamic_attributes();
        assert_eq!(items, vec![DataItem::new("connFail", true)]);
    }

    #[test]
    fn test_reconnect_resends_all_dynamics() {
        let flags = DirtyFlags::new();
        let mut publisher = publisher(Arc::new(ConnectionStats::new()), flags.clone());
        publisher.dynamic_attributes();
        publisher.on_published(PublishClass::DynamicAttributes, true);
        assert!(flags.take_dynamic());

        publisher.on_connected();

        assert!(flags.is_dynamic_dirty());
        assert_eq!(publisher.dynamic_attributes().len(), 2);
    }

    #[test]
    fn test_failed_publish_keeps_dynamics_pending() {
        let mut publisher = publisher(Arc::new(ConnectionStats::new()), DirtyFlags::new());
        publisher.dynamic_attributes();
        publisher.on_published(PublishClass::DynamicAttributes, false);
        assert_eq!(publisher.dynamic_attributes().len(), 2);
    }

    #[test]
    fn test_telemetry_reports_stats_and_flags_changes() {
        let stats = Arc::new(ConnectionStats::new());
        let flags = DirtyFlags::new();
        let mut publisher = publisher(stats.clone(), flags.clone());
        publisher.dynamic_attributes();
        publisher.on_published(PublishClass::DynamicAttributes, true);

        // Consume the creation-time flag the way the gate would
        assert!(flags.take_dynamic());
        assert_eq!(publisher.telemetry().len(), 7);
        assert!(!flags.is_dynamic_dirty());

        stats.record_failed_attempt(Duration::from_millis(250));
        let items = publisher.telemetry();

        assert_eq!(value_of(&items, "linkUp"), Some(Value::Bool(true)));
        assert_eq!(value_of(&items, "connCnt"), Some(Value::UInt(1)));
        assert_eq!(value_of(&items, "connMin"), Some(Value::UInt(250)));
        assert!(flags.is_dynamic_dirty());
    }

    #[test]
    fn test_connmin_missing_before_first_failure() {
        let mut publisher = publisher(Arc::new(ConnectionStats::new()), DirtyFlags::new());
        let items = publisher.telemetry();
        assert_eq!(value_of(&items, "connMin"), Some(Value::Missing));
    }

    #[test]
    fn test_rpc_reset_conn_fail() {
        let stats = Arc::new(ConnectionStats::new());
        let flags = DirtyFlags::new();
        let events = EventQueue::new();
        stats.record_failed_attempt(Duration::from_millis(10));

        let rpc = rpc_subscriptions(stats.clone(), flags.clone(), events.clone());
        let handler = rpc.find("resetConnFail").unwrap();
        let response = handler(&json!({}));

        assert_eq!(response, json!({ "connFail": false }));
        assert!(!stats.had_recent_failure());
        assert!(flags.is_dynamic_dirty());
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_rpc_get_stats_and_ping() {
        let stats = Arc::new(ConnectionStats::new());
        stats.record_retry();
        let rpc = rpc_subscriptions(stats, DirtyFlags::new(), EventQueue::new());

        let response = rpc.find("getStats").unwrap()(&json!(null));
        assert_eq!(response["retries"], json!(1));

        let response = rpc.find("ping").unwrap()(&json!(null));
        assert_eq!(response["pong"], json!(true));
        assert_eq!(rpc.len(), 3);
    }

    #[test]
    fn test_events_drained_once() {
        let mut publisher = publisher(Arc::new(ConnectionStats::new()), DirtyFlags::new());
        publisher
            .event_queue()
            .push(DataItem::new("connFailReset", true));
        assert_eq!(publisher.events().len(), 1);
        assert!(publisher.events().is_empty());
    }

    #[test]
    fn test_hostname_never_empty() {
        assert!(!hostname().is_empty());
    }
}
