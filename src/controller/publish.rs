//! Change-gated publishing
//!
//! Decides on each connected tick which data classes go out to the broker:
//!
//! - static attributes once per connection, or again when marked dirty
//! - dynamic attributes only when marked dirty
//! - events whenever the owner has queued some
//! - telemetry when the periodic timer is due
//!
//! Item lists come from the owner's [`Publisher`]. Attributes go to the
//! attribute topic, events and telemetry to the telemetry topic.

use crate::error::LinkError;
use crate::transport::{BrokerTransport, DataItem, TransportError};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Kind of data pushed to the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishClass {
    StaticAttributes,
    DynamicAttributes,
    Events,
    Telemetry,
}

impl fmt::Display for PublishClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PublishClass::StaticAttributes => "static attributes",
            PublishClass::DynamicAttributes => "dynamic attributes",
            PublishClass::Events => "events",
            PublishClass::Telemetry => "telemetry",
        };
        f.write_str(label)
    }
}

/// Source of the data the gate publishes
///
/// Each method is called only when the gate has decided to publish that
/// class, so implementations may build their lists lazily.
pub trait Publisher: Send {
    fn static_attributes(&mut self) -> Vec<DataItem>;

    fn dynamic_attributes(&mut self) -> Vec<DataItem>;

    fn telemetry(&mut self) -> Vec<DataItem>;

    /// Queued one-off events, drained on each call
    fn events(&mut self) -> Vec<DataItem> {
        Vec::new()
    }

    /// Outcome of a publish attempt for `class`
    fn on_published(&mut self, _class: PublishClass, _success: bool) {}

    /// A new broker session was established
    fn on_connected(&mut self) {}
}

/// Publisher with nothing to say
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPublisher;

impl Publisher for NullPublisher {
    fn static_attributes(&mut self) -> Vec<DataItem> {
        Vec::new()
    }

    fn dynamic_attributes(&mut self) -> Vec<DataItem> {
        Vec::new()
    }

    fn telemetry(&mut self) -> Vec<DataItem> {
        Vec::new()
    }
}

#[derive(Debug, Default)]
struct FlagsInner {
    static_dirty: AtomicBool,
    dynamic_dirty: AtomicBool,
}

/// Shared "attributes changed" markers
///
/// Cloning yields a handle to the same flags, so the owner can mark changes
/// from anywhere (an RPC handler for example) while the gate consumes them.
#[derive(Debug, Clone, Default)]
pub struct DirtyFlags {
    inner: Arc<FlagsInner>,
}

impl DirtyFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_static(&self) {
        self.inner.static_dirty.store(true, Ordering::SeqCst);
    }

    pub fn mark_dynamic(&self) {
        self.inner.dynamic_dirty.store(true, Ordering::SeqCst);
    }

    pub fn is_static_dirty(&self) -> bool {
        self.inner.static_dirty.load(Ordering::SeqCst)
    }

    pub fn is_dynamic_dirty(&self) -> bool {
        self.inner.dynamic_dirty.load(Ordering::SeqCst)
    }

    pub(crate) fn take_static(&self) -> bool {
        self.inner.static_dirty.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn take_dynamic(&self) -> bool {
        self.inner.dynamic_dirty.swap(false, Ordering::SeqCst)
    }
}

/// Fixed-period timer, due immediately until first reset
#[derive(Debug, Clone)]
pub struct PeriodicTimer {
    period: Duration,
    last: Option<Instant>,
}

impl PeriodicTimer {
    pub fn new(period: Duration) -> Self {
        Self { period, last: None }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn set_period(&mut self, period: Duration) {
        self.period = period;
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.last
            .map_or(true, |last| now.saturating_duration_since(last) >= self.period)
    }

    pub fn reset(&mut self, now: Instant) {
        self.last = Some(now);
    }

    /// Make the timer due on the next check
    pub fn expire(&mut self) {
        self.last = None;
    }
}

/// What happened to one data class during a publish pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishOutcome {
    /// Nothing was due
    #[default]
    Skipped,
    Published,
    Failed,
}

/// Per-class outcome of one publish pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    pub statics: PublishOutcome,
    pub dynamics: PublishOutcome,
    pub events: PublishOutcome,
    pub telemetry: PublishOutcome,
}

impl PublishReport {
    pub fn outcome(&self, class: PublishClass) -> PublishOutcome {
        match class {
            PublishClass::StaticAttributes => self.statics,
            PublishClass::DynamicAttributes => self.dynamics,
            PublishClass::Events => self.events,
            PublishClass::Telemetry => self.telemetry,
        }
    }

    pub fn failed_classes(&self) -> Vec<PublishClass> {
        [
            PublishClass::StaticAttributes,
            PublishClass::DynamicAttributes,
            PublishClass::Events,
            PublishClass::Telemetry,
        ]
        .into_iter()
        .filter(|class| self.outcome(*class) == PublishOutcome::Failed)
        .collect()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed_classes().is_empty()
    }
}

/// Gate that sends only what changed or fell due
#[derive(Debug)]
pub struct PublishGate {
    flags: DirtyFlags,
    telemetry_timer: PeriodicTimer,
}

impl PublishGate {
    pub fn new(telemetry_interval: Duration) -> Self {
        Self {
            flags: DirtyFlags::new(),
            telemetry_timer: PeriodicTimer::new(telemetry_interval),
        }
    }

    /// Handle to the gate's dirty flags
    pub fn flags(&self) -> DirtyFlags {
        self.flags.clone()
    }

    pub fn telemetry_interval(&self) -> Duration {
        self.telemetry_timer.period()
    }

    pub fn set_telemetry_interval(&mut self, interval: Duration) {
        self.telemetry_timer.set_period(interval);
    }

    /// Publish everything that is due
    ///
    /// `statics_published` is the per-connection latch; it is set once the
    /// static attributes went out and cleared by the controller on disconnect.
    /// A failed static or dynamic publish leaves its class pending for the next
    /// pass. The telemetry timer restarts whether or not the send succeeded.
    pub async fn run<T>(
        &mut self,
        transport: &mut T,
        publisher: &mut dyn Publisher,
        statics_published: &mut bool,
        now: Instant,
    ) -> PublishReport
    where
        T: BrokerTransport + ?Sized,
    {
        let mut report = PublishReport::default();

        let static_dirty = self.flags.take_static();
        if !*statics_published || static_dirty {
            let items = publisher.static_attributes();
            let ok = self
                .send(transport, publisher, PublishClass::StaticAttributes, &items)
                .await;
            if ok {
                *statics_published = true;
            } else if static_dirty {
                self.flags.mark_static();
            }
            report.statics = outcome(ok);
        }

        if self.flags.take_dynamic() {
            let items = publisher.dynamic_attributes();
            let ok = self
                .send(transport, publisher, PublishClass::DynamicAttributes, &items)
                .await;
            if !ok {
                self.flags.mark_dynamic();
            }
            report.dynamics = outcome(ok);
        }

        let events = publisher.events();
        if !events.is_empty() {
            let ok = self
                .send(transport, publisher, PublishClass::Events, &events)
                .await;
            report.events = outcome(ok);
        }

        if self.telemetry_timer.is_due(now) {
            self.telemetry_timer.reset(now);
            let items = publisher.telemetry();
            let ok = self
                .send(transport, publisher, PublishClass::Telemetry, &items)
                .await;
            report.telemetry = outcome(ok);
        }

        report
    }

    async fn send<T>(
        &self,
        transport: &mut T,
        publisher: &mut dyn Publisher,
        class: PublishClass,
        items: &[DataItem],
    ) -> bool
    where
        T: BrokerTransport + ?Sized,
    {
        let result = if items.is_empty() {
            Ok(())
        } else {
            match class {
                PublishClass::StaticAttributes | PublishClass::DynamicAttributes => {
                    transport.send_attributes(items).await
                }
                PublishClass::Events | PublishClass::Telemetry => {
                    transport.send_telemetry(items).await
                }
            }
        };

        let ok = match result {
            Ok(()) => {
                debug!(%class, items = items.len(), "Published");
                true
            }
            Err(source) => {
                log_failure(class, source);
                false
            }
        };
        publisher.on_published(class, ok);
        ok
    }
}

fn outcome(ok: bool) -> PublishOutcome {
    if ok {
        PublishOutcome::Published
    } else {
        PublishOutcome::Failed
    }
}

fn log_failure(class: PublishClass, source: TransportError) {
    let err = LinkError::PublishFailed { class, source };
    warn!(code = ?err.code(), "{}", err);
}
