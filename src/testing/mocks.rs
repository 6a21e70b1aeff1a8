//! Mock implementations for testing
//!
//! Provides mock transport, link, clock, hooks, restart and publisher
//! implementations so the controller can be driven deterministically without
//! a broker. Every mock is cheaply cloneable; clones share state, so a test
//! keeps one handle for assertions and moves the other into the controller.

use crate::controller::hooks::ConnectionHooks;
use crate::controller::publish::{PublishClass, Publisher};
use crate::device::{Clock, DeviceRestart};
use crate::link::LinkProvider;
use crate::transport::{BrokerAddress, BrokerTransport, DataItem, SubscriptionSet, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct TransportState {
    connected: bool,
    connect_ok: bool,
    scripted: VecDeque<bool>,
    latency: Option<(ManualClock, Duration)>,
    connect_calls: Vec<BrokerAddress>,
    subscribe_ok: bool,
    subscribe_calls: usize,
    publish_ok: bool,
    telemetry: Vec<Vec<DataItem>>,
    attributes: Vec<Vec<DataItem>>,
    poll_calls: usize,
}

/// Mock broker transport
///
/// Connect attempts succeed by default. Scripted results queued with
/// [`MockTransport::script_connects`] take precedence over the default.
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<TransportState>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TransportState {
                connected: false,
                connect_ok: true,
                scripted: VecDeque::new(),
                latency: None,
                connect_calls: Vec::new(),
                subscribe_ok: true,
                subscribe_calls: 0,
                publish_ok: true,
                telemetry: Vec::new(),
                attributes: Vec::new(),
                poll_calls: 0,
            })),
        }
    }

    /// Transport whose connect attempts always fail
    pub fn with_failure() -> Self {
        let transport = Self::new();
        transport.set_connect_ok(false);
        transport
    }

    pub fn set_connect_ok(&self, ok: bool) {
        lock(&self.state).connect_ok = ok;
    }

    /// Queue explicit results for the next connect attempts
    pub fn script_connects(&self, results: impl IntoIterator<Item = bool>) {
        lock(&self.state).scripted.extend(results);
    }

    /// Advance `clock` by `latency` during every connect attempt
    pub fn set_connect_latency(&self, clock: ManualClock, latency: Duration) {
        lock(&self.state).latency = Some((clock, latency));
    }

    pub fn set_subscribe_ok(&self, ok: bool) {
        lock(&self.state).subscribe_ok = ok;
    }

    pub fn set_publish_ok(&self, ok: bool) {
        lock(&self.state).publish_ok = ok;
    }

    /// Simulate the broker dropping the session
    pub fn drop_connection(&self) {
        lock(&self.state).connected = false;
    }

    pub fn connect_calls(&self) -> Vec<BrokerAddress> {
        lock(&self.state).connect_calls.clone()
    }

    pub fn connect_count(&self) -> usize {
        lock(&self.state).connect_calls.len()
    }

    pub fn subscribe_count(&self) -> usize {
        lock(&self.state).subscribe_calls
    }

    pub fn telemetry_sent(&self) -> Vec<Vec<DataItem>> {
        lock(&self.state).telemetry.clone()
    }

    pub fn attributes_sent(&self) -> Vec<Vec<DataItem>> {
        lock(&self.state).attributes.clone()
    }

    pub fn poll_count(&self) -> usize {
        lock(&self.state).poll_calls
    }
}

#[async_trait]
impl BrokerTransport for MockTransport {
    async fn connect(&mut self, address: &BrokerAddress, _token: &str) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        state.connect_calls.push(address.clone());
        if let Some((clock, latency)) = &state.latency {
            clock.advance(*latency);
        }

        let ok = match state.scripted.pop_front() {
            Some(result) => result,
            None => state.connect_ok,
        };
        state.connected = ok;
        if ok {
            Ok(())
        } else {
            Err(TransportError::Refused("mock broker unavailable".to_string()))
        }
    }

    fn connected(&self) -> bool {
        lock(&self.state).connected
    }

    async fn subscribe(&mut self, _subscriptions: &SubscriptionSet) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        state.subscribe_calls += 1;
        if state.subscribe_ok {
            Ok(())
        } else {
            Err(TransportError::SubscriptionRejected)
        }
    }

    async fn send_telemetry(&mut self, items: &[DataItem]) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if !state.publish_ok {
            return Err(TransportError::PublishFailed("mock publish failure".into()));
        }
        state.telemetry.push(items.to_vec());
        Ok(())
    }

    async fn send_attributes(&mut self, items: &[DataItem]) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if !state.publish_ok {
            return Err(TransportError::PublishFailed("mock publish failure".into()));
        }
        state.attributes.push(items.to_vec());
        Ok(())
    }

    async fn poll(&mut self) -> Result<(), TransportError> {
        lock(&self.state).poll_calls += 1;
        Ok(())
    }
}

/// Link provider with a switchable state, up by default
#[derive(Debug, Clone)]
pub struct MockLink {
    up: Arc<AtomicBool>,
}

impl Default for MockLink {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLink {
    pub fn new() -> Self {
        Self {
            up: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }
}

impl LinkProvider for MockLink {
    fn is_link_up(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }
}

/// Clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        *lock(&self.now) += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *lock(&self.now)
    }
}

/// Hook invocation recorded by [`RecordingHooks`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    ConnectStart,
    ConnectSuccess,
    ConnectFail,
    Disconnect,
    SubscribeSuccess,
    SubscribeFail,
    Restart,
}

/// Hooks that record every invocation in order
#[derive(Debug, Clone, Default)]
pub struct RecordingHooks {
    events: Arc<Mutex<Vec<HookEvent>>>,
}

impl RecordingHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<HookEvent> {
        lock(&self.events).clone()
    }

    pub fn count(&self, event: HookEvent) -> usize {
        lock(&self.events).iter().filter(|e| **e == event).count()
    }

    pub fn clear(&self) {
        lock(&self.events).clear();
    }

    fn record(&self, event: HookEvent) {
        lock(&self.events).push(event);
    }
}

impl ConnectionHooks for RecordingHooks {
    fn on_connect_start(&mut self) {
        self.record(HookEvent::ConnectStart);
    }

    fn on_connect_success(&mut self) {
        self.record(HookEvent::ConnectSuccess);
    }

    fn on_connect_fail(&mut self) {
        self.record(HookEvent::ConnectFail);
    }

    fn on_disconnect(&mut self) {
        self.record(HookEvent::Disconnect);
    }

    fn on_subscribe_success(&mut self) {
        self.record(HookEvent::SubscribeSuccess);
    }

    fn on_subscribe_fail(&mut self) {
        self.record(HookEvent::SubscribeFail);
    }

    fn on_restart(&mut self) {
        self.record(HookEvent::Restart);
    }
}

/// Panic message used by [`MockRestart`]
pub const RESTART_PANIC: &str = "mock device restart";

/// Restart primitive that counts the request and then panics
///
/// Run the controller inside `tokio::spawn` and check
/// `JoinError::is_panic` to observe a restart.
#[derive(Debug, Clone, Default)]
pub struct MockRestart {
    requests: Arc<AtomicUsize>,
}

impl MockRestart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl DeviceRestart for MockRestart {
    fn restart(&self) -> ! {
        self.requests.fetch_add(1, Ordering::SeqCst);
        panic!("{}", RESTART_PANIC);
    }
}

#[derive(Debug, Default)]
struct PublisherState {
    static_calls: usize,
    dynamic_calls: usize,
    telemetry_calls: usize,
    pending_events: Vec<DataItem>,
    outcomes: Vec<(PublishClass, bool)>,
}

/// Publisher with one fixed item per class that records every call
#[derive(Debug, Clone, Default)]
pub struct RecordingPublisher {
    state: Arc<Mutex<PublisherState>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_event(&self, item: DataItem) {
        lock(&self.state).pending_events.push(item);
    }

    pub fn static_calls(&self) -> usize {
        lock(&self.state).static_calls
    }

    pub fn dynamic_calls(&self) -> usize {
        lock(&self.state).dynamic_calls
    }

    pub fn telemetry_calls(&self) -> usize {
        lock(&self.state).telemetry_calls
    }

    pub fn outcomes(&self) -> Vec<(PublishClass, bool)> {
        lock(&self.state).outcomes.clone()
    }
}

impl Publisher for RecordingPublisher {
    fn static_attributes(&mut self) -> Vec<DataItem> {
        lock(&self.state).static_calls += 1;
        vec![DataItem::new("version", env!("CARGO_PKG_VERSION"))]
    }

    fn dynamic_attributes(&mut self) -> Vec<DataItem> {
        lock(&self.state).dynamic_calls += 1;
        vec![DataItem::new("periodPublish", 60u64)]
    }

    fn telemetry(&mut self) -> Vec<DataItem> {
        let mut state = lock(&self.state);
        state.telemetry_calls += 1;
        vec![DataItem::new("sample", state.telemetry_calls as u64)]
    }

    fn events(&mut self) -> Vec<DataItem> {
        std::mem::take(&mut lock(&self.state).pending_events)
    }

    fn on_published(&mut self, class: PublishClass, success: bool) {
        lock(&self.state).outcomes.push((class, success));
    }
}
