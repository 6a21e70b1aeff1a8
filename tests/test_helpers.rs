//! Test helpers and utilities for integration tests

use broker_link::controller::{ConnectionController, ControllerSettings, Servers};
use broker_link::testing::{
    ManualClock, MockLink, MockRestart, MockTransport, RecordingHooks, RecordingPublisher,
};
use broker_link::transport::BrokerAddress;
use std::sync::Arc;
use std::time::Duration;

pub const P1: Duration = Duration::from_secs(5);
pub const P2: Duration = Duration::from_secs(60);
#[allow(dead_code)]
pub const P3: Duration = Duration::from_secs(300);

/// Controller wired to mocks, plus handles to observe them
#[allow(dead_code)]
pub struct Harness {
    pub controller: ConnectionController<MockTransport>,
    pub transport: MockTransport,
    pub link: MockLink,
    pub clock: ManualClock,
    pub hooks: RecordingHooks,
    pub restart: MockRestart,
    pub publisher: RecordingPublisher,
}

#[allow(dead_code)]
impl Harness {
    pub fn single(settings: ControllerSettings) -> Self {
        Self::with_servers(settings, vec![primary()])
    }

    pub fn pair(settings: ControllerSettings) -> Self {
        Self::with_servers(settings, vec![primary(), fallback()])
    }

    pub fn with_servers(settings: ControllerSettings, addresses: Vec<BrokerAddress>) -> Self {
        let transport = MockTransport::new();
        let link = MockLink::new();
        let clock = ManualClock::new();
        let hooks = RecordingHooks::new();
        let restart = MockRestart::new();
        let publisher = RecordingPublisher::new();

        let servers = Servers::new(addresses, "test-token").expect("valid server list");
        let controller = ConnectionController::new(
            settings,
            servers,
            transport.clone(),
            link.clone(),
            Arc::new(clock.clone()),
            restart.clone(),
        )
        .with_hooks(hooks.clone())
        .with_publisher(publisher.clone());

        Self {
            controller,
            transport,
            link,
            clock,
            hooks,
            restart,
            publisher,
        }
    }

    /// Tick once, then move the clock past whatever period applies now
    pub async fn fail_once(&mut self) {
        let _ = self.controller.tick().await;
        let period = match self.controller.fail_count() {
            n if n < 6 => P1,
            n if n < 11 => P2,
            _ => P3,
        };
        self.clock.advance(period);
    }

    /// Drive `n` consecutive failed attempts, advancing the clock between them
    pub async fn fail_times(&mut self, n: u32) {
        for _ in 0..n {
            self.fail_once().await;
        }
    }
}

#[allow(dead_code)]
pub fn primary() -> BrokerAddress {
    BrokerAddress::new("tb.example.com", 1883)
}

#[allow(dead_code)]
pub fn fallback() -> BrokerAddress {
    BrokerAddress::new("10.0.0.5", 1883)
}
