//! Connection state machine
//!
//! [`ConnectionController`] owns the backoff bookkeeping and drives one
//! [`BrokerTransport`]. Each [`tick`](ConnectionController::tick) makes at most
//! one connect attempt:
//!
//! 1. a down link short-circuits with [`LinkError::LinkDown`]
//! 2. an established session is left alone
//! 3. the first tick after losing a session fires `on_disconnect` once
//! 4. inside the current backoff period nothing happens ([`LinkError::NotReady`])
//! 5. otherwise the active address is tried; a failure climbs the ladder and,
//!    after `max_cycles` exhausted ladders, rotates to the fallback address
//!    or restarts the device
//!
//! [`service`](ConnectionController::service) bundles a tick with the
//! subscription and publish passes that follow a successful one.

use super::backoff::{BackoffLadder, Stage};
use super::hooks::{ConnectionHooks, NoHooks};
use super::publish::{DirtyFlags, NullPublisher, PublishGate, PublishReport, Publisher};
use super::state::{ConnectionState, ConnectionStatus, LinkDownPolicy, Servers};
use super::stats::{ConnectionStats, StatsSnapshot};
use super::subscription::SubscriptionManager;
use crate::device::{Clock, DeviceRestart};
use crate::error::{LinkError, LinkResult};
use crate::link::LinkProvider;
use crate::transport::{BrokerTransport, SubscriptionSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn, Instrument};

/// Tunables of the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSettings {
    pub ladder: BackoffLadder,
    /// Exhausted ladders on one address before rotating or restarting
    pub max_cycles: u32,
    pub link_down_policy: LinkDownPolicy,
    pub telemetry_interval: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            ladder: BackoffLadder::default(),
            max_cycles: 3,
            link_down_policy: LinkDownPolicy::default(),
            telemetry_interval: Duration::from_secs(60),
        }
    }
}

/// Everything one [`ConnectionController::service`] call did
#[derive(Debug)]
pub struct ServiceReport {
    pub connection: LinkResult<()>,
    /// `None` when the tick did not end connected
    pub subscription: Option<LinkResult<()>>,
    pub publish: Option<PublishReport>,
}

impl ServiceReport {
    pub fn is_connected(&self) -> bool {
        self.connection.is_ok()
    }
}

/// Resilient broker connection controller
pub struct ConnectionController<T: BrokerTransport> {
    settings: ControllerSettings,
    servers: Servers,
    transport: T,
    link: Box<dyn LinkProvider>,
    clock: Arc<dyn Clock>,
    restarter: Box<dyn DeviceRestart>,
    hooks: Box<dyn ConnectionHooks>,
    publisher: Box<dyn Publisher>,
    subscriptions: SubscriptionManager,
    gate: PublishGate,
    stats: Arc<ConnectionStats>,
    status: ConnectionStatus,
    state: ConnectionState,
}

impl<T: BrokerTransport> ConnectionController<T> {
    pub fn new(
        settings: ControllerSettings,
        servers: Servers,
        transport: T,
        link: impl LinkProvider + 'static,
        clock: Arc<dyn Clock>,
        restarter: impl DeviceRestart + 'static,
    ) -> Self {
        let gate = PublishGate::new(settings.telemetry_interval);
        Self {
            settings,
            servers,
            transport,
            link: Box::new(link),
            clock,
            restarter: Box::new(restarter),
            hooks: Box::new(NoHooks),
            publisher: Box::new(NullPublisher),
            subscriptions: SubscriptionManager::new(SubscriptionSet::default()),
            gate,
            stats: Arc::new(ConnectionStats::new()),
            status: ConnectionStatus::default(),
            state: ConnectionState::DownReady,
        }
    }

    pub fn with_hooks(mut self, hooks: impl ConnectionHooks + 'static) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    pub fn with_publisher(mut self, publisher: impl Publisher + 'static) -> Self {
        self.publisher = Box::new(publisher);
        self
    }

    pub fn with_subscriptions(mut self, subscriptions: SubscriptionSet) -> Self {
        self.subscriptions = SubscriptionManager::new(subscriptions);
        self
    }

    /// Share an existing statistics recorder instead of a private one
    pub fn with_stats(mut self, stats: Arc<ConnectionStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Advance the state machine by one step
    pub async fn tick(&mut self) -> LinkResult<()> {
        if !self.link.is_link_up() {
            if self.settings.link_down_policy == LinkDownPolicy::Reset {
                self.status.reset_counters();
            }
            // A session that is still up stays Connected; only the attempt is skipped
            if !self.transport.connected() {
                self.state = ConnectionState::DownWaiting;
            }
            debug!("Network link down, skipping connection attempt");
            return Err(LinkError::LinkDown);
        }

        if self.transport.connected() {
            self.state = ConnectionState::Connected;
            return Ok(());
        }

        if self.status.take_connection_lost() {
            warn!(
                broker = %self.active_address(),
                "Lost connection to broker"
            );
            self.subscriptions.reset();
            self.hooks.on_disconnect();
        }

        let decision = self.settings.ladder.stage_for(self.status.fail_count);
        self.status.stage = decision.stage;

        let now = self.clock.now();
        if let Some(last) = self.status.last_retry {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < decision.period {
                let remaining = decision.period - elapsed;
                self.state = ConnectionState::DownWaiting;
                debug!(
                    stage = %decision.stage,
                    remaining_ms = remaining.as_millis() as u64,
                    "Waiting for backoff period"
                );
                return Err(LinkError::NotReady { remaining });
            }
        }
        self.state = ConnectionState::DownReady;

        self.attempt(now).await
    }

    async fn attempt(&mut self, started: std::time::Instant) -> LinkResult<()> {
        let address = self.active_address().clone();
        let span = crate::link_span!(
            broker = %address,
            attempt = self.status.fail_count + 1,
            stage = %self.status.stage,
            cycle = self.status.cycle_count
        );

        self.hooks.on_connect_start();
        let result = self
            .transport
            .connect(&address, self.servers.token())
            .instrument(span)
            .await;

        match result {
            Ok(()) => {
                self.status.mark_connected();
                self.state = ConnectionState::Connected;
                info!(broker = %address, "Connected to broker");
                self.publisher.on_connected();
                self.hooks.on_connect_success();
                Ok(())
            }
            Err(source) => {
                // The backoff period runs from the moment the attempt gave up
                let failed_at = self.clock.now();
                self.status.record_failure(failed_at);
                self.subscriptions.reset();
                self.state = ConnectionState::DownWaiting;
                warn!(
                    broker = %address,
                    fail_count = self.status.fail_count,
                    stage = %self.status.stage,
                    "Connection attempt failed: {}",
                    source
                );
                self.hooks.on_connect_fail();
                self.stats
                    .record_failed_attempt(failed_at.saturating_duration_since(started));
                self.escalate();
                Err(LinkError::ConnectFailed { address, source })
            }
        }
    }

    /// Cycle, rotation and restart handling after a failed attempt
    fn escalate(&mut self) {
        if !self.settings.ladder.stage_for(self.status.fail_count).exhausted {
            return;
        }
        self.status.complete_cycle();
        info!(
            cycle = self.status.cycle_count,
            max_cycles = self.settings.max_cycles,
            "Backoff ladder exhausted"
        );
        if self.status.cycle_count < self.settings.max_cycles {
            return;
        }

        self.stats.record_retry();
        match self.servers.next_after(self.status.active_server) {
            Some(next) => {
                warn!(
                    from = %self.active_address(),
                    to = ?self.servers.get(next),
                    "Failing over to next broker address"
                );
                self.status.rotate_to(next);
            }
            None => {
                error!(
                    cycles = self.status.cycle_count,
                    "No broker address left, requesting device restart"
                );
                self.hooks.on_restart();
                self.restarter.restart()
            }
        }
    }

    /// Subscribe the RPC handlers if connected and not yet subscribed
    pub async fn ensure_subscribed(&mut self) -> LinkResult<()> {
        self.subscriptions
            .ensure_subscribed(&mut self.transport, self.hooks.as_mut())
            .await
    }

    /// Run the publish gate; skipped entirely while disconnected
    pub async fn publish(&mut self) -> PublishReport {
        if !self.transport.connected() {
            return PublishReport::default();
        }
        let now = self.clock.now();
        let span = crate::publish_span!(broker = %self.active_address());
        self.gate
            .run(
                &mut self.transport,
                self.publisher.as_mut(),
                &mut self.status.statics_published,
                now,
            )
            .instrument(span)
            .await
    }

    /// One full service step: tick, then subscription and publishing when connected
    pub async fn service(&mut self) -> ServiceReport {
        let connection = self.tick().await;
        if connection.is_err() {
            return ServiceReport {
                connection,
                subscription: None,
                publish: None,
            };
        }

        let subscription = self.ensure_subscribed().await;
        let publish = self.publish().await;
        ServiceReport {
            connection,
            subscription: Some(subscription),
            publish: Some(publish),
        }
    }

    /// Let the transport process pending network events
    pub async fn poll_transport(&mut self) {
        if let Err(e) = self.transport.poll().await {
            debug!("Transport poll reported: {}", e);
        }
    }

    fn active_address(&self) -> &crate::transport::BrokerAddress {
        // active_server is only ever set from Servers::next_after
        &self.servers.addresses()[self.status.active_server]
    }

    pub fn stage(&self) -> Stage {
        self.status.stage
    }

    pub fn fail_count(&self) -> u32 {
        self.status.fail_count
    }

    pub fn cycle_count(&self) -> u32 {
        self.status.cycle_count
    }

    pub fn active_server(&self) -> usize {
        self.status.active_server
    }

    pub fn is_connected(&self) -> bool {
        self.transport.connected()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscriptions.is_subscribed()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    pub fn servers(&self) -> &Servers {
        &self.servers
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn stats_handle(&self) -> Arc<ConnectionStats> {
        self.stats.clone()
    }

    /// Handle for marking attributes as changed
    pub fn dirty_flags(&self) -> DirtyFlags {
        self.gate.flags()
    }

    pub fn set_telemetry_interval(&mut self, interval: Duration) {
        self.settings.telemetry_interval = interval;
        self.gate.set_telemetry_interval(interval);
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
