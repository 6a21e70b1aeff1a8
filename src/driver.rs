//! Tick loop driving the controller
//!
//! Calls [`ConnectionController::service`] on a fixed interval and polls the
//! transport after every service step, connected or not, until the shutdown
//! channel flips to `true` or its sender goes away.

use crate::controller::ConnectionController;
use crate::error::result_code;
use crate::transport::BrokerTransport;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Run the controller until shutdown; returns the number of service steps
pub async fn run<T: BrokerTransport>(
    controller: &mut ConnectionController<T>,
    tick_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> u64 {
    let mut ticker = interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut steps = 0u64;

    info!(
        tick_ms = tick_interval.as_millis() as u64,
        servers = controller.servers().len(),
        "Broker link driver started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = controller.service().await;
                steps += 1;

                if let Err(e) = &report.connection {
                    if e.is_failure() {
                        debug!(code = ?result_code(&report.connection), "Service step failed: {}", e);
                    }
                }
                if let Some(publish) = &report.publish {
                    if publish.has_failures() {
                        warn!(classes = ?publish.failed_classes(), "Publishing incomplete");
                    }
                }

                controller.poll_transport().await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!(steps, "Shutdown requested, stopping broker link driver");
                    break;
                }
            }
        }
    }

    steps
}
