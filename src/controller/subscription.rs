//! Subscription manager
//!
//! Re-arms the owner's RPC subscriptions after every (re)connection. A failed
//! subscription is retried on the next connected tick and never touches the
//! backoff state.

use super::hooks::ConnectionHooks;
use crate::error::{LinkError, LinkResult};
use crate::transport::{BrokerTransport, SubscriptionSet};
use tracing::{info, warn};

pub struct SubscriptionManager {
    set: SubscriptionSet,
    subscribed: bool,
}

impl SubscriptionManager {
    pub fn new(set: SubscriptionSet) -> Self {
        Self {
            set,
            subscribed: false,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    pub fn subscriptions(&self) -> &SubscriptionSet {
        &self.set
    }

    /// Forget the current subscription; the next connected tick re-subscribes
    pub fn reset(&mut self) {
        self.subscribed = false;
    }

    /// Subscribe unless already subscribed, disconnected, or nothing to subscribe
    pub async fn ensure_subscribed<T>(
        &mut self,
        transport: &mut T,
        hooks: &mut dyn ConnectionHooks,
    ) -> LinkResult<()>
    where
        T: BrokerTransport + ?Sized,
    {
        if self.subscribed || self.set.is_empty() || !transport.connected() {
            return Ok(());
        }

        match transport.subscribe(&self.set).await {
            Ok(()) => {
                self.subscribed = true;
                info!(methods = self.set.len(), "RPC subscription established");
                hooks.on_subscribe_success();
                Ok(())
            }
            Err(e) => {
                warn!("RPC subscription failed: {}", e);
                hooks.on_subscribe_fail();
                Err(LinkError::SubscribeFailed(e))
            }
        }
    }
}
