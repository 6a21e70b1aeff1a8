//! Connection status owned by the state machine
//!
//! Pure bookkeeping: no I/O and no clock reads happen here. The state machine
//! in [`super::machine`] decides when each transition applies.

use super::backoff::Stage;
use crate::transport::BrokerAddress;
use serde::Serialize;
use std::fmt;
use std::time::Instant;
use thiserror::Error;

/// Upper bound on candidate broker addresses
pub const MAX_SERVERS: usize = 2;

/// Coarse connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Disconnected, waiting for the backoff period to elapse
    DownWaiting,
    /// Disconnected, an attempt is allowed now
    DownReady,
    Connected,
}

/// What a link-down tick does to the backoff counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkDownPolicy {
    /// Leave failure and cycle counters untouched
    #[default]
    Preserve,
    /// Clear failure and cycle counters so the ladder restarts once the link returns
    Reset,
}

/// Invalid candidate address list
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServersError {
    #[error("At least one broker address is required")]
    Empty,
    #[error("At most {max} broker addresses are supported, got {0}", max = MAX_SERVERS)]
    TooMany(usize),
}

/// Ordered candidate broker addresses plus the shared device token
#[derive(Clone, PartialEq, Eq)]
pub struct Servers {
    addresses: Vec<BrokerAddress>,
    token: String,
}

impl Servers {
    pub fn new(addresses: Vec<BrokerAddress>, token: impl Into<String>) -> Result<Self, ServersError> {
        match addresses.len() {
            0 => Err(ServersError::Empty),
            n if n > MAX_SERVERS => Err(ServersError::TooMany(n)),
            _ => Ok(Self {
                addresses,
                token: token.into(),
            }),
        }
    }

    pub fn single(address: BrokerAddress, token: impl Into<String>) -> Self {
        Self {
            addresses: vec![address],
            token: token.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&BrokerAddress> {
        self.addresses.get(index)
    }

    pub fn addresses(&self) -> &[BrokerAddress] {
        &self.addresses
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Index of the fallback after `index`, if any
    pub fn next_after(&self, index: usize) -> Option<usize> {
        let next = index + 1;
        (next < self.addresses.len()).then_some(next)
    }
}

impl fmt::Debug for Servers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Servers")
            .field("addresses", &self.addresses)
            .field("token", &"***")
            .finish()
    }
}

/// Backoff and session bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub(crate) fail_count: u32,
    pub(crate) cycle_count: u32,
    pub(crate) stage: Stage,
    pub(crate) active_server: usize,
    pub(crate) last_retry: Option<Instant>,
    pub(crate) was_connected: bool,
    pub(crate) statics_published: bool,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            fail_count: 0,
            cycle_count: 0,
            stage: Stage::First,
            active_server: 0,
            last_retry: None,
            was_connected: false,
            statics_published: false,
        }
    }
}

impl ConnectionStatus {
    /// Consecutive failed attempts since the last success
    pub fn fail_count(&self) -> u32 {
        self.fail_count
    }

    /// Completed passes through the backoff ladder
    pub fn cycle_count(&self) -> u32 {
        self.cycle_count
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn active_server(&self) -> usize {
        self.active_server
    }

    pub fn last_retry(&self) -> Option<Instant> {
        self.last_retry
    }

    pub fn statics_published(&self) -> bool {
        self.statics_published
    }

    pub(crate) fn mark_connected(&mut self) {
        self.fail_count = 0;
        self.cycle_count = 0;
        self.stage = Stage::First;
        self.last_retry = None;
        self.was_connected = true;
    }

    /// Consume the connected latch; true only on the first call after a
    /// successful connect
    pub(crate) fn take_connection_lost(&mut self) -> bool {
        if !self.was_connected {
            return false;
        }
        self.was_connected = false;
        self.statics_published = false;
        true
    }

    pub(crate) fn record_failure(&mut self, at: Instant) {
        self.last_retry = Some(at);
        self.fail_count = self.fail_count.saturating_add(1);
    }

    /// Restart the ladder after it ran out
    pub(crate) fn complete_cycle(&mut self) {
        self.fail_count = 0;
        self.stage = Stage::First;
        self.cycle_count = self.cycle_count.saturating_add(1);
    }

    pub(crate) fn rotate_to(&mut self, index: usize) {
        self.active_server = index;
        self.cycle_count = 0;
    }

    pub(crate) fn reset_counters(&mut self) {
        self.fail_count = 0;
        self.cycle_count = 0;
        self.stage = Stage::First;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(host: &str) -> BrokerAddress {
        BrokerAddress::new(host, 1883)
    }

    #[test]
    fn test_servers_bounds() {
        assert_eq!(Servers::new(vec![], "t"), Err(ServersError::Empty));
        assert_eq!(
            Servers::new(vec![address("a"), address("b"), address("c")], "t"),
            Err(ServersError::TooMany(3))
        );
        let servers = Servers::new(vec![address("a"), address("b")], "t").unwrap();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers.get(1), Some(&address("b")));
    }

    #[test]
    fn test_servers_next_after() {
        let pair = Servers::new(vec![address("a"), address("b")], "t").unwrap();
        assert_eq!(pair.next_after(0), Some(1));
        assert_eq!(pair.next_after(1), None);

        let single = Servers::single(address("a"), "t");
        assert_eq!(single.next_after(0), None);
    }

    #[test]
    fn test_servers_debug_hides_token() {
        let servers = Servers::single(address("a"), "super-secret");
        let rendered = format!("{servers:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn test_mark_connected_resets_backoff() {
        let mut status = ConnectionStatus::default();
        status.record_failure(Instant::now());
        status.record_failure(Instant::now());
        status.complete_cycle();
        status.stage = Stage::Third;

        status.mark_connected();
        assert_eq!(status.fail_count(), 0);
        assert_eq!(status.cycle_count(), 0);
        assert_eq!(status.stage(), Stage::First);
        assert!(status.last_retry().is_none());
    }

    #[test]
    fn test_connection_lost_latch_fires_once() {
        let mut status = ConnectionStatus::default();
        assert!(!status.take_connection_lost());

        status.mark_connected();
        status.statics_published = true;
        assert!(status.take_connection_lost());
        assert!(!status.statics_published());
        assert!(!status.take_connection_lost());
    }

    #[test]
    fn test_complete_cycle_and_rotation() {
        let mut status = ConnectionStatus::default();
        status.fail_count = 23;
        status.complete_cycle();
        assert_eq!(status.fail_count(), 0);
        assert_eq!(status.cycle_count(), 1);

        status.rotate_to(1);
        assert_eq!(status.active_server(), 1);
        assert_eq!(status.cycle_count(), 0);
    }

    #[test]
    fn test_link_down_policy_parsing() {
        #[derive(serde::Deserialize)]
        struct Wrapper {
            policy: LinkDownPolicy,
        }
        let parsed: Wrapper = toml::from_str(r#"policy = "reset""#).unwrap();
        assert_eq!(parsed.policy, LinkDownPolicy::Reset);
        assert_eq!(LinkDownPolicy::default(), LinkDownPolicy::Preserve);
    }
}
