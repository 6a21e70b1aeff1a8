//! Connection transition callbacks
//!
//! Every hook is optional: the trait's default methods do nothing, so an
//! implementation overrides only the transitions it cares about. Hooks are
//! fire-and-forget and cannot influence the state machine.

/// Callbacks fired on connection state transitions
pub trait ConnectionHooks: Send {
    /// Right before a connect attempt
    fn on_connect_start(&mut self) {}

    fn on_connect_success(&mut self) {}

    fn on_connect_fail(&mut self) {}

    /// Once per transition from connected to disconnected
    fn on_disconnect(&mut self) {}

    fn on_subscribe_success(&mut self) {}

    fn on_subscribe_fail(&mut self) {}

    /// Immediately before the non-returning device restart
    fn on_restart(&mut self) {}
}

/// Hook set with every slot empty
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl ConnectionHooks for NoHooks {}
