//! Device primitives: restart and monotonic time

use std::time::Instant;
use tracing::error;

/// Terminal recovery action; never returns
pub trait DeviceRestart: Send {
    fn restart(&self) -> !;
}

/// Restarts by exiting the process so the service supervisor starts it again
#[derive(Debug, Clone, Copy)]
pub struct ProcessRestart {
    exit_code: i32,
}

impl ProcessRestart {
    pub fn new(exit_code: i32) -> Self {
        Self { exit_code }
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }
}

impl DeviceRestart for ProcessRestart {
    fn restart(&self) -> ! {
        error!(
            exit_code = self.exit_code,
            "All broker addresses exhausted, restarting"
        );
        std::process::exit(self.exit_code)
    }
}

/// Monotonic time source
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Clock backed by [`Instant::now`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }

    #[test]
    fn test_process_restart_keeps_exit_code() {
        assert_eq!(ProcessRestart::new(75).exit_code(), 75);
    }
}
