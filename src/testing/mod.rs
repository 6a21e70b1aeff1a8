//! Testing utilities and mock implementations
//!
//! Mocks for every collaborator of the connection controller, so it can be
//! exercised without a broker, a network interface or a real clock.

pub mod mocks;

pub use mocks::*;
