//! Observability for the broker link
//!
//! Structured logging only; connection statistics live with the controller in
//! [`crate::controller::stats`] and are published as telemetry.

pub mod logging;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat};

// Span macros for structured logging
pub use logging::{link_span, publish_span};
