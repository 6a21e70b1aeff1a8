//! Error types for the connection controller
//!
//! Nothing here is fatal. Every controller operation returns a [`LinkResult`]
//! and the caller inspects the classification; recovery is always a later
//! tick. [`LinkError::code`] maps each error onto the flat [`ResultCode`]
//! used in logs and telemetry.

use crate::controller::publish::PublishClass;
use crate::transport::{BrokerAddress, TransportError};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Main error type for controller operations
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Network link is down")]
    LinkDown,

    #[error("Backoff period not elapsed, next attempt in {remaining:?}")]
    NotReady { remaining: Duration },

    #[error("Connection to {address} failed: {source}")]
    ConnectFailed {
        address: BrokerAddress,
        #[source]
        source: TransportError,
    },

    #[error("Subscription failed: {0}")]
    SubscribeFailed(#[source] TransportError),

    #[error("Publishing {class} failed: {source}")]
    PublishFailed {
        class: PublishClass,
        #[source]
        source: TransportError,
    },
}

/// Flat classification of an operation outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultCode {
    Success,
    ErrorLink,
    ErrorNotReady,
    ErrorConnect,
    ErrorSubscribe,
    ErrorPublish,
}

impl LinkError {
    /// Map to the flat result classification
    pub fn code(&self) -> ResultCode {
        match self {
            LinkError::LinkDown => ResultCode::ErrorLink,
            LinkError::NotReady { .. } => ResultCode::ErrorNotReady,
            LinkError::ConnectFailed { .. } => ResultCode::ErrorConnect,
            LinkError::SubscribeFailed(_) => ResultCode::ErrorSubscribe,
            LinkError::PublishFailed { .. } => ResultCode::ErrorPublish,
        }
    }

    /// Whether this outcome counts as a failure rather than expected waiting
    pub fn is_failure(&self) -> bool {
        !matches!(self, LinkError::NotReady { .. } | LinkError::LinkDown)
    }
}

/// Classify any controller result
pub fn result_code<T>(result: &LinkResult<T>) -> ResultCode {
    match result {
        Ok(_) => ResultCode::Success,
        Err(e) => e.code(),
    }
}

/// Result type for controller operations
pub type LinkResult<T> = Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn connect_failed() -> LinkError {
        LinkError::ConnectFailed {
            address: BrokerAddress::new("tb.local", 1883),
            source: TransportError::Timeout(Duration::from_secs(5)),
        }
    }

    #[test]
    fn test_all_error_variants_map_to_codes() {
        assert_eq!(LinkError::LinkDown.code(), ResultCode::ErrorLink);
        assert_eq!(
            LinkError::NotReady {
                remaining: Duration::from_secs(1)
            }
            .code(),
            ResultCode::ErrorNotReady
        );
        assert_eq!(connect_failed().code(), ResultCode::ErrorConnect);
        assert_eq!(
            LinkError::SubscribeFailed(TransportError::SubscriptionRejected).code(),
            ResultCode::ErrorSubscribe
        );
        assert_eq!(
            LinkError::PublishFailed {
                class: PublishClass::Telemetry,
                source: TransportError::NotConnected,
            }
            .code(),
            ResultCode::ErrorPublish
        );
    }

    #[test]
    fn test_waiting_is_not_a_failure() {
        assert!(!LinkError::LinkDown.is_failure());
        assert!(!LinkError::NotReady {
            remaining: Duration::ZERO
        }
        .is_failure());
        assert!(connect_failed().is_failure());
    }

    #[test]
    fn test_error_display_names_address() {
        let message = connect_failed().to_string();
        assert!(message.contains("tb.local:1883"));
        assert!(message.contains("5s"));
    }

    #[test]
    fn test_result_code_helper() {
        let ok: LinkResult<()> = Ok(());
        assert_eq!(result_code(&ok), ResultCode::Success);
        let err: LinkResult<()> = Err(LinkError::LinkDown);
        assert_eq!(result_code(&err), ResultCode::ErrorLink);
    }

    #[test]
    fn test_result_code_serialization() {
        assert_eq!(
            serde_json::to_string(&ResultCode::ErrorNotReady).unwrap(),
            "\"ERROR_NOT_READY\""
        );
    }
}
