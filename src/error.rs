// EVTC - Event counter collection
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for EVTC
//!
//! None of these errors cross the collector's callback surface. They are
//! produced at the narrowest boundary and turned into diagnostic events there.

use thiserror::Error;

use crate::runtime::RuntimeError;
use crate::transport::TransportError;

/// Result type alias for collector operations
pub type Result<T> = std::result::Result<T, CollectorError>;

/// Main error type for collector operations
#[derive(Error, Debug)]
pub enum CollectorError {
    /// Configuration could not be read or is malformed
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The runtime rejected a subscribe or unsubscribe call
    #[error("Subscription for source '{source_name}' failed: {reason}")]
    Subscription {
        source_name: String,
        #[source]
        reason: RuntimeError,
    },

    /// The transport refused a record
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The flush thread could not be started
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] std::io::Error),

    /// A key switched between mean and sum semantics
    #[error("Counter '{key}' changed kind from {expected} to {actual}")]
    KindMismatch {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// Accepting a sample would overflow the window's sample count
    #[error("Counter '{key}' sample count overflow: {pending} pending, {incoming} incoming")]
    CountOverflow {
        key: String,
        pending: u64,
        incoming: u64,
    },
}

impl From<serde_json::Error> for CollectorError {
    fn from(err: serde_json::Error) -> Self {
        CollectorError::InvalidConfig(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CollectorError::Subscription {
            source_name: "System.Runtime".to_string(),
            reason: RuntimeError::Rejected("access denied".to_string()),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("System.Runtime"));
        assert!(msg.contains("access denied"));
    }

    #[test]
    fn test_error_conversion() {
        let err: CollectorError = TransportError::Closed.into();
        assert!(matches!(err, CollectorError::Transport(_)));
    }

    #[test]
    fn test_sample_rejection_display() {
        let err = CollectorError::CountOverflow {
            key: "System.Runtime|cpu-usage".to_string(),
            pending: u64::MAX,
            incoming: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("System.Runtime|cpu-usage"));
        assert!(msg.contains("overflow"));

        let err = CollectorError::Subscription {
            source_name: "Gone.Source".to_string(),
            reason: RuntimeError::UnknownSource("Gone.Source".to_string()),
        };
        assert!(err.to_string().contains("unknown source"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_json_error_is_config_error() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json");
        let err: CollectorError = parse.unwrap_err().into();
        assert!(matches!(err, CollectorError::InvalidConfig(_)));
    }
}
