// EVTC - Event counter collection
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Seams between the collector and the runtime that publishes counters.
//!
//! A concrete runtime integration is an adapter on both sides:
//! it implements [`CounterRuntime`] so the collector can subscribe and
//! unsubscribe, and it calls into a [`CounterListener`] when sources appear
//! and samples are published.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Failure reported by a runtime adapter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The runtime refused the request
    #[error("rejected: {0}")]
    Rejected(String),

    /// The runtime does not know this source
    #[error("unknown source: {0}")]
    UnknownSource(String),
}

/// Operations the collector needs from the publishing runtime.
pub trait CounterRuntime: Send + Sync {
    /// Ask `source_name` to publish its counters every `interval`.
    /// `interval` is never zero.
    fn enable_source(&self, source_name: &str, interval: Duration) -> Result<(), RuntimeError>;

    /// Stop publication for `source_name`.
    fn disable_source(&self, source_name: &str) -> Result<(), RuntimeError>;
}

/// Callbacks a runtime adapter drives. Implementations never panic or
/// return errors: failures are reported as diagnostics.
pub trait CounterListener: Send + Sync {
    /// A new publishing source became visible.
    fn on_source_discovered(&self, source_name: &str);

    /// A publishing source went away.
    fn on_source_removed(&self, source_name: &str);

    /// One published sample or periodic self-report.
    fn on_sample_delivered(&self, source_name: &str, payload: &Value);
}
