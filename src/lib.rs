// EVTC - Event counter collection
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # EVTC - Event counter collection
//!
//! Subscribes to counters published by a running process, aggregates their
//! samples per refresh window and emits one metric record per configured
//! counter per window.
//!
//! ## Key Features
//!
//! - **Selective subscription**: only sources named in the configuration are enabled
//! - **Heartbeat windows**: idle counters still report `mean = 0, count = 0`
//! - **Lock-per-key aggregation**: publisher threads never contend across counters
//! - **No error escapes**: failures become leveled diagnostic events
//!
//! ## Architecture
//!
//! ```text
//!   runtime adapter ──on_source_discovered──► SubscriptionManager ──enable──► runtime
//!         │
//!         └─────────on_sample_delivered────► CounterPayload::parse
//!                                                   │
//!                                            SampleAggregator (per-key windows)
//!                                                   │  take_windows (FlushScheduler tick)
//!                                                   ▼
//!                                            MetricEmitter ──enqueue──► TelemetryTransport
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use evtc::{CollectorConfig, CounterListener, CounterRuntime, EventCounterCollector,
//!            MemoryDiagnosticSink, MemoryTransport, RuntimeError};
//!
//! struct Runtime;
//!
//! impl CounterRuntime for Runtime {
//!     fn enable_source(&self, _: &str, _: Duration) -> Result<(), RuntimeError> { Ok(()) }
//!     fn disable_source(&self, _: &str) -> Result<(), RuntimeError> { Ok(()) }
//! }
//!
//! let config = CollectorConfig::with_refresh_interval(60.0)
//!     .with_counter("System.Runtime", "working-set");
//! let transport = Arc::new(MemoryTransport::new());
//! let diagnostics = Arc::new(MemoryDiagnosticSink::default());
//! let collector = EventCounterCollector::with_diagnostics(
//!     config,
//!     Arc::new(Runtime),
//!     transport.clone(),
//!     diagnostics.clone(),
//! );
//! collector.initialize();
//! collector.on_source_discovered("System.Runtime");
//!
//! for value in [1000.0, 1500.0, 1500.0, 400.0] {
//!     collector.on_sample_delivered(
//!         "System.Runtime",
//!         &serde_json::json!({ "Name": "working-set", "Mean": value }),
//!     );
//! }
//! collector.flush_now();
//!
//! let record = &transport.records()[0];
//! assert_eq!(record.name, "System.Runtime|working-set");
//! assert_eq!(record.count, 4);
//! assert_eq!(record.value, 1100.0);
//! collector.dispose();
//! ```
//!
//! ## Modules
//!
//! - [`collector`]: The collector facade and its lifecycle
//! - [`registry`]: Configured `(source, counter)` pairs
//! - [`subscription`]: Per-source enable/disable decisions
//! - [`payload`]: Fail-closed parsing of published samples
//! - [`aggregator`]: Per-key window accumulation
//! - [`scheduler`]: Periodic flush timer
//! - [`emitter`]: Window summary to metric record mapping
//! - [`diagnostics`]: Self-diagnostic events and sinks
//! - [`transport`]: Outward record transport seam
//! - [`runtime`]: Publishing runtime seam

// Modules
pub mod aggregator;
pub mod collector;
pub mod config;
pub mod diagnostics;
pub mod emitter;
pub mod error;
pub mod payload;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod subscription;
pub mod transport;

// Re-exports for convenient access
pub use aggregator::{AccumulatorEntry, SampleAggregator, WindowSummary};
pub use collector::{CollectorState, EventCounterCollector};
pub use config::{
    usable_refresh_interval, CollectionRequest, CollectorConfig, DEFAULT_REFRESH_INTERVAL_SECS,
    FALLBACK_REFRESH_INTERVAL_SECS, MAX_REFRESH_INTERVAL_SECS,
};
pub use diagnostics::{
    DiagnosticEvent, DiagnosticLevel, DiagnosticSink, LogDiagnosticSink, MemoryDiagnosticSink,
};
pub use emitter::{sdk_version, MetricEmitter, SDK_TAG_PREFIX};
pub use error::{CollectorError, Result};
pub use payload::{CounterKind, CounterPayload, Observation, PayloadError};
pub use registry::{CounterKey, CounterRegistry};
pub use runtime::{CounterListener, CounterRuntime, RuntimeError};
pub use scheduler::FlushScheduler;
pub use subscription::{SourceSubscription, SubscriptionManager, SubscriptionState};
pub use transport::{ChannelTransport, MemoryTransport, MetricRecord, TelemetryTransport, TransportError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
