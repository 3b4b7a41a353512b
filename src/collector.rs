// EVTC - Event counter collection
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! The collector facade
//!
//! [`EventCounterCollector`] owns the registry, subscription manager,
//! aggregator, emitter and flush timer. A runtime adapter drives it through
//! the [`CounterListener`] callbacks; nothing on that surface returns an
//! error or panics; failures become diagnostic events.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::Utc;
use serde_json::Value;

use crate::aggregator::{SampleAggregator, WindowSummary};
use crate::config::CollectorConfig;
use crate::diagnostics::{DiagnosticEvent, DiagnosticSink, LogDiagnosticSink};
use crate::emitter::MetricEmitter;
use crate::error::CollectorError;
use crate::payload::CounterPayload;
use crate::registry::{CounterKey, CounterRegistry};
use crate::runtime::{CounterListener, CounterRuntime};
use crate::scheduler::FlushScheduler;
use crate::subscription::{SourceSubscription, SubscriptionManager};
use crate::transport::TelemetryTransport;

const STATE_CREATED: u8 = 0;
const STATE_INITIALIZED: u8 = 1;
const STATE_DISPOSED: u8 = 2;

/// Lifecycle of a collector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Created,
    Initialized,
    Disposed,
}

struct Inner {
    config: CollectorConfig,
    registry: Arc<CounterRegistry>,
    subscriptions: SubscriptionManager,
    aggregator: SampleAggregator,
    emitter: MetricEmitter,
    diagnostics: Arc<dyn DiagnosticSink>,
    state: AtomicU8,
    /// Held for the whole of a flush; dispose takes it to wait out a tick.
    flush_lock: Mutex<()>,
}

impl Inner {
    fn state(&self) -> CollectorState {
        match self.state.load(Ordering::Acquire) {
            STATE_CREATED => CollectorState::Created,
            STATE_INITIALIZED => CollectorState::Initialized,
            _ => CollectorState::Disposed,
        }
    }

    fn flush_guard(&self) -> MutexGuard<'_, ()> {
        self.flush_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn flush(&self) -> Vec<WindowSummary> {
        let _guard = self.flush_guard();
        if self.state() != CollectorState::Initialized {
            return Vec::new();
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let summaries = self.aggregator.take_windows(Utc::now());
            for summary in &summaries {
                if let Err(err) = self.emitter.emit(summary) {
                    self.diagnostics.emit(DiagnosticEvent::error("emit", &err));
                }
            }
            summaries
        }));

        match outcome {
            Ok(summaries) => {
                log::trace!("flushed {} windows", summaries.len());
                summaries
            }
            Err(_) => {
                self.diagnostics
                    .emit(DiagnosticEvent::error("flush", "flush panicked"));
                Vec::new()
            }
        }
    }

    fn accept_sample(&self, source_name: &str, payload: &Value) {
        match self.state() {
            CollectorState::Created => {
                self.diagnostics
                    .emit(DiagnosticEvent::SampleIgnoredNotInitialized {
                        source_name: source_name.to_string(),
                    });
                return;
            }
            CollectorState::Disposed => {
                log::debug!("sample from '{}' after dispose dropped", source_name);
                return;
            }
            CollectorState::Initialized => {}
        }

        let parsed = match CounterPayload::parse(payload) {
            Ok(parsed) => parsed,
            Err(err) => {
                self.payload_not_parseable(source_name, &err);
                return;
            }
        };

        let counter_name = match parsed.counter_name() {
            Some(name) => name,
            None => {
                self.payload_not_parseable(source_name, &crate::payload::PayloadError::MissingName);
                return;
            }
        };

        if !self.aggregator.matches(source_name, counter_name) {
            self.diagnostics
                .emit(DiagnosticEvent::SampleIgnoredNotConfigured {
                    source_name: source_name.to_string(),
                    counter_name: counter_name.to_string(),
                });
            return;
        }

        let key = CounterKey::new(source_name, counter_name);
        if parsed.declares_invalid_interval() {
            self.diagnostics.emit(DiagnosticEvent::IntervalDefaulted {
                counter_name: key.metric_name(),
            });
        }

        let observation = match parsed.observation() {
            Ok(observation) => observation,
            Err(err) => {
                self.payload_not_parseable(source_name, &err);
                return;
            }
        };

        match self.aggregator.record(&key, &observation) {
            Ok(()) => {}
            Err(
                err @ (CollectorError::KindMismatch { .. } | CollectorError::CountOverflow { .. }),
            ) => {
                self.diagnostics.emit(DiagnosticEvent::warning("sample", &err));
            }
            Err(err) => {
                self.diagnostics.emit(DiagnosticEvent::error("sample", &err));
            }
        }
    }

    fn payload_not_parseable(&self, source_name: &str, reason: &dyn std::fmt::Display) {
        self.diagnostics.emit(DiagnosticEvent::PayloadNotParseable {
            source_name: source_name.to_string(),
            reason: reason.to_string(),
        });
    }
}

/// Collects configured event counters and emits one record per counter per
/// refresh interval.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use evtc::{CollectorConfig, CounterListener, CounterRuntime, EventCounterCollector,
///            MemoryTransport, RuntimeError};
///
/// struct NoopRuntime;
///
/// impl CounterRuntime for NoopRuntime {
///     fn enable_source(&self, _: &str, _: Duration) -> Result<(), RuntimeError> { Ok(()) }
///     fn disable_source(&self, _: &str) -> Result<(), RuntimeError> { Ok(()) }
/// }
///
/// let config = CollectorConfig::with_refresh_interval(60.0)
///     .with_counter("System.Runtime", "cpu-usage");
/// let transport = Arc::new(MemoryTransport::new());
/// let collector = EventCounterCollector::new(config, Arc::new(NoopRuntime), transport.clone());
/// collector.initialize();
///
/// collector.on_sample_delivered(
///     "System.Runtime",
///     &serde_json::json!({ "Name": "cpu-usage", "Mean": 12.5 }),
/// );
/// collector.flush_now();
///
/// assert_eq!(transport.records()[0].value, 12.5);
/// collector.dispose();
/// ```
pub struct EventCounterCollector {
    inner: Arc<Inner>,
    scheduler: Mutex<Option<FlushScheduler>>,
}

impl EventCounterCollector {
    /// Create a collector that reports diagnostics through `log`.
    pub fn new(
        config: CollectorConfig,
        runtime: Arc<dyn CounterRuntime>,
        transport: Arc<dyn TelemetryTransport>,
    ) -> Self {
        Self::with_diagnostics(config, runtime, transport, Arc::new(LogDiagnosticSink))
    }

    /// Create a collector with an explicit diagnostic sink.
    pub fn with_diagnostics(
        config: CollectorConfig,
        runtime: Arc<dyn CounterRuntime>,
        transport: Arc<dyn TelemetryTransport>,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Self {
        let registry = Arc::new(CounterRegistry::from_requests(&config.counters));
        let subscriptions = SubscriptionManager::new(
            Arc::clone(&registry),
            runtime,
            Arc::clone(&diagnostics),
            config.refresh_interval_secs,
        );
        let aggregator = SampleAggregator::new(Arc::clone(&registry));

        Self {
            inner: Arc::new(Inner {
                config,
                registry,
                subscriptions,
                aggregator,
                emitter: MetricEmitter::new(transport),
                diagnostics,
                state: AtomicU8::new(STATE_CREATED),
                flush_lock: Mutex::new(()),
            }),
            scheduler: Mutex::new(None),
        }
    }

    fn scheduler_slot(&self) -> MutexGuard<'_, Option<FlushScheduler>> {
        self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start collecting: register every configured key and start the flush
    /// timer. Calling it again, or after dispose, has no effect.
    pub fn initialize(&self) {
        let inner = &self.inner;
        let mut slot = self.scheduler_slot();
        if inner
            .state
            .compare_exchange(STATE_CREATED, STATE_INITIALIZED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::debug!("initialize ignored in state {:?}", inner.state());
            return;
        }

        inner.diagnostics.emit(DiagnosticEvent::ModuleInitializing {
            message: format!(
                "collecting {} counters every {:?}",
                inner.registry.len(),
                inner.config.effective_refresh_interval()
            ),
        });

        if inner.registry.is_empty() {
            inner.diagnostics.emit(DiagnosticEvent::NoCountersConfigured);
            inner.diagnostics.emit(DiagnosticEvent::ModuleInitialized);
            return;
        }

        inner.aggregator.register_all(Utc::now());
        inner.diagnostics.emit(DiagnosticEvent::ListenerInitialized);

        let weak: Weak<Inner> = Arc::downgrade(inner);
        let interval = inner.config.effective_refresh_interval();
        match FlushScheduler::start(interval, move || {
            if let Some(inner) = weak.upgrade() {
                inner.flush();
            }
        }) {
            Ok(scheduler) => {
                *slot = Some(scheduler);
                inner.diagnostics.emit(DiagnosticEvent::ModuleInitialized);
            }
            Err(err) => {
                inner.diagnostics.emit(DiagnosticEvent::error("initialize", &err));
            }
        }
    }

    /// Close the current window of every configured key and emit the
    /// summaries now. Returns what was emitted; empty unless initialized.
    pub fn flush_now(&self) -> Vec<WindowSummary> {
        self.inner.flush()
    }

    /// Stop the timer, revoke every subscription and stop emitting.
    /// Idempotent; waits for an in-flight flush to finish.
    pub fn dispose(&self) {
        let inner = &self.inner;
        if inner.state.swap(STATE_DISPOSED, Ordering::AcqRel) == STATE_DISPOSED {
            return;
        }

        // A flush that already passed its state check finishes before we go on.
        drop(inner.flush_guard());

        if let Some(mut scheduler) = self.scheduler_slot().take() {
            scheduler.stop();
        }

        let revoked = inner.subscriptions.revoke_all();
        inner.aggregator.clear();
        log::debug!("collector disposed, {} sources revoked", revoked);
    }

    pub fn state(&self) -> CollectorState {
        self.inner.state()
    }

    pub fn is_initialized(&self) -> bool {
        self.state() == CollectorState::Initialized
    }

    pub fn is_disposed(&self) -> bool {
        self.state() == CollectorState::Disposed
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &CounterRegistry {
        &self.inner.registry
    }

    /// Snapshot of known source subscriptions
    pub fn subscriptions(&self) -> Vec<SourceSubscription> {
        self.inner.subscriptions.subscriptions()
    }

    /// Samples accumulated for `key` in the current window
    pub fn pending(&self, key: &CounterKey) -> u64 {
        self.inner.aggregator.pending(key)
    }
}

impl CounterListener for EventCounterCollector {
    fn on_source_discovered(&self, source_name: &str) {
        if self.is_disposed() {
            return;
        }
        self.inner.subscriptions.on_source_discovered(source_name);
    }

    fn on_source_removed(&self, source_name: &str) {
        if self.is_disposed() {
            return;
        }
        self.inner.subscriptions.on_source_removed(source_name);
    }

    fn on_sample_delivered(&self, source_name: &str, payload: &Value) {
        let inner = &self.inner;
        if catch_unwind(AssertUnwindSafe(|| inner.accept_sample(source_name, payload))).is_err() {
            inner.diagnostics.emit(DiagnosticEvent::error(
                "sample",
                format!("processing a sample from '{}' panicked", source_name),
            ));
        }
    }
}

impl Drop for EventCounterCollector {
    fn drop(&mut self) {
        self.dispose();
    }
}
