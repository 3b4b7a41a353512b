// EVTC - Event counter collection
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Source subscription management
//!
//! Each announced source moves once from unknown to either enabled or not
//! enabled, and stays there until it is removed or the collector is disposed.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::config::{fallback_refresh_interval, usable_refresh_interval};
use crate::diagnostics::{DiagnosticEvent, DiagnosticSink};
use crate::error::{CollectorError, Result};
use crate::registry::CounterRegistry;
use crate::runtime::{CounterRuntime, RuntimeError};

/// Subscription state of one discovered source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Subscribed with the runtime
    Enabled,
    /// No configured counter, or the runtime rejected the subscription
    NotEnabled,
}

/// Per-source subscription record
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSubscription {
    pub source_name: String,
    pub state: SubscriptionState,
    pub refresh_interval_secs: f64,
}

impl SourceSubscription {
    pub fn is_enabled(&self) -> bool {
        self.state == SubscriptionState::Enabled
    }
}

#[derive(Debug, Default)]
struct Subscriptions {
    by_source: HashMap<String, SourceSubscription>,
    /// Set by [`SubscriptionManager::revoke_all`]; no source is enabled afterwards.
    closed: bool,
}

/// Decides which sources to subscribe and tracks their state.
pub struct SubscriptionManager {
    registry: Arc<CounterRegistry>,
    runtime: Arc<dyn CounterRuntime>,
    diagnostics: Arc<dyn DiagnosticSink>,
    configured_interval_secs: f64,
    subscriptions: Mutex<Subscriptions>,
}

impl SubscriptionManager {
    pub fn new(
        registry: Arc<CounterRegistry>,
        runtime: Arc<dyn CounterRuntime>,
        diagnostics: Arc<dyn DiagnosticSink>,
        configured_interval_secs: f64,
    ) -> Self {
        Self {
            registry,
            runtime,
            diagnostics,
            configured_interval_secs,
            subscriptions: Mutex::new(Subscriptions::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Subscriptions> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Interval to request for `source_name`, warning once per configured
    /// counter when the configured value cannot be used.
    fn interval_for(&self, source_name: &str) -> Duration {
        if let Some(interval) = usable_refresh_interval(self.configured_interval_secs) {
            return interval;
        }
        for counter in self.registry.counters_for(source_name) {
            self.diagnostics.emit(DiagnosticEvent::IntervalDefaulted {
                counter_name: format!("{}|{}", source_name, counter),
            });
        }
        fallback_refresh_interval()
    }

    /// React to a newly announced source. Never fails: a rejected
    /// subscription is reported and the source is left not enabled.
    ///
    /// A source dropped by [`on_source_removed`](Self::on_source_removed) or
    /// [`revoke_all`](Self::revoke_all) while its enable call is in flight is
    /// revoked as soon as that call returns.
    pub fn on_source_discovered(&self, source_name: &str) -> SubscriptionState {
        let referenced = self.registry.references_source(source_name);
        {
            let mut subscriptions = self.lock();
            if subscriptions.closed {
                log::debug!("source '{}' announced after revoke_all, ignored", source_name);
                return SubscriptionState::NotEnabled;
            }
            if let Some(existing) = subscriptions.by_source.get(source_name) {
                return existing.state;
            }
            // Claim the source before calling out so a concurrent
            // announcement cannot subscribe it twice. It only counts as
            // enabled once the runtime has accepted it.
            subscriptions.by_source.insert(
                source_name.to_string(),
                SourceSubscription {
                    source_name: source_name.to_string(),
                    state: SubscriptionState::NotEnabled,
                    refresh_interval_secs: 0.0,
                },
            );
        }

        if !referenced {
            self.diagnostics.emit(DiagnosticEvent::SourceNotEnabled {
                source_name: source_name.to_string(),
            });
            return SubscriptionState::NotEnabled;
        }

        let interval = self.interval_for(source_name);
        let state = match self.enable(source_name, interval) {
            Ok(()) => {
                self.diagnostics.emit(DiagnosticEvent::SourceEnabled {
                    source_name: source_name.to_string(),
                });
                SubscriptionState::Enabled
            }
            Err(err) => {
                self.diagnostics.emit(DiagnosticEvent::error("enable", &err));
                SubscriptionState::NotEnabled
            }
        };

        let still_claimed = {
            let mut subscriptions = self.lock();
            match subscriptions.by_source.get_mut(source_name) {
                Some(subscription) => {
                    subscription.state = state;
                    subscription.refresh_interval_secs = interval.as_secs_f64();
                    true
                }
                None => false,
            }
        };
        if still_claimed {
            return state;
        }

        // Removed or revoked while the runtime call was running.
        if state == SubscriptionState::Enabled {
            self.revoke(source_name);
        }
        SubscriptionState::NotEnabled
    }

    /// Forget a source, revoking its subscription if it had one.
    pub fn on_source_removed(&self, source_name: &str) {
        let removed = self.lock().by_source.remove(source_name);
        if let Some(subscription) = removed {
            if subscription.is_enabled() {
                self.revoke(source_name);
            }
        }
    }

    /// Revoke every enabled subscription and stop enabling new sources.
    /// Returns how many were revoked.
    pub fn revoke_all(&self) -> usize {
        let enabled: Vec<String> = {
            let mut subscriptions = self.lock();
            subscriptions.closed = true;
            subscriptions
                .by_source
                .drain()
                .filter(|(_, s)| s.is_enabled())
                .map(|(name, _)| name)
                .collect()
        };
        for source_name in &enabled {
            self.revoke(source_name);
        }
        enabled.len()
    }

    /// State of one source, if it was announced
    pub fn state_of(&self, source_name: &str) -> Option<SubscriptionState> {
        self.lock().by_source.get(source_name).map(|s| s.state)
    }

    /// Snapshot of all known subscriptions
    pub fn subscriptions(&self) -> Vec<SourceSubscription> {
        let mut all: Vec<SourceSubscription> =
            self.lock().by_source.values().cloned().collect();
        all.sort_by(|a, b| a.source_name.cmp(&b.source_name));
        all
    }

    /// Number of enabled sources
    pub fn enabled_count(&self) -> usize {
        self.lock()
            .by_source
            .values()
            .filter(|s| s.is_enabled())
            .count()
    }

    fn enable(&self, source_name: &str, interval: Duration) -> Result<()> {
        call_runtime(source_name, || {
            self.runtime.enable_source(source_name, interval)
        })
    }

    fn revoke(&self, source_name: &str) {
        match call_runtime(source_name, || self.runtime.disable_source(source_name)) {
            Ok(()) => self.diagnostics.emit(DiagnosticEvent::SourceDisabled {
                source_name: source_name.to_string(),
            }),
            Err(err) => self.diagnostics.emit(DiagnosticEvent::error("disable", &err)),
        }
    }
}

/// Run a runtime call, converting both errors and panics into
/// [`CollectorError::Subscription`].
fn call_runtime<F>(source_name: &str, call: F) -> Result<()>
where
    F: FnOnce() -> std::result::Result<(), RuntimeError>,
{
    let outcome = catch_unwind(AssertUnwindSafe(call)).unwrap_or_else(|_| {
        Err(RuntimeError::Rejected("runtime callback panicked".to_string()))
    });
    outcome.map_err(|reason| CollectorError::Subscription {
        source_name: source_name.to_string(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectionRequest;
    use crate::diagnostics::MemoryDiagnosticSink;

    #[derive(Default)]
    struct FakeRuntime {
        enabled: Mutex<Vec<(String, Duration)>>,
        disabled: Mutex<Vec<String>>,
        reject: Option<String>,
        enable_delay: Duration,
    }

    impl CounterRuntime for FakeRuntime {
        fn enable_source(&self, source_name: &str, interval: Duration) -> std::result::Result<(), RuntimeError> {
            std::thread::sleep(self.enable_delay);
            if self.reject.as_deref() == Some(source_name) {
                return Err(RuntimeError::Rejected("not allowed".to_string()));
            }
            self.enabled
                .lock()
                .unwrap()
                .push((source_name.to_string(), interval));
            Ok(())
        }

        fn disable_source(&self, source_name: &str) -> std::result::Result<(), RuntimeError> {
            self.disabled.lock().unwrap().push(source_name.to_string());
            Ok(())
        }
    }

    fn setup(
        interval: f64,
        runtime: FakeRuntime,
    ) -> (SubscriptionManager, Arc<FakeRuntime>, Arc<MemoryDiagnosticSink>) {
        let registry = Arc::new(CounterRegistry::from_requests(&[
            CollectionRequest::new("System.Runtime", "cpu-usage"),
            CollectionRequest::new("Bad.Source", "x"),
        ]));
        let runtime = Arc::new(runtime);
        let sink = Arc::new(MemoryDiagnosticSink::default());
        let manager = SubscriptionManager::new(registry, runtime.clone(), sink.clone(), interval);
        (manager, runtime, sink)
    }

    #[test]
    fn test_configured_source_enabled() {
        let (manager, runtime, sink) = setup(10.0, FakeRuntime::default());

        let state = manager.on_source_discovered("System.Runtime");
        assert_eq!(state, SubscriptionState::Enabled);
        assert_eq!(
            runtime.enabled.lock().unwrap().as_slice(),
            &[("System.Runtime".to_string(), Duration::from_secs(10))]
        );
        assert!(sink.contains("SOURCE_ENABLED"));
        assert_eq!(manager.enabled_count(), 1);
    }

    #[test]
    fn test_unconfigured_source_not_enabled() {
        let (manager, runtime, sink) = setup(10.0, FakeRuntime::default());

        let state = manager.on_source_discovered("Microsoft.AspNetCore");
        assert_eq!(state, SubscriptionState::NotEnabled);
        assert!(runtime.enabled.lock().unwrap().is_empty());
        assert!(sink.contains("SOURCE_NOT_ENABLED"));
    }

    #[test]
    fn test_zero_interval_defaults_with_warning() {
        let (manager, runtime, sink) = setup(0.0, FakeRuntime::default());

        manager.on_source_discovered("System.Runtime");
        assert_eq!(
            runtime.enabled.lock().unwrap()[0].1,
            Duration::from_secs(1)
        );
        let events = sink.events();
        assert!(events.contains(&DiagnosticEvent::IntervalDefaulted {
            counter_name: "System.Runtime|cpu-usage".to_string()
        }));
    }

    #[test]
    fn test_oversized_interval_defaults_with_warning() {
        for huge in [1e20, f64::MAX] {
            let (manager, runtime, sink) = setup(huge, FakeRuntime::default());

            let state = manager.on_source_discovered("System.Runtime");
            assert_eq!(state, SubscriptionState::Enabled);
            assert_eq!(
                runtime.enabled.lock().unwrap().as_slice(),
                &[("System.Runtime".to_string(), Duration::from_secs(1))]
            );
            assert_eq!(sink.count("INTERVAL_DEFAULTED"), 1);
            assert_eq!(manager.subscriptions()[0].refresh_interval_secs, 1.0);
        }
    }

    #[test]
    fn test_rejected_source_reports_error_and_continues() {
        let runtime = FakeRuntime {
            reject: Some("Bad.Source".to_string()),
            ..Default::default()
        };
        let (manager, _runtime, sink) = setup(5.0, runtime);

        assert_eq!(
            manager.on_source_discovered("Bad.Source"),
            SubscriptionState::NotEnabled
        );
        assert_eq!(
            manager.on_source_discovered("System.Runtime"),
            SubscriptionState::Enabled
        );
        assert_eq!(sink.count("COLLECTION_ERROR"), 1);
        assert_eq!(manager.enabled_count(), 1);
    }

    #[test]
    fn test_rediscovery_keeps_state() {
        let (manager, runtime, _sink) = setup(5.0, FakeRuntime::default());
        manager.on_source_discovered("System.Runtime");
        manager.on_source_discovered("System.Runtime");
        assert_eq!(runtime.enabled.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_source_removed_revokes() {
        let (manager, runtime, sink) = setup(5.0, FakeRuntime::default());
        manager.on_source_discovered("System.Runtime");
        manager.on_source_removed("System.Runtime");

        assert_eq!(runtime.disabled.lock().unwrap().as_slice(), &["System.Runtime".to_string()]);
        assert!(sink.contains("SOURCE_DISABLED"));
        assert!(manager.state_of("System.Runtime").is_none());
    }

    #[test]
    fn test_revoke_all_only_enabled() {
        let (manager, runtime, _sink) = setup(5.0, FakeRuntime::default());
        manager.on_source_discovered("System.Runtime");
        manager.on_source_discovered("Unrelated");

        assert_eq!(manager.revoke_all(), 1);
        assert_eq!(runtime.disabled.lock().unwrap().len(), 1);
        assert!(manager.subscriptions().is_empty());
        assert_eq!(manager.revoke_all(), 0);
    }

    #[test]
    fn test_revoke_all_during_enable_revokes_after_enable() {
        let runtime = FakeRuntime {
            enable_delay: Duration::from_millis(100),
            ..Default::default()
        };
        let (manager, runtime, sink) = setup(5.0, runtime);
        let manager = Arc::new(manager);

        let discovering = {
            let manager = Arc::clone(&manager);
            std::thread::spawn(move || manager.on_source_discovered("System.Runtime"))
        };
        std::thread::sleep(Duration::from_millis(20));
        // The enable call is still running; nothing to revoke yet.
        assert_eq!(manager.revoke_all(), 0);

        let state = discovering.join().unwrap();
        assert_eq!(state, SubscriptionState::NotEnabled);
        assert_eq!(runtime.enabled.lock().unwrap().len(), 1);
        assert_eq!(
            runtime.disabled.lock().unwrap().as_slice(),
            &["System.Runtime".to_string()]
        );
        assert!(sink.contains("SOURCE_DISABLED"));
        assert!(manager.subscriptions().is_empty());
        assert_eq!(manager.enabled_count(), 0);
    }

    #[test]
    fn test_removed_during_enable_is_revoked() {
        let runtime = FakeRuntime {
            enable_delay: Duration::from_millis(100),
            ..Default::default()
        };
        let (manager, runtime, _sink) = setup(5.0, runtime);
        let manager = Arc::new(manager);

        let discovering = {
            let manager = Arc::clone(&manager);
            std::thread::spawn(move || manager.on_source_discovered("System.Runtime"))
        };
        std::thread::sleep(Duration::from_millis(20));
        manager.on_source_removed("System.Runtime");

        assert_eq!(discovering.join().unwrap(), SubscriptionState::NotEnabled);
        assert_eq!(runtime.disabled.lock().unwrap().len(), 1);
        assert!(manager.state_of("System.Runtime").is_none());
    }

    #[test]
    fn test_no_enable_after_revoke_all() {
        let (manager, runtime, sink) = setup(5.0, FakeRuntime::default());
        manager.revoke_all();

        assert_eq!(
            manager.on_source_discovered("System.Runtime"),
            SubscriptionState::NotEnabled
        );
        assert!(runtime.enabled.lock().unwrap().is_empty());
        assert!(!sink.contains("SOURCE_ENABLED"));
        assert!(manager.subscriptions().is_empty());
    }
}
