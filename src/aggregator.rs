// EVTC - Event counter collection
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Per-key accumulation of published samples
//!
//! The [`SampleAggregator`] owns one [`AccumulatorEntry`] per configured key.
//! Each entry guards its running window behind its own mutex, so an append
//! and a window swap on the same key are serialized while unrelated keys
//! never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::error::{CollectorError, Result};
use crate::payload::{CounterKind, Observation};
use crate::registry::{CounterKey, CounterRegistry};

/// Aggregate of one key over one window
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSummary {
    pub key: CounterKey,
    /// `sum / count`, or 0 for an idle window
    pub mean: f64,
    pub sample_count: u64,
    /// `None` for an idle window
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub window_start: DateTime<Utc>,
    /// End of the window; strictly increasing per key
    pub window_timestamp: DateTime<Utc>,
}

impl WindowSummary {
    pub fn is_idle(&self) -> bool {
        self.sample_count == 0
    }
}

#[derive(Debug)]
struct WindowState {
    sum: f64,
    count: u64,
    min: f64,
    max: f64,
    window_start: DateTime<Utc>,
    /// Fixed by the first accepted observation, kept across windows
    kind: Option<CounterKind>,
}

impl WindowState {
    fn new(window_start: DateTime<Utc>) -> Self {
        Self {
            sum: 0.0,
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            window_start,
            kind: None,
        }
    }
}

/// Running window state for one key
#[derive(Debug)]
pub struct AccumulatorEntry {
    key: CounterKey,
    state: Mutex<WindowState>,
}

impl AccumulatorEntry {
    pub fn new(key: CounterKey, window_start: DateTime<Utc>) -> Self {
        Self {
            key,
            state: Mutex::new(WindowState::new(window_start)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn key(&self) -> &CounterKey {
        &self.key
    }

    /// Add one observation to the current window.
    pub fn append(&self, observation: &Observation) -> Result<()> {
        let mut state = self.lock();
        match state.kind {
            Some(kind) if kind != observation.kind => {
                return Err(CollectorError::KindMismatch {
                    key: self.key.to_string(),
                    expected: kind.as_str(),
                    actual: observation.kind.as_str(),
                });
            }
            Some(_) => {}
            None => state.kind = Some(observation.kind),
        }

        if observation.count == 0 {
            return Ok(());
        }
        let count = state
            .count
            .checked_add(observation.count)
            .ok_or_else(|| CollectorError::CountOverflow {
                key: self.key.to_string(),
                pending: state.count,
                incoming: observation.count,
            })?;
        state.count = count;
        state.sum += observation.sum;
        state.min = state.min.min(observation.min);
        state.max = state.max.max(observation.max);
        Ok(())
    }

    /// Close the current window at `now` and start the next one.
    pub fn take_window(&self, now: DateTime<Utc>) -> WindowSummary {
        let mut state = self.lock();

        let window_timestamp = if now > state.window_start {
            now
        } else {
            state.window_start + ChronoDuration::microseconds(1)
        };

        let (mean, min, max) = if state.count > 0 {
            (
                state.sum / state.count as f64,
                Some(state.min),
                Some(state.max),
            )
        } else {
            (0.0, None, None)
        };

        let summary = WindowSummary {
            key: self.key.clone(),
            mean,
            sample_count: state.count,
            min,
            max,
            window_start: state.window_start,
            window_timestamp,
        };

        let kind = state.kind;
        *state = WindowState::new(window_timestamp);
        state.kind = kind;

        summary
    }

    /// Samples in the current window
    pub fn pending(&self) -> u64 {
        self.lock().count
    }
}

/// Matches samples against the registry and accumulates them per key.
pub struct SampleAggregator {
    registry: Arc<CounterRegistry>,
    entries: RwLock<HashMap<CounterKey, Arc<AccumulatorEntry>>>,
}

impl SampleAggregator {
    pub fn new(registry: Arc<CounterRegistry>) -> Self {
        Self {
            registry,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Create an entry for every configured key so idle windows are reported.
    pub fn register_all(&self, now: DateTime<Utc>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        for key in self.registry.keys() {
            entries
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AccumulatorEntry::new(key, now)));
        }
    }

    /// Whether `(source_name, counter_name)` is tracked
    pub fn matches(&self, source_name: &str, counter_name: &str) -> bool {
        self.registry.matches(source_name, counter_name)
    }

    /// Look up or lazily create the entry for `key`.
    pub fn entry(&self, key: &CounterKey) -> Arc<AccumulatorEntry> {
        if let Some(entry) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            return Arc::clone(entry);
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            entries
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AccumulatorEntry::new(key.clone(), Utc::now()))),
        )
    }

    /// Accumulate one observation for a matched key.
    pub fn record(&self, key: &CounterKey, observation: &Observation) -> Result<()> {
        self.entry(key).append(observation)
    }

    /// Close the window of every configured key, in key order.
    pub fn take_windows(&self, now: DateTime<Utc>) -> Vec<WindowSummary> {
        self.registry
            .keys()
            .iter()
            .map(|key| self.entry(key).take_window(now))
            .collect()
    }

    /// Samples currently pending for `key`
    pub fn pending(&self, key: &CounterKey) -> u64 {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map_or(0, |e| e.pending())
    }

    /// Number of live entries
    pub fn entry_count(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectionRequest;
    use approx::assert_relative_eq;
    use std::thread;

    fn key() -> CounterKey {
        CounterKey::new("System.Runtime", "cpu-usage")
    }

    fn aggregator() -> SampleAggregator {
        let registry = CounterRegistry::from_requests(&[
            CollectionRequest::new("System.Runtime", "cpu-usage"),
            CollectionRequest::new("System.Runtime", "gc-heap-size"),
        ]);
        SampleAggregator::new(Arc::new(registry))
    }

    #[test]
    fn test_entry_mean_over_window() {
        let entry = AccumulatorEntry::new(key(), Utc::now());
        for v in [1000.0, 1500.0, 1500.0, 400.0] {
            entry.append(&Observation::single(v)).unwrap();
        }

        let summary = entry.take_window(Utc::now());
        assert_eq!(summary.sample_count, 4);
        assert_relative_eq!(summary.mean, 1100.0);
        assert_eq!(summary.min, Some(400.0));
        assert_eq!(summary.max, Some(1500.0));
    }

    #[test]
    fn test_entry_idle_window() {
        let entry = AccumulatorEntry::new(key(), Utc::now());
        let summary = entry.take_window(Utc::now());
        assert!(summary.is_idle());
        assert_eq!(summary.mean, 0.0);
        assert_eq!(summary.min, None);
    }

    #[test]
    fn test_entry_swap_resets() {
        let entry = AccumulatorEntry::new(key(), Utc::now());
        entry.append(&Observation::single(5.0)).unwrap();

        let first = entry.take_window(Utc::now());
        assert_eq!(first.sample_count, 1);
        assert_eq!(entry.pending(), 0);

        let second = entry.take_window(Utc::now());
        assert_eq!(second.sample_count, 0);
        assert_eq!(second.window_start, first.window_timestamp);
    }

    #[test]
    fn test_entry_timestamps_strictly_increase() {
        let start = Utc::now();
        let entry = AccumulatorEntry::new(key(), start);

        // Same instant, then a clock step backwards
        let a = entry.take_window(start);
        let b = entry.take_window(start - ChronoDuration::seconds(5));
        assert!(a.window_timestamp > start);
        assert!(b.window_timestamp > a.window_timestamp);
    }

    #[test]
    fn test_entry_pre_aggregated_weighting() {
        let entry = AccumulatorEntry::new(key(), Utc::now());
        entry
            .append(&Observation {
                kind: CounterKind::Mean,
                sum: 1100.0 * 4.0,
                count: 4,
                min: 400.0,
                max: 1500.0,
            })
            .unwrap();
        entry.append(&Observation::single(600.0)).unwrap();

        let summary = entry.take_window(Utc::now());
        assert_eq!(summary.sample_count, 5);
        assert_relative_eq!(summary.mean, 1000.0);
    }

    #[test]
    fn test_entry_kind_is_fixed() {
        let entry = AccumulatorEntry::new(key(), Utc::now());
        entry.append(&Observation::single(1.0)).unwrap();

        let sum = Observation {
            kind: CounterKind::Sum,
            sum: 3.0,
            count: 1,
            min: 3.0,
            max: 3.0,
        };
        let result = entry.append(&sum);
        assert!(matches!(result, Err(CollectorError::KindMismatch { .. })));

        // Kind survives the window swap
        entry.take_window(Utc::now());
        assert!(entry.append(&sum).is_err());
        assert_eq!(entry.pending(), 0);
    }

    #[test]
    fn test_entry_count_overflow_rejects_whole_sample() {
        let entry = AccumulatorEntry::new(key(), Utc::now());
        let heavy = |count: u64, mean: f64| Observation {
            kind: CounterKind::Mean,
            sum: mean * count as f64,
            count,
            min: mean,
            max: mean,
        };
        entry.append(&heavy(u64::MAX, 1.0)).unwrap();

        let result = entry.append(&heavy(2, 500.0));
        assert!(matches!(result, Err(CollectorError::CountOverflow { .. })));
        assert_eq!(entry.pending(), u64::MAX);

        let summary = entry.take_window(Utc::now());
        assert_eq!(summary.sample_count, u64::MAX);
        assert_relative_eq!(summary.mean, 1.0);
        assert_eq!(summary.max, Some(1.0));

        // The next window starts from zero again
        entry.append(&heavy(2, 500.0)).unwrap();
        assert_eq!(entry.pending(), 2);
    }

    #[test]
    fn test_aggregator_reports_every_configured_key() {
        let aggregator = aggregator();
        aggregator.register_all(Utc::now());
        assert_eq!(aggregator.entry_count(), 2);

        aggregator.record(&key(), &Observation::single(2.0)).unwrap();

        let summaries = aggregator.take_windows(Utc::now());
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].key, key());
        assert_eq!(summaries[0].sample_count, 1);
        assert!(summaries[1].is_idle());
    }

    #[test]
    fn test_aggregator_lazy_entry() {
        let aggregator = aggregator();
        assert_eq!(aggregator.entry_count(), 0);
        aggregator.record(&key(), &Observation::single(2.0)).unwrap();
        assert_eq!(aggregator.entry_count(), 1);
        assert_eq!(aggregator.pending(&key()), 1);
    }

    #[test]
    fn test_aggregator_concurrent_appends() {
        let aggregator = Arc::new(aggregator());
        aggregator.register_all(Utc::now());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let aggregator = Arc::clone(&aggregator);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        aggregator.record(&key(), &Observation::single(1.0)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let summaries = aggregator.take_windows(Utc::now());
        assert_eq!(summaries[0].sample_count, 8000);
        assert_relative_eq!(summaries[0].mean, 1.0);
    }

    #[test]
    fn test_aggregator_appends_during_swaps_are_not_lost() {
        let aggregator = Arc::new(aggregator());
        aggregator.register_all(Utc::now());

        let writer = {
            let aggregator = Arc::clone(&aggregator);
            thread::spawn(move || {
                for _ in 0..5000 {
                    aggregator.record(&key(), &Observation::single(1.0)).unwrap();
                }
            })
        };

        let mut total = 0;
        while !writer.is_finished() {
            total += aggregator.take_windows(Utc::now())[0].sample_count;
        }
        writer.join().unwrap();
        total += aggregator.take_windows(Utc::now())[0].sample_count;

        assert_eq!(total, 5000);
    }
}
