// EVTC Exporter - Dataset replay engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Dataset replay engine acting as a counter-publishing runtime.
//!
//! Rows of a CSV dataset (`timestamp_ms,source,counter,value`) are replayed
//! in timestamp order. Each source is announced to the collector the first
//! time it appears, and samples are delivered only for sources the
//! collector enabled, as a real runtime would.

use crate::metrics::{increment_samples_delivered, update_replay_metrics};
use evtc::{CollectionRequest, CounterListener, CounterRuntime, RuntimeError};
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

/// Configuration for dataset replay.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Path to CSV dataset file.
    pub csv_path: String,
    /// Replay speed multiplier (1.0 = real-time, 10.0 = 10x faster).
    pub speed: f64,
    /// Whether to loop the dataset.
    pub loop_replay: bool,
    /// Pause after the last row before looping, in milliseconds.
    pub default_sample_interval_ms: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            csv_path: String::new(),
            speed: 1.0,
            loop_replay: true,
            default_sample_interval_ms: 1_000,
        }
    }
}

/// State of the replay engine.
#[derive(Debug)]
pub struct ReplayState {
    /// Current position in the dataset (row index).
    pub position: AtomicUsize,
    /// Total rows in the dataset.
    pub total_rows: AtomicUsize,
    /// Whether replay is running.
    pub running: AtomicBool,
    /// Samples withheld because their source was not enabled.
    pub withheld: AtomicUsize,
}

impl Default for ReplayState {
    fn default() -> Self {
        Self {
            position: AtomicUsize::new(0),
            total_rows: AtomicUsize::new(0),
            running: AtomicBool::new(false),
            withheld: AtomicUsize::new(0),
        }
    }
}

/// Dataset row for replay.
#[derive(Debug, Clone, PartialEq, Deserialize)]
struct DataRow {
    timestamp_ms: u64,
    source: String,
    counter: String,
    value: f64,
}

/// Subscription side of the replayed runtime.
///
/// Remembers which sources the collector enabled and at which interval.
#[derive(Debug, Default)]
pub struct ReplayRuntime {
    enabled: Mutex<HashMap<String, Duration>>,
}

impl ReplayRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self, source_name: &str) -> bool {
        self.enabled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(source_name)
    }

    /// Interval the collector requested for `source_name`.
    pub fn interval_of(&self, source_name: &str) -> Option<Duration> {
        self.enabled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source_name)
            .copied()
    }
}

impl CounterRuntime for ReplayRuntime {
    fn enable_source(&self, source_name: &str, interval: Duration) -> Result<(), RuntimeError> {
        info!("Replay source {} enabled every {:?}", source_name, interval);
        self.enabled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source_name.to_string(), interval);
        Ok(())
    }

    fn disable_source(&self, source_name: &str) -> Result<(), RuntimeError> {
        let removed = self
            .enabled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(source_name);
        match removed {
            Some(_) => Ok(()),
            None => Err(RuntimeError::UnknownSource(source_name.to_string())),
        }
    }
}

/// Replay engine that feeds a dataset to a counter listener.
pub struct ReplayEngine {
    config: ReplayConfig,
    state: Arc<ReplayState>,
    runtime: Arc<ReplayRuntime>,
    rows: Vec<DataRow>,
}

impl ReplayEngine {
    /// Create a new replay engine from a CSV file.
    pub fn from_csv(config: ReplayConfig, runtime: Arc<ReplayRuntime>) -> Result<Self, ReplayError> {
        let path = Path::new(&config.csv_path);
        if !path.exists() {
            return Err(ReplayError::FileNotFound(config.csv_path.clone()));
        }
        if !(config.speed.is_finite() && config.speed > 0.0) {
            return Err(ReplayError::InvalidFormat(format!(
                "Replay speed must be positive, got {}",
                config.speed
            )));
        }

        let rows = Self::parse_csv(path)?;
        if rows.is_empty() {
            return Err(ReplayError::EmptyDataset);
        }

        let state = Arc::new(ReplayState::default());
        state.total_rows.store(rows.len(), Ordering::SeqCst);

        Ok(Self {
            config,
            state,
            runtime,
            rows,
        })
    }

    /// Parse a CSV file into rows sorted by timestamp.
    fn parse_csv(path: &Path) -> Result<Vec<DataRow>, ReplayError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)?;

        let headers = reader.headers()?.clone();
        let expected = ["timestamp_ms", "source", "counter", "value"];
        if headers.iter().ne(expected.iter().copied()) {
            return Err(ReplayError::InvalidFormat(format!(
                "Columns must be '{}'",
                expected.join(",")
            )));
        }

        let mut rows = Vec::new();
        for result in reader.deserialize() {
            let row: DataRow = result?;
            if row.source.is_empty() || row.counter.is_empty() {
                return Err(ReplayError::InvalidFormat(format!(
                    "Empty source or counter at timestamp {}",
                    row.timestamp_ms
                )));
            }
            rows.push(row);
        }

        // Stable: rows sharing a timestamp keep file order
        rows.sort_by_key(|r| r.timestamp_ms);
        Ok(rows)
    }

    /// Get the replay state.
    pub fn state(&self) -> Arc<ReplayState> {
        Arc::clone(&self.state)
    }

    /// Every `(source, counter)` pair in the dataset, for use as the
    /// collector configuration when none is given.
    pub fn collection_requests(&self) -> Vec<CollectionRequest> {
        self.rows
            .iter()
            .map(|r| (r.source.as_str(), r.counter.as_str()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|(source, counter)| CollectionRequest::new(source, counter))
            .collect()
    }

    /// Start the replay loop (runs until stopped or the dataset ends).
    pub async fn run(&self, listener: Arc<dyn CounterListener>) {
        self.state.running.store(true, Ordering::SeqCst);
        info!(
            "Starting replay: speed={}, loop={}",
            self.config.speed, self.config.loop_replay
        );

        let mut announced: HashSet<String> = HashSet::new();

        loop {
            if !self.state.running.load(Ordering::SeqCst) {
                break;
            }

            let position = self.state.position.load(Ordering::SeqCst);

            if position >= self.rows.len() {
                if self.config.loop_replay {
                    info!("Dataset complete, looping...");
                    self.state.position.store(0, Ordering::SeqCst);
                    continue;
                } else {
                    info!("Dataset complete, stopping");
                    for source in &announced {
                        listener.on_source_removed(source);
                    }
                    self.state.running.store(false, Ordering::SeqCst);
                    break;
                }
            }

            let row = &self.rows[position];
            if announced.insert(row.source.clone()) {
                listener.on_source_discovered(&row.source);
            }
            self.deliver(row, listener.as_ref());

            self.state.position.fetch_add(1, Ordering::SeqCst);
            update_replay_metrics(position + 1, self.rows.len(), self.config.speed);

            let base_interval_ms = match self.rows.get(position + 1) {
                Some(next) => next.timestamp_ms - row.timestamp_ms,
                None => self.config.default_sample_interval_ms,
            };

            let sleep_ms = (base_interval_ms as f64 / self.config.speed) as u64;
            if sleep_ms > 0 {
                sleep(Duration::from_millis(sleep_ms)).await;
            }
        }
    }

    /// Deliver one row if its source is enabled.
    fn deliver(&self, row: &DataRow, listener: &dyn CounterListener) {
        let interval = match self.runtime.interval_of(&row.source) {
            Some(interval) => interval,
            None => {
                self.state.withheld.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        debug!(
            "Delivering {}|{} = {} at {}",
            row.source, row.counter, row.value, row.timestamp_ms
        );
        let payload = json!({
            "Name": row.counter,
            "DisplayName": row.counter,
            "Mean": row.value,
            "Count": 1,
            "IntervalSec": interval.as_secs_f64(),
            "CounterType": "Mean",
        });
        listener.on_sample_delivered(&row.source, &payload);
        increment_samples_delivered();
    }

    /// Stop the replay.
    pub fn stop(&self) {
        self.state.running.store(false, Ordering::SeqCst);
    }

    /// Get dataset info.
    pub fn dataset_info(&self) -> DatasetInfo {
        let duration_ms = match (self.rows.first(), self.rows.last()) {
            (Some(first), Some(last)) => last.timestamp_ms - first.timestamp_ms,
            _ => 0,
        };
        let sources: BTreeSet<&str> = self.rows.iter().map(|r| r.source.as_str()).collect();

        DatasetInfo {
            source_count: sources.len(),
            row_count: self.rows.len(),
            duration_ms,
        }
    }
}

/// Dataset information.
#[derive(Debug, Clone)]
pub struct DatasetInfo {
    pub source_count: usize,
    pub row_count: usize,
    pub duration_ms: u64,
}

/// Replay errors.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Empty dataset")]
    EmptyDataset,
}
