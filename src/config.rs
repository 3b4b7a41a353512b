// EVTC - Event counter collection
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Configuration types for EVTC

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CollectorError, Result};

/// Flush period used when none is configured.
pub const DEFAULT_REFRESH_INTERVAL_SECS: f64 = 60.0;

/// Interval substituted for a refresh interval that cannot be used.
pub const FALLBACK_REFRESH_INTERVAL_SECS: f64 = 1.0;

/// Longest accepted refresh interval (one year).
pub const MAX_REFRESH_INTERVAL_SECS: f64 = 365.0 * 24.0 * 3600.0;

/// Convert a refresh interval in seconds, or `None` when it is zero,
/// negative, non-finite or above [`MAX_REFRESH_INTERVAL_SECS`].
pub fn usable_refresh_interval(secs: f64) -> Option<Duration> {
    if secs.is_finite() && secs > 0.0 && secs <= MAX_REFRESH_INTERVAL_SECS {
        Duration::try_from_secs_f64(secs).ok().filter(|d| !d.is_zero())
    } else {
        None
    }
}

/// The fallback interval as a [`Duration`].
pub fn fallback_refresh_interval() -> Duration {
    Duration::from_secs_f64(FALLBACK_REFRESH_INTERVAL_SECS)
}

/// One operator-configured (source, counter) pair to collect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CollectionRequest {
    /// Name of the publishing source
    pub source_name: String,
    /// Name of the counter within that source
    pub counter_name: String,
}

impl CollectionRequest {
    pub fn new(source_name: impl Into<String>, counter_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            counter_name: counter_name.into(),
        }
    }

    /// Empty names are accepted but never match a sample.
    pub fn is_well_formed(&self) -> bool {
        !self.source_name.is_empty() && !self.counter_name.is_empty()
    }
}

/// Collector-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CollectorConfig {
    /// Counters to collect
    #[serde(default)]
    pub counters: Vec<CollectionRequest>,

    /// Window length and publisher refresh interval, in seconds (default: 60)
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: f64,
}

fn default_refresh_interval() -> f64 {
    DEFAULT_REFRESH_INTERVAL_SECS
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            counters: Vec::new(),
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
        }
    }
}

impl CollectorConfig {
    /// Create a configuration with a custom refresh interval
    pub fn with_refresh_interval(refresh_interval_secs: f64) -> Self {
        Self {
            refresh_interval_secs,
            ..Default::default()
        }
    }

    /// Add a counter to collect
    pub fn with_counter(
        mut self,
        source_name: impl Into<String>,
        counter_name: impl Into<String>,
    ) -> Self {
        self.counters
            .push(CollectionRequest::new(source_name, counter_name));
        self
    }

    /// Parse a JSON configuration document
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            CollectorError::InvalidConfig(format!("Failed to read '{}': {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }

    /// Whether the configured interval has to be replaced by the fallback.
    pub fn interval_needs_default(&self) -> bool {
        usable_refresh_interval(self.refresh_interval_secs).is_none()
    }

    /// The refresh interval actually used for subscriptions and flushes.
    pub fn effective_refresh_interval(&self) -> Duration {
        usable_refresh_interval(self.refresh_interval_secs)
            .unwrap_or_else(fallback_refresh_interval)
    }
}
